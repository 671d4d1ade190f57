//! Driver diagnostics: the drained `glGetError` queue and the optional
//! debug-layer callback.

use std::fmt::Write as _;

use gl::types::{GLchar, GLenum, GLsizei, GLuint};
use tracing::debug;
use vellum_core::{Error, ErrorCode};

/// The symbolic name of a synchronous GL error tag.
pub(crate) fn error_tag(error: GLenum) -> &'static str {
    match error {
        gl::INVALID_ENUM => "GL_INVALID_ENUM",
        gl::INVALID_VALUE => "GL_INVALID_VALUE",
        gl::INVALID_OPERATION => "GL_INVALID_OPERATION",
        gl::STACK_OVERFLOW => "GL_STACK_OVERFLOW",
        gl::STACK_UNDERFLOW => "GL_STACK_UNDERFLOW",
        gl::OUT_OF_MEMORY => "GL_OUT_OF_MEMORY",
        gl::INVALID_FRAMEBUFFER_OPERATION => "GL_INVALID_FRAMEBUFFER_OPERATION",
        _ => "Error Not Recognized!",
    }
}

/// Append the drained error tags to a base message.
pub(crate) fn format_error_report(message: &str, tags: &[GLenum]) -> String {
    let mut report = String::from(message);
    report.push_str("\nglGetError () BEGIN:\n");
    for (index, &tag) in tags.iter().enumerate() {
        let _ = writeln!(report, "  {index}: {} (0x{tag:x})", error_tag(tag));
    }
    report.push_str("glGetError () END");
    report
}

/// Drain the context's synchronous error queue.
pub(crate) fn drain_errors() -> Vec<GLenum> {
    let mut tags = Vec::new();
    loop {
        let tag = unsafe { gl::GetError() };
        if tag == gl::NO_ERROR {
            break;
        }
        tags.push(tag);
    }
    tags
}

/// Build a backend error whose message carries the drained error queue.
pub(crate) fn gl_error(code: ErrorCode, message: impl AsRef<str>) -> Error {
    Error::backend(code, format_error_report(message.as_ref(), &drain_errors()))
}

/// Discard any stale error state before a sequence of driver calls.
pub(crate) fn clear_errors() {
    while unsafe { gl::GetError() } != gl::NO_ERROR {}
}

fn source_name(source: GLenum) -> &'static str {
    match source {
        gl::DEBUG_SOURCE_API => "GL_DEBUG_SOURCE_API",
        gl::DEBUG_SOURCE_WINDOW_SYSTEM => "GL_DEBUG_SOURCE_WINDOW_SYSTEM",
        gl::DEBUG_SOURCE_SHADER_COMPILER => "GL_DEBUG_SOURCE_SHADER_COMPILER",
        gl::DEBUG_SOURCE_THIRD_PARTY => "GL_DEBUG_SOURCE_THIRD_PARTY",
        gl::DEBUG_SOURCE_APPLICATION => "GL_DEBUG_SOURCE_APPLICATION",
        _ => "GL_DEBUG_SOURCE_OTHER",
    }
}

fn type_name(kind: GLenum) -> &'static str {
    match kind {
        gl::DEBUG_TYPE_ERROR => "GL_DEBUG_TYPE_ERROR",
        gl::DEBUG_TYPE_DEPRECATED_BEHAVIOR => "GL_DEBUG_TYPE_DEPRECATED_BEHAVIOR",
        gl::DEBUG_TYPE_UNDEFINED_BEHAVIOR => "GL_DEBUG_TYPE_UNDEFINED_BEHAVIOR",
        gl::DEBUG_TYPE_PORTABILITY => "GL_DEBUG_TYPE_PORTABILITY",
        gl::DEBUG_TYPE_PERFORMANCE => "GL_DEBUG_TYPE_PERFORMANCE",
        gl::DEBUG_TYPE_MARKER => "GL_DEBUG_TYPE_MARKER",
        gl::DEBUG_TYPE_PUSH_GROUP => "GL_DEBUG_TYPE_PUSH_GROUP",
        gl::DEBUG_TYPE_POP_GROUP => "GL_DEBUG_TYPE_POP_GROUP",
        _ => "GL_DEBUG_TYPE_OTHER",
    }
}

fn severity_name(severity: GLenum) -> &'static str {
    match severity {
        gl::DEBUG_SEVERITY_LOW => "GL_DEBUG_SEVERITY_LOW",
        gl::DEBUG_SEVERITY_MEDIUM => "GL_DEBUG_SEVERITY_MEDIUM",
        gl::DEBUG_SEVERITY_HIGH => "GL_DEBUG_SEVERITY_HIGH",
        _ => "GL_DEBUG_SEVERITY_NOTIFICATION",
    }
}

/// Debug-layer callback installed under `USE_DEBUG_LAYERS`.
pub(crate) extern "system" fn debug_message(
    source: GLenum,
    kind: GLenum,
    _id: GLuint,
    severity: GLenum,
    length: GLsizei,
    message: *const GLchar,
    _user_param: *mut std::ffi::c_void,
) {
    let text = if message.is_null() || length < 0 {
        String::new()
    } else {
        let bytes =
            unsafe { std::slice::from_raw_parts(message.cast::<u8>(), length as usize) };
        String::from_utf8_lossy(bytes).into_owned()
    };
    debug!(
        "GL: direct GL message ({}, {}, {}): {text}",
        source_name(source),
        type_name(kind),
        severity_name(severity)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_have_symbolic_names() {
        assert_eq!(error_tag(gl::INVALID_ENUM), "GL_INVALID_ENUM");
        assert_eq!(error_tag(gl::OUT_OF_MEMORY), "GL_OUT_OF_MEMORY");
        assert_eq!(error_tag(0x1234), "Error Not Recognized!");
    }

    #[test]
    fn report_lists_drained_tags_in_order() {
        let report =
            format_error_report("Failed to link shader", &[gl::INVALID_ENUM, gl::INVALID_VALUE]);
        assert!(report.starts_with("Failed to link shader\nglGetError () BEGIN:\n"));
        assert!(report.contains("  0: GL_INVALID_ENUM (0x500)"));
        assert!(report.contains("  1: GL_INVALID_VALUE (0x501)"));
        assert!(report.ends_with("glGetError () END"));
    }

    #[test]
    fn report_with_no_tags_is_still_well_formed() {
        let report = format_error_report("boom", &[]);
        assert_eq!(report, "boom\nglGetError () BEGIN:\nglGetError () END");
    }
}
