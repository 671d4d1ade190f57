//! The error surface.
//!
//! Two tiers: [`Error::Usage`] covers API misuse detected before any driver
//! work happens (these are also logged at the call site), while
//! [`Error::Backend`] carries one of the closed [`ErrorCode`] set plus a
//! message that includes whatever synchronous error state the backend
//! drained from the driver.

use std::fmt;

/// Error codes for recoverable backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Could not initialize the main GPU object, usually due to failed
    /// extension loading.
    FailedInit,
    /// Could not generate a shader, usually due to compilation or linking
    /// issues.
    FailedShaderGen,
    /// Could not set a uniform, usually due to the uniform not existing or
    /// a type mismatch.
    FailedShaderUniformSet,
    /// Could not generate a buffer of some type.
    FailedBufferGen,
    /// Could not generate a texture.
    FailedTextureGen,
    /// Could not create a target object: an underlying object failed to
    /// generate or the framebuffer was ultimately incomplete.
    FailedTargetCreation,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FailedInit => "FAILED_INIT",
            Self::FailedShaderGen => "FAILED_SHADER_GEN",
            Self::FailedShaderUniformSet => "FAILED_SHADER_UNIFORM_SET",
            Self::FailedBufferGen => "FAILED_BUFFER_GEN",
            Self::FailedTextureGen => "FAILED_TEXTURE_GEN",
            Self::FailedTargetCreation => "FAILED_TARGET_CREATION",
        };
        f.write_str(name)
    }
}

/// The library error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A recoverable backend failure.
    #[error("{code}: {message}")]
    Backend { code: ErrorCode, message: String },
    /// The API was used incorrectly; no backend state was touched.
    #[error("user error: {0}")]
    Usage(String),
}

impl Error {
    pub fn backend(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// The backend error code, if this is a backend error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Backend { code, .. } => Some(*code),
            Self::Usage(_) => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_display_includes_code() {
        let err = Error::backend(ErrorCode::FailedShaderGen, "no dice");
        assert_eq!(err.to_string(), "FAILED_SHADER_GEN: no dice");
        assert_eq!(err.code(), Some(ErrorCode::FailedShaderGen));
    }

    #[test]
    fn usage_has_no_code() {
        let err = Error::usage("bad call");
        assert_eq!(err.code(), None);
        assert_eq!(err.to_string(), "user error: bad call");
    }
}
