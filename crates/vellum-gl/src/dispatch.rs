//! Command dispatch.
//!
//! Walks the compiled tree from the root pass down. A pass's state is set
//! up when its first child is visited and torn down when its last child is
//! visited, whether that child is a leaf or a nested pass; a leaf that
//! follows a nested pass gets the framebuffer and program rebound
//! defensively, since the nested subtree ran its own state. Leaves issue
//! draws and blits.

use std::ffi::c_void;

use gl::types::{GLboolean, GLenum, GLint, GLsizei, GLuint};
use vellum_core::backend::Backend as _;
use vellum_core::instr::{Instr, InstrTree, PassState};
use vellum_core::{
    CallLog, Commands, Error, ErrorCode, Gpu, Result, ScalarType, TexFormat, Texture, Value,
    WriteMask,
};

use crate::shader::{GlShaderState, Reflection};
use crate::{buffer, diag, shader, texture, GlBackend};

const MAX_COLOR_ATTACHMENTS: u32 = 32;
const MAX_TEXTURE_UNITS: u32 = 32;

pub(crate) fn dispatch(backend: &GlBackend, gpu: &Gpu, commands: &Commands) -> Result<()> {
    backend.flush(gpu)?;

    let log = commands.debug_calls().map(|debug| &debug.run);

    // A pass with no targets draws into whatever framebuffer the caller
    // had bound on entry.
    let mut external_fb: GLint = 0;
    unsafe { gl::GetIntegerv(gl::FRAMEBUFFER_BINDING, &mut external_fb) };

    let stack = backend.framebuffer_snapshot();
    let tree = commands.tree();
    let Some(root) = tree.root() else {
        return Ok(());
    };

    let ctx = DispatchCtx {
        tree,
        stack: &stack,
        external_fb: external_fb as GLuint,
        log,
    };
    ctx.run_pass(root)
}

struct DispatchCtx<'a> {
    tree: &'a InstrTree,
    stack: &'a [GLuint],
    external_fb: GLuint,
    log: Option<&'a CallLog>,
}

impl DispatchCtx<'_> {
    /// Execute one pass: set up at the first child, run each child (leaves
    /// directly, nested passes recursively), tear down at the last child.
    fn run_pass(&self, index: usize) -> Result<()> {
        let node = self.tree.node(index);
        if node.children.is_empty() {
            return Ok(());
        }
        let pass = self.tree.pass(index);

        let depth = node.depth as usize;
        let framebuffer = if pass.targets.is_empty() {
            self.external_fb
        } else {
            framebuffer_at(self.stack, depth)?
        };
        let blit_read = framebuffer_at(self.stack, depth + 1)?;
        let blit_draw = framebuffer_at(self.stack, depth + 2)?;

        let Some(pass_shader) = &pass.shader else {
            return Err(Error::backend(
                ErrorCode::FailedShaderGen,
                "pass has no shader in scope",
            ));
        };
        let program = shader::state(pass_shader)?;

        for (position, &child) in node.children.iter().enumerate() {
            let child_is_pass = matches!(self.tree.node(child).instr, Instr::Pass(_));

            if position == 0 {
                setup_teardown(framebuffer, blit_read, blit_draw, pass, program, self.log, false)?;
            } else if !child_is_pass {
                let prev = node.children[position - 1];
                if matches!(self.tree.node(prev).instr, Instr::Pass(_)) {
                    unsafe {
                        gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer);
                        gl::UseProgram(program.program);
                    }
                }
            }

            match &self.tree.node(child).instr {
                Instr::Pass(_) => self.run_pass(child)?,
                Instr::Vertices { buffers, instances } => {
                    draw_vertices(buffers, program, *instances, self.log)?;
                }
                Instr::Blit { src } => {
                    blit_leaf(src, pass, framebuffer, blit_read, program, self.log)?;
                }
            }

            if position == node.children.len() - 1 {
                setup_teardown(framebuffer, blit_read, blit_draw, pass, program, self.log, true)?;
            }
        }

        Ok(())
    }
}

fn framebuffer_at(stack: &[GLuint], index: usize) -> Result<GLuint> {
    stack.get(index).copied().ok_or_else(|| {
        Error::backend(
            ErrorCode::FailedTargetCreation,
            "framebuffer stack is shorter than the pass tree",
        )
    })
}

/// Shared pass setup and teardown. Teardown mirrors setup: targets are
/// detached at the same attachment points, textures unbound at the same
/// units, and the uniform-block base cleared; scalar uniform writes are
/// not undone.
fn setup_teardown(
    framebuffer: GLuint,
    blit_read: GLuint,
    blit_draw: GLuint,
    pass: &PassState,
    program: &GlShaderState,
    log: Option<&CallLog>,
    teardown: bool,
) -> Result<()> {
    unsafe {
        gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer);
        gl::UseProgram(program.program);
    }
    if let Some(log) = log {
        log.push(format!("glBindFramebuffer (GL_FRAMEBUFFER, {framebuffer})"));
        log.push(format!("glUseProgram ({})", program.program));
    }

    if pass.dest.explicit {
        let [x, y, width, height] = pass.dest.value;
        unsafe { gl::Viewport(x, y, width, height) };
    }

    let mask = pass.write_mask.value;
    unsafe {
        gl::ColorMask(
            as_gl_bool(mask.contains(WriteMask::COLOR_RED)),
            as_gl_bool(mask.contains(WriteMask::COLOR_GREEN)),
            as_gl_bool(mask.contains(WriteMask::COLOR_BLUE)),
            as_gl_bool(mask.contains(WriteMask::COLOR_ALPHA)),
        );
        gl::DepthMask(as_gl_bool(mask.contains(WriteMask::DEPTH)));
    }

    // Color attachments index in order of appearance among non-depth
    // targets; at most one depth target.
    let mut colors: u32 = 0;
    let mut depths: u32 = 0;
    for target in &pass.targets {
        let state = texture::state(&target.texture)?;
        let id = if teardown { 0 } else { state.id };
        let tex_target = if target.texture.msaa() > 0 {
            gl::TEXTURE_2D_MULTISAMPLE
        } else {
            gl::TEXTURE_2D
        };
        let attachment = match target.texture.format() {
            TexFormat::Depth => {
                if depths > 0 {
                    return Err(Error::backend(
                        ErrorCode::FailedTargetCreation,
                        "a pass may carry at most one depth target",
                    ));
                }
                depths += 1;
                gl::DEPTH_ATTACHMENT
            }
            TexFormat::Color(_) => {
                if colors >= MAX_COLOR_ATTACHMENTS {
                    return Err(Error::backend(
                        ErrorCode::FailedTargetCreation,
                        "too many color targets on one pass",
                    ));
                }
                let attachment = gl::COLOR_ATTACHMENT0 + colors;
                colors += 1;
                attachment
            }
        };
        unsafe { gl::FramebufferTexture2D(gl::FRAMEBUFFER, attachment, tex_target, id, 0) };
    }

    // Some implementations insist on at least one draw buffer.
    let draw_buffers: Vec<GLenum> = (0..colors.max(1))
        .map(|slot| gl::COLOR_ATTACHMENT0 + slot)
        .collect();
    unsafe { gl::DrawBuffers(draw_buffers.len() as GLsizei, draw_buffers.as_ptr()) };

    if !teardown {
        let status = unsafe { gl::CheckFramebufferStatus(gl::FRAMEBUFFER) };
        if status != gl::FRAMEBUFFER_COMPLETE {
            return Err(diag::gl_error(
                ErrorCode::FailedTargetCreation,
                "Failed to complete framebuffer",
            ));
        }
        unsafe {
            gl::ClearColor(0.0, 0.0, 0.0, 0.0);
            gl::Clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
        }
        if let Some(log) = log {
            log.push("glClear (GL_COLOR_BUFFER_BIT | GL_DEPTH_BUFFER_BIT)".into());
        }
    }

    bind_uniforms(pass, program, framebuffer, blit_read, blit_draw, log, teardown)
}

/// Bind (or unbind) the pass's uniforms in insertion order.
fn bind_uniforms(
    pass: &PassState,
    program: &GlShaderState,
    framebuffer: GLuint,
    blit_read: GLuint,
    blit_draw: GLuint,
    log: Option<&CallLog>,
    teardown: bool,
) -> Result<()> {
    let mut unit: u32 = 0;

    for (name, value) in pass.uniforms.iter_ordered() {
        let Some(uniform) = program.reflection.uniform(name) else {
            return Err(Error::backend(
                ErrorCode::FailedShaderUniformSet,
                format!("Uniform \"{name}\" does not exist in shader"),
            ));
        };
        let location = uniform.location;

        match value {
            Value::Texture(tex) => {
                if unit >= MAX_TEXTURE_UNITS {
                    return Err(Error::backend(
                        ErrorCode::FailedShaderUniformSet,
                        "too many texture uniforms on one pass",
                    ));
                }
                // MSAA textures cannot be sampled; bind the single-sample
                // shadow, resolving into it first.
                let sampled = if tex.msaa() > 0 {
                    let sampled = texture::shadow(tex, log)?;
                    if !teardown {
                        resolve_msaa(tex, &sampled, framebuffer, blit_read, blit_draw, program, log)?;
                    }
                    sampled
                } else {
                    tex.clone()
                };
                let state = texture::state(&sampled)?;
                let bind_target = if tex.is_cubemap() {
                    gl::TEXTURE_CUBE_MAP
                } else {
                    gl::TEXTURE_2D
                };
                let unit_int = unit as GLint;
                let id = if teardown { 0 } else { state.id };
                unsafe {
                    gl::ActiveTexture(gl::TEXTURE0 + unit);
                    gl::BindTexture(bind_target, id);
                    gl::Uniform1iv(location, 1, &unit_int);
                    gl::ActiveTexture(gl::TEXTURE0);
                }
                if let Some(log) = log {
                    log.push(format!("glBindTexture (unit {unit}, {id})"));
                }
                unit += 1;
            }
            Value::Buffer(buf) => {
                let Some(&block) = program.reflection.uniform_blocks.get(&location) else {
                    return Err(Error::backend(
                        ErrorCode::FailedShaderUniformSet,
                        format!("Uniform \"{name}\" is not inside a uniform block"),
                    ));
                };
                let ubo = buffer::uniform_id(buf)?;
                let id = if teardown { 0 } else { ubo };
                unsafe {
                    gl::UniformBlockBinding(program.program, block, 0);
                    gl::BindBufferBase(gl::UNIFORM_BUFFER, 0, id);
                }
                if let Some(log) = log {
                    log.push(format!("glBindBufferBase (GL_UNIFORM_BUFFER, 0, {id})"));
                }
            }
            Value::Bool(b) => {
                if !teardown {
                    unsafe { gl::Uniform1i(location, GLint::from(*b)) };
                }
            }
            Value::Int(i) => {
                if !teardown {
                    unsafe { gl::Uniform1i(location, *i) };
                }
            }
            Value::UInt(u) => {
                if !teardown {
                    unsafe { gl::Uniform1ui(location, *u) };
                }
            }
            Value::Float(f) => {
                if !teardown {
                    unsafe { gl::Uniform1f(location, *f) };
                }
            }
            Value::Vec2(v) => {
                if !teardown {
                    unsafe { gl::Uniform2fv(location, 1, v.as_ptr()) };
                }
            }
            Value::Vec3(v) => {
                if !teardown {
                    unsafe { gl::Uniform3fv(location, 1, v.as_ptr()) };
                }
            }
            Value::Vec4(v) => {
                if !teardown {
                    unsafe { gl::Uniform4fv(location, 1, v.as_ptr()) };
                }
            }
            Value::Mat4(m) => {
                if !teardown {
                    // Column-major, passed through unchanged.
                    unsafe { gl::UniformMatrix4fv(location, 1, gl::FALSE, m.as_ptr()) };
                }
            }
            other => {
                return Err(Error::backend(
                    ErrorCode::FailedShaderUniformSet,
                    format!(
                        "Uniform \"{name}\" carries unsupported value type {}",
                        other.type_name()
                    ),
                ));
            }
        }
    }

    Ok(())
}

/// Blit a multisampled texture into its single-sample shadow using the two
/// scratch framebuffers, then restore the pass framebuffer and program.
fn resolve_msaa(
    msaa: &Texture,
    sampled: &Texture,
    framebuffer: GLuint,
    blit_read: GLuint,
    blit_draw: GLuint,
    program: &GlShaderState,
    log: Option<&CallLog>,
) -> Result<()> {
    let read_id = texture::state(msaa)?.id;
    let draw_id = texture::state(sampled)?.id;

    let (attachment, buffer_bit) = match msaa.format() {
        TexFormat::Depth => (gl::DEPTH_ATTACHMENT, gl::DEPTH_BUFFER_BIT),
        TexFormat::Color(_) => (gl::COLOR_ATTACHMENT0, gl::COLOR_BUFFER_BIT),
    };

    let sides = [
        (blit_read, read_id, gl::TEXTURE_2D_MULTISAMPLE),
        (blit_draw, draw_id, gl::TEXTURE_2D),
    ];

    for (fb, id, tex_target) in sides {
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, fb);
            gl::FramebufferTexture2D(gl::FRAMEBUFFER, attachment, tex_target, id, 0);
        }
        let status = unsafe { gl::CheckFramebufferStatus(gl::FRAMEBUFFER) };
        if status != gl::FRAMEBUFFER_COMPLETE {
            return Err(diag::gl_error(
                ErrorCode::FailedTargetCreation,
                "Failed to complete framebuffer",
            ));
        }
    }

    let width = msaa.width();
    let height = msaa.height();
    unsafe {
        gl::BindFramebuffer(gl::READ_FRAMEBUFFER, blit_read);
        gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, blit_draw);
        gl::BlitFramebuffer(
            0, 0, width, height, 0, 0, width, height, buffer_bit, gl::NEAREST,
        );
    }
    if let Some(log) = log {
        log.push(format!("glBlitFramebuffer (resolve {width}x{height})"));
    }

    for (fb, _, tex_target) in sides {
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, fb);
            gl::FramebufferTexture2D(gl::FRAMEBUFFER, attachment, tex_target, 0, 0);
        }
    }

    unsafe {
        gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer);
        gl::UseProgram(program.program);
    }

    Ok(())
}

fn scalar_gl(ty: ScalarType) -> GLenum {
    match ty {
        ScalarType::Float => gl::FLOAT,
        ScalarType::UByte => gl::UNSIGNED_BYTE,
    }
}

fn as_gl_bool(value: bool) -> GLboolean {
    if value {
        gl::TRUE
    } else {
        gl::FALSE
    }
}

/// Bind the first buffer's VAO, point every segment of every buffer at its
/// attribute, and issue the draw. The vertex count is the largest
/// `bytes / stride` across the buffers.
fn draw_vertices(
    buffers: &[vellum_core::Buffer],
    program: &GlShaderState,
    instances: u32,
    log: Option<&CallLog>,
) -> Result<()> {
    let Some(first) = buffers.first() else {
        return Ok(());
    };
    let (vao, _) = buffer::vertex_ids(first)?;
    unsafe { gl::BindVertexArray(vao) };

    let mut max_length: usize = 0;

    for buf in buffers {
        let (_, vbo) = buffer::vertex_ids(buf)?;
        unsafe { gl::BindBuffer(gl::ARRAY_BUFFER, vbo) };

        let layout = buf.layout();
        let stride = buffer::layout_stride(layout);
        if stride == 0 {
            return Err(Error::backend(
                ErrorCode::FailedBufferGen,
                "buffer layout has zero stride",
            ));
        }
        let offsets = buffer::segment_offsets(layout);

        for (segment, offset) in layout.iter().zip(offsets) {
            let location = attribute_location(&program.reflection, &segment.name)?;
            unsafe {
                gl::VertexAttribPointer(
                    location,
                    segment.count as GLint,
                    scalar_gl(segment.ty),
                    gl::FALSE,
                    stride as GLsizei,
                    offset as *const c_void,
                );
                gl::VertexAttribDivisor(location, segment.instance_rate);
                gl::EnableVertexAttribArray(location);
            }
        }

        max_length = max_length.max(buf.size() / stride);
    }

    let count = max_length as GLsizei;
    if instances > 1 {
        unsafe { gl::DrawArraysInstanced(gl::TRIANGLES, 0, count, instances as GLsizei) };
        if let Some(log) = log {
            log.push(format!(
                "glDrawArraysInstanced (GL_TRIANGLES, 0, {count}, {instances})"
            ));
        }
    } else {
        unsafe { gl::DrawArrays(gl::TRIANGLES, 0, count) };
        if let Some(log) = log {
            log.push(format!("glDrawArrays (GL_TRIANGLES, 0, {count})"));
        }
    }

    for buf in buffers {
        for segment in buf.layout() {
            let location = attribute_location(&program.reflection, &segment.name)?;
            unsafe { gl::DisableVertexAttribArray(location) };
        }
    }

    unsafe { gl::BindVertexArray(0) };
    Ok(())
}

fn attribute_location(reflection: &Reflection, name: &str) -> Result<GLuint> {
    match reflection.attribute(name) {
        Some(attribute) if attribute.location >= 0 => Ok(attribute.location as GLuint),
        _ => Err(Error::backend(
            ErrorCode::FailedShaderUniformSet,
            format!("Attribute \"{name}\" does not exist in shader"),
        )),
    }
}

/// Copy a source texture into the pass's output, covering the pass's dest
/// rect, through the scratch read framebuffer.
fn blit_leaf(
    src: &Texture,
    pass: &PassState,
    framebuffer: GLuint,
    blit_read: GLuint,
    program: &GlShaderState,
    log: Option<&CallLog>,
) -> Result<()> {
    let src_state = texture::state(src)?;

    let (attachment, buffer_bit) = match src.format() {
        TexFormat::Depth => (gl::DEPTH_ATTACHMENT, gl::DEPTH_BUFFER_BIT),
        TexFormat::Color(_) => (gl::COLOR_ATTACHMENT0, gl::COLOR_BUFFER_BIT),
    };
    let tex_target = if src.msaa() > 0 {
        gl::TEXTURE_2D_MULTISAMPLE
    } else {
        gl::TEXTURE_2D
    };

    unsafe {
        gl::BindFramebuffer(gl::FRAMEBUFFER, blit_read);
        gl::FramebufferTexture2D(gl::FRAMEBUFFER, attachment, tex_target, src_state.id, 0);
    }
    let status = unsafe { gl::CheckFramebufferStatus(gl::FRAMEBUFFER) };
    if status != gl::FRAMEBUFFER_COMPLETE {
        return Err(diag::gl_error(
            ErrorCode::FailedTargetCreation,
            "Failed to complete framebuffer",
        ));
    }

    let dest = pass.dest.value;
    unsafe {
        gl::BindFramebuffer(gl::READ_FRAMEBUFFER, blit_read);
        gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, framebuffer);
        gl::BlitFramebuffer(
            0,
            0,
            src.width(),
            src.height(),
            dest[0],
            dest[1],
            dest[2],
            dest[3],
            buffer_bit,
            gl::NEAREST,
        );
    }
    if let Some(log) = log {
        log.push(format!(
            "glBlitFramebuffer ({}x{} -> {:?})",
            src.width(),
            src.height(),
            dest
        ));
    }

    unsafe {
        gl::BindFramebuffer(gl::FRAMEBUFFER, blit_read);
        gl::FramebufferTexture2D(gl::FRAMEBUFFER, attachment, tex_target, 0, 0);
        gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer);
        gl::UseProgram(program.program);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::AttributeInfo;

    #[test]
    fn framebuffer_lookup_within_stack() {
        let stack: [GLuint; 4] = [7, 8, 9, 10];
        assert_eq!(framebuffer_at(&stack, 0).unwrap(), 7);
        assert_eq!(framebuffer_at(&stack, 3).unwrap(), 10);
    }

    #[test]
    fn framebuffer_lookup_past_stack_fails() {
        let stack: [GLuint; 2] = [1, 2];
        let err = framebuffer_at(&stack, 2).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FailedTargetCreation));
    }

    #[test]
    fn scalar_types_map_to_gl() {
        assert_eq!(scalar_gl(ScalarType::Float), gl::FLOAT);
        assert_eq!(scalar_gl(ScalarType::UByte), gl::UNSIGNED_BYTE);
    }

    #[test]
    fn gl_bools() {
        assert_eq!(as_gl_bool(true), gl::TRUE);
        assert_eq!(as_gl_bool(false), gl::FALSE);
    }

    #[test]
    fn attribute_lookup_uses_driver_location() {
        let mut reflection = Reflection::default();
        reflection.attributes.insert(
            "vertexPosition".into(),
            AttributeInfo {
                location: 3,
                count: 1,
                ty: gl::FLOAT_VEC3,
            },
        );
        assert_eq!(attribute_location(&reflection, "vertexPosition").unwrap(), 3);
    }

    #[test]
    fn missing_attribute_is_an_error() {
        let reflection = Reflection::default();
        let err = attribute_location(&reflection, "instanceOffset").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FailedShaderUniformSet));
        assert!(err.to_string().contains("\"instanceOffset\""));
    }

    #[test]
    fn negative_attribute_location_is_an_error() {
        let mut reflection = Reflection::default();
        reflection.attributes.insert(
            "vertexNormal".into(),
            AttributeInfo {
                location: -1,
                count: 1,
                ty: gl::FLOAT_VEC3,
            },
        );
        assert!(attribute_location(&reflection, "vertexNormal").is_err());
    }
}
