//! Buffer materialization.
//!
//! A buffer's first realized use fixes its role: vertex-attribute source
//! (a VAO plus a VBO) or uniform block (a UBO). The other role is then a
//! loud usage error for the rest of the buffer's life.

use gl::types::{GLsizeiptr, GLuint};
use tracing::error;
use vellum_core::backend::RetiredHandle;
use vellum_core::{Buffer, CallLog, DataSegment, Error, ErrorCode, Gpu, Result};

use crate::diag;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Role {
    Vertex { vao: GLuint, vbo: GLuint },
    Uniform { ubo: GLuint },
}

/// Backend state attached to a [`Buffer`] once it is ensured.
pub(crate) struct GlBufferState {
    pub role: Role,
    gpu: Gpu,
}

impl Drop for GlBufferState {
    fn drop(&mut self) {
        match self.role {
            Role::Vertex { vao, vbo } => {
                if vbo > 0 {
                    self.gpu.retire(RetiredHandle::Buffer(vbo));
                }
                if vao > 0 {
                    self.gpu.retire(RetiredHandle::VertexArray(vao));
                }
            }
            Role::Uniform { ubo } => {
                if ubo > 0 {
                    self.gpu.retire(RetiredHandle::Buffer(ubo));
                }
            }
        }
    }
}

/// Ensure the buffer in the uniform role.
pub(crate) fn ensure_uniform<'a>(buffer: &'a Buffer, log: Option<&CallLog>) -> Result<&'a GlBufferState> {
    let state = buffer
        .backend_slot()
        .get_or_try_init(|| create_uniform(buffer, log))?;
    match state.role {
        Role::Uniform { .. } => Ok(state),
        Role::Vertex { .. } => {
            error!(
                "buffer previously initialized as a vertex buffer \
                 erroneously being used as a uniform buffer"
            );
            Err(Error::usage("buffer was previously initialized as a vertex buffer"))
        }
    }
}

/// Ensure the buffer in the vertex role. Requires a layout.
pub(crate) fn ensure_vertex<'a>(buffer: &'a Buffer, log: Option<&CallLog>) -> Result<&'a GlBufferState> {
    if buffer.backend_slot().get::<GlBufferState>().is_none() && buffer.layout().is_empty() {
        error!("buffer needs a layout specification to be used as an attribute source");
        return Err(Error::usage("buffer has no layout"));
    }
    let state = buffer
        .backend_slot()
        .get_or_try_init(|| create_vertex(buffer, log))?;
    match state.role {
        Role::Vertex { .. } => Ok(state),
        Role::Uniform { .. } => {
            error!(
                "buffer previously initialized as a uniform buffer \
                 erroneously being used as a vertex buffer"
            );
            Err(Error::usage("buffer was previously initialized as a uniform buffer"))
        }
    }
}

fn create_uniform(buffer: &Buffer, log: Option<&CallLog>) -> Result<GlBufferState> {
    let mut ubo: GLuint = 0;
    unsafe { gl::GenBuffers(1, &mut ubo) };
    if ubo == 0 {
        return Err(diag::gl_error(
            ErrorCode::FailedBufferGen,
            "Failed to generate uniform buffer object",
        ));
    }

    unsafe {
        gl::BindBuffer(gl::UNIFORM_BUFFER, ubo);
        gl::BufferData(
            gl::UNIFORM_BUFFER,
            buffer.size() as GLsizeiptr,
            buffer.data().as_ptr().cast(),
            gl::STATIC_DRAW,
        );
        gl::BindBuffer(gl::UNIFORM_BUFFER, 0);
    }
    if let Some(log) = log {
        log.push(format!("glBufferData (GL_UNIFORM_BUFFER, {})", buffer.size()));
    }

    Ok(GlBufferState {
        role: Role::Uniform { ubo },
        gpu: buffer.gpu().clone(),
    })
}

fn create_vertex(buffer: &Buffer, log: Option<&CallLog>) -> Result<GlBufferState> {
    let mut vao: GLuint = 0;
    unsafe { gl::GenVertexArrays(1, &mut vao) };
    if vao == 0 {
        return Err(diag::gl_error(
            ErrorCode::FailedBufferGen,
            "Failed to generate vertex array object",
        ));
    }

    let mut vbo: GLuint = 0;
    unsafe { gl::GenBuffers(1, &mut vbo) };
    if vbo == 0 {
        unsafe { gl::DeleteVertexArrays(1, &vao) };
        return Err(diag::gl_error(
            ErrorCode::FailedBufferGen,
            "Failed to generate vertex buffer object",
        ));
    }

    unsafe {
        gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
        gl::BufferData(
            gl::ARRAY_BUFFER,
            buffer.size() as GLsizeiptr,
            buffer.data().as_ptr().cast(),
            gl::STATIC_DRAW,
        );
        gl::BindBuffer(gl::ARRAY_BUFFER, 0);
    }
    if let Some(log) = log {
        log.push(format!("glBufferData (GL_ARRAY_BUFFER, {})", buffer.size()));
    }

    Ok(GlBufferState {
        role: Role::Vertex { vao, vbo },
        gpu: buffer.gpu().clone(),
    })
}

/// The VAO and VBO of a buffer already materialized in the vertex role.
pub(crate) fn vertex_ids(buffer: &Buffer) -> Result<(GLuint, GLuint)> {
    match buffer.backend_slot().get::<GlBufferState>().map(|s| s.role) {
        Some(Role::Vertex { vao, vbo }) => Ok((vao, vbo)),
        _ => Err(Error::backend(
            ErrorCode::FailedBufferGen,
            "buffer was never materialized as vertex data",
        )),
    }
}

/// The UBO of a buffer already materialized in the uniform role.
pub(crate) fn uniform_id(buffer: &Buffer) -> Result<GLuint> {
    match buffer.backend_slot().get::<GlBufferState>().map(|s| s.role) {
        Some(Role::Uniform { ubo }) => Ok(ubo),
        _ => Err(Error::backend(
            ErrorCode::FailedBufferGen,
            "buffer was never materialized as a uniform block",
        )),
    }
}

/// One vertex's footprint in bytes across all segments of a layout.
pub(crate) fn layout_stride(layout: &[DataSegment]) -> usize {
    layout
        .iter()
        .map(|segment| segment.count as usize * segment.ty.size())
        .sum()
}

/// Byte offsets of each segment within one interleaved vertex.
pub(crate) fn segment_offsets(layout: &[DataSegment]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(layout.len());
    let mut offset = 0;
    for segment in layout {
        offsets.push(offset);
        offset += segment.count as usize * segment.ty.size();
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::ScalarType;

    fn cube_layout() -> Vec<DataSegment> {
        vec![
            DataSegment::new("vertexPosition", ScalarType::Float, 3),
            DataSegment::new("vertexNormal", ScalarType::Float, 3),
            DataSegment::new("vertexTexCoord", ScalarType::Float, 2),
        ]
    }

    #[test]
    fn stride_sums_segment_footprints() {
        assert_eq!(layout_stride(&cube_layout()), 32);
        let mixed = [
            DataSegment::new("color", ScalarType::UByte, 4),
            DataSegment::new("pos", ScalarType::Float, 2),
        ];
        assert_eq!(layout_stride(&mixed), 12);
        assert_eq!(layout_stride(&[]), 0);
    }

    #[test]
    fn offsets_accumulate_in_order() {
        assert_eq!(segment_offsets(&cube_layout()), vec![0, 12, 24]);
    }
}
