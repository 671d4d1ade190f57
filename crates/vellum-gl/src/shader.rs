//! Shader materialization and reflection.
//!
//! A shader is compiled, linked, and reflected the first time a compiled
//! plan references it. Reflection keeps three tables: active attributes
//! with their driver-reported locations, active uniforms with *flattened*
//! locations (arrays occupy one location per element, so locations
//! accumulate by array count in enumeration order), and a map from uniform
//! location to the uniform block containing it.

use std::collections::HashMap;
use std::ffi::CString;

use gl::types::{GLenum, GLint, GLuint};
use vellum_core::backend::RetiredHandle;
use vellum_core::{CallLog, Error, ErrorCode, Gpu, Result, Shader};

use crate::diag;

#[derive(Debug, Clone)]
pub(crate) struct AttributeInfo {
    /// Driver-reported location.
    pub location: GLint,
    #[allow(dead_code)]
    pub count: GLint,
    #[allow(dead_code)]
    pub ty: GLenum,
}

#[derive(Debug, Clone)]
pub(crate) struct UniformInfo {
    pub name: String,
    /// Flattened location.
    pub location: GLint,
    #[allow(dead_code)]
    pub count: GLint,
    pub ty: GLenum,
}

#[derive(Debug, Default)]
pub(crate) struct Reflection {
    pub attributes: HashMap<String, AttributeInfo>,
    pub uniforms: Vec<UniformInfo>,
    pub uniform_index: HashMap<String, usize>,
    /// Flattened uniform location -> index of the block containing it.
    pub uniform_blocks: HashMap<GLint, GLuint>,
}

impl Reflection {
    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.get(name)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniform_index.get(name).map(|&i| &self.uniforms[i])
    }
}

/// Backend state attached to a [`Shader`] once it is ensured.
pub(crate) struct GlShaderState {
    pub program: GLuint,
    pub reflection: Reflection,
    gpu: Gpu,
}

impl Drop for GlShaderState {
    fn drop(&mut self) {
        if self.program > 0 {
            self.gpu.retire(RetiredHandle::Program(self.program));
        }
    }
}

/// Compile, link, and reflect the shader if that has not happened yet.
pub(crate) fn ensure<'a>(shader: &'a Shader, log: Option<&CallLog>) -> Result<&'a GlShaderState> {
    shader.backend_slot().get_or_try_init(|| create(shader, log))
}

/// The ensured state; the shader must have been ensured earlier in the same
/// compile pass.
pub(crate) fn state(shader: &Shader) -> Result<&GlShaderState> {
    shader.backend_slot().get().ok_or_else(|| {
        Error::backend(
            ErrorCode::FailedShaderGen,
            "shader was never materialized by compilation",
        )
    })
}

fn create(shader: &Shader, log: Option<&CallLog>) -> Result<GlShaderState> {
    let vertex = compile_stage(shader.vertex_source(), gl::VERTEX_SHADER, log)?;
    let fragment = match compile_stage(shader.fragment_source(), gl::FRAGMENT_SHADER, log) {
        Ok(id) => id,
        Err(err) => {
            unsafe { gl::DeleteShader(vertex) };
            return Err(err);
        }
    };

    let program = unsafe {
        let program = gl::CreateProgram();
        gl::AttachShader(program, vertex);
        gl::AttachShader(program, fragment);
        gl::LinkProgram(program);
        program
    };
    if let Some(log) = log {
        log.push(format!("glLinkProgram ({program})"));
    }

    let mut link_success: GLint = 0;
    unsafe { gl::GetProgramiv(program, gl::LINK_STATUS, &mut link_success) };

    // The program keeps the stages alive; the stage objects themselves are
    // no longer needed.
    unsafe {
        gl::DeleteShader(vertex);
        gl::DeleteShader(fragment);
    }

    if link_success != GLint::from(gl::TRUE) {
        let info = program_info_log(program);
        unsafe { gl::DeleteProgram(program) };
        return Err(diag::gl_error(
            ErrorCode::FailedShaderGen,
            format!("Failed to link shader: GL: {info}"),
        ));
    }

    let reflection = reflect(program);

    Ok(GlShaderState {
        program,
        reflection,
        gpu: shader.gpu().clone(),
    })
}

fn compile_stage(source: &str, stage: GLenum, log: Option<&CallLog>) -> Result<GLuint> {
    let stage_name = match stage {
        gl::VERTEX_SHADER => "vertex",
        gl::FRAGMENT_SHADER => "fragment",
        _ => "generic",
    };

    let id = unsafe {
        let id = gl::CreateShader(stage);
        let ptr = source.as_ptr().cast::<gl::types::GLchar>();
        let len = source.len() as GLint;
        gl::ShaderSource(id, 1, &ptr, &len);
        gl::CompileShader(id);
        id
    };
    if let Some(log) = log {
        log.push(format!("glCompileShader ({stage_name}, {id})"));
    }

    let mut success: GLint = 0;
    unsafe { gl::GetShaderiv(id, gl::COMPILE_STATUS, &mut success) };
    if success != GLint::from(gl::TRUE) {
        let info = shader_info_log(id);
        unsafe { gl::DeleteShader(id) };
        return Err(diag::gl_error(
            ErrorCode::FailedShaderGen,
            format!("Failed to generate {stage_name} shader: GL: {info}"),
        ));
    }

    Ok(id)
}

fn shader_info_log(id: GLuint) -> String {
    let mut capacity: GLint = 0;
    unsafe { gl::GetShaderiv(id, gl::INFO_LOG_LENGTH, &mut capacity) };
    if capacity <= 0 {
        return String::new();
    }
    let mut buf = vec![0u8; capacity as usize];
    let mut written: GLint = 0;
    unsafe {
        gl::GetShaderInfoLog(id, capacity, &mut written, buf.as_mut_ptr().cast());
    }
    String::from_utf8_lossy(&buf[..written.max(0) as usize])
        .trim_end()
        .to_owned()
}

fn program_info_log(program: GLuint) -> String {
    let mut capacity: GLint = 0;
    unsafe { gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut capacity) };
    if capacity <= 0 {
        return String::new();
    }
    let mut buf = vec![0u8; capacity as usize];
    let mut written: GLint = 0;
    unsafe {
        gl::GetProgramInfoLog(program, capacity, &mut written, buf.as_mut_ptr().cast());
    }
    String::from_utf8_lossy(&buf[..written.max(0) as usize])
        .trim_end()
        .to_owned()
}

fn reflect(program: GLuint) -> Reflection {
    let mut reflection = Reflection::default();

    // Attributes, with driver-reported locations.
    let mut n_attributes: GLint = 0;
    unsafe { gl::GetProgramiv(program, gl::ACTIVE_ATTRIBUTES, &mut n_attributes) };
    for index in 0..n_attributes {
        let (name, count, ty) = active_name(program, index as GLuint, true);
        let location = CString::new(name.as_str())
            .map(|c| unsafe { gl::GetAttribLocation(program, c.as_ptr()) })
            .unwrap_or(-1);
        reflection
            .attributes
            .insert(name, AttributeInfo { location, count, ty });
    }

    // Uniforms, with flattened locations.
    let mut n_uniforms: GLint = 0;
    unsafe { gl::GetProgramiv(program, gl::ACTIVE_UNIFORMS, &mut n_uniforms) };
    let raw = (0..n_uniforms)
        .map(|index| {
            let (name, count, ty) = active_name(program, index as GLuint, false);
            RawUniform { name, count, ty }
        })
        .collect::<Vec<_>>();
    let (uniforms, uniform_index) = flatten_uniforms(raw);
    reflection.uniforms = uniforms;
    reflection.uniform_index = uniform_index;

    // Uniform blocks: map each member's location to its block.
    let mut n_blocks: GLint = 0;
    unsafe { gl::GetProgramiv(program, gl::ACTIVE_UNIFORM_BLOCKS, &mut n_blocks) };
    for block in 0..n_blocks {
        let mut n_members: GLint = 0;
        unsafe {
            gl::GetActiveUniformBlockiv(
                program,
                block as GLuint,
                gl::UNIFORM_BLOCK_ACTIVE_UNIFORMS,
                &mut n_members,
            );
        }
        if n_members == 0 {
            continue;
        }
        let mut members: Vec<GLint> = vec![0; n_members as usize];
        unsafe {
            gl::GetActiveUniformBlockiv(
                program,
                block as GLuint,
                gl::UNIFORM_BLOCK_ACTIVE_UNIFORM_INDICES,
                members.as_mut_ptr(),
            );
        }
        for member in members {
            if let Some(uniform) = reflection.uniforms.get(member as usize) {
                reflection
                    .uniform_blocks
                    .insert(uniform.location, block as GLuint);
            }
        }
    }

    reflection
}

fn active_name(program: GLuint, index: GLuint, attribute: bool) -> (String, GLint, GLenum) {
    let mut buf = [0u8; 256];
    let mut written: gl::types::GLsizei = 0;
    let mut count: GLint = 0;
    let mut ty: GLenum = 0;
    unsafe {
        if attribute {
            gl::GetActiveAttrib(
                program,
                index,
                buf.len() as gl::types::GLsizei - 1,
                &mut written,
                &mut count,
                &mut ty,
                buf.as_mut_ptr().cast(),
            );
        } else {
            gl::GetActiveUniform(
                program,
                index,
                buf.len() as gl::types::GLsizei - 1,
                &mut written,
                &mut count,
                &mut ty,
                buf.as_mut_ptr().cast(),
            );
        }
    }
    let name = String::from_utf8_lossy(&buf[..written.max(0) as usize]).into_owned();
    (name, count, ty)
}

pub(crate) struct RawUniform {
    pub name: String,
    pub count: GLint,
    pub ty: GLenum,
}

/// Strip the `[0]` suffix the driver reports for array uniforms.
pub(crate) fn base_name(name: &str) -> &str {
    match name.find('[') {
        Some(bracket) => &name[..bracket],
        None => name,
    }
}

/// Assign flattened locations: each uniform takes one location per array
/// element, accumulating in enumeration order.
pub(crate) fn flatten_uniforms(
    raw: Vec<RawUniform>,
) -> (Vec<UniformInfo>, HashMap<String, usize>) {
    let mut uniforms = Vec::with_capacity(raw.len());
    let mut index = HashMap::with_capacity(raw.len());
    let mut location: GLint = 0;
    for uniform in raw {
        let name = base_name(&uniform.name).to_owned();
        index.insert(name.clone(), uniforms.len());
        uniforms.push(UniformInfo {
            name,
            location,
            count: uniform.count,
            ty: uniform.ty,
        });
        location += uniform.count;
    }
    (uniforms, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_array_suffix() {
        assert_eq!(base_name("lights[0]"), "lights");
        assert_eq!(base_name("mvp"), "mvp");
    }

    #[test]
    fn flattened_locations_accumulate_by_count() {
        let raw = vec![
            RawUniform {
                name: "mvp".into(),
                count: 1,
                ty: gl::FLOAT_MAT4,
            },
            RawUniform {
                name: "lights[0]".into(),
                count: 4,
                ty: gl::FLOAT_VEC3,
            },
            RawUniform {
                name: "tint".into(),
                count: 1,
                ty: gl::FLOAT_VEC4,
            },
        ];
        let (uniforms, index) = flatten_uniforms(raw);

        assert_eq!(uniforms[0].location, 0);
        assert_eq!(uniforms[1].location, 1);
        assert_eq!(uniforms[2].location, 5);

        assert_eq!(uniforms[1].name, "lights");
        assert_eq!(index["lights"], 1);
        assert_eq!(index["tint"], 2);
        assert!(!index.contains_key("missing"));
    }
}
