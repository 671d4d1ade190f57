//! Plan compilation: the pre-order ensure walk, uniform and attribute
//! validation against the nearest in-scope shader, and framebuffer-stack
//! growth.

use gl::types::GLenum;
use vellum_core::instr::{Instr, InstrTree};
use vellum_core::{CallLog, ErrorCode, Result, Shader, Value};

use crate::{buffer, diag, shader, texture, GlBackend};

pub(crate) fn compile(
    backend: &GlBackend,
    tree: &InstrTree,
    log: Option<&CallLog>,
) -> Result<()> {
    for index in tree.preorder() {
        match &tree.node(index).instr {
            Instr::Pass(pass) => {
                if let Some(shader) = &pass.shader {
                    shader::ensure(shader, log)?;
                }
                for target in &pass.targets {
                    texture::ensure(&target.texture, log)?;
                }
                for (name, value) in pass.uniforms.iter_ordered() {
                    validate_uniform(tree, index, name, value, log)?;
                }
                for name in &pass.attributes {
                    validate_attribute(tree, index, name)?;
                }
            }
            Instr::Vertices { buffers, .. } => {
                for buffer in buffers {
                    buffer::ensure_vertex(buffer, log)?;
                }
            }
            Instr::Blit { src } => {
                texture::ensure(src, log)?;
            }
        }
    }

    // Two extra slots serve as the scratch read/draw framebuffers during
    // blits and MSAA resolves.
    let needed = tree.max_height() as usize + 2;
    backend.grow_framebuffer_stack(needed, log)?;

    Ok(())
}

/// The nearest ancestor shader in scope at `index`, walking the pass chain
/// upward.
fn shader_in_scope(tree: &InstrTree, index: usize) -> Option<&Shader> {
    tree.ancestors(index)
        .find_map(|ancestor| tree.pass(ancestor).shader.as_ref())
}

fn validate_uniform(
    tree: &InstrTree,
    index: usize,
    name: &str,
    value: &Value,
    log: Option<&CallLog>,
) -> Result<()> {
    let Some(in_scope) = shader_in_scope(tree, index) else {
        return Err(diag::gl_error(
            ErrorCode::FailedShaderUniformSet,
            format!("No shader is in scope for uniform \"{name}\""),
        ));
    };
    let state = shader::ensure(in_scope, log)?;

    let Some(uniform) = state.reflection.uniform(name) else {
        return Err(diag::gl_error(
            ErrorCode::FailedShaderUniformSet,
            format!("Uniform \"{name}\" does not exist in shader"),
        ));
    };

    // A buffer value is valid against any uniform-block member location.
    if let Value::Buffer(b) = value {
        if state.reflection.uniform_blocks.contains_key(&uniform.location) {
            buffer::ensure_uniform(b, log)?;
            return Ok(());
        }
        return Err(diag::gl_error(
            ErrorCode::FailedShaderUniformSet,
            format!("Uniform \"{name}\" is not inside a uniform block"),
        ));
    }

    if accepted_gl_types(value).contains(&uniform.ty) {
        if let Value::Texture(t) = value {
            texture::ensure(t, log)?;
            if t.msaa() > 0 {
                // MSAA textures cannot be sampled directly; resolve into a
                // single-sample shadow at dispatch time.
                texture::shadow(t, log)?;
            }
        }
        return Ok(());
    }

    match expected_type_name(uniform.ty) {
        Some(expected) => Err(diag::gl_error(
            ErrorCode::FailedShaderUniformSet,
            format!(
                "Submitted value type does not match shader type for uniform \
                 \"{name}\": expected {expected}, got {got}",
                name = uniform.name,
                got = value.type_name()
            ),
        )),
        None => Err(diag::gl_error(
            ErrorCode::FailedShaderUniformSet,
            format!("The type of uniform \"{name}\" is not currently supported"),
        )),
    }
}

fn validate_attribute(tree: &InstrTree, index: usize, name: &str) -> Result<()> {
    let Some(in_scope) = shader_in_scope(tree, index) else {
        return Err(diag::gl_error(
            ErrorCode::FailedShaderUniformSet,
            format!("No shader is in scope for attribute \"{name}\""),
        ));
    };
    let state = shader::state(in_scope)?;
    if state.reflection.attribute(name).is_some() {
        Ok(())
    } else {
        Err(diag::gl_error(
            ErrorCode::FailedShaderUniformSet,
            format!("Attribute \"{name}\" does not exist in shader"),
        ))
    }
}

/// The GL uniform types a value variant may bind to.
pub(crate) fn accepted_gl_types(value: &Value) -> &'static [GLenum] {
    match value {
        Value::Texture(_) => &[gl::SAMPLER_2D, gl::SAMPLER_CUBE],
        Value::Bool(_) => &[gl::BOOL],
        Value::Int(_) => &[gl::INT],
        Value::UInt(_) => &[gl::UNSIGNED_INT],
        Value::Float(_) => &[gl::FLOAT],
        Value::Vec2(_) => &[gl::FLOAT_VEC2],
        Value::Vec3(_) => &[gl::FLOAT_VEC3],
        Value::Vec4(_) => &[gl::FLOAT_VEC4],
        Value::Mat4(_) => &[gl::FLOAT_MAT4],
        _ => &[],
    }
}

/// The value type name a GL uniform type expects, for mismatch
/// diagnostics.
pub(crate) fn expected_type_name(ty: GLenum) -> Option<&'static str> {
    Some(match ty {
        gl::BOOL => "BOOL",
        gl::INT => "INT",
        gl::UNSIGNED_INT => "UINT",
        gl::FLOAT => "FLOAT",
        gl::FLOAT_VEC2 => "VEC2",
        gl::FLOAT_VEC3 => "VEC3",
        gl::FLOAT_VEC4 => "VEC4",
        gl::FLOAT_MAT4 => "MAT4",
        gl::SAMPLER_2D | gl::SAMPLER_CUBE => "TEXTURE",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_types_map_one_to_one() {
        assert_eq!(accepted_gl_types(&Value::Bool(true)), &[gl::BOOL]);
        assert_eq!(accepted_gl_types(&Value::Int(1)), &[gl::INT]);
        assert_eq!(accepted_gl_types(&Value::UInt(1)), &[gl::UNSIGNED_INT]);
        assert_eq!(accepted_gl_types(&Value::Float(1.0)), &[gl::FLOAT]);
        assert_eq!(accepted_gl_types(&Value::Mat4([0.0; 16])), &[gl::FLOAT_MAT4]);
    }

    #[test]
    fn unsupported_variants_accept_nothing() {
        assert!(accepted_gl_types(&Value::Pointer(0)).is_empty());
        assert!(accepted_gl_types(&Value::Rect([0; 4])).is_empty());
        assert!(accepted_gl_types(&Value::keyval("k", Value::Int(0))).is_empty());
    }

    #[test]
    fn expected_names_reverse_the_mapping() {
        assert_eq!(expected_type_name(gl::FLOAT), Some("FLOAT"));
        assert_eq!(expected_type_name(gl::FLOAT_VEC3), Some("VEC3"));
        assert_eq!(expected_type_name(gl::SAMPLER_2D), Some("TEXTURE"));
        assert_eq!(expected_type_name(gl::SAMPLER_CUBE), Some("TEXTURE"));
        assert_eq!(expected_type_name(gl::FLOAT_MAT3), None);
    }

    #[test]
    fn mismatch_message_names_expected_and_got() {
        // The shape asserted by the uniform-mismatch error contract.
        let message = format!(
            "Submitted value type does not match shader type for uniform \
             \"{name}\": expected {expected}, got {got}",
            name = "t",
            expected = "FLOAT",
            got = Value::Int(3).type_name()
        );
        assert!(message.contains("\"t\": expected FLOAT, got INT"));
    }
}
