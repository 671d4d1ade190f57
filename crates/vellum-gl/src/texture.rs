//! Texture materialization.
//!
//! Covers 2D, 2D-multisample, cubemap, and depth targets. A multisampled
//! texture sampled as a uniform gets a lazily created single-sample shadow
//! sibling, which the dispatcher resolves into before each use.

use std::ffi::c_void;
use std::ptr;

use gl::types::{GLenum, GLint, GLuint};
use parking_lot::Mutex;
use vellum_core::backend::RetiredHandle;
use vellum_core::{CallLog, ErrorCode, Format, Gpu, Result, TexFormat, Texture};

use crate::diag;

/// Backend state attached to a [`Texture`] once it is ensured.
pub(crate) struct GlTextureState {
    pub id: GLuint,
    /// The single-sample sibling of a multisampled texture, created on
    /// first sampling.
    shadow: Mutex<Option<Texture>>,
    gpu: Gpu,
}

impl Drop for GlTextureState {
    fn drop(&mut self) {
        if self.id > 0 {
            self.gpu.retire(RetiredHandle::Texture(self.id));
        }
    }
}

/// The upload parameters for a color format: internal format, pixel
/// format, and component type.
pub(crate) fn gl_format(format: Format) -> (GLenum, GLenum, GLenum) {
    match format {
        Format::R8 => (gl::R8, gl::RED, gl::UNSIGNED_BYTE),
        Format::Ra8 => (gl::RG8, gl::RG, gl::UNSIGNED_BYTE),
        Format::Rgb8 => (gl::RGB8, gl::RGB, gl::UNSIGNED_BYTE),
        Format::Rgba8 => (gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE),
        Format::R32 => (gl::R32F, gl::RED, gl::FLOAT),
        Format::Rgb32 => (gl::RGB32F, gl::RGB, gl::FLOAT),
        Format::Rgba32 => (gl::RGBA32F, gl::RGBA, gl::FLOAT),
    }
}

/// The texture target the driver object binds to.
pub(crate) fn gl_target(texture: &Texture) -> GLenum {
    if texture.is_cubemap() {
        gl::TEXTURE_CUBE_MAP
    } else if texture.msaa() > 0 {
        gl::TEXTURE_2D_MULTISAMPLE
    } else {
        gl::TEXTURE_2D
    }
}

/// Generate and upload the texture if that has not happened yet.
pub(crate) fn ensure<'a>(texture: &'a Texture, log: Option<&CallLog>) -> Result<&'a GlTextureState> {
    texture.backend_slot().get_or_try_init(|| create(texture, log))
}

/// The ensured state; the texture must have been ensured earlier.
pub(crate) fn state(texture: &Texture) -> Result<&GlTextureState> {
    texture.backend_slot().get().ok_or_else(|| {
        vellum_core::Error::backend(
            ErrorCode::FailedTextureGen,
            "texture was never materialized by compilation",
        )
    })
}

/// The single-sample shadow of a multisampled texture, creating and
/// ensuring it on first use.
pub(crate) fn shadow(texture: &Texture, log: Option<&CallLog>) -> Result<Texture> {
    let state = ensure(texture, log)?;
    if let Some(existing) = state.shadow.lock().clone() {
        return Ok(existing);
    }
    let sibling = texture.non_msaa_sibling();
    ensure(&sibling, log)?;
    *state.shadow.lock() = Some(sibling.clone());
    Ok(sibling)
}

fn create(texture: &Texture, log: Option<&CallLog>) -> Result<GlTextureState> {
    let mut id: GLuint = 0;
    unsafe { gl::GenTextures(1, &mut id) };
    if id == 0 {
        return Err(diag::gl_error(
            ErrorCode::FailedTextureGen,
            "Failed to generate texture",
        ));
    }

    let width = texture.width() as GLint;
    let height = texture.height() as GLint;

    match texture.format() {
        TexFormat::Depth => upload_depth(texture, id, width, height),
        TexFormat::Color(format) => {
            let (internal, pixel_format, component) = gl_format(format);
            if texture.is_cubemap() {
                if let Err(err) =
                    upload_cubemap(texture, id, width, height, format, internal, pixel_format, component)
                {
                    unsafe { gl::DeleteTextures(1, &id) };
                    return Err(err);
                }
            } else if texture.msaa() > 0 {
                upload_multisample(texture, id, width, height, internal);
            } else {
                upload_2d(texture, id, width, height, format, internal, pixel_format, component);
            }
        }
    }
    if let Some(log) = log {
        log.push(format!(
            "glTexImage2D ({id}, {}x{})",
            texture.width(),
            texture.height()
        ));
    }

    Ok(GlTextureState {
        id,
        shadow: Mutex::new(None),
        gpu: texture.gpu().clone(),
    })
}

fn upload_depth(texture: &Texture, id: GLuint, width: GLint, height: GLint) {
    let target = gl_target(texture);
    unsafe {
        gl::BindTexture(target, id);
        if texture.msaa() > 0 {
            gl::TexImage2DMultisample(
                gl::TEXTURE_2D_MULTISAMPLE,
                texture.msaa(),
                gl::DEPTH_COMPONENT,
                width,
                height,
                gl::TRUE,
            );
        } else {
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                gl::DEPTH_COMPONENT as GLint,
                width,
                height,
                0,
                gl::DEPTH_COMPONENT,
                gl::FLOAT,
                ptr::null(),
            );
        }
        gl::BindTexture(target, 0);
    }
}

#[allow(clippy::too_many_arguments)]
fn upload_cubemap(
    texture: &Texture,
    id: GLuint,
    width: GLint,
    height: GLint,
    format: Format,
    internal: GLenum,
    pixel_format: GLenum,
    component: GLenum,
) -> Result<()> {
    // Six face images stored back to back: +X -X +Y -Y +Z -Z.
    let Some(pixels) = texture.pixels() else {
        return Err(diag::gl_error(
            ErrorCode::FailedTextureGen,
            "Cubemap texture has no pixel data",
        ));
    };
    let face_size = format.bytes_per_pixel() * texture.width() as usize * texture.height() as usize;

    unsafe {
        gl::BindTexture(gl::TEXTURE_CUBE_MAP, id);
        for face in 0..6usize {
            let offset = face * face_size;
            let ptr = pixels
                .get(offset..)
                .map_or(ptr::null(), |slice| slice.as_ptr().cast::<c_void>());
            gl::TexImage2D(
                gl::TEXTURE_CUBE_MAP_POSITIVE_X + face as GLenum,
                0,
                internal as GLint,
                width,
                height,
                0,
                pixel_format,
                component,
                ptr,
            );
        }
        gl::TexParameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
        gl::TexParameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
        gl::TexParameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
        gl::TexParameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
        gl::TexParameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_WRAP_R, gl::CLAMP_TO_EDGE as GLint);
        gl::BindTexture(gl::TEXTURE_CUBE_MAP, 0);
    }
    Ok(())
}

fn upload_multisample(texture: &Texture, id: GLuint, width: GLint, height: GLint, internal: GLenum) {
    unsafe {
        gl::BindTexture(gl::TEXTURE_2D_MULTISAMPLE, id);
        gl::TexImage2DMultisample(
            gl::TEXTURE_2D_MULTISAMPLE,
            texture.msaa(),
            internal,
            width,
            height,
            gl::TRUE,
        );
        gl::BindTexture(gl::TEXTURE_2D_MULTISAMPLE, 0);
    }
}

#[allow(clippy::too_many_arguments)]
fn upload_2d(
    texture: &Texture,
    id: GLuint,
    width: GLint,
    height: GLint,
    format: Format,
    internal: GLenum,
    pixel_format: GLenum,
    component: GLenum,
) {
    let data = texture
        .pixels()
        .map_or(ptr::null(), |pixels| pixels.as_ptr().cast::<c_void>());

    unsafe {
        gl::BindTexture(gl::TEXTURE_2D, id);

        if matches!(format, Format::R8 | Format::Ra8) {
            // Spread the single channel across rgb and keep alpha separate.
            let swizzle: [GLint; 4] = [
                gl::RED as GLint,
                gl::RED as GLint,
                gl::RED as GLint,
                gl::ALPHA as GLint,
            ];
            gl::TexParameteriv(gl::TEXTURE_2D, gl::TEXTURE_SWIZZLE_RGBA, swizzle.as_ptr());
        }

        let mut mip_width = width;
        let mut mip_height = height;
        for level in 0..texture.mipmaps() {
            gl::TexImage2D(
                gl::TEXTURE_2D,
                level,
                internal as GLint,
                mip_width,
                mip_height,
                0,
                pixel_format,
                component,
                data,
            );
            mip_width = (mip_width / 2).max(1);
            mip_height = (mip_height / 2).max(1);
        }

        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::REPEAT as GLint);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::REPEAT as GLint);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
        if texture.mipmaps() > 1 {
            gl::TexParameteri(
                gl::TEXTURE_2D,
                gl::TEXTURE_MIN_FILTER,
                gl::LINEAR_MIPMAP_LINEAR as GLint,
            );
        } else {
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
        }

        gl::BindTexture(gl::TEXTURE_2D, 0);
    }
}
