//! The texture resource handle.

use std::sync::Arc;

use tracing::error;

use crate::backend::BackendSlot;
use crate::{Error, Format, Gpu, Result};

/// The stored format of a texture: a user-visible color format or the
/// internal depth sentinel used for depth targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexFormat {
    Color(Format),
    Depth,
}

/// An image on the GPU.
///
/// Dimensions, format, cubemap-ness, and sample count are fixed at
/// creation. A multisampled texture sampled as a uniform is shadowed by a
/// lazily created single-sample sibling which the dispatcher resolves into
/// on each use.
#[derive(Clone)]
pub struct Texture {
    inner: Arc<TextureInner>,
}

struct TextureInner {
    gpu: Gpu,
    cubemap: bool,
    pixels: Option<Vec<u8>>,
    width: i32,
    height: i32,
    format: TexFormat,
    mipmaps: i32,
    msaa: i32,
    backend: BackendSlot,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .field("msaa", &self.inner.msaa)
            .finish_non_exhaustive()
    }
}

impl Texture {
    /// Create a texture with a copy of `pixels` (or no pixel data, for
    /// render targets). `mipmaps` is the number of levels to upload; `msaa`
    /// greater than zero selects a multisample target.
    pub fn for_data(
        gpu: &Gpu,
        pixels: Option<&[u8]>,
        width: i32,
        height: i32,
        format: Format,
        mipmaps: i32,
        msaa: i32,
    ) -> Result<Texture> {
        Self::for_data_take(gpu, pixels.map(<[u8]>::to_vec), width, height, format, mipmaps, msaa)
    }

    /// Like [`Texture::for_data`], but takes ownership of `pixels` without
    /// copying.
    pub fn for_data_take(
        gpu: &Gpu,
        pixels: Option<Vec<u8>>,
        width: i32,
        height: i32,
        format: Format,
        mipmaps: i32,
        msaa: i32,
    ) -> Result<Texture> {
        check_dimensions(width, height)?;
        if mipmaps < 0 || msaa < 0 {
            error!("texture creation: mipmap and sample counts must not be negative");
            return Err(Error::usage("negative mipmap or sample count"));
        }
        if pixels.as_ref().is_some_and(Vec::is_empty) {
            error!("texture creation: pixel data must not be empty");
            return Err(Error::usage("empty pixel data"));
        }
        Ok(Self::build(
            gpu,
            false,
            pixels,
            width,
            height,
            TexFormat::Color(format),
            mipmaps,
            msaa,
        ))
    }

    /// Create a cubemap from six square face images of edge length
    /// `face_edge`, stored back to back in the order positive-X,
    /// negative-X, positive-Y, negative-Y, positive-Z, negative-Z.
    pub fn cubemap_for_data(
        gpu: &Gpu,
        pixels: &[u8],
        face_edge: i32,
        format: Format,
    ) -> Result<Texture> {
        Self::cubemap_for_data_take(gpu, pixels.to_vec(), face_edge, format)
    }

    /// Like [`Texture::cubemap_for_data`], but takes ownership of `pixels`
    /// without copying.
    pub fn cubemap_for_data_take(
        gpu: &Gpu,
        pixels: Vec<u8>,
        face_edge: i32,
        format: Format,
    ) -> Result<Texture> {
        check_dimensions(face_edge, face_edge)?;
        if pixels.is_empty() {
            error!("cubemap creation: pixel data must not be empty");
            return Err(Error::usage("empty pixel data"));
        }
        Ok(Self::build(
            gpu,
            true,
            Some(pixels),
            face_edge,
            face_edge,
            TexFormat::Color(format),
            0,
            0,
        ))
    }

    /// Create a texture capable only of holding a depth component.
    pub fn depth(gpu: &Gpu, width: i32, height: i32, msaa: i32) -> Result<Texture> {
        check_dimensions(width, height)?;
        if msaa < 0 {
            error!("texture creation: sample count must not be negative");
            return Err(Error::usage("negative sample count"));
        }
        Ok(Self::build(gpu, false, None, width, height, TexFormat::Depth, 0, msaa))
    }

    /// The single-sample sibling used when a multisampled texture is
    /// sampled as a uniform: identical dimensions, format, and cubemap
    /// flag, no pixel data, zero samples.
    pub fn non_msaa_sibling(&self) -> Texture {
        Self::build(
            &self.inner.gpu,
            self.inner.cubemap,
            None,
            self.inner.width,
            self.inner.height,
            self.inner.format,
            self.inner.mipmaps,
            0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        gpu: &Gpu,
        cubemap: bool,
        pixels: Option<Vec<u8>>,
        width: i32,
        height: i32,
        format: TexFormat,
        mipmaps: i32,
        msaa: i32,
    ) -> Texture {
        Texture {
            inner: Arc::new(TextureInner {
                gpu: gpu.clone(),
                cubemap,
                pixels,
                width,
                height,
                format,
                mipmaps,
                msaa,
                backend: BackendSlot::new(),
            }),
        }
    }

    pub fn gpu(&self) -> &Gpu {
        &self.inner.gpu
    }

    pub fn is_cubemap(&self) -> bool {
        self.inner.cubemap
    }

    pub fn pixels(&self) -> Option<&[u8]> {
        self.inner.pixels.as_deref()
    }

    pub fn width(&self) -> i32 {
        self.inner.width
    }

    pub fn height(&self) -> i32 {
        self.inner.height
    }

    pub fn format(&self) -> TexFormat {
        self.inner.format
    }

    pub fn mipmaps(&self) -> i32 {
        self.inner.mipmaps
    }

    /// The sample count; zero means single-sampled.
    pub fn msaa(&self) -> i32 {
        self.inner.msaa
    }

    /// Backend-owned state for this texture.
    pub fn backend_slot(&self) -> &BackendSlot {
        &self.inner.backend
    }

    /// Whether two handles refer to the same underlying object.
    pub fn ptr_eq(a: &Texture, b: &Texture) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

fn check_dimensions(width: i32, height: i32) -> Result<()> {
    if width <= 0 || height <= 0 {
        error!("texture creation: dimensions must be positive");
        return Err(Error::usage("non-positive texture dimensions"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::stub_gpu;

    #[test]
    fn rejects_bad_dimensions() {
        let gpu = stub_gpu();
        assert!(Texture::for_data(&gpu, None, 0, 4, Format::Rgba8, 1, 0).is_err());
        assert!(Texture::for_data(&gpu, None, 4, -1, Format::Rgba8, 1, 0).is_err());
        assert!(Texture::depth(&gpu, 4, 4, -2).is_err());
    }

    #[test]
    fn depth_texture_uses_sentinel_format() {
        let gpu = stub_gpu();
        let tex = Texture::depth(&gpu, 8, 8, 4).unwrap();
        assert_eq!(tex.format(), TexFormat::Depth);
        assert_eq!(tex.msaa(), 4);
        assert!(tex.pixels().is_none());
    }

    #[test]
    fn sibling_matches_but_drops_msaa() {
        let gpu = stub_gpu();
        let pixels = vec![0u8; 4 * 4 * 4];
        let tex = Texture::for_data(&gpu, Some(&pixels), 4, 4, Format::Rgba8, 1, 8).unwrap();
        let sibling = tex.non_msaa_sibling();
        assert_eq!(sibling.width(), 4);
        assert_eq!(sibling.height(), 4);
        assert_eq!(sibling.format(), TexFormat::Color(Format::Rgba8));
        assert_eq!(sibling.is_cubemap(), tex.is_cubemap());
        assert_eq!(sibling.msaa(), 0);
        assert!(sibling.pixels().is_none());
    }
}
