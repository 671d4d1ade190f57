//! The generic buffer resource handle.

use std::sync::Arc;

use tracing::error;

use crate::backend::BackendSlot;
use crate::{DataSegment, Error, Gpu, Result};

/// Data uploaded to the GPU.
///
/// A buffer starts out role-less. Depending on how it is first used, the
/// backend fixes it into one role — vertex-attribute source or uniform
/// block — and any later use in the other role fails loudly.
///
/// A buffer that will ever feed vertex attributes needs a layout describing
/// its interleaved segments.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    gpu: Gpu,
    data: Vec<u8>,
    layout: Vec<DataSegment>,
    backend: BackendSlot,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.inner.data.len())
            .field("segments", &self.inner.layout.len())
            .finish_non_exhaustive()
    }
}

impl Buffer {
    /// Create a buffer with a copy of `data`. An empty `layout` means the
    /// buffer carries no layout and cannot be used as vertex data.
    pub fn for_data(gpu: &Gpu, data: &[u8], layout: &[DataSegment]) -> Result<Buffer> {
        Self::for_data_take(gpu, data.to_vec(), layout.to_vec())
    }

    /// Like [`Buffer::for_data`], but takes ownership of `data` and `layout`
    /// without copying.
    pub fn for_data_take(gpu: &Gpu, data: Vec<u8>, layout: Vec<DataSegment>) -> Result<Buffer> {
        if data.is_empty() {
            error!("buffer creation: initial data must not be empty");
            return Err(Error::usage("buffer data must not be empty"));
        }
        Ok(Buffer {
            inner: Arc::new(BufferInner {
                gpu: gpu.clone(),
                data,
                layout,
                backend: BackendSlot::new(),
            }),
        })
    }

    pub fn gpu(&self) -> &Gpu {
        &self.inner.gpu
    }

    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn size(&self) -> usize {
        self.inner.data.len()
    }

    /// The interleaved layout, empty when none was given.
    pub fn layout(&self) -> &[DataSegment] {
        &self.inner.layout
    }

    /// Backend-owned state for this buffer.
    pub fn backend_slot(&self) -> &BackendSlot {
        &self.inner.backend
    }

    /// Whether two handles refer to the same underlying object.
    pub fn ptr_eq(a: &Buffer, b: &Buffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::stub_gpu;
    use crate::ScalarType;

    #[test]
    fn empty_data_is_rejected() {
        let gpu = stub_gpu();
        assert!(Buffer::for_data(&gpu, &[], &[]).is_err());
    }

    #[test]
    fn layout_is_owned() {
        let gpu = stub_gpu();
        let layout = [DataSegment::new("vertexPosition", ScalarType::Float, 3)];
        let buffer = Buffer::for_data(&gpu, &[0u8; 36], &layout).unwrap();
        assert_eq!(buffer.layout(), &layout);
        assert_eq!(buffer.size(), 36);
    }
}
