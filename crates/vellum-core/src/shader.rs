//! The shader resource handle.

use std::sync::Arc;

use crate::backend::BackendSlot;
use crate::Gpu;

/// A shader resource: user-defined code which transforms data on the GPU.
///
/// The handle only carries the vertex and fragment sources; the backend
/// compiles, links, and reflects the program the first time the shader is
/// used by a compiled plan.
#[derive(Clone)]
pub struct Shader {
    inner: Arc<ShaderInner>,
}

struct ShaderInner {
    gpu: Gpu,
    vertex_source: String,
    fragment_source: String,
    backend: BackendSlot,
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader").finish_non_exhaustive()
    }
}

impl Shader {
    /// Create a shader from vertex and fragment source strings.
    pub fn for_source(gpu: &Gpu, vertex_source: &str, fragment_source: &str) -> Shader {
        Shader {
            inner: Arc::new(ShaderInner {
                gpu: gpu.clone(),
                vertex_source: vertex_source.to_owned(),
                fragment_source: fragment_source.to_owned(),
                backend: BackendSlot::new(),
            }),
        }
    }

    pub fn gpu(&self) -> &Gpu {
        &self.inner.gpu
    }

    pub fn vertex_source(&self) -> &str {
        &self.inner.vertex_source
    }

    pub fn fragment_source(&self) -> &str {
        &self.inner.fragment_source
    }

    /// Backend-owned state for this shader.
    pub fn backend_slot(&self) -> &BackendSlot {
        &self.inner.backend
    }

    /// Whether two handles refer to the same underlying object.
    pub fn ptr_eq(a: &Shader, b: &Shader) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}
