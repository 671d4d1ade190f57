//! Frontend of the Vellum GPU abstraction.
//!
//! This crate holds everything a backend-agnostic user touches:
//!
//! - [`Gpu`] is the master object through which a graphics backend is
//!   reachable. Every other object keeps a strong reference to it.
//! - [`Shader`], [`Buffer`], and [`Texture`] are resource handles carrying
//!   *initialization descriptors*; the backend materializes driver objects
//!   from them lazily on first use.
//! - [`Plan`] is a tree-structured builder for a frame's work: nested groups
//!   of inherited render state with vertex and blit leaves.
//! - [`Commands`] is the compiled, immutable result of consuming a plan,
//!   ready to dispatch against a live graphics context.
//! - [`backend::Backend`] is the contract a backend crate implements.
//!
//! The library never creates a graphics context. Callers make a context
//! current themselves and tell the library with
//! [`Gpu::steal_this_thread`] / [`Gpu::release_this_thread`].
//!
//! All handles are atomically reference counted; cloning a handle is cheap
//! and dropping the last clone queues the driver object for destruction at
//! the next [`Gpu::flush`] on the claim thread.

pub mod backend;
mod buffer;
mod commands;
mod error;
mod gpu;
pub mod instr;
mod plan;
mod shader;
mod state;
mod texture;
mod value;

pub use buffer::Buffer;
pub use commands::{CallLog, Commands, DebugCalls};
pub use error::{Error, ErrorCode, Result};
pub use gpu::Gpu;
pub use plan::Plan;
pub use shader::Shader;
pub use state::{BlendFactor, Format, InitFlags, StateKey, TestFunc, WriteMask};
pub use texture::{TexFormat, Texture};
pub use value::{DataSegment, ScalarType, Value};

#[cfg(test)]
pub(crate) mod testutil {
    use parking_lot::Mutex;

    use crate::backend::Backend;
    use crate::commands::CallLog;
    use crate::instr::InstrTree;
    use crate::{Error, Gpu, InitFlags, Result};

    /// A backend that performs no driver work, for exercising the frontend.
    pub struct StubBackend {
        threadsafe: bool,
        current: Mutex<Option<Gpu>>,
    }

    impl StubBackend {
        pub fn new(threadsafe: bool) -> Self {
            Self {
                threadsafe,
                current: Mutex::new(None),
            }
        }
    }

    impl Backend for StubBackend {
        fn is_threadsafe(&self) -> bool {
            self.threadsafe
        }

        fn gpu_for_this_thread(&self) -> Option<Gpu> {
            self.current.lock().clone()
        }

        fn set_gpu_for_this_thread(&self, gpu: Option<Gpu>) {
            *self.current.lock() = gpu;
        }

        fn info(&self, key: &str) -> Result<String> {
            match key {
                "vendor" => Ok("stub".into()),
                _ => Err(Error::usage(format!("unrecognized info key \"{key}\""))),
            }
        }

        fn flush(&self, gpu: &Gpu) -> Result<()> {
            gpu.take_retired();
            Ok(())
        }

        fn compile(&self, _gpu: &Gpu, _tree: &InstrTree, _log: Option<&CallLog>) -> Result<()> {
            Ok(())
        }

        fn dispatch(&self, _gpu: &Gpu, _commands: &crate::Commands) -> Result<()> {
            Ok(())
        }
    }

    pub fn stub_gpu() -> Gpu {
        Gpu::with_backend(
            InitFlags::BACKEND_OPENGL,
            Box::new(StubBackend::new(true)),
        )
    }

    pub fn serialized_gpu() -> Gpu {
        Gpu::with_backend(
            InitFlags::BACKEND_OPENGL,
            Box::new(StubBackend::new(false)),
        )
    }
}
