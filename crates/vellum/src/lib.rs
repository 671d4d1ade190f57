//! Vellum: a retained-mode GPU rendering abstraction.
//!
//! A [`Plan`] declaratively describes a frame's work — a nested tree of
//! render passes with inherited state (shader, targets, viewport,
//! uniforms, write masks, depth testing) plus vertex draws and blit
//! operations. Consuming the plan compiles it into [`Commands`] for the
//! backend selected at [`new_gpu`], which can then be dispatched against
//! the live graphics context.
//!
//! The library is not responsible for creating the graphics context.
//! Callers make a context current themselves and pair that with
//! [`Gpu::steal_this_thread`] so thread checks can be made.
//!
//! # Example
//!
//! ```no_run
//! use vellum::{new_gpu, InitFlags, Plan, Shader, StateKey, Value, WriteMask};
//!
//! # fn get_proc_address(_: &str) -> *const std::ffi::c_void { std::ptr::null() }
//! # fn main() -> vellum::Result<()> {
//! let gpu = new_gpu(
//!     InitFlags::BACKEND_OPENGL | InitFlags::LOG_ERRORS,
//!     Some(get_proc_address),
//! )?;
//! gpu.steal_this_thread();
//!
//! let shader = Shader::for_source(&gpu, VERTEX_SRC, FRAGMENT_SRC);
//! let plan = Plan::new(&gpu);
//! plan.push_state([
//!     (StateKey::Dest, Value::rect(0, 0, 1920, 1080)),
//!     (StateKey::Shader, Value::from(&shader)),
//!     (StateKey::Uniform, Value::keyval("mvp", Value::Mat4(IDENTITY))),
//! ]);
//! // ... append vertex buffers, push nested groups ...
//! plan.pop();
//!
//! let commands = plan.into_commands()?;
//! commands.dispatch()?;
//! # Ok(())
//! # }
//! # const VERTEX_SRC: &str = "";
//! # const FRAGMENT_SRC: &str = "";
//! # const IDENTITY: [f32; 16] = [0.0; 16];
//! ```

use std::ffi::c_void;

use tracing::error;

pub use vellum_core::{
    backend, instr, BlendFactor, Buffer, CallLog, Commands, DataSegment, Error, ErrorCode,
    Format, Gpu, InitFlags, Plan, Result, ScalarType, Shader, StateKey, TestFunc, TexFormat,
    Texture, Value, WriteMask,
};
pub use vellum_gl::GlBackend;

/// Create a [`Gpu`] for the backend named in `flags`.
///
/// `loader` is the extension-loader callback for backends that need one
/// (pair it with the windowing system's `get_proc_address`); pass `None`
/// when symbols were already loaded.
pub fn new_gpu<F>(flags: InitFlags, loader: Option<F>) -> Result<Gpu>
where
    F: FnMut(&str) -> *const c_void,
{
    if flags.contains(InitFlags::BACKEND_VULKAN) {
        error!("cannot initialize Vulkan backend: not implemented yet");
        return Err(Error::usage("BACKEND_VULKAN is reserved and not implemented"));
    }
    if !flags.contains(InitFlags::BACKEND_OPENGL) {
        error!("cannot initialize backend: pass BACKEND_OPENGL or BACKEND_VULKAN");
        return Err(Error::usage("no backend flag was given"));
    }

    match vellum_gl::init(flags, loader) {
        Ok(gpu) => Ok(gpu),
        Err(err) => {
            error!("could not initialize OpenGL backend: {err}");
            if flags.contains(InitFlags::EXIT_ON_ERROR) {
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_loader() -> Option<fn(&str) -> *const c_void> {
        None
    }

    #[test]
    fn vulkan_backend_is_reserved() {
        let err = new_gpu(InitFlags::BACKEND_VULKAN, no_loader()).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn missing_backend_flag_is_rejected() {
        let err = new_gpu(InitFlags::LOG_ERRORS, no_loader()).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }
}
