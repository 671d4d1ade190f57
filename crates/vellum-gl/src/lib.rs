//! OpenGL 3.3 backend for the Vellum GPU abstraction.
//!
//! Realizes shaders, buffers (vertex or uniform role), textures (2D,
//! 2D-multisample, cubemap, depth), the framebuffer stack, MSAA-to-single-
//! sample resolves, and command dispatch against an externally managed GL
//! context. Function pointers are loaded once through a caller-supplied
//! extension loader via [`gl::load_with`]; the library never creates or
//! switches contexts itself.
//!
//! Entry point: [`init`] produces a [`Gpu`] wired to this backend. Most
//! users reach it through the umbrella crate's `new_gpu`.

mod buffer;
mod compile;
mod diag;
mod dispatch;
mod shader;
mod texture;

use std::cell::RefCell;
use std::ffi::{c_void, CStr};

use gl::types::{GLint, GLsizei, GLuint};
use parking_lot::Mutex;
use tracing::debug;
use vellum_core::backend::{Backend, RetiredHandle};
use vellum_core::instr::InstrTree;
use vellum_core::{CallLog, Commands, Error, ErrorCode, Gpu, InitFlags, Result};

thread_local! {
    /// The Gpu the calling thread has claimed, holding a strong reference
    /// until it is released or replaced.
    static CURRENT_GPU: RefCell<Option<Gpu>> = const { RefCell::new(None) };
}

/// The OpenGL backend attached to one [`Gpu`].
pub struct GlBackend {
    /// Framebuffer names indexed by pass depth, plus two scratch slots for
    /// blits and resolves. Grown during compilation.
    framebuffer_stack: Mutex<Vec<GLuint>>,
    n_extensions: GLint,
    max_texture_size: GLint,
}

/// Initialize the OpenGL backend against the context current on the
/// calling thread and wrap it in a [`Gpu`].
///
/// `loader` resolves GL symbols (pair it with the windowing system's
/// `get_proc_address`); pass `None` when the function pointers were
/// already loaded by an earlier `Gpu`.
pub fn init<F>(flags: InitFlags, loader: Option<F>) -> Result<Gpu>
where
    F: FnMut(&str) -> *const c_void,
{
    if let Some(mut loader) = loader {
        gl::load_with(|symbol| loader(symbol));
    }

    if !context_is_current() {
        return Err(Error::backend(
            ErrorCode::FailedInit,
            "Failed to load OpenGL: no context is current on this thread",
        ));
    }

    let mut n_extensions: GLint = 0;
    let mut max_texture_size: GLint = 0;
    unsafe {
        gl::GetIntegerv(gl::NUM_EXTENSIONS, &mut n_extensions);
        gl::GetIntegerv(gl::MAX_TEXTURE_SIZE, &mut max_texture_size);
    }
    debug!("GL: loaded {n_extensions} GL extensions");
    debug!("GL: the max texture size is {max_texture_size}");

    if flags.contains(InitFlags::USE_DEBUG_LAYERS) {
        unsafe {
            gl::DebugMessageCallback(Some(diag::debug_message), std::ptr::null());
            gl::Enable(gl::DEBUG_OUTPUT);
            gl::Enable(gl::DEBUG_OUTPUT_SYNCHRONOUS);
        }
        debug!("GL: enabled debug output");
    }

    unsafe {
        gl::DepthFunc(gl::LEQUAL);
        gl::Enable(gl::DEPTH_TEST);
        gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
        gl::Enable(gl::BLEND);
        gl::CullFace(gl::BACK);
        gl::FrontFace(gl::CCW);
        gl::Enable(gl::CULL_FACE);
        gl::Enable(gl::MULTISAMPLE);
    }

    let backend = GlBackend {
        framebuffer_stack: Mutex::new(Vec::new()),
        n_extensions,
        max_texture_size,
    };

    Ok(Gpu::with_backend(flags, Box::new(backend)))
}

/// Probe whether a GL context is current, the cheap way: `glGetString`
/// returns null without one.
fn context_is_current() -> bool {
    unsafe { !gl::GetString(gl::VERSION).is_null() }
}

impl GlBackend {
    /// The number of extensions the context reported at init.
    pub fn extension_count(&self) -> i32 {
        self.n_extensions
    }

    /// The largest texture edge the context supports.
    pub fn max_texture_size(&self) -> i32 {
        self.max_texture_size
    }

    /// Grow the framebuffer stack to at least `needed` names.
    pub(crate) fn grow_framebuffer_stack(
        &self,
        needed: usize,
        log: Option<&CallLog>,
    ) -> Result<()> {
        let current = self.framebuffer_stack.lock().len();
        if needed <= current {
            return Ok(());
        }

        let missing = needed - current;
        let mut fresh: Vec<GLuint> = vec![0; missing];
        unsafe { gl::GenFramebuffers(missing as GLsizei, fresh.as_mut_ptr()) };
        if let Some(log) = log {
            log.push(format!("glGenFramebuffers ({missing})"));
        }
        if fresh.iter().any(|&name| name == 0) {
            return Err(diag::gl_error(
                ErrorCode::FailedTargetCreation,
                "Failed to generate framebuffer",
            ));
        }

        self.framebuffer_stack.lock().extend(fresh);
        Ok(())
    }

    /// A copy of the framebuffer stack for indexing during a dispatch.
    pub(crate) fn framebuffer_snapshot(&self) -> Vec<GLuint> {
        self.framebuffer_stack.lock().clone()
    }
}

impl Drop for GlBackend {
    fn drop(&mut self) {
        // TODO: the last reference may be dropped off the claim thread;
        // route these through a surviving context's retired queue instead.
        let stack = self.framebuffer_stack.get_mut();
        if !stack.is_empty() {
            unsafe { gl::DeleteFramebuffers(stack.len() as GLsizei, stack.as_ptr()) };
        }
    }
}

impl Backend for GlBackend {
    fn is_threadsafe(&self) -> bool {
        false
    }

    fn gpu_for_this_thread(&self) -> Option<Gpu> {
        CURRENT_GPU.with(|cell| cell.borrow().clone())
    }

    fn set_gpu_for_this_thread(&self, gpu: Option<Gpu>) {
        CURRENT_GPU.with(|cell| *cell.borrow_mut() = gpu);
    }

    fn info(&self, key: &str) -> Result<String> {
        let parameter = match key {
            "vendor" => gl::VENDOR,
            "renderer" => gl::RENDERER,
            "version" => gl::VERSION,
            "shading language version" => gl::SHADING_LANGUAGE_VERSION,
            _ => {
                return Err(Error::usage(format!("unrecognized info key \"{key}\"")));
            }
        };
        let string = unsafe { gl::GetString(parameter) };
        if string.is_null() {
            return Err(diag::gl_error(
                ErrorCode::FailedInit,
                format!("glGetString returned nothing for \"{key}\""),
            ));
        }
        let text = unsafe { CStr::from_ptr(string.cast()) };
        Ok(text.to_string_lossy().into_owned())
    }

    fn flush(&self, gpu: &Gpu) -> Result<()> {
        for handle in gpu.take_retired() {
            match handle {
                RetiredHandle::Program(id) => unsafe { gl::DeleteProgram(id) },
                RetiredHandle::Buffer(id) => unsafe { gl::DeleteBuffers(1, &id) },
                RetiredHandle::VertexArray(id) => unsafe { gl::DeleteVertexArrays(1, &id) },
                RetiredHandle::Texture(id) => unsafe { gl::DeleteTextures(1, &id) },
            }
        }
        Ok(())
    }

    fn compile(&self, _gpu: &Gpu, tree: &InstrTree, log: Option<&CallLog>) -> Result<()> {
        diag::clear_errors();
        compile::compile(self, tree, log)
    }

    fn dispatch(&self, gpu: &Gpu, commands: &Commands) -> Result<()> {
        dispatch::dispatch(self, gpu, commands)
    }
}
