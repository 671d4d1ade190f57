//! The master GPU object.

use std::process;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::backend::{Backend, RetiredHandle};
use crate::{Error, InitFlags, Result};

/// The main GPU abstraction object.
///
/// All other objects created against a `Gpu` maintain a strong reference to
/// it. Cloning is cheap and shares the underlying object.
///
/// The library never makes a graphics context current; for backends that are
/// not natively thread-safe the caller pairs its own context switches with
/// [`Gpu::steal_this_thread`] and [`Gpu::release_this_thread`] so that the
/// claim discipline can be checked on every mutating call.
#[derive(Clone)]
pub struct Gpu {
    inner: Arc<GpuInner>,
}

struct GpuInner {
    backend: Box<dyn Backend>,
    flags: InitFlags,
    /// Claim discipline enabled (the `NO_THREAD_SAFETY` flag clears this).
    threadsafe: bool,
    log_errors: bool,
    exit_on_error: bool,
    /// Driver handles awaiting destruction at the next flush.
    retired: Mutex<Vec<RetiredHandle>>,
}

impl std::fmt::Debug for Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpu")
            .field("flags", &self.inner.flags)
            .finish_non_exhaustive()
    }
}

impl Gpu {
    /// Wrap an already-initialized backend. Backend crates call this from
    /// their own constructors; most users go through the umbrella crate's
    /// `new_gpu` instead.
    pub fn with_backend(flags: InitFlags, backend: Box<dyn Backend>) -> Gpu {
        Gpu {
            inner: Arc::new(GpuInner {
                backend,
                flags,
                threadsafe: !flags.contains(InitFlags::NO_THREAD_SAFETY),
                log_errors: flags.contains(InitFlags::LOG_ERRORS),
                exit_on_error: flags.contains(InitFlags::EXIT_ON_ERROR),
                retired: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The flags this `Gpu` was created with.
    pub fn flags(&self) -> InitFlags {
        self.inner.flags
    }

    /// Whether two handles refer to the same underlying object.
    pub fn ptr_eq(a: &Gpu, b: &Gpu) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Get backend-specific information through a string key.
    ///
    /// Recognized keys: `"vendor"`, `"renderer"`, `"version"`,
    /// `"shading language version"`.
    pub fn info(&self, key: &str) -> Result<String> {
        self.claim_guard("get_info")?;
        self.handle_error(self.inner.backend.info(key))
    }

    /// For applicable backends, associate this `Gpu` with the calling
    /// thread.
    ///
    /// Pair this with the action that actually made the context current
    /// (such as an `eglMakeCurrent` call). Returns `true` if the claim was
    /// newly taken; `false` if this thread already held it. Backends that
    /// need no discipline always return `true`.
    pub fn steal_this_thread(&self) -> bool {
        if !self.deals_with_threads() {
            return true;
        }
        let owner = self.inner.backend.gpu_for_this_thread();
        if owner.as_ref().is_some_and(|g| Gpu::ptr_eq(g, self)) {
            return false;
        }
        self.inner.backend.set_gpu_for_this_thread(Some(self.clone()));
        true
    }

    /// Release the calling thread's claim, if this `Gpu` holds it.
    pub fn release_this_thread(&self) {
        if !self.deals_with_threads() {
            return;
        }
        let owner = self.inner.backend.gpu_for_this_thread();
        if owner.as_ref().is_some_and(|g| Gpu::ptr_eq(g, self)) {
            self.inner.backend.set_gpu_for_this_thread(None);
        }
    }

    /// Flush the context and free resources that were dropped since the
    /// last flush. Usually not necessary to call manually, except to
    /// release driver objects immediately.
    pub fn flush(&self) -> Result<()> {
        self.claim_guard("flush")?;
        self.handle_error(self.inner.backend.flush(self))
    }

    /// Queue a driver handle for destruction at the next flush on the claim
    /// thread. Called from backend state destructors, which may run on any
    /// thread.
    pub fn retire(&self, handle: RetiredHandle) {
        self.inner.retired.lock().push(handle);
    }

    /// Drain the queue of retired driver handles. Backends call this from
    /// their flush implementation, on the claim thread.
    pub fn take_retired(&self) -> Vec<RetiredHandle> {
        std::mem::take(&mut *self.inner.retired.lock())
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        &*self.inner.backend
    }

    fn deals_with_threads(&self) -> bool {
        !self.inner.backend.is_threadsafe() && self.inner.threadsafe
    }

    /// Whether the calling thread may issue backend calls on this `Gpu`.
    pub(crate) fn has_thread(&self) -> bool {
        !self.deals_with_threads()
            || self
                .inner
                .backend
                .gpu_for_this_thread()
                .is_some_and(|g| Gpu::ptr_eq(&g, self))
    }

    /// Claim check shared by every mutating entry point.
    pub(crate) fn claim_guard(&self, op: &str) -> Result<()> {
        if self.has_thread() {
            Ok(())
        } else {
            error!("{op}: GPU does not own the current thread, returning");
            Err(Error::usage("GPU does not own the current thread"))
        }
    }

    /// Central exit-or-log-or-propagate decision for backend errors.
    pub(crate) fn handle_error<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if self.inner.log_errors {
                error!("backend reported an error: {err}");
            }
            if self.inner.exit_on_error {
                error!("a fatal error occurred and the GPU is configured to exit: {err}");
                process::exit(1);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{serialized_gpu, stub_gpu};

    #[test]
    fn threadsafe_backend_needs_no_claim() {
        let gpu = stub_gpu();
        assert!(gpu.steal_this_thread());
        assert_eq!(gpu.info("vendor").unwrap(), "stub");
    }

    #[test]
    fn serialized_backend_requires_claim() {
        let gpu = serialized_gpu();
        assert!(gpu.info("vendor").is_err());

        assert!(gpu.steal_this_thread());
        // Already claimed by this thread.
        assert!(!gpu.steal_this_thread());
        assert_eq!(gpu.info("vendor").unwrap(), "stub");

        gpu.release_this_thread();
        assert!(gpu.info("vendor").is_err());
    }

    #[test]
    fn no_thread_safety_flag_bypasses_claims() {
        let gpu = Gpu::with_backend(
            InitFlags::BACKEND_OPENGL | InitFlags::NO_THREAD_SAFETY,
            Box::new(crate::testutil::StubBackend::new(false)),
        );
        assert!(gpu.steal_this_thread());
        assert_eq!(gpu.info("vendor").unwrap(), "stub");
    }

    #[test]
    fn release_ignores_foreign_claim() {
        let a = serialized_gpu();
        let b = serialized_gpu();
        a.steal_this_thread();
        // b never claimed; releasing it must not clear a's claim.
        b.release_this_thread();
        assert!(a.info("vendor").is_ok());
        a.release_this_thread();
    }

    #[test]
    fn retired_handles_drain_in_order() {
        use crate::backend::RetiredHandle;

        let gpu = stub_gpu();
        gpu.retire(RetiredHandle::Program(1));
        gpu.retire(RetiredHandle::Texture(2));
        let drained = gpu.take_retired();
        assert_eq!(
            drained,
            vec![RetiredHandle::Program(1), RetiredHandle::Texture(2)]
        );
        assert!(gpu.take_retired().is_empty());
    }
}
