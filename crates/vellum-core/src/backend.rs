//! The contract between the frontend and a backend implementation.
//!
//! A backend is selected once, at [`Gpu`] creation, and the `Gpu` forwards
//! every lifecycle, compile, and dispatch call through the [`Backend`]
//! trait. The frontend owns the common object state (reference counts, init
//! descriptors); a backend extends each object with its own state through
//! that object's [`BackendSlot`].

use std::any::Any;
use std::sync::OnceLock;

use crate::commands::CallLog;
use crate::instr::InstrTree;
use crate::{Commands, Gpu, Result};

/// A driver object whose owner was dropped and which now awaits destruction
/// on the next [`Gpu::flush`] on the claim thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetiredHandle {
    Program(u32),
    Buffer(u32),
    VertexArray(u32),
    Texture(u32),
}

/// The backend vtable.
///
/// Implementations must be safe to share between threads; whether they may
/// actually be *called* from any thread is governed by
/// [`Backend::is_threadsafe`] and the claim discipline on [`Gpu`].
pub trait Backend: Send + Sync + 'static {
    /// Whether the backend is natively safe to drive from any thread. When
    /// false, the frontend enforces the per-thread claim discipline.
    fn is_threadsafe(&self) -> bool;

    /// The [`Gpu`] currently claimed by the calling thread, if any.
    fn gpu_for_this_thread(&self) -> Option<Gpu>;

    /// Associate (or clear) the calling thread's claimed [`Gpu`].
    fn set_gpu_for_this_thread(&self, gpu: Option<Gpu>);

    /// Backend information lookup by string key.
    fn info(&self, key: &str) -> Result<String>;

    /// Flush the context and destroy retired driver objects.
    fn flush(&self, gpu: &Gpu) -> Result<()>;

    /// Validate the instruction tree and materialize every resource it
    /// references. `log` collects human-readable driver-call strings when
    /// the plan was consumed with debugging enabled.
    fn compile(&self, gpu: &Gpu, tree: &InstrTree, log: Option<&CallLog>) -> Result<()>;

    /// Execute previously compiled commands against the live context.
    fn dispatch(&self, gpu: &Gpu, commands: &Commands) -> Result<()>;
}

/// Write-once storage for backend state attached to a frontend object.
///
/// The slot is empty until the backend's *ensure* step materializes a driver
/// object; afterwards the state is immutable for the object's lifetime,
/// which is what makes "the first use fixes the role" style invariants hold.
#[derive(Default)]
pub struct BackendSlot(OnceLock<Box<dyn Any + Send + Sync>>);

impl BackendSlot {
    pub const fn new() -> Self {
        Self(OnceLock::new())
    }

    /// The stored state, if the slot was initialized with type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.get().and_then(|state| state.downcast_ref::<T>())
    }

    /// Return the stored state, running `init` first if the slot is empty.
    /// An `Err` from `init` leaves the slot empty.
    pub fn get_or_try_init<T, E, F>(&self, init: F) -> Result<&T, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        if self.0.get().is_none() {
            let state = init()?;
            let _ = self.0.set(Box::new(state));
        }
        match self.get::<T>() {
            Some(state) => Ok(state),
            // Each object kind has exactly one backend state type.
            None => unreachable!("backend slot holds a foreign state type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_initializes_once() {
        let slot = BackendSlot::new();
        let mut runs = 0;
        let first: &u32 = slot
            .get_or_try_init(|| {
                runs += 1;
                Ok::<_, ()>(7)
            })
            .unwrap();
        assert_eq!(*first, 7);
        let again: &u32 = slot.get_or_try_init(|| Ok::<_, ()>(9)).unwrap();
        assert_eq!(*again, 7);
        assert_eq!(runs, 1);
    }

    #[test]
    fn failed_init_leaves_slot_empty() {
        let slot = BackendSlot::new();
        let err: Result<&u32, &str> = slot.get_or_try_init(|| Err("nope"));
        assert!(err.is_err());
        assert!(slot.get::<u32>().is_none());
        let ok: &u32 = slot.get_or_try_init(|| Ok::<_, ()>(3)).unwrap();
        assert_eq!(*ok, 3);
    }
}
