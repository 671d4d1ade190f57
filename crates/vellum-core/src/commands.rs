//! Compiled commands.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::instr::InstrTree;
use crate::{Error, Gpu, Result};

/// An append-only log of human-readable driver-call strings.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: String) {
        self.calls.lock().push(call);
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// The two call logs of a debug-annotated compilation.
#[derive(Default)]
pub struct DebugCalls {
    /// Calls issued while the plan was compiled.
    pub compile: CallLog,
    /// Calls issued by the most recent dispatch.
    pub run: CallLog,
}

/// Backend-specific instructions produced by consuming a
/// [`Plan`](crate::Plan) with
/// [`Plan::into_commands`](crate::Plan::into_commands). Immutable after
/// compilation.
#[derive(Clone)]
pub struct Commands {
    inner: Arc<CommandsInner>,
}

struct CommandsInner {
    gpu: Gpu,
    tree: InstrTree,
    debug: Option<DebugCalls>,
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("instrs", &self.inner.tree.len())
            .finish_non_exhaustive()
    }
}

impl Commands {
    pub(crate) fn new(gpu: &Gpu, tree: InstrTree, debug: bool) -> Commands {
        Commands {
            inner: Arc::new(CommandsInner {
                gpu: gpu.clone(),
                tree,
                debug: debug.then(DebugCalls::default),
            }),
        }
    }

    pub fn gpu(&self) -> &Gpu {
        &self.inner.gpu
    }

    /// The compiled instruction tree. Consumed by backends.
    pub fn tree(&self) -> &InstrTree {
        &self.inner.tree
    }

    /// The compile/run call logs, present when the plan was consumed with
    /// debugging enabled.
    pub fn debug_calls(&self) -> Option<&DebugCalls> {
        self.inner.debug.as_ref()
    }

    /// Run the commands right now, against the context current on the
    /// calling thread. Requires the GPU claim.
    pub fn dispatch(&self) -> Result<()> {
        let gpu = &self.inner.gpu;
        gpu.claim_guard("dispatch")?;
        if let Some(debug) = &self.inner.debug {
            debug.run.reset();
        }
        gpu.handle_error(gpu.backend().dispatch(gpu, self))
    }

    /// The driver calls recorded by the most recent dispatch. Fails unless
    /// the plan was consumed with debugging enabled.
    pub fn last_dispatch_calls(&self) -> Result<Vec<String>> {
        match &self.inner.debug {
            Some(debug) => Ok(debug.run.snapshot()),
            None => {
                error!("last_dispatch_calls: commands were not compiled with debugging enabled");
                Err(Error::usage("commands carry no debug call log"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::stub_gpu;
    use crate::{Plan, Shader, StateKey, Value};

    fn compiled(debug: bool) -> Commands {
        let gpu = stub_gpu();
        let shader = Shader::for_source(&gpu, "void main() {}", "void main() {}");
        let plan = Plan::new(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader))]);
        plan.pop();
        if debug {
            plan.into_debugging_commands().unwrap()
        } else {
            plan.into_commands().unwrap()
        }
    }

    #[test]
    fn plain_commands_carry_no_call_log() {
        let commands = compiled(false);
        assert!(commands.debug_calls().is_none());
        assert!(commands.last_dispatch_calls().is_err());
    }

    #[test]
    fn debug_commands_record_and_reset() {
        let commands = compiled(true);
        let debug = commands.debug_calls().unwrap();
        debug.run.push("glClear (GL_COLOR_BUFFER_BIT)".into());
        assert_eq!(commands.last_dispatch_calls().unwrap().len(), 1);

        // A new dispatch resets the run log (the stub records nothing).
        commands.dispatch().unwrap();
        assert!(commands.last_dispatch_calls().unwrap().is_empty());
    }

    #[test]
    fn dispatch_succeeds_on_stub() {
        let commands = compiled(false);
        assert!(commands.dispatch().is_ok());
    }
}
