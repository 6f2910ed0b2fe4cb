//! Narrow interfaces to the audio engine
//!
//! The dispatcher core treats the engine as an external collaborator reached
//! through two small seams: [`EngineController`] on the worker thread, where
//! plugin lifecycle commands may block for as long as they need, and
//! [`RtProcessor`] on the audio thread, where only wait-free queue traffic
//! and block processing are allowed.

use tracing::info;

use crate::event::EventStatus;
use crate::rt_event::RtEvent;

/// Plugin lifecycle commands executed by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Create a named processing chain with the given channel count.
    AddChain { name: String, channels: usize },
    /// Tear down a chain and everything on it.
    DeleteChain { name: String },
    /// Load a plugin into a chain.
    AddPlugin {
        chain: String,
        uid: String,
        name: String,
        path: String,
    },
    /// Unload a plugin from a chain.
    RemovePlugin { chain: String, name: String },
}

/// Non-real-time control surface of the engine. Commands run on the worker
/// thread and may block; a slow command delays later commands, never the
/// dispatcher or the audio thread.
pub trait EngineController: Send {
    fn execute_command(&mut self, command: EngineCommand) -> EventStatus;

    /// Best-effort diagnostic hook, invoked by the worker on a slow period.
    fn report_timings(&self) {}
}

/// Real-time side of the audio graph, driven by an audio frontend once per
/// block. Implementations must not allocate or block.
pub trait RtProcessor: Send {
    /// Apply one event popped from the outgoing queue.
    fn process_rt_event(&mut self, event: RtEvent);

    /// Render one block of audio into `output`.
    fn process_chunk(&mut self, output: &mut [f32]);

    /// Drain events the graph wants to send upstream, one per call.
    fn poll_rt_event(&mut self) -> Option<RtEvent> {
        None
    }
}

/// Stand-in engine used by the demo binary and the test harness: executes
/// every command by recording it.
pub struct BypassEngine {
    executed: std::sync::Arc<std::sync::Mutex<Vec<EngineCommand>>>,
}

impl BypassEngine {
    pub fn new() -> Self {
        Self {
            executed: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Shared view of the commands executed so far, for callers that keep a
    /// handle after the engine moves into the worker.
    pub fn executed_commands(&self) -> std::sync::Arc<std::sync::Mutex<Vec<EngineCommand>>> {
        self.executed.clone()
    }
}

impl Default for BypassEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineController for BypassEngine {
    fn execute_command(&mut self, command: EngineCommand) -> EventStatus {
        info!("engine command: {:?}", command);
        self.executed.lock().unwrap().push(command);
        EventStatus::HandledOk
    }

    fn report_timings(&self) {
        info!(
            "engine timings: {} commands executed",
            self.executed.lock().unwrap().len()
        );
    }
}
