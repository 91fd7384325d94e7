//! Agent seam — the task manager the session loops drive.

use tether_core::message::{ResponseMessage, TaskingMessage};

/// Supplied by the embedding agent. The consumer loop polls
/// `produce_tasking`; the processor loop feeds `process_response`.
/// Both session loops exit once `is_alive` turns false.
pub trait AgentBridge: Send + Sync {
    fn is_alive(&self) -> bool;

    /// One outbound tasking message, if the agent has anything ready.
    /// Returning `None` (or an empty message) makes the consumer back
    /// off briefly before polling again.
    fn produce_tasking(&self) -> Option<TaskingMessage>;

    /// Handle one steady-state response. Returns whether it was
    /// processed; an unhandled response is logged and dropped.
    fn process_response(&self, response: ResponseMessage) -> bool;
}
