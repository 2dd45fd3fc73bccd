//! Signal detection in the ticket comment feed.
//!
//! Workers and humans communicate with the orchestrator through comments:
//! a completion marker (`✅`) signals that a worker finished its phase task,
//! and an approval keyword (`approved`, `lgtm`, `approve`) signals that a
//! human cleared a gate.
//!
//! - [`extract`]: pure filtering/extraction rules, testable in isolation
//! - [`poller`]: the cancellable polling loop over the ticket backend

pub mod extract;
pub mod poller;

pub use extract::{
    ApprovalSignal, CompletionSignal, extract_approval, extract_completions,
    APPROVAL_KEYWORDS, COMPLETION_MARKER,
};
pub use poller::{PollResult, SignalPoller, SignalType};
