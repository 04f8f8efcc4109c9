//! Request orchestration: validation, the per-image loop, teardown and background execution.

/// Per-request engine construction.
pub mod factory;
/// Pipeline options.
pub mod opts;
/// The request state machine.
pub mod orchestrator;
/// Request, outcome and response types.
pub mod request;
/// Background execution and cancellation.
pub mod task;
