pub mod processing_slot;
pub mod shell_processor;
pub mod stalled_recoverer;
pub mod worker_loop;

#[cfg(test)]
mod test_support;

pub use processing_slot::{ProcessingSlot, SlotPermit};
pub use shell_processor::ShellJobProcessor;
pub use stalled_recoverer::{ScanOutcome, StalledJobRecoverer};
pub use worker_loop::{PollOutcome, WorkerLoop};
