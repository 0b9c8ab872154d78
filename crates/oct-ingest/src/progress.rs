//! Progress reporting for the raw merge.
//!
//! The merge reads one file at a time and reports through this trait; the
//! CLI renders it with `indicatif`, tests pass [`NullProgress`].

pub trait ProgressCallback: Send + Sync {
    fn set_total(&self, total: u64);

    fn inc(&self, delta: u64);

    fn set_message(&self, msg: String);

    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}
