use std::sync::atomic::{AtomicBool, Ordering};

pub const INITIALIZATION_TYPE_ENV: &str = "AWS_LAMBDA_INITIALIZATION_TYPE";
const PROVISIONED_CONCURRENCY: &str = "provisioned-concurrency";

/// Reports whether an invocation is the first one served by this process.
///
/// Provisioned-concurrency environments are pre-warmed and never report a
/// cold start.
#[derive(Debug)]
pub struct ColdStartTracker {
    pending: AtomicBool,
}

impl ColdStartTracker {
    pub fn new(initialization_type: Option<&str>) -> Self {
        Self {
            pending: AtomicBool::new(initialization_type != Some(PROVISIONED_CONCURRENCY)),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(INITIALIZATION_TYPE_ENV).ok().as_deref())
    }

    /// `true` exactly once, for the first caller.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}
