//! AWS-oriented adapters and handlers for the prime counter function.
//!
//! This crate owns runtime integration details (the Lambda handler, the
//! parameter store adapter and the log sink). Counting and deployment
//! planning live in `prime_bench_core`.

pub mod adapters;
pub mod handlers;
