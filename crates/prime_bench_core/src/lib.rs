//! Shared prime counter benchmark primitives.
//!
//! This crate owns the deterministic parts of the harness: the variant
//! catalog, deployment planning, CloudFormation rendering and the prime
//! counting workload itself. It intentionally excludes AWS SDK and Lambda
//! runtime concerns.

pub mod catalog;
pub mod deployment;
pub mod primes;
pub mod template;
