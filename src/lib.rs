//! Tooling around the `sieve` sampling engine: auditing finished samples.

pub mod audit;

pub use audit::{AuditReport, Violation, audit_sample};
