//! Property-based tests for fingerprinting, scoring and queue ordering

mod fingerprint;
mod queue_order;
