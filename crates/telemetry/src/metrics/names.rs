//! Metric names recorded by the rate limit engine.

/// Number of rate limit decisions, with `algorithm` and `allowed` attributes
pub const RATE_LIMIT_DECISIONS: &str = "rate_limit.decisions";

/// Duration of a single limit evaluation against storage in milliseconds
pub const RATE_LIMIT_EVALUATION_DURATION: &str = "rate_limit.evaluation.duration";

/// Number of storage failures surfaced to callers
pub const RATE_LIMIT_STORAGE_ERRORS: &str = "rate_limit.storage.errors";
