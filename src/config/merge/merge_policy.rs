//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Sections not listed here fall back to their serde defaults.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("executor.inter_job_delay_ms", 1500)?
        .set_default("executor.max_queue_size", 1000)?
        .set_default("poller.interval_ms", 5000)?
        .set_default("poller.max_poll_errors", 5)?
        .set_default("trigger.threshold", 60)?
        .set_default("trigger.cooldown_turns", 3)
}
