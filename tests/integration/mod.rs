//! Integration tests for the generation pipeline

mod cache_idempotence;
mod provider_fallback;
mod test_utils;
mod trigger_cooldown;
mod video_polling;
