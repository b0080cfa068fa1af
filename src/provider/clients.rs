//! Concrete HTTP provider clients.

mod image;
mod prediction;

pub use image::SyncImageClient;
pub use prediction::PredictionClient;

use crate::provider::is_http_url;
use serde_json::Value;

/// Pull a media URL out of the loosely-typed `output` fields providers return:
/// a bare string, a list of strings, or an object with a `url`-like field.
/// Only absolute http(s) URLs count.
pub(crate) fn extract_output_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if is_http_url(s) => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(extract_output_url),
        Value::Object(map) => ["url", "video", "video_url", "uri", "image", "image_url"]
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(extract_output_url),
        _ => None,
    }
}
