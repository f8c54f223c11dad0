//! Output URL extraction from terminal status payloads.

use crate::kind::JobKind;

/// Look up `result.outputs[0].<media>.url` for the job kind.
pub fn extract_output_url(kind: JobKind, payload: &serde_json::Value) -> Option<String> {
    let pointer = format!("/result/outputs/0/{}/url", kind.media_field());
    payload
        .pointer(&pointer)
        .and_then(|u| u.as_str())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}
