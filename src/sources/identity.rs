//! Device identity: machine id, hardware model fallback, friendly names.

use super::read_source;
use std::path::Path;
use tracing::debug;

const MACHINE_ID_PATHS: &[&str] = &["etc/machine-id", "var/lib/dbus/machine-id"];
const MODEL_PATHS: &[&str] = &[
    "sys/firmware/devicetree/base/model",
    "sys/class/dmi/id/product_name",
];
const FALLBACK_ID: &str = "device";

/// Returns the machine id when non-empty, else the sanitized hardware model,
/// else `"device"`.
pub fn device_id(root: &Path) -> String {
    first_non_empty(root, MACHINE_ID_PATHS)
        .or_else(|| first_non_empty(root, MODEL_PATHS).map(|model| sanitize_model(&model)))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| FALLBACK_ID.to_string())
}

fn first_non_empty(root: &Path, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|relative| {
        match read_source(&root.join(relative)) {
            Ok(contents) => {
                let value = contents.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                (!value.is_empty()).then(|| value.to_string())
            }
            Err(e) => {
                debug!(error = %e, "Identity source skipped");
                None
            }
        }
    })
}

/// Collapses whitespace runs in a model string into underscores.
pub fn sanitize_model(model: &str) -> String {
    model
        .split(|c: char| c.is_whitespace() || c == '\0')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Maps a known device id to its friendly name.
pub fn resolve_device_name(id: &str) -> Option<&'static str> {
    match id {
        "9ea5006ef6b50d20" => Some("atom1"),
        "0e908fe6ca72fba2" => Some("atom2"),
        "08968328ace45d30" => Some("atom3"),
        _ => None,
    }
}
