//! Target identification attributes

use std::collections::BTreeMap;
use std::path::Path;

use sysinfo::System;

/// Attribute carrying the target name
pub const TARGET_ATTRIBUTE: &str = "FullMetalUpdate";

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";

/// Facts about the host sent along with the configured attributes
pub fn host_facts() -> BTreeMap<String, String> {
    let mut facts = BTreeMap::new();

    if let Some(hostname) = System::host_name() {
        facts.insert("hostname".to_string(), hostname);
    }
    if let Some(os_version) = System::long_os_version() {
        facts.insert("os_version".to_string(), os_version);
    }
    if let Some(kernel) = System::kernel_version() {
        facts.insert("kernel_version".to_string(), kernel);
    }
    if let Some(board) = detect_board(Path::new(DEVICE_TREE_MODEL)) {
        facts.insert("board".to_string(), board);
    }

    facts
}

/// Board model read from the device tree
fn detect_board(model_file: &Path) -> Option<String> {
    let model = std::fs::read_to_string(model_file).ok()?;
    let model = model.trim_matches('\0').trim();
    if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    }
}

/// Attributes sent when the server asks the target to identify itself
///
/// Configured attributes take precedence over host facts and the target
/// name entry.
pub fn collect_attributes(
    target_name: &str,
    configured: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut attributes = host_facts();
    attributes.insert(TARGET_ATTRIBUTE.to_string(), target_name.to_string());
    attributes.extend(configured.iter().map(|(k, v)| (k.clone(), v.clone())));
    attributes
}
