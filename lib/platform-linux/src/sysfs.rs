//! Supplemental identity, informational only: the kernel also exposes
//! vendor/model strings as NL-terminated files under
//! `/sys/bus/firewire/devices/fw<n>/`. The CSR decoded from the ROM
//! itself remains the library's source of truth; these are used only to
//! fill in a descriptor-less device's name for logging.

use std::fs;
use std::path::PathBuf;

fn attr_path(index: u32, attr: &str) -> PathBuf {
    PathBuf::from(format!("/sys/bus/firewire/devices/fw{index}/{attr}"))
}

fn read_trimmed(path: &PathBuf) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let trimmed = contents.trim_end_matches('\n').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn model_name(index: u32) -> Option<String> {
    read_trimmed(&attr_path(index, "model_name"))
}

pub fn vendor_name(index: u32) -> Option<String> {
    read_trimmed(&attr_path(index, "vendor_name"))
}
