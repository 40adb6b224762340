//! Host board detection
//!
//! The bus factory decides between the hardware and virtual backends by
//! looking at the device-tree model string of the machine it runs on.

use std::fs;

/// Device-tree model string, if the host exposes one
pub fn model() -> Option<String> {
    let raw = fs::read("/proc/device-tree/model").ok()?;
    let s = String::from_utf8_lossy(&raw);
    Some(s.trim_end_matches('\0').trim().to_owned())
}

/// True when running on a Raspberry Pi of any generation
pub fn is_raspberry_pi() -> bool {
    model().is_some_and(|m| m.starts_with("Raspberry Pi"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_does_not_panic() {
        // Plain smoke test; the file only exists on device-tree hosts
        let _ = model();
        let _ = is_raspberry_pi();
    }
}
