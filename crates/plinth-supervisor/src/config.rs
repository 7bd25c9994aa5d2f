//! Supervisor configuration

use alloc::string::{String, ToString};
use serde::{Deserialize, Serialize};

/// Default scheduling quantum in ticks.
pub const DEFAULT_QUANTUM: u32 = 2;

/// Default frame pool size (16 MiB of 4 KiB frames).
pub const DEFAULT_POOL_FRAMES: usize = 4096;

/// Default first pool pfn, above the hypervisor image and the
/// frame-table metadata window.
pub const DEFAULT_BASE_PFN: u64 = 0x100;

/// Boot-time configuration of the control core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Frames in the global pool
    pub pool_frames: usize,
    /// pfn of the first pool frame
    pub base_pfn: u64,
    /// Scheduling quantum in ticks
    pub quantum: u32,
    /// Boot command line copied into every domain's boot info
    pub cmdline: String,
    /// Optional network-boot-root template; `{id}` expands to the
    /// domain identifier, output bounded
    pub netboot_root: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_frames: DEFAULT_POOL_FRAMES,
            base_pfn: DEFAULT_BASE_PFN,
            quantum: DEFAULT_QUANTUM,
            cmdline: "console=ttyS0".to_string(),
            netboot_root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert!(c.pool_frames > 0);
        assert!(c.quantum > 0);
        assert!(c.netboot_root.is_none());
    }

    #[test]
    fn config_deserializes_from_json() {
        let json = r#"{
            "pool_frames": 128,
            "base_pfn": 512,
            "quantum": 1,
            "cmdline": "quiet",
            "netboot_root": "/export/guest{id}"
        }"#;
        let c: Config = serde_json::from_str(json).unwrap();
        assert_eq!(c.pool_frames, 128);
        assert_eq!(c.quantum, 1);
        assert_eq!(c.netboot_root.as_deref(), Some("/export/guest{id}"));
    }
}
