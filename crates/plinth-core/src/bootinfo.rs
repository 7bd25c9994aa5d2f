//! Guest-visible layouts: boot info and control page
//!
//! Both layouts are part of the guest contract and must remain
//! byte-stable for a given format version. All fields are little-endian
//! at the documented offsets; nothing here is an aliased raw buffer -
//! the structs below are the single source of truth and `encode_into`
//! produces the wire bytes.
//!
//! # Boot info page (format version 1)
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0      | 4    | format version (= 1) |
//! | 8      | 8    | total page count |
//! | 16     | 8    | control-page virtual address |
//! | 24     | 8    | address-space root virtual address |
//! | 32     | 8    | physical base |
//! | 40     | 8    | frame-table virtual address (control domain only, else 0) |
//! | 48     | 8    | block-ring virtual address |
//! | 56     | 4    | net-ring count |
//! | 64     | 8*4  | net-ring virtual addresses |
//! | 96     | 8    | secondary module virtual address (0 = none) |
//! | 104    | 8    | secondary module length |
//! | 112    | 4    | firmware-table offset within this page |
//! | 116    | 4    | firmware-table length |
//! | 120    | 256  | boot command line, NUL-padded |
//! | 376    | ...  | firmware-table blob, copied verbatim |
//!
//! # Control page (time/tick fields)
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0      | 8    | wall time (ticks) |
//! | 8      | 8    | domain time (ticks) |
//! | 16     | 8    | ticks per millisecond |
//! | 24     | 8    | pending-event bitmask |
//! | 64     | 1024 | block ring area |
//! | 1088   | 512*4| net ring areas |

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::types::PAGE_SIZE;

/// Boot-info format version encoded at offset 0.
pub const BOOT_INFO_VERSION: u32 = 1;

/// Maximum virtual network rings per domain.
pub const MAX_NET_RINGS: usize = 4;

/// Bytes reserved for the command line (including the trailing NUL).
pub const CMDLINE_BYTES: usize = 256;

/// Upper bound on the formatted network-boot-root argument. The
/// substitution output is clamped to this length rather than trusting
/// the template.
pub const NETBOOT_ARG_MAX: usize = 128;

// Boot-info field offsets (the wire contract).
pub const BI_VERSION: usize = 0;
pub const BI_NR_PAGES: usize = 8;
pub const BI_CONTROL_PAGE: usize = 16;
pub const BI_ROOT: usize = 24;
pub const BI_PHYS_BASE: usize = 32;
pub const BI_FRAME_TABLE: usize = 40;
pub const BI_BLK_RING: usize = 48;
pub const BI_NET_RING_COUNT: usize = 56;
pub const BI_NET_RINGS: usize = 64;
pub const BI_MOD_START: usize = 96;
pub const BI_MOD_LEN: usize = 104;
pub const BI_FW_TABLE_OFF: usize = 112;
pub const BI_FW_TABLE_LEN: usize = 116;
pub const BI_CMDLINE: usize = 120;
pub const BI_FW_TABLE: usize = BI_CMDLINE + CMDLINE_BYTES;

// Control-page field offsets.
pub const CP_WALL_TIME: usize = 0;
pub const CP_DOMAIN_TIME: usize = 8;
pub const CP_TICKS_PER_MS: usize = 16;
pub const CP_EVENTS: usize = 24;
pub const CP_BLK_RING: usize = 64;
pub const CP_BLK_RING_BYTES: usize = 1024;
pub const CP_NET_RINGS: usize = CP_BLK_RING + CP_BLK_RING_BYTES;
pub const CP_NET_RING_BYTES: usize = 512;

/// Offset of net ring area `i` within the control page.
pub fn cp_net_ring_off(i: usize) -> usize {
    CP_NET_RINGS + i * CP_NET_RING_BYTES
}

/// The boot-info structure handed to a starting guest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub nr_pages: u64,
    pub control_page_vaddr: u64,
    pub root_vaddr: u64,
    pub phys_base: u64,
    pub frame_table_vaddr: u64,
    pub blk_ring_vaddr: u64,
    pub net_ring_vaddrs: Vec<u64>,
    pub mod_start: u64,
    pub mod_len: u64,
    pub cmdline: String,
    pub firmware_table: Vec<u8>,
}

impl BootInfo {
    /// Encode into a boot-info page. The command line is clamped to
    /// [`CMDLINE_BYTES`] - 1 and the firmware blob to the page tail.
    pub fn encode_into(&self, page: &mut [u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        page.fill(0);

        page[BI_VERSION..BI_VERSION + 4].copy_from_slice(&BOOT_INFO_VERSION.to_le_bytes());
        put_u64(page, BI_NR_PAGES, self.nr_pages);
        put_u64(page, BI_CONTROL_PAGE, self.control_page_vaddr);
        put_u64(page, BI_ROOT, self.root_vaddr);
        put_u64(page, BI_PHYS_BASE, self.phys_base);
        put_u64(page, BI_FRAME_TABLE, self.frame_table_vaddr);
        put_u64(page, BI_BLK_RING, self.blk_ring_vaddr);

        let nrings = self.net_ring_vaddrs.len().min(MAX_NET_RINGS);
        page[BI_NET_RING_COUNT..BI_NET_RING_COUNT + 4]
            .copy_from_slice(&(nrings as u32).to_le_bytes());
        for (i, &vaddr) in self.net_ring_vaddrs.iter().take(MAX_NET_RINGS).enumerate() {
            put_u64(page, BI_NET_RINGS + i * 8, vaddr);
        }

        put_u64(page, BI_MOD_START, self.mod_start);
        put_u64(page, BI_MOD_LEN, self.mod_len);

        let fw_len = self.firmware_table.len().min(PAGE_SIZE - BI_FW_TABLE);
        page[BI_FW_TABLE_OFF..BI_FW_TABLE_OFF + 4]
            .copy_from_slice(&(BI_FW_TABLE as u32).to_le_bytes());
        page[BI_FW_TABLE_LEN..BI_FW_TABLE_LEN + 4]
            .copy_from_slice(&(fw_len as u32).to_le_bytes());
        page[BI_FW_TABLE..BI_FW_TABLE + fw_len].copy_from_slice(&self.firmware_table[..fw_len]);

        let cmd = self.cmdline.as_bytes();
        let cmd_len = cmd.len().min(CMDLINE_BYTES - 1);
        page[BI_CMDLINE..BI_CMDLINE + cmd_len].copy_from_slice(&cmd[..cmd_len]);
    }
}

/// Time and event fields of the control page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPage {
    pub wall_time: u64,
    pub domain_time: u64,
    pub ticks_per_ms: u64,
    pub events: u64,
}

impl ControlPage {
    /// Encode the time/tick/event fields; ring areas are left zeroed.
    pub fn encode_into(&self, page: &mut [u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        page.fill(0);
        put_u64(page, CP_WALL_TIME, self.wall_time);
        put_u64(page, CP_DOMAIN_TIME, self.domain_time);
        put_u64(page, CP_TICKS_PER_MS, self.ticks_per_ms);
        put_u64(page, CP_EVENTS, self.events);
    }
}

fn put_u64(page: &mut [u8], off: usize, v: u64) {
    page[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Build the per-domain network-boot-root argument from a template.
///
/// Every occurrence of the literal `{id}` is replaced with the decimal
/// domain identifier and the result is clamped to [`NETBOOT_ARG_MAX`]
/// bytes. The template is domain-configurable input, so the output
/// length is bounded here rather than trusted.
pub fn format_netboot_root(template: &str, domain_id: u32) -> String {
    let mut out = String::new();
    let mut rest = template;
    while let Some(pos) = rest.find("{id}") {
        out.push_str(&rest[..pos]);
        out.push_str(&itoa(domain_id));
        rest = &rest[pos + 4..];
    }
    out.push_str(rest);
    if out.len() > NETBOOT_ARG_MAX {
        let mut end = NETBOOT_ARG_MAX;
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
    }
    out
}

fn itoa(v: u32) -> String {
    let mut s = String::new();
    let mut v = v;
    let mut digits = [0u8; 10];
    let mut n = 0;
    loop {
        digits[n] = b'0' + (v % 10) as u8;
        v /= 10;
        n += 1;
        if v == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        s.push(digits[i] as char);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    fn sample() -> BootInfo {
        BootInfo {
            nr_pages: 1024,
            control_page_vaddr: 0xC040_0000,
            root_vaddr: 0xC03F_F000,
            phys_base: 0x10_0000,
            frame_table_vaddr: 0,
            blk_ring_vaddr: 0xC040_0040,
            net_ring_vaddrs: vec![0xC040_0440, 0xC040_0640],
            mod_start: 0xC000_9000,
            mod_len: 0x2000,
            cmdline: "console=ttyS0".to_string(),
            firmware_table: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn boot_info_fields_land_at_documented_offsets() {
        let info = sample();
        let mut page = vec![0u8; PAGE_SIZE];
        info.encode_into(&mut page);

        assert_eq!(&page[BI_VERSION..4], &1u32.to_le_bytes());
        assert_eq!(&page[BI_NR_PAGES..BI_NR_PAGES + 8], &1024u64.to_le_bytes());
        assert_eq!(
            &page[BI_CONTROL_PAGE..BI_CONTROL_PAGE + 8],
            &0xC040_0000u64.to_le_bytes()
        );
        assert_eq!(&page[BI_ROOT..BI_ROOT + 8], &0xC03F_F000u64.to_le_bytes());
        assert_eq!(
            &page[BI_NET_RING_COUNT..BI_NET_RING_COUNT + 4],
            &2u32.to_le_bytes()
        );
        assert_eq!(&page[BI_MOD_LEN..BI_MOD_LEN + 8], &0x2000u64.to_le_bytes());
        assert_eq!(&page[BI_CMDLINE..BI_CMDLINE + 13], b"console=ttyS0");
        assert_eq!(page[BI_CMDLINE + 13], 0);
        assert_eq!(&page[BI_FW_TABLE..BI_FW_TABLE + 4], &[1, 2, 3, 4]);
        assert_eq!(
            &page[BI_FW_TABLE_LEN..BI_FW_TABLE_LEN + 4],
            &4u32.to_le_bytes()
        );
    }

    #[test]
    fn oversized_cmdline_is_clamped() {
        let mut info = sample();
        info.cmdline = "x".repeat(500);
        let mut page = vec![0u8; PAGE_SIZE];
        info.encode_into(&mut page);
        assert_eq!(page[BI_CMDLINE + CMDLINE_BYTES - 2], b'x');
        // Last byte of the field stays NUL.
        assert_eq!(page[BI_CMDLINE + CMDLINE_BYTES - 1], 0);
    }

    #[test]
    fn oversized_firmware_blob_is_clamped_to_page_tail() {
        let mut info = sample();
        info.firmware_table = vec![0xAA; PAGE_SIZE];
        let mut page = vec![0u8; PAGE_SIZE];
        info.encode_into(&mut page);
        let max = PAGE_SIZE - BI_FW_TABLE;
        assert_eq!(
            &page[BI_FW_TABLE_LEN..BI_FW_TABLE_LEN + 4],
            &(max as u32).to_le_bytes()
        );
        assert_eq!(page[PAGE_SIZE - 1], 0xAA);
    }

    #[test]
    fn control_page_time_fields() {
        let cp = ControlPage {
            wall_time: 111,
            domain_time: 222,
            ticks_per_ms: 1000,
            events: 0b101,
        };
        let mut page = vec![0u8; PAGE_SIZE];
        cp.encode_into(&mut page);
        assert_eq!(&page[CP_WALL_TIME..8], &111u64.to_le_bytes());
        assert_eq!(&page[CP_DOMAIN_TIME..16], &222u64.to_le_bytes());
        assert_eq!(
            &page[CP_TICKS_PER_MS..CP_TICKS_PER_MS + 8],
            &1000u64.to_le_bytes()
        );
        assert_eq!(&page[CP_EVENTS..CP_EVENTS + 8], &0b101u64.to_le_bytes());
    }

    #[test]
    fn ring_areas_fit_in_the_control_page() {
        assert!(cp_net_ring_off(MAX_NET_RINGS - 1) + CP_NET_RING_BYTES <= PAGE_SIZE);
    }

    #[test]
    fn netboot_root_substitutes_id() {
        assert_eq!(
            format_netboot_root("/export/guest{id}/root", 7),
            "/export/guest7/root"
        );
        assert_eq!(format_netboot_root("/plain", 7), "/plain");
    }

    #[test]
    fn netboot_root_output_is_bounded() {
        let template = "{id}".repeat(200);
        let out = format_netboot_root(&template, 4_000_000_000);
        assert!(out.len() <= NETBOOT_ARG_MAX);
    }
}
