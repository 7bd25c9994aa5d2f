//! Address-space builder
//!
//! Builds a domain's two-level translation hierarchy: a root table of
//! [`ROOT_SLOTS`] slots (the top slots carry the hypervisor's shared
//! mappings, one slot the domain's private-mapping table) and second-level
//! leaf tables of [`TABLE_ENTRIES`] entries each. Every non-root table
//! occupies exactly one pool frame taken from the top of the domain's own
//! memory window; the topmost frame becomes the root.
//!
//! The builder is pure: it mutates the frame arena's ownership records
//! and returns the completed [`AddressSpace`] plus a [`LoadInfo`]
//! describing where the runtime layer must copy the image and boot-info
//! bytes. Switching the active root and performing those copies is the
//! runtime's job, inside its preemption-disabled scope.
//!
//! Window layout, low to high (chain order, not physically contiguous):
//!
//! ```text
//! load_vaddr:       guest image
//!                   ...
//! boot info:        <one page, directly below the tables>
//! leaf tables:      <as many as the scan needs, taken top-down>
//! root table:       <the topmost window frame>
//! control page:     <mapped one page past the window>
//! frame table:      <control domain only, mapped read-only above that>
//! ```

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::bootinfo::{cp_net_ring_off, format_netboot_root, BootInfo, CP_BLK_RING, MAX_NET_RINGS};
use crate::frame::{FrameArena, FrameHandle, FrameType};
use crate::types::{BuildError, DomainId, PAGE_SHIFT, PAGE_SIZE};

/// Slots in the root table.
pub const ROOT_SLOTS: usize = 1024;

/// Entries per second-level (leaf) table.
pub const TABLE_ENTRIES: usize = 1024;

/// Log2 of the bytes one root slot covers (1024 pages of 4 KiB).
pub const SLOT_SHIFT: u32 = 22;

/// Root slots at and above this index belong to the hypervisor. Slot
/// [`PRIVATE_SLOT`] is rewritten per domain; the rest are copied from the
/// shared template. Guest mappings must stay below this boundary.
pub const GLOBAL_SLOT_BASE: usize = 896;

/// The per-domain private-mapping slot.
pub const PRIVATE_SLOT: usize = GLOBAL_SLOT_BASE;

/// pfn of the first hypervisor-owned leaf table referenced by the shared
/// template slots. Below the frame pool; never dereferenced by the core.
pub const HYPERVISOR_TABLE_PFN_BASE: u64 = 0x40;

/// Guest image magic, first 8 bytes of every bootable image.
pub const GUEST_MAGIC: [u8; 8] = *b"PlinthG1";

/// Image header: magic (8) + load virtual address (8, LE).
pub const IMAGE_HEADER_BYTES: usize = 16;

// ============================================================================
// Entry types
// ============================================================================

/// Permission/status bits of one translation entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryFlags {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub accessed: bool,
    pub dirty: bool,
}

impl EntryFlags {
    /// Guest data page: present/writable/user/accessed/dirty.
    pub const fn guest_data() -> Self {
        Self {
            present: true,
            writable: true,
            user: true,
            accessed: true,
            dirty: true,
        }
    }

    /// Table reference: present/writable/user/accessed.
    pub const fn table() -> Self {
        Self {
            present: true,
            writable: true,
            user: true,
            accessed: true,
            dirty: false,
        }
    }

    /// Read-only guest-visible page.
    pub const fn read_only() -> Self {
        Self {
            present: true,
            writable: false,
            user: true,
            accessed: true,
            dirty: false,
        }
    }

    /// Hypervisor-private mapping.
    pub const fn hypervisor() -> Self {
        Self {
            present: true,
            writable: true,
            user: false,
            accessed: false,
            dirty: false,
        }
    }

    /// Convert to the byte representation.
    pub const fn to_byte(&self) -> u8 {
        (self.present as u8)
            | (self.writable as u8) << 1
            | (self.user as u8) << 2
            | (self.accessed as u8) << 3
            | (self.dirty as u8) << 4
    }
}

/// A second-level entry mapping one guest page to one physical frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageEntry {
    pub pfn: u64,
    pub flags: EntryFlags,
}

/// A root-table slot referencing a leaf table (or a hypervisor mapping).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootEntry {
    pub pfn: u64,
    pub flags: EntryFlags,
}

/// One second-level table.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafTable {
    entries: Vec<Option<PageEntry>>,
}

impl LeafTable {
    fn new() -> Self {
        Self {
            entries: alloc::vec![None; TABLE_ENTRIES],
        }
    }

    fn set(&mut self, idx: usize, entry: PageEntry) {
        self.entries[idx] = Some(entry);
    }

    /// Entry at `idx`, if mapped.
    pub fn get(&self, idx: usize) -> Option<PageEntry> {
        self.entries[idx]
    }
}

/// The hypervisor's shared root-slot template, copied into every new
/// address space before the domain-private slots are filled.
#[derive(Clone, Debug)]
pub struct RootTemplate {
    slots: Vec<Option<RootEntry>>,
}

impl RootTemplate {
    /// The default template: hypervisor leaf tables mapped at the global
    /// slots, everything below [`GLOBAL_SLOT_BASE`] empty.
    pub fn hypervisor_default() -> Self {
        let mut slots = alloc::vec![None; ROOT_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate().skip(GLOBAL_SLOT_BASE) {
            *slot = Some(RootEntry {
                pfn: HYPERVISOR_TABLE_PFN_BASE + (i - GLOBAL_SLOT_BASE) as u64,
                flags: EntryFlags::hypervisor(),
            });
        }
        Self { slots }
    }
}

// ============================================================================
// Address space
// ============================================================================

/// A built two-level address space.
#[derive(Debug, PartialEq)]
pub struct AddressSpace {
    root: FrameHandle,
    root_pfn: u64,
    slots: Vec<Option<RootEntry>>,
    leaves: BTreeMap<u64, LeafTable>,
}

impl AddressSpace {
    /// Pool frame holding the root table.
    pub fn root_handle(&self) -> FrameHandle {
        self.root
    }

    /// pfn of the root table.
    pub fn root_pfn(&self) -> u64 {
        self.root_pfn
    }

    /// Root slot `i`.
    pub fn slot(&self, i: usize) -> Option<RootEntry> {
        self.slots[i]
    }

    /// Walk the hierarchy for `vaddr`.
    pub fn translate(&self, vaddr: u64) -> Option<PageEntry> {
        let slot = (vaddr >> SLOT_SHIFT) as usize & (ROOT_SLOTS - 1);
        let root_entry = self.slots[slot]?;
        let leaf = self.leaves.get(&root_entry.pfn)?;
        leaf.get((vaddr >> PAGE_SHIFT) as usize & (TABLE_ENTRIES - 1))
    }

    fn set_entry(&mut self, vaddr: u64, entry: PageEntry) {
        let slot = (vaddr >> SLOT_SHIFT) as usize & (ROOT_SLOTS - 1);
        let leaf_pfn = match self.slots[slot] {
            Some(e) => e.pfn,
            None => return,
        };
        if let Some(leaf) = self.leaves.get_mut(&leaf_pfn) {
            leaf.set((vaddr >> PAGE_SHIFT) as usize & (TABLE_ENTRIES - 1), entry);
        }
    }

    fn clear_writable(&mut self, vaddr: u64) {
        let slot = (vaddr >> SLOT_SHIFT) as usize & (ROOT_SLOTS - 1);
        let leaf_pfn = match self.slots[slot] {
            Some(e) => e.pfn,
            None => return,
        };
        if let Some(leaf) = self.leaves.get_mut(&leaf_pfn) {
            let idx = (vaddr >> PAGE_SHIFT) as usize & (TABLE_ENTRIES - 1);
            if let Some(mut entry) = leaf.get(idx) {
                entry.flags.writable = false;
                leaf.set(idx, entry);
            }
        }
    }
}

// ============================================================================
// Guest image
// ============================================================================

/// A validated guest image: header magic, declared load address, body.
#[derive(Debug)]
pub struct GuestImage<'a> {
    pub load_vaddr: u64,
    pub body: &'a [u8],
}

impl<'a> GuestImage<'a> {
    /// Validate the header. Rejects bad magic and load addresses that are
    /// not page-aligned, before any frame is allocated.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BuildError> {
        if bytes.len() < IMAGE_HEADER_BYTES || bytes[..8] != GUEST_MAGIC {
            return Err(BuildError::InvalidImage);
        }
        let mut le = [0u8; 8];
        le.copy_from_slice(&bytes[8..16]);
        let load_vaddr = u64::from_le_bytes(le);
        if load_vaddr & (PAGE_SIZE as u64 - 1) != 0 {
            return Err(BuildError::InvalidImage);
        }
        Ok(Self {
            load_vaddr,
            body: &bytes[IMAGE_HEADER_BYTES..],
        })
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Inputs to [`build`] beyond the image itself.
pub struct BuildParams<'a> {
    pub domain: DomainId,
    pub memory_kb: u64,
    /// Control-page frame, allocated at domain creation.
    pub control_page: FrameHandle,
    /// Private-mapping table frame, allocated at domain creation.
    pub private_table: FrameHandle,
    pub net_rings: usize,
    pub cmdline: &'a str,
    pub netboot_root: Option<&'a str>,
    /// Opaque firmware table, copied verbatim into the boot-info page.
    pub firmware_table: &'a [u8],
    /// Co-loaded secondary image, placed directly after the primary body.
    pub secondary_module: Option<&'a [u8]>,
    pub template: &'a RootTemplate,
}

/// Everything the runtime layer needs to finish starting the guest.
#[derive(Debug, PartialEq)]
pub struct LoadInfo {
    pub chain_head: FrameHandle,
    pub nr_pages: u64,
    pub space: AddressSpace,
    /// Guest entry point (the declared load address).
    pub entry: u64,
    /// Initial stack pointer (grows down from the boot-info page).
    pub stack_ptr: u64,
    pub boot_info_vaddr: u64,
    pub control_page_vaddr: u64,
    /// 0 unless this is the control domain.
    pub frame_table_vaddr: u64,
    pub boot_info: BootInfo,
}

/// Build a domain's address space and boot info.
///
/// Implements the construction sequence: validate, allocate, map, protect
/// the table frames, install the control page (and, for the control
/// domain, the read-only frame-table window), derive the boot info.
///
/// On [`BuildError::ImageTooLarge`] the freshly allocated chain is
/// released before returning; the pool is left exactly as found on every
/// error path.
pub fn build(
    arena: &mut FrameArena,
    params: &BuildParams<'_>,
    image_bytes: &[u8],
) -> Result<LoadInfo, BuildError> {
    // Validation happens before any frame is allocated.
    let image = GuestImage::parse(image_bytes)?;
    let pages = (params.memory_kb >> (PAGE_SHIFT - 10)) as usize;
    if pages == 0 {
        return Err(BuildError::OutOfMemory);
    }

    let ft_pages = if params.domain.is_control() {
        arena.metadata_pages()
    } else {
        0
    };
    // One page past the window for the control page, plus the metadata
    // window for the control domain.
    let scan_pages = pages + 1 + ft_pages;

    let end_vaddr = image
        .load_vaddr
        .checked_add((scan_pages as u64) << PAGE_SHIFT)
        .ok_or(BuildError::InvalidImage)?;
    if end_vaddr > (GLOBAL_SLOT_BASE as u64) << SLOT_SHIFT {
        return Err(BuildError::InvalidImage);
    }

    let total_image = image.body.len() + params.secondary_module.map_or(0, |m| m.len());
    let image_pages = total_image.div_ceil(PAGE_SIZE);
    let first_slot = (image.load_vaddr >> SLOT_SHIFT) as usize;
    let last_slot = ((end_vaddr - 1) >> SLOT_SHIFT) as usize;
    let table_frames = 1 + (last_slot - first_slot + 1); // root + leaves

    let chain_head = arena.allocate(params.domain, pages)?;
    let window = arena.chain_frames(chain_head);

    // The image must leave room for the tables, the boot-info page and
    // never exceed half the window.
    if total_image > (pages * PAGE_SIZE) / 2 || image_pages + 1 + table_frames + 1 > pages {
        arena.release_chain(chain_head);
        return Err(BuildError::ImageTooLarge);
    }

    // Root table: topmost window frame. Shared slots from the template,
    // private-mapping slot rewritten, domain slots cleared.
    let mut alloc_top = pages - 1;
    let root_handle = window[alloc_top];
    let root_pfn = arena.pfn(root_handle);

    let mut slots = params.template.slots.clone();
    slots[PRIVATE_SLOT] = Some(RootEntry {
        pfn: arena.pfn(params.private_table),
        flags: EntryFlags::hypervisor(),
    });
    for slot in slots.iter_mut().take(GLOBAL_SLOT_BASE) {
        *slot = None;
    }
    {
        let r = arena.record_mut(params.private_table);
        r.ftype = FrameType::LeafTable;
        r.tot_count += 1;
    }

    // First pass: walk guest virtual addresses upward, allocating a leaf
    // table from the window top whenever the scan crosses into a new
    // slot, and mapping each chain frame writable/user/dirty. Positions
    // past the window only ensure the leaf exists; their entries are
    // installed below.
    let mut leaves: BTreeMap<u64, LeafTable> = BTreeMap::new();
    let mut current: Option<(u64, LeafTable)> = None;
    let mut cur_slot = usize::MAX;
    for i in 0..scan_pages {
        let vaddr = image.load_vaddr + ((i as u64) << PAGE_SHIFT);
        let slot = (vaddr >> SLOT_SHIFT) as usize & (ROOT_SLOTS - 1);
        if slot != cur_slot {
            if let Some((pfn, table)) = current.take() {
                leaves.insert(pfn, table);
            }
            alloc_top -= 1;
            let leaf_pfn = arena.pfn(window[alloc_top]);
            slots[slot] = Some(RootEntry {
                pfn: leaf_pfn,
                flags: EntryFlags::table(),
            });
            current = Some((leaf_pfn, LeafTable::new()));
            cur_slot = slot;
        }
        if i < pages {
            if let Some((_, table)) = current.as_mut() {
                table.set(
                    (vaddr >> PAGE_SHIFT) as usize & (TABLE_ENTRIES - 1),
                    PageEntry {
                        pfn: arena.pfn(window[i]),
                        flags: EntryFlags::guest_data(),
                    },
                );
            }
        }
    }
    if let Some((pfn, table)) = current.take() {
        leaves.insert(pfn, table);
    }

    let mut space = AddressSpace {
        root: root_handle,
        root_pfn,
        slots,
        leaves,
    };

    // Second pass: pages that are themselves translation tables must not
    // stay guest-writable while referenced as such. The topmost frame is
    // reclassified as the root.
    let final_top = alloc_top;
    for (idx, &h) in window.iter().enumerate().take(pages).skip(final_top) {
        let vaddr = image.load_vaddr + ((idx as u64) << PAGE_SHIFT);
        space.clear_writable(vaddr);
        let r = arena.record_mut(h);
        r.ftype = if idx == pages - 1 {
            FrameType::RootTable
        } else {
            FrameType::LeafTable
        };
        r.tot_count += 1;
    }

    // Control page, writable, one page past guest memory.
    let control_page_vaddr = image.load_vaddr + ((pages as u64) << PAGE_SHIFT);
    space.set_entry(
        control_page_vaddr,
        PageEntry {
            pfn: arena.pfn(params.control_page),
            flags: EntryFlags::guest_data(),
        },
    );

    // Control domain: the global frame-table metadata, read-only, above
    // the control page.
    let frame_table_vaddr = if ft_pages > 0 {
        let base = image.load_vaddr + ((pages as u64 + 1) << PAGE_SHIFT);
        for j in 0..ft_pages {
            space.set_entry(
                base + ((j as u64) << PAGE_SHIFT),
                PageEntry {
                    pfn: arena.metadata_pfn(j),
                    flags: EntryFlags::read_only(),
                },
            );
        }
        base
    } else {
        0
    };

    // Boot info lands one page below the table region.
    let boot_info_vaddr = image.load_vaddr + ((final_top as u64 - 1) << PAGE_SHIFT);

    let mut cmdline = String::from(params.cmdline);
    if let Some(template) = params.netboot_root {
        cmdline.push_str(" netroot=");
        cmdline.push_str(&format_netboot_root(template, params.domain.0));
    }

    let (mod_start, mod_len) = match params.secondary_module {
        Some(m) => (image.load_vaddr + image.body.len() as u64, m.len() as u64),
        None => (0, 0),
    };

    let boot_info = BootInfo {
        nr_pages: pages as u64,
        control_page_vaddr,
        root_vaddr: image.load_vaddr + ((pages as u64 - 1) << PAGE_SHIFT),
        phys_base: arena.pfn(window[0]) << PAGE_SHIFT,
        frame_table_vaddr,
        blk_ring_vaddr: control_page_vaddr + CP_BLK_RING as u64,
        net_ring_vaddrs: (0..params.net_rings.min(MAX_NET_RINGS))
            .map(|i| control_page_vaddr + cp_net_ring_off(i) as u64)
            .collect(),
        mod_start,
        mod_len,
        cmdline,
        firmware_table: params.firmware_table.to_vec(),
    };

    Ok(LoadInfo {
        chain_head,
        nr_pages: pages as u64,
        entry: image.load_vaddr,
        stack_ptr: boot_info_vaddr,
        boot_info_vaddr,
        control_page_vaddr,
        frame_table_vaddr,
        boot_info,
        space,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    const LOAD: u64 = 0x0010_0000;

    fn make_image(load_vaddr: u64, body: &[u8]) -> Vec<u8> {
        let mut img = Vec::new();
        img.extend_from_slice(&GUEST_MAGIC);
        img.extend_from_slice(&load_vaddr.to_le_bytes());
        img.extend_from_slice(body);
        img
    }

    struct Fixture {
        arena: FrameArena,
        control_page: FrameHandle,
        private_table: FrameHandle,
        template: RootTemplate,
    }

    fn fixture(domain: DomainId, pool: usize) -> Fixture {
        let mut arena = FrameArena::new(0x1000, pool);
        let control_page = arena.allocate_single(domain).unwrap();
        let private_table = arena.allocate_single(domain).unwrap();
        Fixture {
            arena,
            control_page,
            private_table,
            template: RootTemplate::hypervisor_default(),
        }
    }

    fn params<'a>(
        template: &'a RootTemplate,
        control_page: FrameHandle,
        private_table: FrameHandle,
        domain: DomainId,
        memory_kb: u64,
    ) -> BuildParams<'a> {
        BuildParams {
            domain,
            memory_kb,
            control_page,
            private_table,
            net_rings: 1,
            cmdline: "console=ttyS0",
            netboot_root: None,
            firmware_table: &[0xEE, 0xFF],
            secondary_module: None,
            template,
        }
    }

    #[test]
    fn builds_a_minimal_domain() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[0xAB; 100]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128); // 32 pages

        let info = build(&mut f.arena, &p, &image).unwrap();
        assert_eq!(info.nr_pages, 32);
        assert_eq!(info.entry, LOAD);
        assert_eq!(info.stack_ptr, info.boot_info_vaddr);

        // Scan covers 33 pages inside one slot: one leaf + the root.
        let window = f.arena.chain_frames(info.chain_head);
        let root = window[31];
        let leaf = window[30];
        assert_eq!(f.arena.frame_type(root), FrameType::RootTable);
        assert_eq!(f.arena.counts(root), (1, 2));
        assert_eq!(f.arena.frame_type(leaf), FrameType::LeafTable);
        assert_eq!(f.arena.counts(leaf), (1, 2));
        assert_eq!(info.space.root_handle(), root);

        // Boot info sits directly below the leaf table.
        assert_eq!(info.boot_info_vaddr, LOAD + 29 * PAGE_SIZE as u64);
        assert_eq!(info.boot_info.root_vaddr, LOAD + 31 * PAGE_SIZE as u64);
    }

    #[test]
    fn guest_pages_map_writable_table_pages_do_not() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[1; 64]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        let info = build(&mut f.arena, &p, &image).unwrap();

        let window = f.arena.chain_frames(info.chain_head);
        let first = info.space.translate(LOAD).unwrap();
        assert_eq!(first.pfn, f.arena.pfn(window[0]));
        assert!(first.flags.writable);
        assert!(first.flags.user);
        assert!(first.flags.dirty);

        let root_map = info.space.translate(info.boot_info.root_vaddr).unwrap();
        assert!(!root_map.flags.writable);
        let leaf_map = info
            .space
            .translate(LOAD + 30 * PAGE_SIZE as u64)
            .unwrap();
        assert!(!leaf_map.flags.writable);

        // The boot-info page itself stays writable.
        let bi = info.space.translate(info.boot_info_vaddr).unwrap();
        assert!(bi.flags.writable);
    }

    #[test]
    fn control_page_mapped_past_guest_memory() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[1; 64]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        let info = build(&mut f.arena, &p, &image).unwrap();

        assert_eq!(info.control_page_vaddr, LOAD + 32 * PAGE_SIZE as u64);
        let cp = info.space.translate(info.control_page_vaddr).unwrap();
        assert_eq!(cp.pfn, f.arena.pfn(f.control_page));
        assert!(cp.flags.writable);
        // Ring locations hang off the control page.
        assert_eq!(
            info.boot_info.blk_ring_vaddr,
            info.control_page_vaddr + CP_BLK_RING as u64
        );
        assert_eq!(info.boot_info.net_ring_vaddrs.len(), 1);
    }

    #[test]
    fn private_and_global_slots_installed() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[1; 64]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        let private_pfn = f.arena.pfn(f.private_table);
        let info = build(&mut f.arena, &p, &image).unwrap();

        let private = info.space.slot(PRIVATE_SLOT).unwrap();
        assert_eq!(private.pfn, private_pfn);
        assert!(!private.flags.user);
        // Shared mappings came from the template.
        assert!(info.space.slot(GLOBAL_SLOT_BASE + 1).is_some());
        // Unused domain slots are clear.
        assert!(info.space.slot(10).is_none());
        // The private table frame was retyped and referenced.
        assert_eq!(f.arena.frame_type(f.private_table), FrameType::LeafTable);
        assert_eq!(f.arena.counts(f.private_table), (1, 2));
    }

    #[test]
    fn control_domain_gets_frame_table_window() {
        let dom = DomainId::CONTROL;
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[1; 64]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        let info = build(&mut f.arena, &p, &image).unwrap();

        assert_ne!(info.frame_table_vaddr, 0);
        assert_eq!(
            info.frame_table_vaddr,
            info.control_page_vaddr + PAGE_SIZE as u64
        );
        let ft = info.space.translate(info.frame_table_vaddr).unwrap();
        assert_eq!(ft.pfn, f.arena.metadata_pfn(0));
        assert!(!ft.flags.writable);
        assert_eq!(info.boot_info.frame_table_vaddr, info.frame_table_vaddr);
    }

    #[test]
    fn ordinary_domain_has_no_frame_table_window() {
        let dom = DomainId(2);
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[1; 64]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        let info = build(&mut f.arena, &p, &image).unwrap();
        assert_eq!(info.frame_table_vaddr, 0);
        assert_eq!(info.boot_info.frame_table_vaddr, 0);
    }

    #[test]
    fn bad_magic_rejected_before_allocation() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let free_before = f.arena.free_count();
        let mut image = make_image(LOAD, &[1; 16]);
        image[0] = b'X';
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        assert_eq!(build(&mut f.arena, &p, &image), Err(BuildError::InvalidImage));
        assert_eq!(f.arena.free_count(), free_before);
    }

    #[test]
    fn misaligned_load_address_rejected_before_allocation() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let free_before = f.arena.free_count();
        let image = make_image(LOAD + 0x200, &[1; PAGE_SIZE]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        assert_eq!(build(&mut f.arena, &p, &image), Err(BuildError::InvalidImage));
        assert_eq!(f.arena.free_count(), free_before);
    }

    #[test]
    fn load_range_reaching_hypervisor_slots_rejected() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let high_load = ((GLOBAL_SLOT_BASE as u64) << SLOT_SHIFT) - PAGE_SIZE as u64;
        let image = make_image(high_load, &[1; 16]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        assert_eq!(build(&mut f.arena, &p, &image), Err(BuildError::InvalidImage));
    }

    #[test]
    fn insufficient_pool_reports_out_of_memory() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 16);
        let free_before = f.arena.free_count();
        let image = make_image(LOAD, &[1; 16]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128); // 32 pages > 14 free
        assert_eq!(build(&mut f.arena, &p, &image), Err(BuildError::OutOfMemory));
        assert_eq!(f.arena.free_count(), free_before);
    }

    #[test]
    fn oversized_image_releases_its_frames() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let free_before = f.arena.free_count();
        // 8-page window, 20 KiB image > 16 KiB half-window.
        let image = make_image(LOAD, &[7; 20 * 1024]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 32);
        assert_eq!(build(&mut f.arena, &p, &image), Err(BuildError::ImageTooLarge));
        // Regression: no leaked frames after the rejection.
        assert_eq!(f.arena.free_count(), free_before);
        assert_eq!(f.arena.owned_by(dom), 2); // control page + private table only
    }

    #[test]
    fn netboot_root_lands_in_cmdline() {
        let dom = DomainId(3);
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[1; 16]);
        let mut p = params(&f.template, f.control_page, f.private_table, dom, 128);
        p.netboot_root = Some("/export/guest{id}");
        let info = build(&mut f.arena, &p, &image).unwrap();
        assert_eq!(
            info.boot_info.cmdline,
            "console=ttyS0 netroot=/export/guest3"
        );
    }

    #[test]
    fn secondary_module_recorded_after_body() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let body = [1u8; 300];
        let image = make_image(LOAD, &body);
        let module = [9u8; 64];
        let mut p = params(&f.template, f.control_page, f.private_table, dom, 128);
        p.secondary_module = Some(&module);
        let info = build(&mut f.arena, &p, &image).unwrap();
        assert_eq!(info.boot_info.mod_start, LOAD + 300);
        assert_eq!(info.boot_info.mod_len, 64);
    }

    #[test]
    fn image_parse_accepts_valid_header() {
        let image = make_image(0x40_0000, b"payload");
        let parsed = GuestImage::parse(&image).unwrap();
        assert_eq!(parsed.load_vaddr, 0x40_0000);
        assert_eq!(parsed.body, b"payload");
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(
            GuestImage::parse(&GUEST_MAGIC[..6]).unwrap_err(),
            BuildError::InvalidImage
        );
    }

    #[test]
    fn flags_byte_encoding() {
        assert_eq!(EntryFlags::guest_data().to_byte(), 0b11111);
        assert_eq!(EntryFlags::read_only().to_byte(), 0b01101);
        assert_eq!(EntryFlags::hypervisor().to_byte(), 0b00011);
        let empty = EntryFlags::default();
        assert_eq!(empty.to_byte(), 0);
    }

    #[test]
    fn conservation_holds_after_build_and_release() {
        let dom = DomainId(1);
        let mut f = fixture(dom, 64);
        let image = make_image(LOAD, &[1; 64]);
        let p = params(&f.template, f.control_page, f.private_table, dom, 128);
        let info = build(&mut f.arena, &p, &image).unwrap();

        assert_eq!(
            f.arena.free_count() + f.arena.owned_by(dom),
            f.arena.total()
        );

        f.arena.release_chain(info.chain_head);
        f.arena.release_one(f.control_page);
        f.arena.release_one(f.private_table);
        assert_eq!(f.arena.free_count(), f.arena.total());
    }
}
