//! Domain lifecycle
//!
//! Creation orchestrates the frame allocator and the address-space
//! builder, registers the descriptor, performs the platform-side install
//! (root switch + byte copies inside the preemption-disabled scope), and
//! hands the new domain to the scheduler. Destruction flows back the
//! other way: quiesce through dispatch, then reclaim frames and
//! deregister.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use plinth_core::bootinfo::ControlPage;
use plinth_core::paging::{build, BuildParams, LoadInfo};
use plinth_core::types::EVT_DIE;
use plinth_core::{
    DomainDescriptor, DomainId, DomainState, ExecContext, GuestImage, RemoveError, RingEndpoint,
};
use plinth_hal::{Hal, HalError, PAGE_SIZE};
use plinth_trace::Event;

use super::Hypervisor;
use crate::error::HvError;

impl<H: Hal> Hypervisor<H> {
    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a domain: descriptor + control page + address space +
    /// initial context, registered and handed to the run-queue.
    ///
    /// The first created domain receives identifier 0 and becomes the
    /// privileged control domain.
    pub fn create_domain(
        &self,
        memory_kb: u64,
        image: &[u8],
        net_rings: usize,
    ) -> Result<DomainId, HvError> {
        // A bad image is rejected before any frame leaves the pool.
        GuestImage::parse(image)?;

        let id = self.allocate_domid();
        let d = DomainDescriptor::new(id, self.config().quantum);
        d.set_cpu(id.0 % self.hal().cpu_count());

        // Control page and private-mapping table come straight from the
        // pool; the chain is allocated by the builder.
        let (control_page, private_table) = self.with_frames(|frames| {
            let control_page = frames.allocate_single(id)?;
            match frames.allocate_single(id) {
                Ok(private_table) => Ok((control_page, private_table)),
                Err(e) => {
                    frames.release_one(control_page);
                    Err(e)
                }
            }
        })?;
        {
            let mut mem = d.mem.lock();
            mem.control_page = Some(control_page);
            mem.private_table = Some(private_table);
            mem.context = ExecContext::default();
        }

        if !self.registry().insert(d.clone()) {
            self.with_frames(|frames| {
                frames.release_one(control_page);
                frames.release_one(private_table);
            });
            return Err(HvError::BadRequest);
        }
        self.trace_event(Event::DomainCreated { id: id.0 as u64 });

        if let Err(e) = self.build_guest(&d, memory_kb, image, net_rings) {
            // Unwind: the descriptor never became runnable, so it can be
            // marked dying and unlinked on the spot.
            d.set_state(DomainState::Dying);
            let _ = self.registry().remove(id);
            self.with_frames(|frames| {
                frames.release_one(control_page);
                frames.release_one(private_table);
            });
            self.trace_event(Event::DomainReclaimed { id: id.0 as u64 });
            return Err(e);
        }

        self.wake_domain(&d);
        Ok(id)
    }

    /// Build the domain's address space and install the guest bytes.
    fn build_guest(
        &self,
        d: &Arc<DomainDescriptor>,
        memory_kb: u64,
        image: &[u8],
        net_rings: usize,
    ) -> Result<(), HvError> {
        let (control_page, private_table) = {
            let mem = d.mem.lock();
            match (mem.control_page, mem.private_table) {
                (Some(c), Some(p)) => (c, p),
                _ => return Err(HvError::BadRequest),
            }
        };

        let firmware = self.hal().firmware_table();
        let config = self.config();
        let info = self.with_frames(|frames| {
            let params = BuildParams {
                domain: d.id,
                memory_kb,
                control_page,
                private_table,
                net_rings,
                cmdline: &config.cmdline,
                netboot_root: config.netboot_root.as_deref(),
                firmware_table: &firmware,
                secondary_module: None,
                template: &self.template,
            };
            build(frames, &params, image)
        })?;
        self.trace_event(Event::FramesAllocated {
            id: d.id.0 as u64,
            count: info.nr_pages,
        });

        let body = GuestImage::parse(image)?.body;
        if let Err(e) = self.install_guest(d, &info, body) {
            self.with_frames(|frames| frames.release_chain(info.chain_head));
            self.trace_event(Event::FramesReleased {
                id: d.id.0 as u64,
                count: info.nr_pages,
            });
            return Err(e.into());
        }

        let mut mem = d.mem.lock();
        mem.chain_head = Some(info.chain_head);
        mem.tot_frames = info.nr_pages;
        mem.blk_ring = Some(RingEndpoint {
            vaddr: info.boot_info.blk_ring_vaddr,
        });
        mem.net_rings = info
            .boot_info
            .net_ring_vaddrs
            .iter()
            .map(|&vaddr| RingEndpoint { vaddr })
            .collect();
        mem.context = ExecContext {
            entry: info.entry,
            stack_ptr: info.stack_ptr,
            boot_info: info.boot_info_vaddr,
        };
        mem.space = Some(info.space);
        drop(mem);

        self.trace_event(Event::GuestBuilt {
            id: d.id.0 as u64,
            pages: info.nr_pages,
        });
        Ok(())
    }

    /// Step 9 of construction: switch this CPU onto the new root, copy
    /// the image, boot info, control page and (for the control domain)
    /// the frame-table metadata, then restore the caller's root - also
    /// on the error path, so a failed build leaves the caller's address
    /// space untouched.
    fn install_guest(
        &self,
        d: &Arc<DomainDescriptor>,
        info: &LoadInfo,
        body: &[u8],
    ) -> Result<(), HalError> {
        let mut boot_page = vec![0u8; PAGE_SIZE];
        info.boot_info.encode_into(&mut boot_page);

        let control = ControlPage {
            wall_time: self.hal().now_ticks(),
            domain_time: self.hal().now_ticks(),
            ticks_per_ms: self.hal().ticks_per_ms(),
            events: 0,
        };
        let mut control_bytes = vec![0u8; PAGE_SIZE];
        control.encode_into(&mut control_bytes);

        // Snapshot the metadata pages before entering the critical
        // scope; the pool lock is not held across platform writes.
        let metadata: Vec<(u64, Vec<u8>)> = if d.id.is_control() {
            self.with_frames(|frames| {
                (0..frames.metadata_pages())
                    .map(|j| (frames.metadata_pfn(j), frames.encode_metadata_page(j)))
                    .collect()
            })
        } else {
            Vec::new()
        };

        let cpu = self.hal().current_cpu();
        let mut result = Ok(());
        {
            let hal = self.hal();
            let this = self;
            let mut critical = || {
                let old_root = hal.active_root(cpu);
                hal.activate_root(cpu, info.space.root_pfn());
                result = (|| {
                    this.write_guest(&info.space, info.entry, body)?;
                    this.write_guest(&info.space, info.boot_info_vaddr, &boot_page)?;
                    this.write_guest(&info.space, info.control_page_vaddr, &control_bytes)?;
                    for (pfn, page) in &metadata {
                        hal.write_phys(*pfn, 0, page)?;
                    }
                    Ok(())
                })();
                hal.activate_root(cpu, old_root);
            };
            hal.with_preemption_disabled(cpu, &mut critical);
        }
        result
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Terminate the domain currently executing on `cpu`.
    ///
    /// Disallowed for the privileged control domain: with no supervisor
    /// above it, the machine restarts instead. For any other domain this
    /// marks the descriptor dying and invokes dispatch; on real hardware
    /// control never returns to the dying context.
    pub fn destroy_self(&self, cpu: u32) {
        let curr = self.sched().current(cpu);
        if curr.id.is_control() {
            self.hal()
                .debug_write("control domain killed: restarting machine");
            self.hal().machine_restart();
        }
        self.hal()
            .debug_write(&alloc::format!("killing domain {}", curr.id.0));
        curr.set_state(DomainState::Dying);
        self.dispatch(cpu);
    }

    /// Post a terminate event to a domain by identifier.
    ///
    /// The event takes effect at the target's next dispatch on its own
    /// CPU; a domain running elsewhere is never interrupted
    /// mid-instruction.
    pub fn signal_kill(&self, id: DomainId) -> Result<(), HvError> {
        let d = self.registry().find(id).ok_or(HvError::NotFound)?;
        self.post_event(&d, EVT_DIE);
        self.trace_event(Event::DomainKilled { id: id.0 as u64 });
        self.wake_domain(&d);
        Ok(())
    }

    /// Tear down a quiesced dying descriptor: unlink from the registry,
    /// release ring endpoints, return the frame chain, private table and
    /// control page to the pool.
    ///
    /// Invoked from dispatch once the descriptor is confirmed off-queue,
    /// off-CPU and dying; any other caller state is a programming error
    /// and is refused.
    pub fn reclaim(&self, d: &Arc<DomainDescriptor>) -> Result<(), RemoveError> {
        self.registry().remove(d.id)?;

        let (chain, control_page, private_table) = {
            let mut mem = d.mem.lock();
            mem.blk_ring = None;
            mem.net_rings.clear();
            mem.space = None;
            (
                mem.chain_head.take(),
                mem.control_page.take(),
                mem.private_table.take(),
            )
        };

        let freed = self.with_frames(|frames| {
            let mut freed = 0u64;
            if let Some(head) = chain {
                freed += frames.release_chain(head) as u64;
            }
            if let Some(h) = control_page {
                frames.release_one(h);
                freed += 1;
            }
            if let Some(h) = private_table {
                frames.release_one(h);
                freed += 1;
            }
            freed
        });

        self.trace_event(Event::DomainReclaimed { id: d.id.0 as u64 });
        self.trace_event(Event::FramesReleased {
            id: d.id.0 as u64,
            count: freed,
        });
        Ok(())
    }
}
