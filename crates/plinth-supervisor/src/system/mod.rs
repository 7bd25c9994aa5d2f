//! The Hypervisor - runtime glue over the pure control core
//!
//! Owns the explicit context objects (frame pool, registry, scheduler,
//! trace gateway) and drives the core's decisions with platform effects
//! through the `Hal`: context transfers, cross-CPU event-check signals,
//! wake-up timers, and the preemption-disabled address-space switch.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HYPERVISOR                            │
//! │                                                             │
//! │   ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐   │
//! │   │  FrameArena  │  │   Registry   │  │    Scheduler    │   │
//! │   │ (pool lock)  │  │  (rw lock)   │  │ (per-CPU locks) │   │
//! │   └──────────────┘  └──────────────┘  └─────────────────┘   │
//! │                                                             │
//! │   ┌──────────────┐            ┌─────────────────────────┐   │
//! │   │ TraceGateway │            │           Hal           │   │
//! │   │ (audit logs) │            │ switch / IPI / timers   │   │
//! │   └──────────────┘            └─────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Locking rules: the pool lock, the registry lock and each per-CPU
//! run-queue lock are leaves - none is held across a `Hal` context
//! transfer, and dispatch performs the switch only after the core has
//! released the run-queue lock.

mod admin;
mod lifecycle;

use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU32, Ordering};

use plinth_core::bootinfo::CP_EVENTS;
use plinth_core::types::EVT_DIE;
use plinth_core::{
    AddressSpace, DomainDescriptor, DomainId, DomainState, FrameArena, Registry, RemoveError,
    RootTemplate, Scheduler,
};
use plinth_hal::{Hal, HalError, PAGE_SIZE};
use plinth_primitives::SpinLock;
use plinth_trace::{Event, TraceGateway};

use crate::config::Config;

pub use admin::AdminOutcome;

/// A relative scheduling timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedTimeout {
    /// Block until an explicit wake-up.
    Infinite,
    /// Block for this many ticks. Negative values are a caller error:
    /// reported, not honored.
    Ticks(i64),
}

/// The hypervisor's control core, one instance per machine.
pub struct Hypervisor<H: Hal> {
    hal: H,
    config: Config,
    frames: SpinLock<FrameArena>,
    registry: Registry,
    sched: Scheduler,
    trace: SpinLock<TraceGateway>,
    template: RootTemplate,
    next_domid: AtomicU32,
    boot_time: u64,
}

impl<H: Hal> Hypervisor<H> {
    /// Initialize the control core. Called once at startup; every later
    /// API works through `&self`.
    pub fn new(hal: H, config: Config) -> Self {
        let boot_time = hal.now_ticks();
        let frames = SpinLock::new(FrameArena::new(config.base_pfn, config.pool_frames));
        let sched = Scheduler::new(hal.cpu_count(), config.quantum);
        Self {
            hal,
            frames,
            registry: Registry::new(),
            sched,
            trace: SpinLock::new(TraceGateway::new(boot_time)),
            template: RootTemplate::hypervisor_default(),
            next_domid: AtomicU32::new(0),
            boot_time,
            config,
        }
    }

    /// The platform layer.
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// The boot-time configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Uptime in ticks.
    pub fn uptime_ticks(&self) -> u64 {
        self.hal.now_ticks().saturating_sub(self.boot_time)
    }

    /// The domain registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The scheduler core.
    pub fn sched(&self) -> &Scheduler {
        &self.sched
    }

    /// Run `f` against the frame pool under its lock.
    pub fn with_frames<R>(&self, f: impl FnOnce(&mut FrameArena) -> R) -> R {
        f(&mut self.frames.lock())
    }

    /// Run `f` against the trace gateway under its lock.
    pub fn with_trace<R>(&self, f: impl FnOnce(&mut TraceGateway) -> R) -> R {
        f(&mut self.trace.lock())
    }

    pub(crate) fn allocate_domid(&self) -> DomainId {
        DomainId(self.next_domid.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn trace_event(&self, event: Event) {
        let ts = self.uptime_ticks();
        self.trace.lock().append_internal(event, ts);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// The per-CPU scheduling loop body: pick the next descriptor,
    /// transfer context, tear down a dying predecessor, and repeat while
    /// preemption requests arrived during the switch.
    ///
    /// Non-reentrant per CPU; callers are the timer tick, yields, blocks
    /// and kill paths running on `cpu`.
    pub fn dispatch(&self, cpu: u32) {
        loop {
            let sw = self.sched.pick_next(cpu);
            if !sw.same {
                // The run-queue lock is already released: a context
                // transfer must never happen under a spin lock.
                self.hal
                    .context_switch(cpu, sw.prev.id.0 as u64, sw.next.id.0 as u64);
            }

            // Control is back on this CPU. A dying predecessor is now
            // off-queue and off-CPU: reclaim it.
            if !sw.same && sw.prev.state() == DomainState::Dying {
                if let Err(e) = self.reclaim(&sw.prev) {
                    self.debug_reclaim_failure(sw.prev.id, e);
                }
            }

            let curr = self.sched.current(cpu);

            // A pending terminate event takes effect at the descriptor's
            // next dispatch on its own CPU.
            if !curr.id.is_idle() && curr.test_event(EVT_DIE) {
                if curr.id.is_control() {
                    self.hal
                        .debug_write("control domain killed: restarting machine");
                    self.hal.machine_restart();
                }
                curr.clear_event(EVT_DIE);
                curr.set_state(DomainState::Dying);
                continue;
            }

            // A reschedule request that arrived during the switch re-runs
            // the loop instead of waiting for the next tick.
            if curr.needs_resched() {
                continue;
            }
            break;
        }
    }

    /// Quantum accounting for one timer tick on `cpu`; dispatches when
    /// the current descriptor's quantum ran out.
    pub fn timer_tick(&self, cpu: u32) {
        if self.sched.note_tick(cpu) {
            self.dispatch(cpu);
        }
    }

    /// Voluntary yield: block interruptibly and dispatch.
    pub fn yield_cpu(&self, cpu: u32) {
        self.sched.current(cpu).set_state(DomainState::Interruptible);
        self.dispatch(cpu);
    }

    /// Block the current descriptor until a wake-up or until `timeout`
    /// expires. Returns the unexpired balance in ticks.
    ///
    /// The caller transitions the descriptor out of `Running`
    /// (typically to `Interruptible`) before calling. A negative
    /// timeout is a caller error: a diagnostic is reported, the state is
    /// forced back and the call returns without blocking.
    pub fn schedule_timeout(&self, cpu: u32, timeout: SchedTimeout) -> u64 {
        let ticks = match timeout {
            SchedTimeout::Infinite => {
                self.dispatch(cpu);
                return 0;
            }
            SchedTimeout::Ticks(t) => t,
        };

        if ticks < 0 {
            let curr = self.sched.current(cpu);
            self.hal
                .debug_write("schedule_timeout: negative timeout, waking immediately");
            self.trace_event(Event::TimeoutRejected {
                id: curr.id.0 as u64,
            });
            curr.set_state(DomainState::Running);
            return 0;
        }

        let curr = self.sched.current(cpu);
        let expire = self.hal.now_ticks() + ticks as u64;
        let timer = self.hal.arm_wake_timer(curr.id.0 as u64, expire);
        self.dispatch(cpu);
        self.hal.cancel_wake_timer(timer);
        expire.saturating_sub(self.hal.now_ticks())
    }

    /// Platform callback for an expired wake-up timer.
    pub fn timer_expired(&self, domain: u64) {
        if let Some(d) = self.registry.find(DomainId(domain as u32)) {
            self.wake_domain(&d);
        }
    }

    // ========================================================================
    // Wake / event paths
    // ========================================================================

    /// Wake a descriptor and signal its CPU when it idles remotely.
    pub fn wake_domain(&self, d: &Arc<DomainDescriptor>) {
        self.sched.wake_up(d);
        if let Some(cpu) = self.sched.reschedule_action(d, self.hal.current_cpu()) {
            self.hal.send_event_check(cpu);
        }
    }

    /// Post event bits to a descriptor and mirror the accumulated mask
    /// into its control page.
    pub fn post_event(&self, d: &Arc<DomainDescriptor>, bits: u64) {
        d.post_event(bits);
        let control_page = d.mem.lock().control_page;
        if let Some(h) = control_page {
            let pfn = self.frames.lock().pfn(h);
            let mask = d.pending_events();
            let _ = self.hal.write_phys(pfn, CP_EVENTS, &mask.to_le_bytes());
        }
    }

    /// Post event bits to every registered domain (broadcast signaling
    /// under the registry read lock).
    pub fn broadcast_event(&self, bits: u64) {
        let mut targets = vec![];
        self.registry.for_each(|d| targets.push(d.clone()));
        for d in targets {
            self.post_event(&d, bits);
        }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Write bytes into guest-virtual memory through an address space.
    pub(crate) fn write_guest(
        &self,
        space: &AddressSpace,
        vaddr: u64,
        bytes: &[u8],
    ) -> Result<(), HalError> {
        let page_mask = PAGE_SIZE as u64 - 1;
        let mut off = 0usize;
        while off < bytes.len() {
            let va = vaddr + off as u64;
            let page_off = (va & page_mask) as usize;
            let n = (PAGE_SIZE - page_off).min(bytes.len() - off);
            let entry = space
                .translate(va & !page_mask)
                .ok_or(HalError::PhysOutOfRange)?;
            self.hal.write_phys(entry.pfn, page_off, &bytes[off..off + n])?;
            off += n;
        }
        Ok(())
    }

    fn debug_reclaim_failure(&self, id: DomainId, e: RemoveError) {
        let what = match e {
            RemoveError::NotFound => "not registered",
            RemoveError::StillQueued => "still queued",
            RemoveError::StillRunning => "still running",
            RemoveError::NotDying => "not dying",
        };
        self.hal
            .debug_write(&alloc::format!("reclaim of domain {} refused: {}", id.0, what));
    }
}
