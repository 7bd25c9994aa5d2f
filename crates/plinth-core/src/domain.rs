//! Domain descriptors
//!
//! One [`DomainDescriptor`] per guest, shared as `Arc` between the
//! registry and the run-queues. Scheduling fields are atomics so the
//! scheduler can flip them under its own per-CPU lock without touching
//! the registry lock; the build-time memory fields live behind a spin
//! lock of their own because they are written once during construction
//! and read at reclaim.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use plinth_primitives::SpinLock;

use crate::frame::FrameHandle;
use crate::paging::AddressSpace;
use crate::types::{DomainId, DomainState};

/// A virtual I/O ring endpoint, located inside the control page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingEndpoint {
    pub vaddr: u64,
}

/// Initial execution context handed to a starting guest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecContext {
    pub entry: u64,
    pub stack_ptr: u64,
    pub boot_info: u64,
}

/// Memory-side state of a domain, written during construction and
/// consumed at reclaim.
#[derive(Default)]
pub struct DomainMem {
    /// Head of the circular per-domain frame chain
    pub chain_head: Option<FrameHandle>,
    /// Frames on the chain
    pub tot_frames: u64,
    /// The built address space (root reference included)
    pub space: Option<AddressSpace>,
    /// Control-page frame, privately owned, never shared
    pub control_page: Option<FrameHandle>,
    /// Private-mapping table frame
    pub private_table: Option<FrameHandle>,
    /// Block ring endpoint
    pub blk_ring: Option<RingEndpoint>,
    /// Network ring endpoints
    pub net_rings: Vec<RingEndpoint>,
    /// Initial execution context
    pub context: ExecContext,
}

/// One guest execution context.
pub struct DomainDescriptor {
    pub id: DomainId,
    state: AtomicU8,
    cpu: AtomicU32,
    has_cpu: AtomicBool,
    queued: AtomicBool,
    quantum: AtomicU32,
    events: AtomicU64,
    need_resched: AtomicBool,
    /// Build-time memory state
    pub mem: SpinLock<DomainMem>,
}

// Descriptors are identified by their `id` (the registry is keyed by it),
// so value equality is identity equality. These impls exist so descriptors
// can appear inside `assert_eq!`-compared results; no non-test code path
// compares or formats descriptors by value.
impl PartialEq for DomainDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl core::fmt::Debug for DomainDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DomainDescriptor")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl DomainDescriptor {
    /// A fresh descriptor: just created, not yet runnable.
    pub fn new(id: DomainId, quantum: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(DomainState::Uninterruptible as u8),
            cpu: AtomicU32::new(0),
            has_cpu: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            quantum: AtomicU32::new(quantum),
            events: AtomicU64::new(0),
            need_resched: AtomicBool::new(false),
            mem: SpinLock::new(DomainMem::default()),
        })
    }

    /// The idle sentinel for `cpu`: starts as the CPU's current
    /// occupant. The scheduler enqueues it at startup and it never
    /// leaves its run-queue afterwards.
    pub fn new_idle(cpu: u32, quantum: u32) -> Arc<Self> {
        Arc::new(Self {
            id: DomainId::IDLE,
            state: AtomicU8::new(DomainState::Running as u8),
            cpu: AtomicU32::new(cpu),
            has_cpu: AtomicBool::new(true),
            queued: AtomicBool::new(false),
            quantum: AtomicU32::new(quantum),
            events: AtomicU64::new(0),
            need_resched: AtomicBool::new(false),
            mem: SpinLock::new(DomainMem::default()),
        })
    }

    pub fn state(&self) -> DomainState {
        DomainState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, s: DomainState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn cpu(&self) -> u32 {
        self.cpu.load(Ordering::Acquire)
    }

    pub fn set_cpu(&self, cpu: u32) {
        self.cpu.store(cpu, Ordering::Release);
    }

    pub fn has_cpu(&self) -> bool {
        self.has_cpu.load(Ordering::Acquire)
    }

    pub fn set_has_cpu(&self, v: bool) {
        self.has_cpu.store(v, Ordering::Release);
    }

    /// Run-queue membership flag, maintained under the queue's lock.
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    pub(crate) fn set_queued(&self, v: bool) {
        self.queued.store(v, Ordering::Release);
    }

    pub fn quantum_remaining(&self) -> u32 {
        self.quantum.load(Ordering::Acquire)
    }

    pub fn reset_quantum(&self, quantum: u32) {
        self.quantum.store(quantum, Ordering::Release);
    }

    /// Burn one tick; returns true when the quantum is now exhausted.
    pub fn consume_tick(&self) -> bool {
        let mut cur = self.quantum.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return true;
            }
            match self.quantum.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return cur == 1,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Post event bits; returns the mask before posting.
    pub fn post_event(&self, bits: u64) -> u64 {
        self.events.fetch_or(bits, Ordering::AcqRel)
    }

    pub fn pending_events(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    pub fn test_event(&self, bits: u64) -> bool {
        self.pending_events() & bits != 0
    }

    pub fn clear_event(&self, bits: u64) {
        self.events.fetch_and(!bits, Ordering::AcqRel);
    }

    pub fn needs_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    pub fn set_need_resched(&self, v: bool) {
        self.need_resched.store(v, Ordering::Release);
    }

    /// Whether this descriptor may be reclaimed: not queued, not holding
    /// a CPU, and marked dying. Anything else is a caller bug.
    pub fn is_quiesced(&self) -> bool {
        !self.is_queued() && !self.has_cpu() && self.state() == DomainState::Dying
    }
}
