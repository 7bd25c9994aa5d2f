//! Plinth Control Core - Pure State Machine
//!
//! This crate contains the **platform-free** control core of the Plinth
//! hypervisor: the physical frame pool, the address-space builder, the
//! domain registry, and the scheduler's decision logic.
//!
//! # Design Principles
//!
//! 1. **No HAL dependency**: everything platform-specific (context
//!    transfer, IPIs, timers, physical byte access, the active
//!    translation root) lives in `plinth-supervisor` behind `plinth-hal`
//! 2. **Deterministic**: the same inputs always produce the same state
//! 3. **Explicit context objects**: the arena, registry and scheduler
//!    are plain values owned by the runtime and passed by reference -
//!    no global singletons
//!
//! # Module Organization
//!
//! - `types` - identifiers, states, event bits, error taxonomy
//! - `frame` - the frame arena: free list + per-domain chains
//! - `paging` - two-level translation tables and the guest builder
//! - `bootinfo` - byte-stable guest-visible layouts
//! - `domain` - domain descriptors
//! - `registry` - the rwlock-protected domain table
//! - `runqueue` / `sched` - per-CPU queues and dispatch decisions
//! - `invariants` - runtime-checkable invariant assertions

#![no_std]
extern crate alloc;

pub mod bootinfo;
pub mod domain;
pub mod frame;
pub mod invariants;
pub mod paging;
pub mod registry;
pub mod runqueue;
pub mod sched;
pub mod types;

// Re-export the working set for convenient access
pub use bootinfo::{BootInfo, ControlPage};
pub use domain::{DomainDescriptor, DomainMem, ExecContext, RingEndpoint};
pub use frame::{FrameArena, FrameHandle, FrameType};
pub use invariants::{check_all_invariants, InvariantViolation};
pub use paging::{
    build, AddressSpace, BuildParams, EntryFlags, GuestImage, LoadInfo, PageEntry, RootTemplate,
};
pub use registry::{Registry, RemoveError};
pub use runqueue::RunQueue;
pub use sched::{Scheduler, Switch};
pub use types::{BuildError, DomainId, DomainState, EVT_BLK, EVT_DEBUG, EVT_DIE, EVT_NET};
