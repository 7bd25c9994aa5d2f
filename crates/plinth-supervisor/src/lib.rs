//! Plinth runtime supervisor
//!
//! Combines the pure control core with a platform (`Hal`) into a running
//! hypervisor: domain lifecycle, the per-CPU dispatch loop, timeout
//! wake-ups, event delivery, and the administrative command surface.
//!
//! The [`Hypervisor`] is an explicit, once-initialized context object;
//! nothing in this crate assumes a global singleton.

#![no_std]
extern crate alloc;

mod config;
mod error;
mod system;

pub use config::{Config, DEFAULT_BASE_PFN, DEFAULT_POOL_FRAMES, DEFAULT_QUANTUM};
pub use error::HvError;
pub use system::{AdminOutcome, Hypervisor, SchedTimeout};
