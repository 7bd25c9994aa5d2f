//! Hardware Abstraction Layer trait for the Plinth hypervisor
//!
//! This crate defines the `Hal` trait that allows the control core to run
//! on different platforms (bare metal, emulated, mock) by abstracting
//! every machine-level operation the core depends on: physical page
//! access, the per-CPU address-translation root, cross-CPU signaling,
//! timers, and the final machine restart.
//!
//! The trait is deliberately primitive-typed (u32 CPU numbers, u64 page
//! frame numbers and domain identifiers) so that this crate has no
//! dependency on the control core: the core depends on the HAL, never the
//! other way around.

#![no_std]

extern crate alloc;

use alloc::vec::Vec;

/// Size of one physical page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Opaque handle to an armed wake-up timer.
pub type TimerId = u64;

/// Errors returned by HAL operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Physical address outside the machine's populated range
    PhysOutOfRange,
    /// Access would cross a page boundary or exceed the page
    InvalidArgument,
    /// Operation not available on this platform
    NotSupported,
}

/// Hardware Abstraction Layer trait
///
/// Implementations provide platform-specific functionality for:
/// - CPU topology and time
/// - Physical page reads/writes
/// - The per-CPU active address-translation root
/// - Preemption-critical scopes
/// - Cross-CPU event-check signaling and wake-up timers
/// - Context transfer between domains
/// - Debug output and machine restart
pub trait Hal: Send + Sync + 'static {
    // === Topology & time ===

    /// Number of CPUs the dispatch loop runs on.
    fn cpu_count(&self) -> u32;

    /// The CPU executing the caller.
    fn current_cpu(&self) -> u32;

    /// Current time in scheduler ticks (monotonic).
    fn now_ticks(&self) -> u64;

    /// Tick rate, in ticks per millisecond. Copied verbatim into each
    /// domain's control page.
    fn ticks_per_ms(&self) -> u64;

    // === Physical memory ===

    /// Write bytes into a physical page frame.
    ///
    /// The write must not cross the page boundary:
    /// `offset + bytes.len() <= PAGE_SIZE`.
    fn write_phys(&self, pfn: u64, offset: usize, bytes: &[u8]) -> Result<(), HalError>;

    /// Read bytes from a physical page frame, same bounds rule as
    /// [`Hal::write_phys`].
    fn read_phys(&self, pfn: u64, offset: usize, len: usize) -> Result<Vec<u8>, HalError>;

    // === Address-translation root ===

    /// The pfn of the root table currently active on `cpu`.
    fn active_root(&self, cpu: u32) -> u64;

    /// Switch `cpu`'s active address-translation root.
    ///
    /// Callers must wrap the switch (and any accesses that depend on it)
    /// in [`Hal::with_preemption_disabled`]; a timer or device interrupt
    /// arriving between the switch and the restore would otherwise run
    /// against a half-built address space.
    fn activate_root(&self, cpu: u32, root_pfn: u64);

    // === Critical scope ===

    /// Run `f` with preemption (interrupt delivery) masked on `cpu`.
    fn with_preemption_disabled<R>(&self, cpu: u32, f: &mut dyn FnMut() -> R) -> R;

    // === Cross-CPU signaling & timers ===

    /// Send an asynchronous "check events" signal to `cpu`, prompting it
    /// to re-enter dispatch promptly rather than waiting for its next
    /// timer tick.
    fn send_event_check(&self, cpu: u32);

    /// Arm a one-shot timer that wakes `domain` at `deadline_ticks`.
    fn arm_wake_timer(&self, domain: u64, deadline_ticks: u64) -> TimerId;

    /// Cancel a previously armed wake-up timer. Cancelling an
    /// already-fired timer is a no-op.
    fn cancel_wake_timer(&self, timer: TimerId);

    // === Context transfer ===

    /// Transfer execution on `cpu` from domain `from` to domain `to`.
    ///
    /// Returns when this CPU next runs the calling context. Must be
    /// invoked with no spin locks held.
    fn context_switch(&self, cpu: u32, from: u64, to: u64);

    // === Collaborator seams ===

    /// The boot-time firmware table blob, consumed verbatim by the
    /// boot-info population step. The core never interprets it.
    fn firmware_table(&self) -> Vec<u8>;

    // === Diagnostics & terminal ===

    /// Write a diagnostic message to the platform console/log.
    fn debug_write(&self, msg: &str);

    /// Restart the machine. Never returns.
    fn machine_restart(&self) -> !;
}
