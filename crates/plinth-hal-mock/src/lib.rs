//! Mock HAL implementation for testing the Plinth control core
//!
//! This provides a mock implementation of the `Hal` trait that can be
//! used for unit testing the scheduler, builder and lifecycle logic
//! without requiring real hardware. Physical memory is a page store keyed
//! by pfn, time is an atomic counter the test advances by hand, and every
//! platform effect (IPI, context switch, timer, root switch) is recorded
//! for assertion.

#![no_std]
extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use plinth_hal::{Hal, HalError, TimerId, PAGE_SIZE};
use plinth_primitives::SpinLock;

/// An armed (and possibly cancelled) wake-up timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmedTimer {
    pub id: TimerId,
    pub domain: u64,
    pub deadline_ticks: u64,
    pub cancelled: bool,
}

/// A recorded context transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedSwitch {
    pub cpu: u32,
    pub from: u64,
    pub to: u64,
}

/// Mock HAL for unit testing
///
/// Simulated time, physical pages, per-CPU translation roots and recorded
/// platform effects for testing control-core logic deterministically.
pub struct MockHal {
    cpus: u32,
    /// Simulated time in ticks
    time: AtomicU64,
    /// Next timer id to assign
    next_timer: AtomicU64,
    /// Simulated physical pages (pfn -> page bytes)
    pages: SpinLock<BTreeMap<u64, Vec<u8>>>,
    /// Per-CPU active translation root
    roots: SpinLock<BTreeMap<u32, u64>>,
    /// CPUs that received an event-check signal, in order
    event_checks: SpinLock<Vec<u32>>,
    /// Context transfers, in order
    switches: SpinLock<Vec<RecordedSwitch>>,
    /// Timers armed via the HAL, in order
    timers: SpinLock<Vec<ArmedTimer>>,
    /// Captured debug messages
    debug_log: SpinLock<Vec<String>>,
    /// Opaque firmware table blob
    firmware: Vec<u8>,
}

impl MockHal {
    /// Create a mock HAL with the given CPU count.
    pub fn new(cpus: u32) -> Self {
        Self {
            cpus,
            time: AtomicU64::new(0),
            next_timer: AtomicU64::new(1),
            pages: SpinLock::new(BTreeMap::new()),
            roots: SpinLock::new(BTreeMap::new()),
            event_checks: SpinLock::new(Vec::new()),
            switches: SpinLock::new(Vec::new()),
            timers: SpinLock::new(Vec::new()),
            debug_log: SpinLock::new(Vec::new()),
            firmware: vec![0xFA, 0xCA, 0xDE, 0x01],
        }
    }

    /// Create a mock HAL with a specific firmware table blob.
    pub fn with_firmware(cpus: u32, firmware: Vec<u8>) -> Self {
        let mut hal = Self::new(cpus);
        hal.firmware = firmware;
        hal
    }

    /// Advance the simulated time by the given number of ticks.
    pub fn advance_time(&self, ticks: u64) {
        self.time.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Read a whole simulated page (zero-filled if never written).
    pub fn page(&self, pfn: u64) -> Vec<u8> {
        self.pages
            .lock()
            .get(&pfn)
            .cloned()
            .unwrap_or_else(|| vec![0u8; PAGE_SIZE])
    }

    /// All event-check signals sent so far.
    pub fn event_checks(&self) -> Vec<u32> {
        self.event_checks.lock().clone()
    }

    /// All context transfers performed so far.
    pub fn switches(&self) -> Vec<RecordedSwitch> {
        self.switches.lock().clone()
    }

    /// All timers armed so far (including cancelled ones).
    pub fn timers(&self) -> Vec<ArmedTimer> {
        self.timers.lock().clone()
    }

    /// All captured debug messages.
    pub fn debug_log(&self) -> Vec<String> {
        self.debug_log.lock().clone()
    }
}

impl Hal for MockHal {
    fn cpu_count(&self) -> u32 {
        self.cpus
    }

    fn current_cpu(&self) -> u32 {
        // Tests drive each CPU's dispatch loop explicitly, so the mock
        // itself always reports CPU 0.
        0
    }

    fn now_ticks(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    fn ticks_per_ms(&self) -> u64 {
        1
    }

    fn write_phys(&self, pfn: u64, offset: usize, bytes: &[u8]) -> Result<(), HalError> {
        if offset + bytes.len() > PAGE_SIZE {
            return Err(HalError::InvalidArgument);
        }
        let mut pages = self.pages.lock();
        let page = pages.entry(pfn).or_insert_with(|| vec![0u8; PAGE_SIZE]);
        page[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_phys(&self, pfn: u64, offset: usize, len: usize) -> Result<Vec<u8>, HalError> {
        if offset + len > PAGE_SIZE {
            return Err(HalError::InvalidArgument);
        }
        Ok(self.page(pfn)[offset..offset + len].to_vec())
    }

    fn active_root(&self, cpu: u32) -> u64 {
        *self.roots.lock().get(&cpu).unwrap_or(&0)
    }

    fn activate_root(&self, cpu: u32, root_pfn: u64) {
        self.roots.lock().insert(cpu, root_pfn);
    }

    fn with_preemption_disabled<R>(&self, _cpu: u32, f: &mut dyn FnMut() -> R) -> R {
        f()
    }

    fn send_event_check(&self, cpu: u32) {
        self.event_checks.lock().push(cpu);
    }

    fn arm_wake_timer(&self, domain: u64, deadline_ticks: u64) -> TimerId {
        let id = self.next_timer.fetch_add(1, Ordering::SeqCst);
        self.timers.lock().push(ArmedTimer {
            id,
            domain,
            deadline_ticks,
            cancelled: false,
        });
        id
    }

    fn cancel_wake_timer(&self, timer: TimerId) {
        let mut timers = self.timers.lock();
        if let Some(t) = timers.iter_mut().find(|t| t.id == timer) {
            t.cancelled = true;
        }
    }

    fn context_switch(&self, cpu: u32, from: u64, to: u64) {
        self.switches.lock().push(RecordedSwitch { cpu, from, to });
    }

    fn firmware_table(&self) -> Vec<u8> {
        self.firmware.clone()
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.lock().push(String::from(msg));
    }

    fn machine_restart(&self) -> ! {
        panic!("machine restart requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_advances() {
        let hal = MockHal::new(1);
        assert_eq!(hal.now_ticks(), 0);
        hal.advance_time(10);
        assert_eq!(hal.now_ticks(), 10);
    }

    #[test]
    fn phys_pages_round_trip() {
        let hal = MockHal::new(1);
        hal.write_phys(7, 100, &[1, 2, 3]).unwrap();
        assert_eq!(hal.read_phys(7, 100, 3).unwrap(), vec![1, 2, 3]);
        // Untouched bytes read back as zero.
        assert_eq!(hal.read_phys(7, 0, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn phys_write_rejects_page_overrun() {
        let hal = MockHal::new(1);
        let err = hal.write_phys(1, PAGE_SIZE - 1, &[1, 2]).unwrap_err();
        assert_eq!(err, HalError::InvalidArgument);
    }

    #[test]
    fn timers_record_and_cancel() {
        let hal = MockHal::new(1);
        let id = hal.arm_wake_timer(3, 500);
        hal.cancel_wake_timer(id);
        let timers = hal.timers();
        assert_eq!(timers.len(), 1);
        assert!(timers[0].cancelled);
        assert_eq!(timers[0].domain, 3);
    }

    #[test]
    #[should_panic(expected = "machine restart requested")]
    fn restart_panics() {
        MockHal::new(1).machine_restart();
    }
}
