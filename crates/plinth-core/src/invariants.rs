//! Runtime-checkable control-core invariants
//!
//! These are used for:
//! 1. Runtime assertion checking during development
//! 2. The integration suite's quiescent-point checks
//!
//! # Invariants
//!
//! 1. **Frame conservation**: free frames + frames tagged to any domain
//!    equals the pool size
//! 2. **Owner/count coupling**: a frame's owning-domain tag is defined
//!    if and only if its total-use count is nonzero
//! 3. **Queue membership**: a registered descriptor sits on exactly as
//!    many run-queues as its queued flag says (one or zero), and a
//!    descriptor holding a CPU is that CPU's current occupant

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::frame::{FrameArena, FrameHandle};
use crate::registry::Registry;
use crate::sched::Scheduler;

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Check every control-core invariant.
///
/// Returns a list of violations (empty if all invariants hold). Only
/// meaningful at a quiescent point: no dispatch or build in flight.
pub fn check_all_invariants(
    arena: &FrameArena,
    sched: &Scheduler,
    registry: &Registry,
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    violations.extend(check_frame_conservation(arena));
    violations.extend(check_owner_counts(arena));
    violations.extend(check_queue_membership(sched, registry));
    violations
}

/// Invariant 1: free count plus owned count equals pool size.
pub fn check_frame_conservation(arena: &FrameArena) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let owned = (0..arena.total())
        .filter(|&i| arena.owner(FrameHandle(i as u32)).is_some())
        .count();
    if arena.free_count() + owned != arena.total() {
        violations.push(InvariantViolation {
            invariant: "frame_conservation",
            description: format!(
                "free {} + owned {} != total {}",
                arena.free_count(),
                owned,
                arena.total()
            ),
        });
    }
    violations
}

/// Invariant 2: owner tag defined iff total-use count nonzero.
pub fn check_owner_counts(arena: &FrameArena) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for i in 0..arena.total() {
        let h = FrameHandle(i as u32);
        let (_, tot) = arena.counts(h);
        match (arena.owner(h), tot) {
            (Some(_), 0) => violations.push(InvariantViolation {
                invariant: "owner_counts",
                description: format!("frame {} tagged but total-use count is zero", i),
            }),
            (None, t) if t != 0 => violations.push(InvariantViolation {
                invariant: "owner_counts",
                description: format!("frame {} untagged but total-use count is {}", i, t),
            }),
            _ => {}
        }
    }
    violations
}

/// Invariant 3: queue membership matches the queued flag; has-CPU
/// matches the per-CPU current pointer.
pub fn check_queue_membership(sched: &Scheduler, registry: &Registry) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    registry.for_each(|d| {
        let mut memberships = 0usize;
        for cpu in 0..sched.cpu_count() {
            memberships += sched
                .queued_ids(cpu)
                .iter()
                .filter(|id| **id == d.id)
                .count();
        }
        let expected = usize::from(d.is_queued());
        if memberships != expected {
            violations.push(InvariantViolation {
                invariant: "queue_membership",
                description: format!(
                    "domain {} queued flag {} but found on {} queue(s)",
                    d.id.0,
                    d.is_queued(),
                    memberships
                ),
            });
        }
        if d.has_cpu() && sched.current(d.cpu()).id != d.id {
            violations.push(InvariantViolation {
                invariant: "queue_membership",
                description: format!(
                    "domain {} claims CPU {} but is not its current occupant",
                    d.id.0,
                    d.cpu()
                ),
            });
        }
    });
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainDescriptor;
    use crate::types::DomainId;

    #[test]
    fn clean_state_has_no_violations() {
        let arena = FrameArena::new(0x100, 16);
        let sched = Scheduler::new(1, 2);
        let registry = Registry::new();
        assert!(check_all_invariants(&arena, &sched, &registry).is_empty());
    }

    #[test]
    fn conservation_tracks_allocations() {
        let mut arena = FrameArena::new(0x100, 16);
        let head = arena.allocate(DomainId(1), 4).unwrap();
        assert!(check_frame_conservation(&arena).is_empty());
        assert!(check_owner_counts(&arena).is_empty());
        arena.release_chain(head);
        assert!(check_frame_conservation(&arena).is_empty());
    }

    #[test]
    fn queue_membership_detects_stale_flag() {
        let sched = Scheduler::new(1, 2);
        let registry = Registry::new();
        let d = DomainDescriptor::new(DomainId(1), 2);
        registry.insert(d.clone());

        sched.wake_up(&d);
        assert!(check_queue_membership(&sched, &registry).is_empty());

        // Corrupt the flag behind the scheduler's back.
        d.set_queued(false);
        let violations = check_queue_membership(&sched, &registry);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "queue_membership");
    }

    #[test]
    fn has_cpu_must_match_current() {
        let sched = Scheduler::new(1, 2);
        let registry = Registry::new();
        let d = DomainDescriptor::new(DomainId(1), 2);
        registry.insert(d.clone());

        d.set_has_cpu(true);
        let violations = check_queue_membership(&sched, &registry);
        assert!(!violations.is_empty());
    }
}
