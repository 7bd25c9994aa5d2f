//! Core control types
//!
//! Fundamental types used throughout the control core. All types here are
//! pure data - no behavior that depends on the platform layer.

use serde::{Deserialize, Serialize};

/// Size of one physical page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Domain identifier
///
/// Identifier 0 is reserved for the privileged control domain; the
/// all-ones value is the per-CPU idle sentinel, which never appears in
/// the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub u32);

impl DomainId {
    /// The privileged control domain.
    pub const CONTROL: DomainId = DomainId(0);
    /// The idle sentinel selected when nothing else is runnable.
    pub const IDLE: DomainId = DomainId(u32::MAX);

    /// Whether this is the privileged control domain.
    pub fn is_control(&self) -> bool {
        *self == Self::CONTROL
    }

    /// Whether this is the idle sentinel.
    pub fn is_idle(&self) -> bool {
        *self == Self::IDLE
    }
}

/// Domain lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DomainState {
    /// Just created, not yet runnable
    Uninterruptible = 0,
    /// Eligible to run, waiting on a run-queue
    Runnable = 1,
    /// Currently holding a CPU
    Running = 2,
    /// Blocked, wakeable by event or timeout
    Interruptible = 3,
    /// Terminal, pending reclamation
    Dying = 4,
}

impl DomainState {
    /// Convert from the atomic byte representation.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => DomainState::Runnable,
            2 => DomainState::Running,
            3 => DomainState::Interruptible,
            4 => DomainState::Dying,
            _ => DomainState::Uninterruptible,
        }
    }

    /// State name for diagnostics and the `list` command.
    pub fn name(&self) -> &'static str {
        match self {
            DomainState::Uninterruptible => "uninterruptible",
            DomainState::Runnable => "runnable",
            DomainState::Running => "running",
            DomainState::Interruptible => "interruptible",
            DomainState::Dying => "dying",
        }
    }
}

// ============================================================================
// Pending-event bits
// ============================================================================

/// Terminate request delivered to the domain.
pub const EVT_DIE: u64 = 1 << 0;
/// Network ring activity.
pub const EVT_NET: u64 = 1 << 1;
/// Block ring activity.
pub const EVT_BLK: u64 = 1 << 2;
/// Debug/console request.
pub const EVT_DEBUG: u64 = 1 << 3;

/// Errors from the address-space builder and frame allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// Frame request exceeds the free pool; nothing was allocated
    OutOfMemory,
    /// Bad magic or misaligned/out-of-range load address; rejected before
    /// any allocation
    InvalidImage,
    /// Image exceeds half the allocated window; the allocated frames have
    /// been released
    ImageTooLarge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for s in [
            DomainState::Uninterruptible,
            DomainState::Runnable,
            DomainState::Running,
            DomainState::Interruptible,
            DomainState::Dying,
        ] {
            assert_eq!(DomainState::from_u8(s as u8), s);
        }
    }

    #[test]
    fn reserved_ids() {
        assert!(DomainId(0).is_control());
        assert!(DomainId::IDLE.is_idle());
        assert!(!DomainId(1).is_control());
        assert!(!DomainId(1).is_idle());
    }

    #[test]
    fn event_bits_are_distinct() {
        assert_eq!(EVT_DIE & EVT_NET, 0);
        assert_eq!(EVT_NET & EVT_BLK, 0);
        assert_eq!(EVT_BLK & EVT_DEBUG, 0);
    }
}
