//! Plinth Sync Primitives - Consolidated Unsafe Code TCB
//!
//! This crate contains the unsafe interior-mutability code used by the
//! Plinth control core, consolidated into a single auditable location.
//! All other crates should use `#![deny(unsafe_code)]` (except where
//! platform-specific FFI is required).
//!
//! # Design Principles
//!
//! 1. **Minimal unsafe surface**: Only truly necessary unsafe operations
//! 2. **Safe wrappers**: All unsafe is wrapped in safe interfaces
//! 3. **Auditable**: Small, focused modules for security review
//!
//! # Module Organization
//!
//! - `sync` - SpinLock and RwSpinLock with RAII guards
//! - `loom_tests` - Concurrency tests using loom (with `loom` feature)
//!
//! # Verification
//!
//! 1. **Loom tests** (`cargo test --features loom`): interleaving exploration
//! 2. **Unit tests**: traditional testing for basic functionality

#![no_std]

pub mod sync;


// Re-export commonly used items
pub use sync::{RwSpinLock, RwSpinLockReadGuard, RwSpinLockWriteGuard, SpinLock, SpinLockGuard};
