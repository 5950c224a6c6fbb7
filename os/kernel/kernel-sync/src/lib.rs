//! # Kernel synchronization primitives
//!
//! Spin locks for short critical sections, a canonical-order helper for
//! taking two of them at once, and the "pin to the current processor" scope
//! used by per-CPU data.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod preempt;
mod spin_lock;

pub use preempt::{PinGuard, Preemption};
pub use spin_lock::{SpinLock, SpinLockGuard, lock_pair};
