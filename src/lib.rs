//! Reference-counted shared ownership for heap values.
//!
//! This crate provides the owning pointer `Strong` and the observing pointer
//! `Weak`. Any number of `Strong` handles co-own one value; the value's
//! release runs exactly once, when the last of them drops. `Weak` handles
//! watch the same value without keeping it alive and can attempt to
//! reacquire ownership through `upgrade`.
//!
//! `Strong::new` places value and bookkeeping in a single combined
//! allocation. `Strong::adopt` instead wraps an externally allocated value
//! together with a user-supplied deleter. Values can opt into handing out
//! owning handles to themselves via the `SelfReferential` capability.
//!
//! All bookkeeping is lock-free atomics; the pointee's own contents are not
//! synchronized by this crate. Cycles of `Strong` handles leak, as in any
//! reference-counting scheme without a cycle collector.
//!
//! With the default `stats` feature, a process-wide ledger tracks live
//! control blocks and payloads, for diagnosing leaks in tests.

pub(crate) mod block;
pub mod pointers;
pub mod self_ref;
#[cfg(feature = "stats")]
pub mod stats;

#[cfg(test)]
mod tests;

pub use pointers::{Strong, Weak};
pub use self_ref::{SelfRef, SelfReferential};
#[cfg(feature = "stats")]
pub use stats::get_stats;
