//! Object Graph Identity and Scheduling
//!
//! Every node in the shared graph has an [`RdId`]. Schema-declared nodes
//! derive theirs from the parent id and a name; runtime-created nodes ask
//! an [`Identities`] allocator. Both derivations are pure functions of
//! their inputs, so two processes agree on ids without negotiation.
//!
//! The [`Scheduler`] trait decides where protocol work runs.

mod id;
mod identities;
mod scheduler;

pub use id::{hash_int, hash_long, hash_str, RdId, HASH_SEED, MAX_STATIC_ID};
pub use identities::{IdKind, Identities};
pub use scheduler::{ManualScheduler, Scheduler, SerialScheduler, SynchronousScheduler, Task};
