//! Dispatch Queue Engine
//!
//! The runtime half of the system: the in-memory priority index, the claim
//! protocol that hands tasks to workers, the background loops that keep the
//! index and the store converged, and the worker-facing HTTP surface.
//!
//! ## Architecture Overview
//! The engine follows a **pull-based** model with **lease** management:
//! 1. **Indexing**: admitted tasks land in the `PriorityIndex`, an ordered
//!    cache of ready task ids (highest priority weight first, FIFO within a
//!    class).
//! 2. **Claiming**: a worker poll pops the best candidate from the index and
//!    attempts the store's atomic QUEUED -> RUNNING compare-and-swap. The
//!    store is the serialization point; the index is a throughput
//!    optimizer that may lag behind it.
//! 3. **Leasing**: a claimed task carries a lease expiry. Workers extend it
//!    by heartbeating; if a worker vanishes, the recovery loop expires the
//!    lease and the task becomes dispatchable again (at-least-once).
//! 4. **Promotion**: the scheduler loop moves SCHEDULED tasks whose time has
//!    arrived and RETRYING tasks whose backoff elapsed back into the ready
//!    set.
//!
//! ## Submodules
//! - **`index`**: the ordered ready-set cache.
//! - **`dispatcher`**: the claim protocol (fast path via the index, slow
//!   path via a store scan).
//! - **`core`**: `DispatchCore`, the engine facade owning index, loops and
//!   counters.
//! - **`loops`**: periodic scheduler / recovery / cleanup / metrics tasks.
//! - **`protocol`**: HTTP contracts for the worker surface.
//! - **`handlers`**: axum handlers for poll / heartbeat / complete / fail.

pub mod core;
pub mod dispatcher;
pub mod handlers;
pub mod index;
pub mod loops;
pub mod protocol;
