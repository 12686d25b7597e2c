//! Task Service Layer
//!
//! Client-facing half of the system: request validation, admission into the
//! store and the dispatch queue, lifecycle actions (cancel, retry, status
//! updates), and the query/statistics surface.
//!
//! ## Submodules
//! - **`tasks`**: `TaskService`, the admission and lifecycle facade.
//! - **`protocol`**: REST DTOs and the ISO-8601 timestamp codecs.
//! - **`handlers`**: axum handlers for the `/api/v1/tasks` surface.

pub mod handlers;
pub mod protocol;
pub mod tasks;
