//! Job and account storage
//!
//! The coordinators only see the [`JobStore`] and [`AccountStore`] traits.
//! [`SqliteJobStore`] is the production backend; [`InMemoryJobStore`]
//! backs the tests.

mod memory;
mod ordering;
mod sqlite;
mod traits;

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;
pub use traits::{AccountStore, JobStore};
