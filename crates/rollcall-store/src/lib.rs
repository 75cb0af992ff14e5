//! rollcall-store: Durable storage for enrolled identities, reference
//! samples and the attendance log.

pub mod samples;
pub mod sqlite;

pub use samples::FsSampleStore;
pub use sqlite::SqliteStore;
