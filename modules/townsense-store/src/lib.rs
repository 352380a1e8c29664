//! Persistence boundary for reports, feedback and report images.
//!
//! The store is an opaque keyed collection. The two operations the
//! deduplication engine relies on for correctness under concurrency are
//! `insert_if_absent` (one atomic conditional write per uniqueness key) and
//! `increment_duplicate` (atomic counter bump, never read-modify-write).

pub mod images;
pub mod memory;
pub mod postgres;
pub mod store;

pub use images::{FsImageStore, ImageStore, MemoryImageStore};
pub use memory::MemoryReportStore;
pub use postgres::PgReportStore;
pub use store::{InsertOutcome, ReportStore, StoreError};
