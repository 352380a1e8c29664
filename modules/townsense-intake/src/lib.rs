//! Report intake: detection, geocoding, normalization, deduplication and
//! notification for citizen-submitted issue photos.

pub mod adapters;
pub mod contact;
pub mod dedup;
pub mod intake;
pub mod normalizer;
pub mod notify;
pub mod photo;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dedup::{DedupEngine, DedupOutcome};
pub use intake::{FeedbackReceipt, Intake, IntakeDeps, Submission, SubmissionReceipt};
pub use notify::{NotificationDispatcher, NotificationOutcome};
