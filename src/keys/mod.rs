//! Role-gated key desk.

pub mod registry;
pub mod session;

pub use registry::{KeyIssue, KeyRegistry};
pub use session::{KeyOutcome, KeySession};
