//! Capture subsystem.
//!
//! # Data Flow
//! ```text
//! request/response body stream
//!     → body.rs (buffer once, restore for forwarding, gunzip stored copy)
//!     → dump.rs (raw wire rendering)
//!     → record.rs (structured RequestRecord / ResponseRecord)
//!     → policy.rs (persist or not)
//!     → storage
//!
//! docid.rs issues the id both records are stored under.
//! ```

pub mod body;
pub mod docid;
pub mod dump;
pub mod policy;
pub mod record;

pub use docid::{DocumentId, DocumentIdAllocator};
pub use record::{CaptureRecord, RequestRecord, ResponseRecord, SKIP_SENTINEL};
