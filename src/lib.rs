//! imap-mirror mirrors mailbox folders between two IMAP accounts.
//!
//! The copy is differential and keyed on the RFC 5322 Message-ID: for
//! each configured folder mapping, the planner diffs the Message-ID
//! sets of both sides and materializes only the missing messages,
//! which the executor then uploads in parallel, one fresh session per
//! folder. Connections transparently rebuild themselves on transport
//! failures, with bounded backoff and a rate-limited re-entry gate.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod envelope;
pub mod folder;
pub mod progress;
pub mod session;
pub mod sync;

pub use cache::CacheManager;
pub use cancel::CancelToken;
pub use config::{Config, Credentials, DirectoryMapping};
pub use envelope::MessageRef;
pub use folder::MailboxInfo;
pub use progress::{Progress, ProgressTracker, SilentProgress};
pub use session::{MailboxStatus, Session};
pub use sync::{FolderSyncPlan, SyncReport, SyncStatus, SyncSummary};
