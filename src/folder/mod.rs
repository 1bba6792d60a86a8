//! Folder module.
//!
//! This module contains the folder topology types and helpers:
//! mailbox statistics, hierarchy delimiter reconciliation between two
//! servers, and subfolder expansion of the configured mappings.

pub mod expand;
pub mod path;

pub use expand::expand_mappings;
pub use path::{
    check_mappings, detect_delimiter, fix_mappings, rewrite_delimiters, validate_folder_path,
    DelimiterMismatch, MappingSide, COMMON_DELIMITERS,
};

use std::fmt;

use serde::Serialize;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Best-effort statistics for a single mailbox.
///
/// Counts and sizes may be zero when the server refuses STATUS or
/// size fetches.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize)]
pub struct MailboxInfo {
    /// Fully-qualified mailbox name.
    pub name: String,
    /// Number of messages in the mailbox.
    pub messages: u32,
    /// Total size of all messages, in bytes.
    pub size: u64,
}

impl MailboxInfo {
    /// Returns the mailbox size as a human-readable string.
    pub fn human_size(&self) -> String {
        format_size(self.size)
    }
}

impl fmt::Display for MailboxInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Converts a byte count to a human-readable string (B, KB, MB, GB).
pub fn format_size(bytes: u64) -> String {
    match bytes {
        _ if bytes >= GIB => format!("{:.2} GB", bytes as f64 / GIB as f64),
        _ if bytes >= MIB => format!("{:.2} MB", bytes as f64 / MIB as f64),
        _ if bytes >= KIB => format!("{:.2} KB", bytes as f64 / KIB as f64),
        _ => format!("{} B", bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::format_size;

    #[test]
    fn format_size_picks_unit() {
        assert_eq!("0 B", format_size(0));
        assert_eq!("512 B", format_size(512));
        assert_eq!("1.00 KB", format_size(1024));
        assert_eq!("1.50 KB", format_size(1536));
        assert_eq!("2.00 MB", format_size(2 * 1024 * 1024));
        assert_eq!("3.00 GB", format_size(3 * 1024 * 1024 * 1024));
    }
}
