//! Folder path module.
//!
//! Servers are free to pick their own hierarchy delimiter, so the same
//! folder tree reads `Archive/2023` on one side and `Archive.2023` on
//! the other. The helpers here detect which delimiter a configured
//! path uses, check it against the server-chosen one, and rewrite
//! paths between conventions.

use std::fmt;

use crate::config::DirectoryMapping;

/// Delimiters commonly chosen by IMAP servers, in detection order.
pub const COMMON_DELIMITERS: [&str; 3] = ["/", ".", "\\"];

/// Returns the first common delimiter found in the path, or `None`
/// when the path is flat.
pub fn detect_delimiter(path: &str) -> Option<&'static str> {
    COMMON_DELIMITERS
        .iter()
        .find(|delim| path.contains(*delim))
        .copied()
}

/// A path is valid for a server iff it contains no common delimiter
/// other than the server-chosen one.
pub fn validate_folder_path(path: &str, server_delimiter: &str) -> bool {
    if server_delimiter.is_empty() {
        return true;
    }

    COMMON_DELIMITERS
        .iter()
        .all(|delim| *delim == server_delimiter || !path.contains(delim))
}

/// Literal substring replacement of every `old` with `new`.
pub fn rewrite_delimiters(path: &str, old: &str, new: &str) -> String {
    path.replace(old, new)
}

/// Which side of a mapping a mismatch was found on.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MappingSide {
    Source,
    Destination,
}

impl fmt::Display for MappingSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MappingSide::Source => write!(f, "source"),
            MappingSide::Destination => write!(f, "destination"),
        }
    }
}

/// Human-diagnosable report of one path whose delimiter does not match
/// the server configuration. The decision to rewrite is the driver's.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DelimiterMismatch {
    /// Zero-based index of the mapping in the configuration.
    pub mapping_index: usize,
    pub side: MappingSide,
    /// The offending path.
    pub path: String,
    /// Delimiter detected in the path, `"none"` when flat.
    pub detected: &'static str,
    /// Delimiter the server expects.
    pub expected: String,
}

impl fmt::Display for DelimiterMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "mapping {}: {} folder {:?} uses delimiter {:?}, server expects {:?}",
            self.mapping_index + 1,
            self.side,
            self.path,
            self.detected,
            self.expected,
        )
    }
}

/// Checks every mapping against both server delimiters and reports the
/// paths that use a foreign one.
pub fn check_mappings(
    mappings: &[DirectoryMapping],
    src_delimiter: &str,
    dst_delimiter: &str,
) -> Vec<DelimiterMismatch> {
    let mut mismatches = Vec::new();

    for (index, mapping) in mappings.iter().enumerate() {
        if !src_delimiter.is_empty() && !validate_folder_path(&mapping.source, src_delimiter) {
            mismatches.push(DelimiterMismatch {
                mapping_index: index,
                side: MappingSide::Source,
                path: mapping.source.clone(),
                detected: detect_delimiter(&mapping.source).unwrap_or("none"),
                expected: src_delimiter.to_owned(),
            });
        }

        if !dst_delimiter.is_empty() && !validate_folder_path(&mapping.destination, dst_delimiter)
        {
            mismatches.push(DelimiterMismatch {
                mapping_index: index,
                side: MappingSide::Destination,
                path: mapping.destination.clone(),
                detected: detect_delimiter(&mapping.destination).unwrap_or("none"),
                expected: dst_delimiter.to_owned(),
            });
        }
    }

    mismatches
}

/// Rewrites every mapping path whose detected delimiter differs from
/// the server-chosen one.
pub fn fix_mappings(mappings: &mut [DirectoryMapping], src_delimiter: &str, dst_delimiter: &str) {
    for mapping in mappings {
        if !src_delimiter.is_empty() {
            if let Some(old) = detect_delimiter(&mapping.source) {
                if old != src_delimiter {
                    mapping.source = rewrite_delimiters(&mapping.source, old, src_delimiter);
                }
            }
        }

        if !dst_delimiter.is_empty() {
            if let Some(old) = detect_delimiter(&mapping.destination) {
                if old != dst_delimiter {
                    mapping.destination =
                        rewrite_delimiters(&mapping.destination, old, dst_delimiter);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_delimiter_scans_in_order() {
        assert_eq!(Some("/"), detect_delimiter("Archive/2023"));
        assert_eq!(Some("."), detect_delimiter("Archive.2023"));
        assert_eq!(Some("\\"), detect_delimiter("Archive\\2023"));
        assert_eq!(None, detect_delimiter("INBOX"));

        // slash wins when both are present
        assert_eq!(Some("/"), detect_delimiter("Archive/2023.backup"));
    }

    #[test]
    fn validate_folder_path_allows_server_delimiter_only() {
        assert!(validate_folder_path("Archive/2023", "/"));
        assert!(!validate_folder_path("Archive.2023", "/"));
        assert!(!validate_folder_path("Archive/2023.backup", "/"));
        assert!(validate_folder_path("INBOX", "/"));

        // no server delimiter means nothing to check
        assert!(validate_folder_path("Archive.2023", ""));
    }

    #[test]
    fn rewrite_delimiters_is_self_inverse() {
        let path = "Archive/2023/January";
        let rewritten = rewrite_delimiters(path, "/", ".");
        assert_eq!("Archive.2023.January", rewritten);
        assert_eq!(path, rewrite_delimiters(&rewritten, ".", "/"));
    }

    #[test]
    fn check_mappings_reports_index_and_side() {
        let mappings = vec![
            DirectoryMapping::new("INBOX", "INBOX"),
            DirectoryMapping::new("Archive.2023", "Backup/Archive.2023"),
        ];

        let mismatches = check_mappings(&mappings, "/", "/");

        assert_eq!(2, mismatches.len());
        assert_eq!(1, mismatches[0].mapping_index);
        assert_eq!(MappingSide::Source, mismatches[0].side);
        assert_eq!(".", mismatches[0].detected);
        assert_eq!(MappingSide::Destination, mismatches[1].side);
        assert_eq!("/", mismatches[1].detected);
    }

    #[test]
    fn fix_mappings_rewrites_foreign_delimiters() {
        let mut mappings = vec![DirectoryMapping::new("Archive.2023.January", "Archive.2023")];

        fix_mappings(&mut mappings, ".", "/");

        assert_eq!("Archive.2023.January", mappings[0].source);
        assert_eq!("Archive/2023", mappings[0].destination);
    }
}
