//! Mapping expansion module.
//!
//! Each configured mapping is expanded to cover the whole subtree of
//! its source folder: every subfolder found on the source server gets
//! a derived mapping whose destination path reuses the mapping's
//! destination as root, with the delimiter rewritten to the
//! destination server's convention.

use log::{debug, warn};

use super::path::rewrite_delimiters;
use crate::{cancel::CancelToken, config::DirectoryMapping, session::Session};

/// Expands every mapping with one derived mapping per source
/// subfolder. Failures enumerating a particular source folder are
/// logged and skipped.
pub fn expand_mappings(
    source: &mut Session,
    mappings: &[DirectoryMapping],
    src_delimiter: &str,
    dst_delimiter: &str,
    cancel: &CancelToken,
) -> Vec<DirectoryMapping> {
    let mut expanded = Vec::with_capacity(mappings.len());

    for mapping in mappings {
        if cancel.is_cancelled() {
            break;
        }

        expanded.push(mapping.clone());

        let subfolders = match source.list_subfolders(&mapping.source) {
            Ok(subfolders) => subfolders,
            Err(err) => {
                warn!(
                    "cannot list subfolders of {}, skipping: {}",
                    mapping.source, err
                );
                continue;
            }
        };

        for subfolder in subfolders {
            let derived = map_subfolder(mapping, &subfolder, src_delimiter, dst_delimiter);
            debug!(
                "found subfolder {} -> {}",
                derived.source, derived.destination
            );
            expanded.push(derived);
        }
    }

    expanded
}

/// Derives the mapping of one source subfolder: the source-relative
/// suffix is computed by stripping the mapping root, rewritten to the
/// destination delimiter, and appended to the destination root.
pub(crate) fn map_subfolder(
    mapping: &DirectoryMapping,
    subfolder: &str,
    src_delimiter: &str,
    dst_delimiter: &str,
) -> DirectoryMapping {
    let prefix = if src_delimiter.is_empty() {
        mapping.source.clone()
    } else {
        format!("{}{}", mapping.source, src_delimiter)
    };
    let relative = subfolder.strip_prefix(&prefix).unwrap_or(subfolder);

    let destination = if !dst_delimiter.is_empty() && !relative.is_empty() {
        let relative = if !src_delimiter.is_empty() && src_delimiter != dst_delimiter {
            rewrite_delimiters(relative, src_delimiter, dst_delimiter)
        } else {
            relative.to_owned()
        };
        format!("{}{}{}", mapping.destination, dst_delimiter, relative)
    } else {
        mapping.destination.clone()
    };

    DirectoryMapping {
        source: subfolder.to_owned(),
        destination,
    }
}
