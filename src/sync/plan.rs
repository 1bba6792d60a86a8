//! Sync planning module.
//!
//! The planner produces the minimal list of messages that must move:
//! for each mapping it scans both sides in parallel, diffs the
//! Message-ID sets, and materializes the bodies of exactly the missing
//! messages.

use std::{collections::HashSet, result};

use log::{debug, warn};
use thiserror::Error;

use crate::{
    cancel::{self, CancelToken},
    config::DirectoryMapping,
    envelope::MessageRef,
    progress::Progress,
    session::{self, Session},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot fetch messages from source folder {1}")]
    FetchSourceMessagesError(#[source] session::Error, String),

    #[error(transparent)]
    CancelledError(#[from] cancel::Cancelled),
}

pub type Result<T> = result::Result<T, Error>;

/// How a single source folder should be copied to its destination.
///
/// Created by the planner, consumed exactly once by the executor.
#[derive(Debug, Clone)]
pub struct FolderSyncPlan {
    pub source_folder: String,
    pub destination_folder: String,
    /// Whether the destination folder answered the scan. Folders that
    /// did not are created during the pre-creation phase.
    pub destination_folder_exists: bool,
    /// Messages missing on the destination, bodies included.
    pub messages_to_sync: Vec<MessageRef>,
}

impl FolderSyncPlan {
    pub fn new_messages(&self) -> usize {
        self.messages_to_sync.len()
    }
}

/// Per-folder plans plus the total count of messages to move.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub total_new: usize,
    pub plans: Vec<FolderSyncPlan>,
}

/// Builds the sync plan for every mapping, in input order.
///
/// A failure scanning a source folder skips that mapping; a failure
/// scanning a destination folder marks it as missing and treats it as
/// empty; a failure fetching bodies aborts planning entirely.
pub fn build_sync_plan(
    source: &mut Session,
    destination: &mut Session,
    mappings: &[DirectoryMapping],
    cancel: &CancelToken,
    progress: &dyn Progress,
) -> Result<SyncSummary> {
    debug!("planning sync for {} mappings", mappings.len());

    let src_tracker = progress.tracker(
        &format!("[{}] scanning folders", source.label()),
        mappings.len() as u64,
    );
    let dst_tracker = progress.tracker(
        &format!("[{}] scanning folders", destination.label()),
        mappings.len() as u64,
    );

    let mut summary = SyncSummary::default();

    for (index, mapping) in mappings.iter().enumerate() {
        cancel.check()?;

        src_tracker.update_message(&format!(
            "[{}] scanning {} ({}/{})",
            source.label(),
            mapping.source,
            index + 1,
            mappings.len()
        ));
        dst_tracker.update_message(&format!(
            "[{}] scanning {} ({}/{})",
            destination.label(),
            mapping.destination,
            index + 1,
            mappings.len()
        ));

        let (src_res, dst_res) = rayon::join(
            || source.fetch_message_ids(&mapping.source),
            || destination.fetch_message_ids(&mapping.destination),
        );

        let src_ids = match src_res {
            Ok(ids) => ids,
            Err(err) => {
                warn!(
                    "cannot scan source folder {}, skipping mapping: {}",
                    mapping.source, err
                );
                progress.log(&format!(
                    "cannot scan source folder {}, skipping: {}",
                    mapping.source, err
                ));
                src_tracker.increment(1);
                dst_tracker.increment(1);
                continue;
            }
        };

        // a destination that cannot be scanned does not exist yet
        let (destination_folder_exists, dst_ids) = match dst_res {
            Ok(ids) => (true, ids),
            Err(err) => {
                debug!(
                    "cannot scan destination folder {}, treating as empty: {}",
                    mapping.destination, err
                );
                (false, HashSet::new())
            }
        };

        let new_ids = missing_ids(&src_ids, &dst_ids);
        debug!(
            "{} -> {}: {} new messages",
            mapping.source,
            mapping.destination,
            new_ids.len()
        );

        if new_ids.is_empty() {
            src_tracker.increment(1);
            dst_tracker.increment(1);
            continue;
        }

        let messages = source
            .fetch_messages_by_ids(
                &mapping.source,
                &new_ids,
                cancel,
                Some(src_tracker.as_ref()),
            )
            .map_err(|err| Error::FetchSourceMessagesError(err, mapping.source.clone()))?;

        src_tracker.increment(1);
        dst_tracker.increment(1);

        if messages.is_empty() {
            continue;
        }

        summary.total_new += messages.len();
        summary.plans.push(FolderSyncPlan {
            source_folder: mapping.source.clone(),
            destination_folder: mapping.destination.clone(),
            destination_folder_exists,
            messages_to_sync: messages,
        });
    }

    src_tracker.mark_done();
    dst_tracker.mark_done();

    debug!("sync plan ready: {} messages to move", summary.total_new);
    Ok(summary)
}

/// Message-IDs present in the source but absent from the destination.
fn missing_ids(src_ids: &HashSet<String>, dst_ids: &HashSet<String>) -> HashSet<String> {
    src_ids.difference(dst_ids).cloned().collect()
}
