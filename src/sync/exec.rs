//! Sync execution module.
//!
//! The executor realizes the planner's output: it first creates every
//! missing destination folder on a shared session, then processes the
//! active plans in contiguous chunks sized by the worker count. Every
//! plan in a chunk runs on its own fresh destination session, so at
//! most `workers` IMAP conversations exist at any instant.

use std::result;

use log::{debug, error, trace};
use rayon::prelude::*;
use thiserror::Error;

use super::plan::FolderSyncPlan;
use crate::{
    cancel::{self, CancelToken},
    config::Credentials,
    progress::Progress,
    session::{self, Session},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create {failed} destination folders")]
    CreateFoldersError { failed: usize },

    #[error(transparent)]
    CancelledError(#[from] cancel::Cancelled),
}

pub type Result<T> = result::Result<T, Error>;

/// Creates every distinct destination folder the active plans report
/// as missing, exactly once each. Errors whose server text claims the
/// folder already exists are absorbed; any other creation failure is
/// counted and aborts the run before the execution phase starts.
pub fn precreate_folders(
    destination: &mut Session,
    plans: &[FolderSyncPlan],
    cancel: &CancelToken,
    progress: &dyn Progress,
) -> Result<()> {
    let folders = folders_to_create(plans);
    if folders.is_empty() {
        return Ok(());
    }

    debug!("creating {} destination folders", folders.len());
    let tracker = progress.tracker("creating folders", folders.len() as u64);

    let mut created = 0;
    let mut failed = 0;

    for (index, folder) in folders.iter().enumerate() {
        cancel.check()?;

        tracker.update_message(&format!(
            "({}/{}) creating {}",
            index + 1,
            folders.len(),
            folder
        ));

        match destination.create_mailbox(folder) {
            Ok(true) => {
                debug!("created folder {}", folder);
                created += 1;
            }
            Ok(false) => created += 1,
            Err(err) if is_already_exists(&err) => {
                debug!("folder {} already exists", folder);
                created += 1;
            }
            Err(err) => {
                error!("cannot create folder {}: {}", folder, err);
                progress.log(&format!("cannot create folder {}: {}", folder, err));
                failed += 1;
            }
        }

        tracker.increment(1);
    }

    tracker.update_message(&format!("created {} folders", created));

    if failed > 0 {
        tracker.mark_errored();
        return Err(Error::CreateFoldersError { failed });
    }

    tracker.mark_done();
    Ok(())
}

/// Runs every active plan and returns the aggregated
/// `(synced, errors)` counts.
///
/// Plans are processed in contiguous chunks of `workers`; within a
/// chunk every plan runs in parallel on a dedicated destination
/// session, and the next chunk only starts once the whole chunk is
/// done. Cancellation is observed between chunks and between messages.
pub fn run_plans(
    destination_creds: &Credentials,
    workers: usize,
    plans: &[FolderSyncPlan],
    cancel: &CancelToken,
    progress: &dyn Progress,
) -> (usize, usize) {
    let active: Vec<&FolderSyncPlan> = plans
        .iter()
        .filter(|plan| !plan.messages_to_sync.is_empty())
        .collect();
    let total_plans = active.len();
    let workers = workers.max(1);

    let mut total_synced = 0;
    let mut total_errors = 0;

    for (chunk_index, chunk) in active.chunks(workers).enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        trace!(
            "processing chunk {} ({} folders)",
            chunk_index + 1,
            chunk.len()
        );

        let counts: Vec<(usize, usize)> = chunk
            .par_iter()
            .enumerate()
            .map(|(offset, plan)| {
                let plan_index = chunk_index * workers + offset + 1;
                run_plan(
                    destination_creds,
                    plan,
                    plan_index,
                    total_plans,
                    cancel,
                    progress,
                )
            })
            .collect();

        for (synced, errors) in counts {
            total_synced += synced;
            total_errors += errors;
        }
    }

    (total_synced, total_errors)
}

/// Uploads the messages of one plan on a dedicated session. Failures
/// are counted per message and never stop the remaining uploads.
fn run_plan(
    destination_creds: &Credentials,
    plan: &FolderSyncPlan,
    plan_index: usize,
    total_plans: usize,
    cancel: &CancelToken,
    progress: &dyn Progress,
) -> (usize, usize) {
    let total = plan.messages_to_sync.len();
    let tracker = progress.tracker(
        &format!(
            "{}/{} {} -> {}",
            plan_index, total_plans, plan.source_folder, plan.destination_folder
        ),
        total as u64,
    );

    if cancel.is_cancelled() {
        tracker.mark_errored();
        return (0, 0);
    }

    tracker.update_message(&format!("{}/{} connecting", plan_index, total_plans));

    let mut creds = destination_creds.clone();
    creds.label = format!("{}-folder-{}", creds.label, plan_index);
    let mut session = match Session::open(creds) {
        Ok(session) => session,
        Err(err) => {
            progress.log(&format!(
                "cannot connect for folder {}: {}",
                plan.destination_folder, err
            ));
            tracker.mark_errored();
            return (0, 1);
        }
    };

    let mut synced = 0;
    let mut errors = 0;

    for (index, message) in plan.messages_to_sync.iter().enumerate() {
        if cancel.is_cancelled() {
            tracker.mark_errored();
            let _ = session.logout();
            return (synced, errors);
        }

        match session.append(&plan.destination_folder, message) {
            Ok(()) => {
                synced += 1;
                tracker.increment(1);
                tracker.update_message(&format!(
                    "{}/{} ({}/{}) {} -> {}",
                    plan_index,
                    total_plans,
                    synced,
                    total,
                    plan.source_folder,
                    plan.destination_folder
                ));
            }
            Err(err) => {
                progress.log(&format!(
                    "cannot append message {}/{} to {}: {}",
                    index + 1,
                    total,
                    plan.destination_folder,
                    err
                ));
                errors += 1;
            }
        }
    }

    let _ = session.logout();

    if errors > 0 {
        tracker.mark_errored();
    } else {
        tracker.mark_done();
    }

    (synced, errors)
}

/// Distinct destination folders of active plans whose destination did
/// not answer the scan, in stable order.
fn folders_to_create(plans: &[FolderSyncPlan]) -> Vec<String> {
    let mut folders: Vec<String> = plans
        .iter()
        .filter(|plan| !plan.messages_to_sync.is_empty() && !plan.destination_folder_exists)
        .map(|plan| plan.destination_folder.clone())
        .collect();
    folders.sort();
    folders.dedup();
    folders
}

/// Whether a creation failure only reports that the folder is already
/// there. Server wordings vary, so the whole error chain is matched.
fn is_already_exists(err: &session::Error) -> bool {
    let mut current: Option<&dyn std::error::Error> = Some(err);
    while let Some(err) = current {
        let text = err.to_string();
        if text.contains("already exists") || text.contains("Mailbox exists") {
            return true;
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{folders_to_create, is_already_exists};
    use crate::{envelope::MessageRef, session, sync::plan::FolderSyncPlan};

    fn plan(destination: &str, exists: bool, messages: usize) -> FolderSyncPlan {
        FolderSyncPlan {
            source_folder: String::from("INBOX"),
            destination_folder: destination.to_owned(),
            destination_folder_exists: exists,
            messages_to_sync: (0..messages)
                .map(|index| MessageRef {
                    uid: Some(index as u32 + 1),
                    message_id: format!("m{}@example.com", index),
                    subject: String::new(),
                    date: None,
                    size: 0,
                    raw: Some(Vec::new()),
                })
                .collect(),
        }
    }

    #[test]
    fn folders_to_create_keeps_missing_active_folders_once() {
        let plans = vec![
            plan("Archive", false, 2),
            plan("Archive", false, 1),
            plan("Sent", true, 3),
            plan("Drafts", false, 0),
        ];

        assert_eq!(vec![String::from("Archive")], folders_to_create(&plans));
    }

    #[test]
    fn already_exists_errors_are_absorbed() {
        let err = session::Error::CreateMboxError(
            imap::Error::No(String::from("[ALREADYEXISTS] Mailbox exists")),
            String::from("Archive"),
        );
        assert!(is_already_exists(&err));

        let err = session::Error::CreateMboxError(
            imap::Error::No(String::from("create failed: folder already exists")),
            String::from("Archive"),
        );
        assert!(is_already_exists(&err));

        let err = session::Error::CreateMboxError(
            imap::Error::No(String::from("permission denied")),
            String::from("Archive"),
        );
        assert!(!is_already_exists(&err));
    }
}
