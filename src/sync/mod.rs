//! Synchronization module.
//!
//! This module contains the sync engine's entry point: it connects to
//! both accounts, reconciles delimiters, expands the mappings, plans
//! the differential copy, and executes it with bounded parallelism.
//! Run-fatal failures are returned as errors; a completed run reports
//! its status and counts in a [`SyncReport`].

pub mod exec;
pub mod plan;

pub use exec::{precreate_folders, run_plans};
pub use plan::{build_sync_plan, FolderSyncPlan, SyncSummary};

use std::result;

use log::{debug, warn};
use thiserror::Error;

use crate::{
    cancel::{self, CancelToken},
    config::Config,
    folder,
    progress::Progress,
    session::{self, Session},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("no folder mappings in config")]
    NoMappingsError,
    #[error("cannot connect to source server")]
    SourceConnectError(#[source] session::Error),
    #[error("cannot connect to destination server")]
    DestinationConnectError(#[source] session::Error),

    #[error(transparent)]
    PlanError(#[from] plan::Error),
    #[error(transparent)]
    ExecError(#[from] exec::Error),
    #[error(transparent)]
    CancelledError(#[from] cancel::Cancelled),
}

pub type Result<T> = result::Result<T, Error>;

/// Terminal status of a completed run.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SyncStatus {
    /// Everything that had to move moved.
    Success,
    /// Some messages moved, some appends failed.
    CompletedWithErrors,
    /// The run was cancelled; counts cover the work done before.
    Cancelled,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SyncReport {
    /// Number of messages uploaded to the destination.
    pub synced: usize,
    /// Number of messages that failed to upload.
    pub errors: usize,
    pub status: SyncStatus,
}

impl SyncReport {
    fn cancelled() -> Self {
        Self {
            synced: 0,
            errors: 0,
            status: SyncStatus::Cancelled,
        }
    }
}

/// Synchronizes the configured mappings from the source account to the
/// destination account.
///
/// `confirm` is consulted before rewriting mismatched delimiters and
/// before the execution phase; `None` auto-confirms both. Cancellation
/// is observed between mappings, between messages and between fetch
/// batches, and triggers a best-effort logout of every live session.
pub fn run(
    cancel: &CancelToken,
    config: &Config,
    progress: &dyn Progress,
    confirm: Option<&dyn Fn(&str) -> bool>,
) -> Result<SyncReport> {
    match run_inner(cancel, config, progress, confirm) {
        Err(_) if cancel.is_cancelled() => Ok(SyncReport::cancelled()),
        other => other,
    }
}

fn run_inner(
    cancel: &CancelToken,
    config: &Config,
    progress: &dyn Progress,
    confirm: Option<&dyn Fn(&str) -> bool>,
) -> Result<SyncReport> {
    cancel.check()?;

    if config.mappings.is_empty() {
        return Err(Error::NoMappingsError);
    }

    debug!("starting sync with {} workers", config.workers);

    let mut source = Session::open(config.src.clone()).map_err(Error::SourceConnectError)?;

    cancel.check()?;
    let mut destination = match Session::open(config.dst.clone()) {
        Ok(session) => session,
        Err(err) => {
            let _ = source.logout();
            return Err(Error::DestinationConnectError(err));
        }
    };

    let report = run_with_sessions(
        cancel,
        config,
        progress,
        confirm,
        &mut source,
        &mut destination,
    );

    let _ = source.logout();
    let _ = destination.logout();

    report
}

fn run_with_sessions(
    cancel: &CancelToken,
    config: &Config,
    progress: &dyn Progress,
    confirm: Option<&dyn Fn(&str) -> bool>,
    source: &mut Session,
    destination: &mut Session,
) -> Result<SyncReport> {
    let src_delimiter = source.delimiter().to_owned();
    let dst_delimiter = destination.delimiter().to_owned();

    let mut mappings = config.mappings.clone();

    // reconcile configured paths with the server-chosen delimiters
    let mismatches = folder::check_mappings(&mappings, &src_delimiter, &dst_delimiter);
    if !mismatches.is_empty() {
        progress.log("folder path delimiter mismatch detected:");
        for mismatch in &mismatches {
            progress.log(&mismatch.to_string());
        }

        let fix = match confirm {
            Some(confirm) => confirm("fix folder delimiters to match the server configuration?"),
            None => true,
        };

        if fix {
            folder::fix_mappings(&mut mappings, &src_delimiter, &dst_delimiter);
        } else {
            warn!("delimiters left untouched, the folder structure may not be interpreted correctly");
        }
    }

    cancel.check()?;

    let mappings = folder::expand_mappings(
        source,
        &mappings,
        &src_delimiter,
        &dst_delimiter,
        cancel,
    );
    cancel.check()?;

    let summary = build_sync_plan(source, destination, &mappings, cancel, progress)?;

    if summary.total_new == 0 {
        debug!("all folders already synced");
        progress.log("all folders already synced");
        return Ok(SyncReport {
            synced: 0,
            errors: 0,
            status: SyncStatus::Success,
        });
    }

    progress.log(&format!(
        "{} new messages to sync across {} folders",
        summary.total_new,
        summary.plans.len()
    ));

    if let Some(confirm) = confirm {
        cancel.check()?;
        if !confirm("proceed with synchronization?") {
            progress.log("sync declined");
            return Ok(SyncReport {
                synced: 0,
                errors: 0,
                status: SyncStatus::Success,
            });
        }
    }

    precreate_folders(destination, &summary.plans, cancel, progress)?;

    let (synced, errors) = run_plans(
        &config.dst,
        config.workers,
        &summary.plans,
        cancel,
        progress,
    );

    let status = if cancel.is_cancelled() {
        SyncStatus::Cancelled
    } else if errors > 0 {
        SyncStatus::CompletedWithErrors
    } else {
        SyncStatus::Success
    };

    Ok(SyncReport {
        synced,
        errors,
        status,
    })
}
