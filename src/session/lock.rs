//! Folder creation lock module.
//!
//! Folder ancestry is shared across plans, so two parallel uploads can
//! race to CREATE the same intermediate path. The process-wide lock
//! map below serializes creation per fully-qualified path: entries are
//! inserted lazily and never removed during a run.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;

static FOLDER_LOCKS: Lazy<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns the creation lock for the given folder path, creating it on
/// first use.
pub(crate) fn folder_lock(path: &str) -> Arc<Mutex<()>> {
    let mut locks = FOLDER_LOCKS
        .lock()
        .unwrap_or_else(|err| err.into_inner());
    locks
        .entry(path.to_owned())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}
