//! Cache module.
//!
//! This module contains the optional persisted cache of mailbox
//! statistics: per-folder message counts, sizes, and lightweight
//! message metadata keyed by Message-ID, for both accounts. The sync
//! engine itself never consults it; drivers use it to answer
//! "show"-style queries without rescanning both servers.
//!
//! The cache is a single encrypted file per account pair, named by a
//! hash of both endpoints' identities and keyed by their credentials.

pub mod crypto;

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    result,
};

use chrono::{DateTime, FixedOffset, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{config::Credentials, envelope::MessageRef, folder::MailboxInfo};

const CACHE_DIR: &str = ".imap-mirror";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot get home directory")]
    GetHomeDirError,
    #[error("cannot create cache directory {1}")]
    CreateCacheDirError(#[source] io::Error, PathBuf),
    #[error("cannot read cache file {1}")]
    ReadCacheFileError(#[source] io::Error, PathBuf),
    #[error("cannot write cache file {1}")]
    WriteCacheFileError(#[source] io::Error, PathBuf),
    #[error("cannot remove cache file {1}")]
    RemoveCacheFileError(#[source] io::Error, PathBuf),
    #[error("cannot decode cache payload")]
    DecodeCacheError(#[source] serde_json::Error),
    #[error("cannot encode cache payload")]
    EncodeCacheError(#[source] serde_json::Error),

    #[error(transparent)]
    CryptoError(#[from] crypto::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Lightweight metadata about one cached message.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub uid: u32,
    pub message_id: String,
    pub subject: String,
    pub date: Option<DateTime<FixedOffset>>,
    pub size: u32,
}

/// Cached statistics and message metadata for one folder.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MailboxCache {
    pub mailbox: String,
    /// Messages indexed by Message-ID.
    pub messages: HashMap<String, MessageInfo>,
    pub uid_next: u32,
    pub message_count: u32,
    pub total_size: u64,
    pub updated: Option<DateTime<Utc>>,
}

/// Cached mailboxes for one IMAP account.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerCache {
    pub server: String,
    pub user: String,
    /// Cached folders indexed by name.
    pub mailboxes: HashMap<String, MailboxCache>,
    pub updated: Option<DateTime<Utc>>,
}

impl ServerCache {
    fn new(server: &str, user: &str) -> Self {
        Self {
            server: server.to_owned(),
            user: user.to_owned(),
            ..Self::default()
        }
    }

    /// Replaces the cached entry for a folder with metadata built from
    /// scanned messages. Messages without a Message-ID still count
    /// toward the statistics but are not indexed.
    pub fn update_mailbox(&mut self, mailbox: &str, messages: &[MessageRef]) {
        let mut cache = MailboxCache {
            mailbox: mailbox.to_owned(),
            updated: Some(Utc::now()),
            ..MailboxCache::default()
        };

        let mut max_uid = 0;

        for message in messages {
            cache.message_count += 1;
            cache.total_size += u64::from(message.size);

            let uid = message.uid.unwrap_or(0);
            if uid > max_uid {
                max_uid = uid;
            }

            if !message.message_id.is_empty() {
                cache.messages.insert(
                    message.message_id.clone(),
                    MessageInfo {
                        uid,
                        message_id: message.message_id.clone(),
                        subject: message.subject.clone(),
                        date: message.date,
                        size: message.size,
                    },
                );
            }
        }

        cache.uid_next = max_uid + 1;
        self.mailboxes.insert(mailbox.to_owned(), cache);
    }

    /// Replaces the cached statistics for a folder, without message
    /// metadata.
    pub fn update_info(&mut self, info: &MailboxInfo) {
        self.mailboxes.insert(
            info.name.clone(),
            MailboxCache {
                mailbox: info.name.clone(),
                message_count: info.messages,
                total_size: info.size,
                updated: Some(Utc::now()),
                ..MailboxCache::default()
            },
        );
    }

    pub fn get_mailbox(&self, mailbox: &str) -> Option<&MailboxCache> {
        self.mailboxes.get(mailbox)
    }

    /// All cached Message-IDs of a folder.
    pub fn message_ids(&self, mailbox: &str) -> Vec<String> {
        self.get_mailbox(mailbox)
            .map(|cache| cache.messages.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_message(&self, mailbox: &str, message_id: &str) -> bool {
        self.get_mailbox(mailbox)
            .map(|cache| cache.messages.contains_key(message_id))
            .unwrap_or(false)
    }

    /// Cached folder statistics, sorted by folder name.
    pub fn mailbox_summaries(&self) -> Vec<MailboxInfo> {
        let mut summaries: Vec<MailboxInfo> = self
            .mailboxes
            .values()
            .map(|cache| MailboxInfo {
                name: cache.mailbox.clone(),
                messages: cache.message_count,
                size: cache.total_size,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CachePayload {
    source: ServerCache,
    destination: ServerCache,
}

/// Loads, updates and persists the encrypted cache file bound to one
/// account pair.
#[derive(Debug)]
pub struct CacheManager {
    pub source: ServerCache,
    pub destination: ServerCache,
    file: PathBuf,
    key: String,
}

impl CacheManager {
    /// Builds a cache manager storing its file under
    /// `~/.imap-mirror/cache`.
    pub fn new(src: &Credentials, dst: &Credentials) -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or(Error::GetHomeDirError)?
            .join(CACHE_DIR)
            .join("cache");
        Self::with_dir(dir, src, dst)
    }

    /// Builds a cache manager storing its file in the given directory,
    /// creating it if needed.
    pub fn with_dir<P: Into<PathBuf>>(dir: P, src: &Credentials, dst: &Credentials) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| Error::CreateCacheDirError(err, dir.clone()))?;

        let file = dir.join(cache_file_name(src, dst));
        let key = format!(
            "{}:{}:{}:{}:{}:{}",
            src.pass, src.user, src.server, dst.pass, dst.user, dst.server
        );

        Ok(Self {
            source: ServerCache::new(&src.server, &src.user),
            destination: ServerCache::new(&dst.server, &dst.user),
            file,
            key,
        })
    }

    /// Path of the underlying cache file.
    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Decrypts and loads the cache file, if present. A missing file
    /// leaves the in-memory caches empty.
    pub fn load(&mut self) -> Result<()> {
        let ciphertext = match fs::read(&self.file) {
            Ok(ciphertext) => ciphertext,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::ReadCacheFileError(err, self.file.clone())),
        };

        let plaintext = crypto::decrypt(&ciphertext, &self.key)?;
        let payload: CachePayload =
            serde_json::from_slice(&plaintext).map_err(Error::DecodeCacheError)?;

        self.source = payload.source;
        self.destination = payload.destination;

        debug!("loaded cache from {}", self.file.display());
        Ok(())
    }

    /// Encrypts and persists the cache, atomically replacing the
    /// previous file.
    pub fn save(&mut self) -> Result<()> {
        self.source.updated = Some(Utc::now());
        self.destination.updated = Some(Utc::now());

        let payload = CachePayload {
            source: self.source.clone(),
            destination: self.destination.clone(),
        };
        let plaintext = serde_json::to_vec(&payload).map_err(Error::EncodeCacheError)?;
        let ciphertext = crypto::encrypt(&plaintext, &self.key)?;

        let tmp = self.file.with_extension("tmp");
        fs::write(&tmp, ciphertext)
            .map_err(|err| Error::WriteCacheFileError(err, tmp.clone()))?;
        if let Err(err) = fs::rename(&tmp, &self.file) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::WriteCacheFileError(err, self.file.clone()));
        }

        debug!("saved cache to {}", self.file.display());
        Ok(())
    }

    /// Removes the cache file and resets the in-memory caches.
    pub fn clear(&mut self) -> Result<()> {
        if let Err(err) = fs::remove_file(&self.file) {
            if err.kind() != io::ErrorKind::NotFound {
                return Err(Error::RemoveCacheFileError(err, self.file.clone()));
            }
        }

        self.source.mailboxes.clear();
        self.destination.mailboxes.clear();
        Ok(())
    }
}

/// Cache file name derived from both endpoints' identities.
fn cache_file_name(src: &Credentials, dst: &Credentials) -> String {
    let identity = format!("{}:{}:{}:{}", src.server, src.user, dst.server, dst.user);
    let digest = Sha256::digest(identity.as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
    format!("{}.cache", hex)
}
