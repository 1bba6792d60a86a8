//! IMAP session module.
//!
//! This module contains the resilient IMAP session. The session owns
//! its socket and presents the IMAP verbs the sync engine needs;
//! every verb survives a single transport failure by tearing the
//! connection down, re-authenticating with bounded backoff, and
//! retrying the verb exactly once. Non-transport failures (`NO`,
//! `BAD`) are surfaced as-is.

use std::{
    collections::HashSet,
    net::TcpStream,
    result, thread,
    time::{Duration, Instant},
};

use imap::types::Flag;
use log::{debug, log_enabled, trace, warn, Level};
use native_tls::TlsConnector;
use thiserror::Error;

use super::{lock::folder_lock, stream::SessionStream};
use crate::{
    cancel::{self, CancelToken},
    config::{self, Credentials},
    envelope::{strip_message_id, MessageRef},
    folder::MailboxInfo,
    progress::ProgressTracker,
};

/// Initial delay before the first reconnect retry, doubled after each
/// failed attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
/// Minimum wall-clock time between two reconnections of one session.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
/// Number of reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Number of UIDs requested per body fetch command.
const BODY_FETCH_BATCH_SIZE: usize = 500;
/// Hierarchy delimiter assumed when the server does not report one.
const DEFAULT_DELIMITER: &str = "/";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create tls connector")]
    CreateTlsConnectorError(#[source] native_tls::Error),
    #[error("cannot connect to imap server {1}")]
    ConnectError(#[source] std::io::Error, String),
    #[error("cannot secure connection to imap server {1}")]
    TlsHandshakeError(
        #[source] Box<native_tls::HandshakeError<TcpStream>>,
        String,
    ),
    #[error("cannot read greeting from imap server")]
    ReadGreetingError(#[source] imap::Error),
    #[error("cannot login to imap server")]
    LoginError(#[source] imap::Error),
    #[error("cannot discover hierarchy delimiter")]
    GetDelimiterError(#[source] imap::Error),
    #[error("cannot get imap session: not connected")]
    GetSessionError,
    #[error("cannot reconnect to imap server after {1} attempts")]
    ReconnectExhaustedError(#[source] Box<Error>, u32),
    #[error("cannot select mailbox {1}")]
    SelectMboxError(#[source] imap::Error, String),
    #[error("cannot search messages")]
    SearchError(#[source] imap::Error),
    #[error("cannot fetch envelopes from mailbox {1}")]
    FetchEnvelopesError(#[source] imap::Error, String),
    #[error("cannot fetch message bodies from mailbox {1}")]
    FetchBodiesError(#[source] imap::Error, String),
    #[error("cannot append message to mailbox {1}")]
    AppendMsgError(#[source] imap::Error, String),
    #[error("cannot append message {0:?}: message has no body")]
    AppendEmptyBodyError(String),
    #[error("cannot create mailbox {1}")]
    CreateMboxError(#[source] imap::Error, String),
    #[error("cannot check existence of mailbox {1}")]
    CheckMboxExistsError(#[source] imap::Error, String),
    #[error("cannot list mailboxes")]
    ListMboxesError(#[source] imap::Error),
    #[error("cannot list subfolders of {1}")]
    ListSubfoldersError(#[source] imap::Error, String),
    #[error("cannot logout from imap server")]
    LogoutError(#[source] imap::Error),

    #[error(transparent)]
    ConfigError(#[from] config::Error),
    #[error(transparent)]
    CancelledError(#[from] cancel::Cancelled),
}

pub type Result<T> = result::Result<T, Error>;

type ImapSession = imap::Session<SessionStream>;

/// Subset of the SELECT response the callers rely on.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct MailboxStatus {
    /// Number of messages in the selected mailbox.
    pub messages: u32,
}

/// One authenticated IMAP conversation.
///
/// Operations take `&mut self` and run strictly in program order.
/// Callers that need parallelism across folders open one session per
/// task instead of sharing one.
pub struct Session {
    creds: Credentials,
    sess: Option<ImapSession>,
    delimiter: String,
    backoff: Duration,
    last_reconnect: Option<Instant>,
}

impl Session {
    /// Dials the configured server, authenticates, and caches the
    /// server-chosen hierarchy delimiter.
    pub fn open(creds: Credentials) -> Result<Self> {
        let mut sess = Self::connect_and_login(&creds)?;

        let delimiter = match Self::discover_delimiter(&mut sess) {
            Ok(delimiter) => delimiter,
            Err(err) => {
                let _ = sess.logout();
                return Err(err);
            }
        };
        debug!("[{}] hierarchy delimiter: {:?}", creds.label, delimiter);

        Ok(Self {
            creds,
            sess: Some(sess),
            delimiter,
            backoff: INITIAL_BACKOFF,
            last_reconnect: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.creds.label
    }

    /// Hierarchy delimiter discovered at login. Falls back to `/` when
    /// the server reports none.
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    fn connect_and_login(creds: &Credentials) -> Result<ImapSession> {
        let (host, port) = creds.addr()?;

        debug!("[{}] connecting to {}", creds.label, creds.server);
        let tcp = TcpStream::connect((host.as_str(), port))
            .map_err(|err| Error::ConnectError(err, creds.server.clone()))?;

        let stream = if creds.use_tls {
            let tls = TlsConnector::builder()
                .danger_accept_invalid_certs(creds.insecure)
                .danger_accept_invalid_hostnames(creds.insecure)
                .build()
                .map_err(Error::CreateTlsConnectorError)?;
            let stream = tls
                .connect(&host, tcp)
                .map_err(|err| Error::TlsHandshakeError(Box::new(err), creds.server.clone()))?;
            SessionStream::Tls(stream)
        } else {
            SessionStream::Tcp(tcp)
        };

        let mut client = imap::Client::new(stream);
        client.read_greeting().map_err(Error::ReadGreetingError)?;

        debug!("[{}] logging in as {}", creds.label, creds.user);
        let mut sess = client
            .login(&creds.user, &creds.pass)
            .map_err(|res| Error::LoginError(res.0))?;
        sess.debug = log_enabled!(Level::Trace);

        Ok(sess)
    }

    fn discover_delimiter(sess: &mut ImapSession) -> Result<String> {
        let names = sess
            .list(Some(""), Some(""))
            .map_err(Error::GetDelimiterError)?;

        let delimiter = names
            .iter()
            .find_map(|name| name.delimiter())
            .filter(|delimiter| !delimiter.is_empty())
            .unwrap_or(DEFAULT_DELIMITER)
            .to_owned();

        Ok(delimiter)
    }

    fn sess(&mut self) -> Result<&mut ImapSession> {
        self.sess.as_mut().ok_or(Error::GetSessionError)
    }

    /// Tears down and rebuilds the underlying conversation, with at
    /// most one reconnection per [`RECONNECT_INTERVAL`] and doubling
    /// backoff between attempts. The cached delimiter is kept.
    fn reconnect(&mut self) -> Result<()> {
        if let Some(wait) = remaining_wait(self.last_reconnect, Instant::now(), RECONNECT_INTERVAL)
        {
            debug!("[{}] reconnecting in {:?}", self.label(), wait);
            thread::sleep(wait);
        }

        if let Some(mut sess) = self.sess.take() {
            let _ = sess.logout();
        }

        let mut delay = self.backoff;
        let mut last_err = None;

        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            debug!("[{}] reconnect attempt {}", self.label(), attempt);
            match Self::connect_and_login(&self.creds) {
                Ok(sess) => {
                    debug!("[{}] reconnected successfully", self.label());
                    self.sess = Some(sess);
                    self.last_reconnect = Some(Instant::now());
                    self.backoff = INITIAL_BACKOFF;
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "[{}] reconnect attempt {} failed, retrying in {:?}: {}",
                        self.label(),
                        attempt,
                        delay,
                        err
                    );
                    last_err = Some(err);
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }

        self.last_reconnect = Some(Instant::now());
        Err(Error::ReconnectExhaustedError(
            Box::new(last_err.unwrap_or(Error::GetSessionError)),
            MAX_RECONNECT_ATTEMPTS,
        ))
    }

    /// Runs one verb against the session. On a transport-class failure
    /// the session reconnects and the verb is retried exactly once;
    /// any other failure is wrapped and surfaced untouched.
    fn safe_call<T, O, W>(&mut self, op: O, wrap: W) -> Result<T>
    where
        O: Fn(&mut ImapSession) -> imap::Result<T>,
        W: Fn(imap::Error) -> Error,
    {
        match op(self.sess()?) {
            Ok(res) => Ok(res),
            Err(err) if is_transport_error(&err) => {
                debug!("[{}] transport failure: {}", self.label(), err);
                self.reconnect()?;
                op(self.sess()?).map_err(wrap)
            }
            Err(err) => Err(wrap(err)),
        }
    }

    /// Selects a mailbox, read-only (EXAMINE) or read-write (SELECT).
    pub fn select(&mut self, folder: &str, read_only: bool) -> Result<MailboxStatus> {
        let mbox = self.safe_call(
            |sess| {
                if read_only {
                    sess.examine(folder)
                } else {
                    sess.select(folder)
                }
            },
            |err| Error::SelectMboxError(err, folder.to_owned()),
        )?;

        Ok(MailboxStatus {
            messages: mbox.exists,
        })
    }

    /// Searches the selected mailbox, returning matching UIDs in
    /// ascending order.
    pub fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let uids = self.safe_call(|sess| sess.uid_search(query), Error::SearchError)?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Scans a folder and returns the set of its Message-IDs. Messages
    /// without one are skipped: they cannot be deduplicated safely.
    pub fn fetch_message_ids(&mut self, folder: &str) -> Result<HashSet<String>> {
        debug!("[{}] scanning folder {}", self.label(), folder);

        let fetches = self.safe_call(
            |sess| {
                let mbox = sess.examine(folder)?;
                if mbox.exists == 0 {
                    return Ok(None);
                }
                sess.fetch(format!("1:{}", mbox.exists), "(ENVELOPE)")
                    .map(Some)
            },
            |err| Error::FetchEnvelopesError(err, folder.to_owned()),
        )?;

        let mut ids = HashSet::new();
        if let Some(fetches) = fetches {
            for fetch in fetches.iter() {
                let id = fetch
                    .envelope()
                    .and_then(|envelope| envelope.message_id.as_ref())
                    .and_then(|id| strip_message_id(id));
                if let Some(id) = id {
                    ids.insert(id);
                }
            }
        }

        debug!(
            "[{}] found {} message ids in {}",
            self.label(),
            ids.len(),
            folder
        );
        Ok(ids)
    }

    /// Scans a folder and returns lightweight metadata for every
    /// message, without bodies.
    pub fn fetch_envelopes(&mut self, folder: &str) -> Result<Vec<MessageRef>> {
        let fetches = self.safe_call(
            |sess| {
                let mbox = sess.examine(folder)?;
                if mbox.exists == 0 {
                    return Ok(None);
                }
                sess.fetch(
                    format!("1:{}", mbox.exists),
                    "(UID ENVELOPE RFC822.SIZE)",
                )
                .map(Some)
            },
            |err| Error::FetchEnvelopesError(err, folder.to_owned()),
        )?;

        let mut messages = Vec::new();
        if let Some(fetches) = fetches {
            for fetch in fetches.iter() {
                if let Some(message) = MessageRef::from_fetch(fetch) {
                    messages.push(message);
                }
            }
        }
        Ok(messages)
    }

    /// Materializes the messages whose Message-ID belongs to the
    /// target set, in two passes: envelopes first to resolve UIDs,
    /// then bodies by UID for exactly the matching subset.
    pub fn fetch_messages_by_ids(
        &mut self,
        folder: &str,
        target_ids: &HashSet<String>,
        cancel: &CancelToken,
        tracker: Option<&dyn ProgressTracker>,
    ) -> Result<Vec<MessageRef>> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "[{}] fetching {} specific messages from {}",
            self.label(),
            target_ids.len(),
            folder
        );

        // first pass: resolve the UIDs of the wanted messages
        let fetches = self.safe_call(
            |sess| {
                let mbox = sess.examine(folder)?;
                if mbox.exists == 0 {
                    return Ok(None);
                }
                sess.fetch(format!("1:{}", mbox.exists), "(UID ENVELOPE)")
                    .map(Some)
            },
            |err| Error::FetchEnvelopesError(err, folder.to_owned()),
        )?;

        let mut target_uids = Vec::new();
        if let Some(fetches) = fetches {
            for fetch in fetches.iter() {
                let id = fetch
                    .envelope()
                    .and_then(|envelope| envelope.message_id.as_ref())
                    .and_then(|id| strip_message_id(id));
                if let (Some(uid), Some(id)) = (fetch.uid, id) {
                    if target_ids.contains(&id) {
                        target_uids.push(uid);
                    }
                }
            }
        }

        if target_uids.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "[{}] found {} messages to fetch from {}",
            self.label(),
            target_uids.len(),
            folder
        );

        // second pass: bodies for the matching UIDs only
        let mut messages = Vec::with_capacity(target_uids.len());
        for batch in target_uids.chunks(BODY_FETCH_BATCH_SIZE) {
            cancel.check()?;

            let uid_set = batch
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");

            let fetches = self.safe_call(
                |sess| {
                    sess.examine(folder)?;
                    sess.uid_fetch(&uid_set, "(UID ENVELOPE RFC822 RFC822.SIZE)")
                },
                |err| Error::FetchBodiesError(err, folder.to_owned()),
            )?;

            for fetch in fetches.iter() {
                if let Some(message) = MessageRef::from_fetch(fetch) {
                    messages.push(message);
                }
            }

            if let Some(tracker) = tracker {
                tracker.update_message(&format!(
                    "[{}] fetching from {} ({}/{})",
                    self.label(),
                    folder,
                    messages.len(),
                    target_uids.len()
                ));
            }
        }

        Ok(messages)
    }

    /// Uploads one message with the `\Seen` flag, dating it with the
    /// message's envelope date.
    pub fn append(&mut self, folder: &str, message: &MessageRef) -> Result<()> {
        let body = message
            .raw
            .as_deref()
            .ok_or_else(|| Error::AppendEmptyBodyError(message.message_id.clone()))?;

        let flags = [Flag::Seen];
        self.safe_call(
            |sess| sess.append_with_flags_and_date(folder, body, &flags, message.date),
            |err| Error::AppendMsgError(err, folder.to_owned()),
        )?;

        trace!(
            "[{}] message {:?} appended to {}",
            self.label(),
            message.message_id,
            folder
        );
        Ok(())
    }

    /// Ensures the mailbox and all its ancestors exist. Returns `true`
    /// when the mailbox itself had to be created, `false` when it was
    /// already there.
    ///
    /// Creation is serialized through the process-wide per-path lock
    /// map, so any single fully-qualified path is CREATEd at most once
    /// per run even when plans share ancestor folders.
    pub fn create_mailbox(&mut self, name: &str) -> Result<bool> {
        let lock = folder_lock(name);
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());

        if self.mailbox_exists(name)? {
            return Ok(false);
        }

        let delimiter = self.delimiter.clone();
        if !delimiter.is_empty() && name.contains(&delimiter) {
            self.create_parent_folders(name, &delimiter)?;
        }

        self.safe_call(
            |sess| sess.create(name),
            |err| Error::CreateMboxError(err, name.to_owned()),
        )?;

        Ok(true)
    }

    fn mailbox_exists(&mut self, name: &str) -> Result<bool> {
        let names = self.safe_call(
            |sess| sess.list(Some(""), Some(name)),
            |err| Error::CheckMboxExistsError(err, name.to_owned()),
        )?;
        Ok(!names.is_empty())
    }

    fn create_parent_folders(&mut self, name: &str, delimiter: &str) -> Result<()> {
        let parts: Vec<&str> = name.split(delimiter).collect();

        for depth in 1..parts.len() {
            let parent = parts[..depth].join(delimiter);

            let lock = folder_lock(&parent);
            let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());

            if !self.mailbox_exists(&parent)? {
                debug!("[{}] creating parent folder {}", self.label(), parent);
                self.safe_call(
                    |sess| sess.create(&parent),
                    |err| Error::CreateMboxError(err, parent.clone()),
                )?;
            }
        }

        Ok(())
    }

    /// Lists the subfolders of the given folder, excluding the folder
    /// itself.
    pub fn list_subfolders(&mut self, parent: &str) -> Result<Vec<String>> {
        let pattern = if self.delimiter.is_empty() {
            format!("{}/*", parent)
        } else {
            format!("{}{}*", parent, self.delimiter)
        };

        let names = self.safe_call(
            |sess| sess.list(Some(""), Some(pattern.as_str())),
            |err| Error::ListSubfoldersError(err, parent.to_owned()),
        )?;

        Ok(names
            .iter()
            .map(|name| name.name().to_owned())
            .filter(|name| name != parent)
            .collect())
    }

    /// Lists every mailbox with best-effort statistics: message counts
    /// come from STATUS, sizes from summing RFC822.SIZE. Folders the
    /// server refuses to report on keep zero counts.
    pub fn list_mailboxes(
        &mut self,
        tracker: Option<&dyn ProgressTracker>,
    ) -> Result<Vec<MailboxInfo>> {
        debug!("[{}] listing mailboxes", self.label());

        let names = self.safe_call(|sess| sess.list(Some(""), Some("*")), Error::ListMboxesError)?;

        let mut mailboxes: Vec<MailboxInfo> = names
            .iter()
            .map(|name| MailboxInfo {
                name: name.name().to_owned(),
                ..MailboxInfo::default()
            })
            .collect();

        if let Some(tracker) = tracker {
            tracker.update_total(mailboxes.len() as u64);
        }

        let total = mailboxes.len();
        for (index, mailbox) in mailboxes.iter_mut().enumerate() {
            if let Some(tracker) = tracker {
                tracker.update_message(&format!(
                    "[{}] {}/{} {}",
                    self.creds.label,
                    index + 1,
                    total,
                    mailbox.name
                ));
            }

            let status = self.safe_call(
                |sess| sess.status(&mailbox.name, "(MESSAGES)"),
                |err| Error::SelectMboxError(err, mailbox.name.clone()),
            );
            let status = match status {
                Ok(status) => status,
                Err(err) => {
                    debug!("cannot get status of mailbox {}: {}", mailbox.name, err);
                    if let Some(tracker) = tracker {
                        tracker.increment(1);
                    }
                    continue;
                }
            };

            mailbox.messages = status.exists;
            if status.exists > 0 {
                if let Ok(size) = self.folder_size(&mailbox.name) {
                    mailbox.size = size;
                }
            }

            if let Some(tracker) = tracker {
                tracker.increment(1);
            }
        }

        if let Some(tracker) = tracker {
            tracker.update_message(&format!(
                "[{}] done ({} mailboxes)",
                self.creds.label, total
            ));
        }

        Ok(mailboxes)
    }

    fn folder_size(&mut self, folder: &str) -> Result<u64> {
        let fetches = self.safe_call(
            |sess| {
                let mbox = sess.examine(folder)?;
                if mbox.exists == 0 {
                    return Ok(None);
                }
                sess.fetch(format!("1:{}", mbox.exists), "(RFC822.SIZE)")
                    .map(Some)
            },
            |err| Error::FetchEnvelopesError(err, folder.to_owned()),
        )?;

        Ok(fetches
            .map(|fetches| {
                fetches
                    .iter()
                    .map(|fetch| u64::from(fetch.size.unwrap_or(0)))
                    .sum()
            })
            .unwrap_or(0))
    }

    /// Best-effort logout. The session cannot be used afterwards.
    pub fn logout(&mut self) -> Result<()> {
        if let Some(mut sess) = self.sess.take() {
            trace!("[{}] logging out", self.label());
            sess.logout().map_err(Error::LogoutError)?;
        }
        Ok(())
    }
}

/// Transport-class failures warrant a reconnect attempt; protocol
/// failures do not.
fn is_transport_error(err: &imap::Error) -> bool {
    matches!(err, imap::Error::Io(_) | imap::Error::ConnectionLost)
}

/// Time still to wait before the next reconnection is allowed, if any.
fn remaining_wait(
    last_reconnect: Option<Instant>,
    now: Instant,
    interval: Duration,
) -> Option<Duration> {
    let elapsed = now.checked_duration_since(last_reconnect?)?;
    if elapsed < interval {
        Some(interval - elapsed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{is_transport_error, remaining_wait};

    #[test]
    fn transport_errors_trigger_reconnect() {
        let err = imap::Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "peer closed",
        ));
        assert!(is_transport_error(&err));
        assert!(is_transport_error(&imap::Error::ConnectionLost));
    }

    #[test]
    fn protocol_errors_are_not_retried() {
        assert!(!is_transport_error(&imap::Error::No(String::from(
            "NO mailbox does not exist"
        ))));
        assert!(!is_transport_error(&imap::Error::Bad(String::from(
            "BAD invalid command"
        ))));
    }

    #[test]
    fn remaining_wait_respects_interval() {
        let now = Instant::now();
        let interval = Duration::from_secs(10);

        // never reconnected: no wait
        assert_eq!(None, remaining_wait(None, now, interval));

        // reconnected 3s ago: wait the remaining 7s
        let last = now - Duration::from_secs(3);
        assert_eq!(
            Some(Duration::from_secs(7)),
            remaining_wait(Some(last), now, interval)
        );

        // reconnected long ago: no wait
        let last = now - Duration::from_secs(60);
        assert_eq!(None, remaining_wait(Some(last), now, interval));
    }
}
