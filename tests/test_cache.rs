use std::{env::temp_dir, fs};

use imap_mirror::{
    cache::CacheManager,
    config::Credentials,
    folder::MailboxInfo,
    envelope::MessageRef,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn credentials(server: &str, user: &str, pass: &str) -> Credentials {
    Credentials {
        server: server.to_owned(),
        user: user.to_owned(),
        pass: pass.to_owned(),
        ..Credentials::default()
    }
}

fn message(id: &str, uid: u32, size: u32) -> MessageRef {
    MessageRef {
        uid: Some(uid),
        message_id: id.to_owned(),
        subject: format!("subject of {}", id),
        date: None,
        size,
        raw: None,
    }
}

#[test]
fn test_cache_round_trip() {
    init();
    let dir = temp_dir().join("imap-mirror-cache-tests/round-trip");
    if dir.is_dir() {
        fs::remove_dir_all(&dir).unwrap();
    }

    let src = credentials("imap.a.example:993", "a", "pa");
    let dst = credentials("imap.b.example:993", "b", "pb");

    let mut cache = CacheManager::with_dir(&dir, &src, &dst).unwrap();
    cache.source.update_mailbox(
        "INBOX",
        &[message("m1@example.com", 1, 100), message("m2@example.com", 2, 50)],
    );
    cache.destination.update_info(&MailboxInfo {
        name: String::from("INBOX"),
        messages: 1,
        size: 100,
    });
    cache.save().unwrap();

    // the file on disk is encrypted, not plain JSON
    let raw = fs::read(cache.path()).unwrap();
    assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());

    let mut reloaded = CacheManager::with_dir(&dir, &src, &dst).unwrap();
    reloaded.load().unwrap();

    assert!(reloaded.source.has_message("INBOX", "m1@example.com"));
    assert!(reloaded.source.has_message("INBOX", "m2@example.com"));
    assert_eq!(
        2,
        reloaded.source.get_mailbox("INBOX").unwrap().message_count
    );
    assert_eq!(150, reloaded.source.get_mailbox("INBOX").unwrap().total_size);

    let summaries = reloaded.destination.mailbox_summaries();
    assert_eq!(1, summaries.len());
    assert_eq!("INBOX", summaries[0].name);
    assert_eq!(1, summaries[0].messages);
}

#[test]
fn test_cache_load_missing_file_is_empty() {
    init();
    let dir = temp_dir().join("imap-mirror-cache-tests/missing");
    if dir.is_dir() {
        fs::remove_dir_all(&dir).unwrap();
    }

    let src = credentials("imap.a.example:993", "a", "pa");
    let dst = credentials("imap.b.example:993", "b", "pb");

    let mut cache = CacheManager::with_dir(&dir, &src, &dst).unwrap();
    cache.load().unwrap();

    assert!(cache.source.mailboxes.is_empty());
    assert!(cache.destination.mailboxes.is_empty());
}

#[test]
fn test_cache_rejects_foreign_credentials() {
    init();
    let dir = temp_dir().join("imap-mirror-cache-tests/foreign");
    if dir.is_dir() {
        fs::remove_dir_all(&dir).unwrap();
    }

    let src = credentials("imap.a.example:993", "a", "pa");
    let dst = credentials("imap.b.example:993", "b", "pb");

    let mut cache = CacheManager::with_dir(&dir, &src, &dst).unwrap();
    cache
        .source
        .update_mailbox("INBOX", &[message("m1@example.com", 1, 10)]);
    cache.save().unwrap();

    // same account pair, different password: the key no longer matches
    let wrong = credentials("imap.a.example:993", "a", "other");
    let mut foreign = CacheManager::with_dir(&dir, &wrong, &dst).unwrap();
    assert!(foreign.load().is_err());
}

#[test]
fn test_cache_clear_removes_file() {
    init();
    let dir = temp_dir().join("imap-mirror-cache-tests/clear");
    if dir.is_dir() {
        fs::remove_dir_all(&dir).unwrap();
    }

    let src = credentials("imap.a.example:993", "a", "pa");
    let dst = credentials("imap.b.example:993", "b", "pb");

    let mut cache = CacheManager::with_dir(&dir, &src, &dst).unwrap();
    cache
        .source
        .update_mailbox("INBOX", &[message("m1@example.com", 1, 10)]);
    cache.save().unwrap();
    assert!(cache.path().is_file());

    cache.clear().unwrap();
    assert!(!cache.path().is_file());
    assert!(cache.source.mailboxes.is_empty());

    // clearing an already-missing file is fine
    cache.clear().unwrap();
}
