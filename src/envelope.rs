//! Envelope module.
//!
//! This module contains [`MessageRef`], the lightweight view of a
//! message used for planning and uploading, and its conversion from
//! the raw FETCH results returned by the `imap` crate.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use imap::types::Fetch;

/// Reference to a single message in a mailbox.
///
/// The Message-ID is the deduplication key: two messages carrying the
/// same bracket-stripped Message-ID are considered the same message
/// regardless of UID, subject or date. `raw` is only present after a
/// body fetch.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MessageRef {
    /// Server-assigned UID, when the fetch requested it.
    pub uid: Option<u32>,
    /// Bracket-stripped Message-ID header, empty when the message has
    /// none.
    pub message_id: String,
    /// Decoded subject line.
    pub subject: String,
    /// Envelope date, used as the INTERNALDATE on upload.
    pub date: Option<DateTime<FixedOffset>>,
    /// RFC822.SIZE as reported by the server, zero when not fetched.
    pub size: u32,
    /// Full RFC 2822 content, present only after a body fetch.
    pub raw: Option<Vec<u8>>,
}

impl MessageRef {
    /// Builds a reference from a raw FETCH result. Returns `None` when
    /// the server sent no envelope for this message.
    pub fn from_fetch(fetch: &Fetch) -> Option<Self> {
        let envelope = fetch.envelope()?;

        let message_id = envelope
            .message_id
            .as_ref()
            .and_then(|id| strip_message_id(id))
            .unwrap_or_default();

        let subject = envelope
            .subject
            .as_ref()
            .map(|subject| decode_header(subject))
            .unwrap_or_default();

        let date = envelope.date.as_ref().and_then(|date| parse_date(date));

        Some(Self {
            uid: fetch.uid,
            message_id,
            subject,
            date,
            size: fetch.size.unwrap_or(0),
            raw: fetch.body().map(<[u8]>::to_vec),
        })
    }
}

/// Extracts the inner Message-ID token: surrounding angle brackets are
/// stripped, everything else is preserved literally. Returns `None`
/// for empty tokens, which cannot be deduplicated safely.
pub(crate) fn strip_message_id(raw: &[u8]) -> Option<String> {
    let id = String::from_utf8_lossy(raw);
    let id = id.trim_matches(|c| c == '<' || c == '>');
    if id.is_empty() {
        None
    } else {
        Some(id.to_owned())
    }
}

fn decode_header(raw: &[u8]) -> String {
    rfc2047_decoder::decode(raw)
        .unwrap_or_else(|_| String::from_utf8_lossy(raw).into_owned())
}

fn parse_date(raw: &[u8]) -> Option<DateTime<FixedOffset>> {
    let raw = std::str::from_utf8(raw).ok()?;
    let timestamp = mailparse::dateparse(raw).ok()?;
    Utc.timestamp_opt(timestamp, 0).single().map(Into::into)
}

#[cfg(test)]
mod tests {
    use super::{decode_header, parse_date, strip_message_id};

    #[test]
    fn strip_message_id_removes_brackets() {
        assert_eq!(
            Some(String::from("id@example.com")),
            strip_message_id(b"<id@example.com>")
        );
        assert_eq!(
            Some(String::from("id@example.com")),
            strip_message_id(b"id@example.com")
        );
    }

    #[test]
    fn strip_message_id_preserves_inner_content() {
        // whitespace inside the token is part of the key
        assert_eq!(
            Some(String::from(" id@example.com ")),
            strip_message_id(b"< id@example.com >")
        );
    }

    #[test]
    fn strip_message_id_rejects_empty_tokens() {
        assert_eq!(None, strip_message_id(b""));
        assert_eq!(None, strip_message_id(b"<>"));
        assert_eq!(None, strip_message_id(b"<<>>"));
    }

    #[test]
    fn decode_header_decodes_encoded_words() {
        assert_eq!("hello", decode_header(b"=?ISO-8859-1?Q?hello?="));
        assert_eq!("plain subject", decode_header(b"plain subject"));
    }

    #[test]
    fn parse_date_reads_rfc2822() {
        let date = parse_date(b"Tue, 1 Jul 2003 10:52:37 +0200").unwrap();
        assert_eq!(1057049557, date.timestamp());

        assert_eq!(None, parse_date(b"not a date"));
    }
}
