//! Mailbox reader: the IMAP collaborator behind every read and flag tool
//!
//! [`MailboxReader`] is the seam the thread resolver, reply composer and tool
//! handlers depend on. [`ImapMailbox`] implements it with one fresh IMAP
//! connection per call: connect, select the configured mailbox, run the
//! command, log out. Nothing is pooled or shared between calls, so
//! concurrent calls never contend.

use std::future::Future;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::headers;
use crate::imap::{self, ImapSession};
use crate::mime::{self, ParsedMessage};
use crate::models::{FlagState, Message, MessageFlag};

/// Full RFC822 source of one message plus its IMAP metadata
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub source: Vec<u8>,
    pub flags: FlagState,
    pub internal_date: Option<i64>,
}

impl RawMessage {
    /// Decode with `mime`
    pub fn parse(&self) -> AppResult<ParsedMessage> {
        mime::parse_message(&self.source)
    }

    /// Decode into a [`Message`] with body, threading headers and attachments
    pub fn to_message(&self) -> AppResult<Message> {
        let parsed = self.parse()?;
        Ok(Message::from_parsed(
            self.uid,
            parsed,
            self.flags,
            self.internal_date,
        ))
    }
}

/// Header block of one message plus its IMAP metadata
#[derive(Debug, Clone)]
pub struct RawHeaders {
    pub uid: u32,
    pub header: Vec<u8>,
    pub flags: FlagState,
    pub internal_date: Option<i64>,
}

impl RawHeaders {
    /// Fold the header block into a header-only [`Message`]
    pub fn to_message(&self) -> Message {
        let map = headers::parse_header_bytes(&self.header);
        Message::from_headers(self.uid, &map, self.flags, self.internal_date)
    }
}

/// Read and flag operations on the configured mailbox
///
/// Methods return `Send` futures so callers can fan out over them from
/// multi-threaded tool handlers.
pub trait MailboxReader: Send + Sync {
    /// Header-only snapshots of the `count` highest UIDs
    fn list_recent(&self, count: usize)
    -> impl Future<Output = AppResult<Vec<RawHeaders>>> + Send;

    /// UIDs matching an IMAP SEARCH query, newest first
    fn search(&self, criteria: &str) -> impl Future<Output = AppResult<Vec<u32>>> + Send;

    /// Header-only snapshots for the given UIDs
    fn fetch_headers(&self, uids: &[u32])
    -> impl Future<Output = AppResult<Vec<RawHeaders>>> + Send;

    /// Full sources for the given UIDs; missing UIDs are omitted
    fn fetch_full(&self, uids: &[u32]) -> impl Future<Output = AppResult<Vec<RawMessage>>> + Send;

    /// Set or clear one flag
    fn set_flag(
        &self,
        uid: u32,
        flag: MessageFlag,
        enabled: bool,
    ) -> impl Future<Output = AppResult<()>> + Send;
}

/// [`MailboxReader`] over a live IMAP server
#[derive(Debug, Clone)]
pub struct ImapMailbox {
    config: Arc<ServerConfig>,
}

impl ImapMailbox {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Connect and EXAMINE the configured mailbox
    async fn open_readonly(&self) -> AppResult<ImapSession> {
        let mut session = imap::connect_authenticated(&self.config).await?;
        if let Err(e) =
            imap::select_mailbox_readonly(&self.config, &mut session, &self.config.mailbox).await
        {
            imap::logout(&self.config, session).await;
            return Err(e);
        }
        Ok(session)
    }

    /// Connect and SELECT the configured mailbox
    async fn open_readwrite(&self) -> AppResult<ImapSession> {
        let mut session = imap::connect_authenticated(&self.config).await?;
        if let Err(e) =
            imap::select_mailbox_readwrite(&self.config, &mut session, &self.config.mailbox).await
        {
            imap::logout(&self.config, session).await;
            return Err(e);
        }
        Ok(session)
    }

    async fn fetch_header_snapshots(
        &self,
        session: &mut ImapSession,
        uids: &[u32],
    ) -> AppResult<Vec<RawHeaders>> {
        let query = format!(
            "UID FLAGS INTERNALDATE BODY.PEEK[HEADER.FIELDS ({})]",
            imap::SUMMARY_HEADER_FIELDS
        );
        let fetches = imap::uid_fetch(&self.config, session, uids, &query).await?;
        let mut out = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                continue;
            };
            let header = fetch
                .header()
                .or_else(|| fetch.body())
                .or_else(|| fetch.text())
                .unwrap_or_default()
                .to_vec();
            out.push(RawHeaders {
                uid,
                header,
                flags: imap::flag_state(fetch),
                internal_date: imap::internal_date(fetch),
            });
        }
        Ok(out)
    }
}

impl MailboxReader for ImapMailbox {
    async fn list_recent(&self, count: usize) -> AppResult<Vec<RawHeaders>> {
        let mut session = self.open_readonly().await?;
        let result = async {
            let uids = imap::uid_search(&self.config, &mut session, "ALL").await?;
            let newest: Vec<u32> = uids.into_iter().take(count).collect();
            self.fetch_header_snapshots(&mut session, &newest).await
        }
        .await;
        imap::logout(&self.config, session).await;
        result
    }

    async fn search(&self, criteria: &str) -> AppResult<Vec<u32>> {
        let mut session = self.open_readonly().await?;
        let result = imap::uid_search(&self.config, &mut session, criteria).await;
        imap::logout(&self.config, session).await;
        result
    }

    async fn fetch_headers(&self, uids: &[u32]) -> AppResult<Vec<RawHeaders>> {
        let mut session = self.open_readonly().await?;
        let result = self.fetch_header_snapshots(&mut session, uids).await;
        imap::logout(&self.config, session).await;
        result
    }

    async fn fetch_full(&self, uids: &[u32]) -> AppResult<Vec<RawMessage>> {
        let mut session = self.open_readonly().await?;
        let result =
            imap::uid_fetch(&self.config, &mut session, uids, "UID FLAGS INTERNALDATE BODY.PEEK[]")
                .await;
        imap::logout(&self.config, session).await;

        let mut out = Vec::new();
        for fetch in result? {
            let Some(uid) = fetch.uid else {
                continue;
            };
            let Some(source) = fetch.body() else {
                tracing::warn!(uid, "fetch returned no message body");
                continue;
            };
            out.push(RawMessage {
                uid,
                source: source.to_vec(),
                flags: imap::flag_state(&fetch),
                internal_date: imap::internal_date(&fetch),
            });
        }
        Ok(out)
    }

    async fn set_flag(&self, uid: u32, flag: MessageFlag, enabled: bool) -> AppResult<()> {
        let mut session = self.open_readwrite().await?;
        let result = async {
            let present = imap::uid_fetch(&self.config, &mut session, &[uid], "UID FLAGS").await?;
            if !present.iter().any(|f| f.uid == Some(uid)) {
                return Err(AppError::NotFound(format!("message uid {uid} not found")));
            }
            let op = if enabled { "+FLAGS.SILENT" } else { "-FLAGS.SILENT" };
            imap::uid_store(
                &self.config,
                &mut session,
                uid,
                &format!("{op} ({})", flag.imap_atom()),
            )
            .await
        }
        .await;
        imap::logout(&self.config, session).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::{RawHeaders, RawMessage};
    use crate::models::FlagState;

    #[test]
    fn raw_headers_become_header_only_message() {
        let raw = RawHeaders {
            uid: 12,
            header: b"From: Jane <jane@x>\r\nSubject: Plans\r\nMessage-ID: <p@x>\r\n\r\n".to_vec(),
            flags: FlagState {
                is_read: false,
                is_starred: true,
            },
            internal_date: Some(100),
        };
        let msg = raw.to_message();
        assert_eq!(msg.id, "12");
        assert_eq!(msg.subject, "Plans");
        assert_eq!(msg.from, "Jane <jane@x>");
        assert!(msg.is_starred);
        assert!(msg.body.is_none());
        assert_eq!(msg.message_id.as_deref(), Some("<p@x>"));
    }

    #[test]
    fn raw_message_decodes_body() {
        let raw = RawMessage {
            uid: 5,
            source: b"Subject: Hi\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\nHello".to_vec(),
            flags: FlagState::default(),
            internal_date: None,
        };
        let msg = raw.to_message().expect("decodes");
        assert_eq!(msg.body.as_deref(), Some("Hello"));
        assert_eq!(msg.snippet, "Hello");
    }
}
