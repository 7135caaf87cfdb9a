//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::headers::HeaderMap;
use crate::message_id;
use crate::mime::{self, DEFAULT_CONTENT_TYPE, ParsedAttachment, ParsedMessage};

/// Metadata included in all tool responses
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// IMAP flag state of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FlagState {
    /// `\Seen` is set
    pub is_read: bool,
    /// `\Flagged` is set (Gmail shows this as a star)
    pub is_starred: bool,
}

/// Flags a caller may toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageFlag {
    /// IMAP `\Seen`
    Read,
    /// IMAP `\Flagged`
    Starred,
}

impl MessageFlag {
    /// IMAP system flag atom
    pub fn imap_atom(self) -> &'static str {
        match self {
            Self::Read => "\\Seen",
            Self::Starred => "\\Flagged",
        }
    }
}

/// Attachment metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentDescriptor {
    /// Position among the message's attachments; stable only within one fetch
    pub index: usize,
    /// Filename, or `attachment_<index>` when the part declares none
    pub filename: String,
    /// MIME content type, `application/octet-stream` when undeclared
    pub content_type: String,
    /// Decoded size in bytes
    pub size_bytes: usize,
}

impl AttachmentDescriptor {
    pub fn from_parsed(part: &ParsedAttachment) -> Self {
        Self {
            index: part.index,
            filename: part
                .filename
                .clone()
                .unwrap_or_else(|| format!("attachment_{}", part.index)),
            content_type: if part.content_type.is_empty() {
                DEFAULT_CONTENT_TYPE.to_owned()
            } else {
                part.content_type.clone()
            },
            size_bytes: part.content.len(),
        }
    }
}

/// Attachment metadata plus base64 content
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentPayload {
    /// Position among the message's attachments
    pub index: usize,
    /// Filename (see [`AttachmentDescriptor::filename`])
    pub filename: String,
    /// MIME content type
    pub content_type: String,
    /// Decoded size in bytes
    pub size_bytes: usize,
    /// Standard base64 of the decoded content
    pub content_base64: String,
}

/// Email message
///
/// Header-only listings leave `body` and `body_html` absent; a fetched message
/// with an empty text part has `body` present and empty.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    /// Mailbox-local UID as a decimal string
    pub id: String,
    /// Conversation identifier; defaults to `id`
    pub thread_id: String,
    /// Decoded Subject
    pub subject: String,
    /// Decoded From header as written by the sender
    pub from: String,
    /// Recipient addresses in header order
    pub to: Vec<String>,
    /// Cc addresses, if the header is present
    pub cc: Option<Vec<String>>,
    /// Raw Date header
    pub date: Option<String>,
    /// Unix seconds from Date, falling back to INTERNALDATE, else 0
    pub timestamp: i64,
    /// Short preview text
    pub snippet: String,
    /// Plain text body, when fetched
    pub body: Option<String>,
    /// Sanitized HTML body, when fetched and requested
    pub body_html: Option<String>,
    /// `\Seen` is set
    pub is_read: bool,
    /// `\Flagged` is set
    pub is_starred: bool,
    /// True iff `attachments` is non-empty
    pub has_attachments: bool,
    /// Attachment metadata in MIME order
    pub attachments: Vec<AttachmentDescriptor>,
    /// `Message-ID` token
    pub message_id: Option<String>,
    /// `In-Reply-To` token
    pub in_reply_to: Option<String>,
    /// `References` tokens
    pub references: Option<Vec<String>>,
}

impl Message {
    /// Build a message from a full RFC822 parse
    pub fn from_parsed(
        uid: u32,
        parsed: ParsedMessage,
        flags: FlagState,
        internal_date: Option<i64>,
    ) -> Self {
        let attachments: Vec<AttachmentDescriptor> = parsed
            .attachments
            .iter()
            .map(AttachmentDescriptor::from_parsed)
            .collect();
        let body = parsed.body_text.unwrap_or_default();
        let subject = parsed.subject.unwrap_or_default();
        let snippet = if body.trim().is_empty() {
            mime::snippet(&subject)
        } else {
            mime::snippet(&body)
        };

        Self {
            id: uid.to_string(),
            thread_id: uid.to_string(),
            timestamp: timestamp_of(parsed.date.as_deref(), internal_date),
            subject,
            from: parsed.from.unwrap_or_default(),
            to: parsed
                .to
                .as_deref()
                .map(mime::address_list)
                .unwrap_or_default(),
            cc: parsed.cc.as_deref().map(mime::address_list),
            date: parsed.date,
            snippet,
            body: Some(body),
            body_html: parsed.body_html_sanitized,
            is_read: flags.is_read,
            is_starred: flags.is_starred,
            has_attachments: !attachments.is_empty(),
            attachments,
            message_id: parsed.message_id,
            in_reply_to: parsed.in_reply_to,
            references: parsed.references,
        }
    }

    /// Build a header-only message from a folded header block
    pub fn from_headers(
        uid: u32,
        headers: &HeaderMap,
        flags: FlagState,
        internal_date: Option<i64>,
    ) -> Self {
        let subject = headers.decoded("subject").unwrap_or_default();
        let date = headers.get("date").map(str::to_owned);
        Self {
            id: uid.to_string(),
            thread_id: uid.to_string(),
            timestamp: timestamp_of(date.as_deref(), internal_date),
            snippet: mime::snippet(&subject),
            subject,
            from: headers.decoded("from").unwrap_or_default(),
            to: headers
                .decoded("to")
                .map(|v| mime::address_list(&v))
                .unwrap_or_default(),
            cc: headers.decoded("cc").map(|v| mime::address_list(&v)),
            date,
            body: None,
            body_html: None,
            is_read: flags.is_read,
            is_starred: flags.is_starred,
            has_attachments: false,
            attachments: Vec::new(),
            message_id: headers.get("message-id").and_then(message_id::first_token),
            in_reply_to: headers.get("in-reply-to").and_then(message_id::first_token),
            references: headers.get("references").map(message_id::extract_tokens),
        }
    }
}

/// Parse a Date header to Unix seconds, falling back to the server's
/// INTERNALDATE and finally to 0
fn timestamp_of(date: Option<&str>, internal_date: Option<i64>) -> i64 {
    date.and_then(mime::parse_date)
        .or(internal_date)
        .unwrap_or(0)
}

/// Newest first; used by listing and search
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Resolved conversation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThreadResult {
    /// The message ID the resolution started from
    pub thread_id: String,
    /// Messages sorted oldest first
    pub messages: Vec<Message>,
    /// Number of messages
    pub count: usize,
}

impl ThreadResult {
    pub fn new(thread_id: impl Into<String>, messages: Vec<Message>) -> Self {
        let thread_id = thread_id.into();
        let messages: Vec<Message> = messages
            .into_iter()
            .map(|mut m| {
                m.thread_id = thread_id.clone();
                m
            })
            .collect();
        Self {
            count: messages.len(),
            thread_id,
            messages,
        }
    }

    /// No message could be fetched for the requested ID
    pub fn empty(thread_id: impl Into<String>) -> Self {
        Self::new(thread_id, Vec::new())
    }
}

/// Reply request handed to the reply composer
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    /// Mailbox-local UID of the message being answered
    pub uid: u32,
    /// Reply text written by the caller
    pub body: String,
    /// Append a quoted copy of the original
    pub include_quote: bool,
}

/// Message handed to the mail sender
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Token for the `In-Reply-To` header
    pub in_reply_to: Option<String>,
    /// Tokens for the `References` header, oldest first
    pub references: Vec<String>,
}

/// Outcome of a send or reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeliveryResult {
    /// Whether the server accepted the message
    pub success: bool,
    /// Message-ID assigned to the outgoing mail; empty on failure
    pub message_id: String,
    /// Human-readable status
    pub message: String,
}

impl DeliveryResult {
    pub fn sent(message_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: message_id.into(),
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: String::new(),
            message: message.into(),
        }
    }
}

/// Flag update result
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlagUpdate {
    /// Mailbox-local UID
    pub message_id: String,
    /// Flag that was changed
    pub flag: MessageFlag,
    /// Requested state
    pub enabled: bool,
}

/// Input: list most recent messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListMessagesInput {
    /// Number of messages to return (1..100, default 10)
    #[serde(default = "default_count")]
    pub count: usize,
}

/// Input: search messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchMessagesInput {
    /// Full-text search query
    pub query: Option<String>,
    /// Filter by From header
    pub from: Option<String>,
    /// Filter by To header
    pub to: Option<String>,
    /// Filter by Subject header
    pub subject: Option<String>,
    /// Filter to unread messages only
    pub unread_only: Option<bool>,
    /// Messages on or after this date (YYYY-MM-DD)
    pub since: Option<String>,
    /// Messages on or before this date (YYYY-MM-DD)
    pub before: Option<String>,
    /// Maximum messages to return (1..50, default 10)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Input: get one message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetMessageInput {
    /// Mailbox-local message ID
    pub message_id: String,
    /// Include sanitized HTML body
    #[serde(default)]
    pub include_html: bool,
}

/// Input: resolve the conversation of a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetThreadInput {
    /// Mailbox-local message ID of any message in the conversation
    pub message_id: String,
}

/// Input: send a new email
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    /// Recipient addresses
    pub to: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
    /// Cc addresses
    pub cc: Option<Vec<String>>,
    /// Bcc addresses
    pub bcc: Option<Vec<String>>,
}

/// Input: reply to a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReplyInput {
    /// Mailbox-local message ID being answered
    pub message_id: String,
    /// Reply text (1..100000 characters)
    pub body: String,
    /// Append a quoted copy of the original (default true)
    #[serde(default = "default_true")]
    pub include_quote: bool,
}

/// Input: set or clear a flag
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetFlagInput {
    /// Mailbox-local message ID
    pub message_id: String,
    /// Flag to change
    pub flag: MessageFlag,
    /// `true` sets the flag, `false` clears it
    pub enabled: bool,
}

/// Input: download one attachment
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DownloadAttachmentInput {
    /// Mailbox-local message ID
    pub message_id: String,
    /// Attachment index as reported in `attachments`
    pub attachment_index: usize,
    /// Reject attachments larger than this many bytes (default 10 MiB)
    #[serde(default = "default_attachment_max_bytes")]
    pub max_bytes: usize,
}

/// Default value for `bool` fields (true)
fn default_true() -> bool {
    true
}

/// Default value for `count` in list_messages
fn default_count() -> usize {
    10
}

/// Default value for `limit` in search
fn default_limit() -> usize {
    10
}

/// Default attachment byte cap (10 MiB)
fn default_attachment_max_bytes() -> usize {
    10 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::{
        AttachmentDescriptor, DeliveryResult, FlagState, Message, ThreadResult, sort_newest_first,
    };
    use crate::headers::parse_header_block;
    use crate::mime::{ParsedAttachment, parse_message};

    #[test]
    fn full_message_keeps_attachment_invariant() {
        let raw = b"From: Jane <jane@x>\r\nTo: a@x, b@x\r\nSubject: Hi\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\nbody";
        let parsed = parse_message(raw).expect("parse");
        let msg = Message::from_parsed(7, parsed, FlagState::default(), None);

        assert_eq!(msg.id, "7");
        assert_eq!(msg.thread_id, "7");
        assert_eq!(msg.to, vec!["a@x", "b@x"]);
        assert_eq!(msg.timestamp, 1_735_689_600);
        assert_eq!(msg.body.as_deref(), Some("body"));
        assert!(!msg.has_attachments);
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn header_only_message_has_no_body() {
        let headers = parse_header_block(
            "From: a@x\r\nSubject: Weekly\r\nMessage-ID: <m@x>\r\nReferences: <r1@x> <r2@x>\r\n",
        );
        let flags = FlagState {
            is_read: true,
            is_starred: false,
        };
        let msg = Message::from_headers(3, &headers, flags, Some(42));

        assert!(msg.body.is_none());
        assert_eq!(msg.timestamp, 42);
        assert_eq!(msg.snippet, "Weekly");
        assert!(msg.is_read);
        assert_eq!(msg.message_id.as_deref(), Some("<m@x>"));
        assert_eq!(
            msg.references,
            Some(vec!["<r1@x>".to_owned(), "<r2@x>".to_owned()])
        );
    }

    #[test]
    fn unreadable_date_falls_back_to_internal_date() {
        let headers = parse_header_block("Subject: x\r\nDate: not a date\r\n");
        let msg = Message::from_headers(4, &headers, FlagState::default(), Some(1_700_000_000));
        assert_eq!(msg.timestamp, 1_700_000_000);
        assert_eq!(msg.date.as_deref(), Some("not a date"));

        let msg = Message::from_headers(4, &headers, FlagState::default(), None);
        assert_eq!(msg.timestamp, 0);
    }

    #[test]
    fn attachment_descriptor_fallbacks() {
        let part = ParsedAttachment {
            index: 2,
            filename: None,
            content_type: String::new(),
            content: vec![0; 5],
        };
        let desc = AttachmentDescriptor::from_parsed(&part);
        assert_eq!(desc.filename, "attachment_2");
        assert_eq!(desc.content_type, "application/octet-stream");
        assert_eq!(desc.size_bytes, 5);
    }

    #[test]
    fn thread_result_stamps_thread_id() {
        let headers = parse_header_block("Subject: x\r\n");
        let messages = vec![
            Message::from_headers(1, &headers, FlagState::default(), None),
            Message::from_headers(2, &headers, FlagState::default(), None),
        ];
        let result = ThreadResult::new("2", messages);
        assert_eq!(result.count, 2);
        assert!(result.messages.iter().all(|m| m.thread_id == "2"));
        assert_eq!(ThreadResult::empty("9").count, 0);
    }

    #[test]
    fn newest_first_sort() {
        let headers = parse_header_block("Subject: x\r\n");
        let mut messages = vec![
            Message::from_headers(1, &headers, FlagState::default(), Some(10)),
            Message::from_headers(2, &headers, FlagState::default(), Some(30)),
            Message::from_headers(3, &headers, FlagState::default(), Some(20)),
        ];
        sort_newest_first(&mut messages);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn delivery_failure_has_empty_id() {
        let result = DeliveryResult::failure("nope");
        assert!(!result.success);
        assert!(result.message_id.is_empty());
    }
}
