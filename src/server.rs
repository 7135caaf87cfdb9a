//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 8 MCP tools. Handles
//! input validation, business logic orchestration, and response formatting.
//!
//! Tool logic lives in free functions generic over [`MailboxReader`] and
//! [`MailSender`]; the `#[tool]` methods bind them to the live IMAP and SMTP
//! collaborators.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration as ChronoDuration, NaiveDate};
use regex::Regex;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::mailbox::{ImapMailbox, MailboxReader, RawHeaders};
use crate::message_id;
use crate::models::{
    AttachmentPayload, DeliveryResult, DownloadAttachmentInput, FlagUpdate, GetMessageInput,
    GetThreadInput, ListMessagesInput, Message, Meta, OutgoingMessage, ReplyInput, ReplyRequest,
    SearchMessagesInput, SendEmailInput, SetFlagInput, ThreadResult, ToolEnvelope,
    sort_newest_first,
};
use crate::reply;
use crate::smtp::{MailSender, SmtpSender};
use crate::thread;

/// Maximum messages returned by `list_messages`
const MAX_LIST_COUNT: usize = 100;
/// Maximum messages returned by `search_messages`
const MAX_SEARCH_LIMIT: usize = 50;
/// Maximum recipients per `send_email` field
const MAX_RECIPIENTS: usize = 50;
/// Maximum outgoing body length in characters
const MAX_BODY_CHARS: usize = 100_000;
/// Maximum subject length in characters
const MAX_SUBJECT_CHARS: usize = 998;
/// Hard ceiling for `download_attachment.max_bytes`
const MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

/// Gmail/IMAP MCP server
///
/// Holds shared configuration and the mailbox and SMTP collaborators.
/// Implements MCP tool handlers via `#[tool]` attribute macro and
/// `ServerHandler` trait.
#[derive(Clone)]
pub struct GmailMcpServer {
    /// Server config (account, timeouts, write flag)
    config: Arc<ServerConfig>,
    /// Per-call IMAP connections to the configured mailbox
    mailbox: ImapMailbox,
    /// SMTP relay for new mail and replies
    sender: Arc<SmtpSender>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailMcpServer {
    /// Create a new MCP server instance
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the SMTP transport cannot be built from config
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let config = Arc::new(config);
        let sender = SmtpSender::from_config(&config)?;
        Ok(Self {
            mailbox: ImapMailbox::new(Arc::clone(&config)),
            sender: Arc::new(sender),
            config,
            tool_router: Self::tool_router(),
        })
    }

    /// Tool: List the most recent messages
    #[tool(
        name = "list_messages",
        description = "List the most recent messages in the mailbox (headers only, newest first)"
    )]
    async fn list_messages(
        &self,
        Parameters(input): Parameters<ListMessagesInput>,
    ) -> Result<Json<ToolEnvelope<Vec<Message>>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            list_messages_with(&self.mailbox, &input)
                .await
                .map(|data| (format!("{} message(s) returned", data.len()), data)),
        )
    }

    /// Tool: Search messages
    ///
    /// Criteria are ANDed together; no criteria matches every message.
    #[tool(
        name = "search_messages",
        description = "Search messages by text, sender, recipient, subject, unread state and date range"
    )]
    async fn search_messages(
        &self,
        Parameters(input): Parameters<SearchMessagesInput>,
    ) -> Result<Json<ToolEnvelope<Vec<Message>>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            search_messages_with(&self.mailbox, &input)
                .await
                .map(|data| (format!("{} message(s) returned", data.len()), data)),
        )
    }

    /// Tool: Get one message with its body
    #[tool(
        name = "get_message",
        description = "Get a message with its plain text body and attachment list"
    )]
    async fn get_message(
        &self,
        Parameters(input): Parameters<GetMessageInput>,
    ) -> Result<Json<ToolEnvelope<Message>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            get_message_with(&self.mailbox, &input)
                .await
                .map(|data| ("Message retrieved".to_owned(), data)),
        )
    }

    /// Tool: Resolve the conversation a message belongs to
    ///
    /// Reconstructs the thread from `Message-ID`, `In-Reply-To` and
    /// `References`. Falls back to the message alone when the search phase
    /// fails.
    #[tool(
        name = "get_thread",
        description = "Get every message in the conversation of a message, oldest first"
    )]
    async fn get_thread(
        &self,
        Parameters(input): Parameters<GetThreadInput>,
    ) -> Result<Json<ToolEnvelope<ThreadResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            get_thread_with(&self.mailbox, &input)
                .await
                .map(|data| (format!("{} message(s) in thread", data.count), data)),
        )
    }

    /// Tool: Send a new email
    ///
    /// Requires `MAIL_WRITE_ENABLED=true`.
    #[tool(name = "send_email", description = "Send a new plain text email")]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<Json<ToolEnvelope<DeliveryResult>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            require_write_enabled(&self.config)?;
            send_email_with(self.sender.as_ref(), input).await
        }
        .await;
        finalize_tool(
            started,
            result.map(|data| (data.message.clone(), data)),
        )
    }

    /// Tool: Reply to a message in its thread
    ///
    /// Requires `MAIL_WRITE_ENABLED=true`.
    #[tool(
        name = "reply_to_message",
        description = "Reply to the sender of a message, keeping it in the same thread"
    )]
    async fn reply_to_message(
        &self,
        Parameters(input): Parameters<ReplyInput>,
    ) -> Result<Json<ToolEnvelope<DeliveryResult>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            require_write_enabled(&self.config)?;
            reply_with(&self.mailbox, self.sender.as_ref(), &input).await
        }
        .await;
        finalize_tool(
            started,
            result.map(|data| (data.message.clone(), data)),
        )
    }

    /// Tool: Mark a message read/unread or starred/unstarred
    ///
    /// Requires `MAIL_WRITE_ENABLED=true`.
    #[tool(
        name = "set_message_flag",
        description = "Set or clear the read or starred flag of a message"
    )]
    async fn set_message_flag(
        &self,
        Parameters(input): Parameters<SetFlagInput>,
    ) -> Result<Json<ToolEnvelope<FlagUpdate>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            require_write_enabled(&self.config)?;
            set_flag_with(&self.mailbox, input).await
        }
        .await;
        finalize_tool(started, result.map(|data| ("Flag updated".to_owned(), data)))
    }

    /// Tool: Download one attachment as base64
    #[tool(
        name = "download_attachment",
        description = "Download an attachment of a message as base64, bounded by max_bytes"
    )]
    async fn download_attachment(
        &self,
        Parameters(input): Parameters<DownloadAttachmentInput>,
    ) -> Result<Json<ToolEnvelope<AttachmentPayload>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            download_attachment_with(&self.mailbox, &input)
                .await
                .map(|data| {
                    (
                        format!("Attachment '{}' ({} bytes)", data.filename, data.size_bytes),
                        data,
                    )
                }),
        )
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Gmail/IMAP MCP server. Message IDs are mailbox-local UIDs. Write tools (send_email, reply_to_message, set_message_flag) can be disabled with MAIL_WRITE_ENABLED=false.",
        )
    }
}

async fn list_messages_with<R: MailboxReader>(
    reader: &R,
    input: &ListMessagesInput,
) -> AppResult<Vec<Message>> {
    validate_chars(input.count, 1, MAX_LIST_COUNT, "count")?;
    let headers = reader.list_recent(input.count).await?;
    Ok(header_messages(&headers))
}

async fn search_messages_with<R: MailboxReader>(
    reader: &R,
    input: &SearchMessagesInput,
) -> AppResult<Vec<Message>> {
    validate_search_input(input)?;
    let query = build_search_query(input)?;
    let uids = reader.search(&query).await?;
    let newest: Vec<u32> = uids.into_iter().take(input.limit).collect();
    if newest.is_empty() {
        return Ok(Vec::new());
    }
    let headers = reader.fetch_headers(&newest).await?;
    Ok(header_messages(&headers))
}

async fn get_message_with<R: MailboxReader>(
    reader: &R,
    input: &GetMessageInput,
) -> AppResult<Message> {
    let uid = message_id::parse_uid(&input.message_id)?;
    let raw = reader
        .fetch_full(&[uid])
        .await?
        .into_iter()
        .find(|m| m.uid == uid)
        .ok_or_else(|| AppError::NotFound(format!("message {uid} not found")))?;
    let mut message = raw.to_message()?;
    if !input.include_html {
        message.body_html = None;
    }
    Ok(message)
}

async fn get_thread_with<R: MailboxReader>(
    reader: &R,
    input: &GetThreadInput,
) -> AppResult<ThreadResult> {
    let uid = message_id::parse_uid(&input.message_id)?;
    thread::resolve_thread(reader, uid).await
}

async fn send_email_with<S: MailSender>(
    sender: &S,
    input: SendEmailInput,
) -> AppResult<DeliveryResult> {
    let cc = input.cc.unwrap_or_default();
    let bcc = input.bcc.unwrap_or_default();
    validate_chars(input.to.len(), 1, MAX_RECIPIENTS, "to")?;
    validate_chars(cc.len(), 0, MAX_RECIPIENTS, "cc")?;
    validate_chars(bcc.len(), 0, MAX_RECIPIENTS, "bcc")?;
    validate_recipients(input.to.iter().chain(&cc).chain(&bcc))?;
    validate_chars(
        input.subject.chars().count(),
        0,
        MAX_SUBJECT_CHARS,
        "subject length",
    )?;
    validate_no_controls(&input.subject, "subject")?;
    validate_chars(input.body.chars().count(), 1, MAX_BODY_CHARS, "body length")?;

    Ok(sender
        .send(OutgoingMessage {
            to: input.to,
            cc,
            bcc,
            subject: input.subject,
            body: input.body,
            ..OutgoingMessage::default()
        })
        .await)
}

async fn reply_with<R: MailboxReader, S: MailSender>(
    reader: &R,
    sender: &S,
    input: &ReplyInput,
) -> AppResult<DeliveryResult> {
    let request = ReplyRequest {
        uid: message_id::parse_uid(&input.message_id)?,
        body: input.body.clone(),
        include_quote: input.include_quote,
    };
    reply::compose_and_send(reader, sender, &request).await
}

async fn set_flag_with<R: MailboxReader>(reader: &R, input: SetFlagInput) -> AppResult<FlagUpdate> {
    let uid = message_id::parse_uid(&input.message_id)?;
    reader.set_flag(uid, input.flag, input.enabled).await?;
    Ok(FlagUpdate {
        message_id: uid.to_string(),
        flag: input.flag,
        enabled: input.enabled,
    })
}

async fn download_attachment_with<R: MailboxReader>(
    reader: &R,
    input: &DownloadAttachmentInput,
) -> AppResult<AttachmentPayload> {
    validate_chars(input.max_bytes, 1, MAX_ATTACHMENT_BYTES, "max_bytes")?;
    let uid = message_id::parse_uid(&input.message_id)?;
    let raw = reader
        .fetch_full(&[uid])
        .await?
        .into_iter()
        .find(|m| m.uid == uid)
        .ok_or_else(|| AppError::NotFound(format!("message {uid} not found")))?;
    let parsed = raw.parse()?;
    let total = parsed.attachments.len();
    let part = parsed
        .attachments
        .into_iter()
        .nth(input.attachment_index)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "attachment index {} not found; message {uid} has {total} attachment(s)",
                input.attachment_index
            ))
        })?;

    let descriptor = crate::models::AttachmentDescriptor::from_parsed(&part);
    if descriptor.size_bytes > input.max_bytes {
        return Err(AppError::TooLarge {
            what: format!("attachment '{}'", descriptor.filename),
            limit: input.max_bytes,
            actual: descriptor.size_bytes,
        });
    }

    tracing::debug!(uid, index = part.index, bytes = descriptor.size_bytes, "attachment downloaded");
    Ok(AttachmentPayload {
        index: descriptor.index,
        filename: descriptor.filename,
        content_type: descriptor.content_type,
        size_bytes: descriptor.size_bytes,
        content_base64: STANDARD.encode(&part.content),
    })
}

/// Header-only messages, newest first
fn header_messages(headers: &[RawHeaders]) -> Vec<Message> {
    let mut messages: Vec<Message> = headers.iter().map(RawHeaders::to_message).collect();
    sort_newest_first(&mut messages);
    messages
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => {
            tracing::debug!(error = %e, "tool call failed");
            Err(e.to_error_data())
        }
    }
}

/// Reject IMAP control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate numeric value in range
fn validate_chars(value: usize, min: usize, max: usize, field: &str) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidInput(format!(
            "{field} must be in range {min}..{max}"
        )));
    }
    Ok(())
}

/// Every recipient must look like `local@domain`, optionally with a display
/// name
fn validate_recipients<'a>(recipients: impl Iterator<Item = &'a String>) -> AppResult<()> {
    let pattern = Regex::new(r"^(?:[^<>]*<)?[^@\s<>]+@[^@\s<>]+\.[^@\s<>]+>?$")
        .map_err(|e| AppError::Internal(format!("invalid address regex: {e}")))?;
    for addr in recipients {
        validate_no_controls(addr, "recipient")?;
        if !pattern.is_match(addr.trim()) {
            return Err(AppError::InvalidInput(format!(
                "invalid recipient address '{addr}'"
            )));
        }
    }
    Ok(())
}

/// Validate search messages input
fn validate_search_input(input: &SearchMessagesInput) -> AppResult<()> {
    validate_chars(input.limit, 1, MAX_SEARCH_LIMIT, "limit")?;

    for value in [&input.query, &input.from, &input.to, &input.subject]
        .into_iter()
        .flatten()
    {
        validate_search_text(value)?;
    }

    let since = input.since.as_deref().map(parse_ymd).transpose()?;
    let before = input.before.as_deref().map(parse_ymd).transpose()?;
    if let (Some(since), Some(before)) = (since, before)
        && since > before
    {
        return Err(AppError::InvalidInput(
            "since must be <= before".to_owned(),
        ));
    }

    Ok(())
}

/// Validate search text field bounds and characters
fn validate_search_text(input: &str) -> AppResult<()> {
    if input.is_empty() || input.len() > 256 {
        return Err(AppError::InvalidInput(
            "search text fields must be 1..256 chars".to_owned(),
        ));
    }
    validate_no_controls(input, "search text")
}

/// Build IMAP SEARCH query string from input
///
/// `before` is inclusive: IMAP `BEFORE` is exclusive, so the day after is
/// sent.
fn build_search_query(input: &SearchMessagesInput) -> AppResult<String> {
    let mut parts = Vec::new();
    if let Some(v) = &input.query {
        parts.push(format!("TEXT \"{}\"", escape_imap_quoted(v)?));
    }
    if let Some(v) = &input.from {
        parts.push(format!("FROM \"{}\"", escape_imap_quoted(v)?));
    }
    if let Some(v) = &input.to {
        parts.push(format!("TO \"{}\"", escape_imap_quoted(v)?));
    }
    if let Some(v) = &input.subject {
        parts.push(format!("SUBJECT \"{}\"", escape_imap_quoted(v)?));
    }
    if input.unread_only.unwrap_or(false) {
        parts.push("UNSEEN".to_owned());
    }
    if let Some(since) = &input.since {
        parts.push(format!("SINCE {}", imap_date(parse_ymd(since)?)));
    }
    if let Some(before) = &input.before {
        let end_exclusive = parse_ymd(before)? + ChronoDuration::days(1);
        parts.push(format!("BEFORE {}", imap_date(end_exclusive)));
    }

    if parts.is_empty() {
        Ok("ALL".to_owned())
    } else {
        Ok(parts.join(" "))
    }
}

/// Escape backslashes and quotes for IMAP quoted strings
fn escape_imap_quoted(input: &str) -> AppResult<String> {
    validate_search_text(input)?;
    Ok(input.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Format date as IMAP SEARCH date (e.g., "1-Jan-2025")
fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// Parse YYYY-MM-DD date string
fn parse_ymd(input: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| AppError::InvalidInput(format!("invalid date '{input}', expected YYYY-MM-DD")))
}

/// Check if write operations are enabled
fn require_write_enabled(config: &ServerConfig) -> AppResult<()> {
    if !config.write_enabled {
        return Err(AppError::InvalidInput(
            "write tools are disabled; set MAIL_WRITE_ENABLED=true".to_owned(),
        ));
    }
    Ok(())
}
