//! Client-side conversation reconstruction
//!
//! Given one message, collect its anchor tokens (`Message-ID`, `In-Reply-To`,
//! every `References` entry), search the mailbox for messages whose
//! `Message-ID` equals or whose `References` mentions any anchor, and return
//! the union oldest first.
//!
//! Resolution is best-effort. Once the target itself has been fetched, any
//! failure in the search/fetch phase falls back to a thread containing only
//! the target (see [`degrade_to_singleton`]) instead of failing the call.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};

use crate::errors::AppResult;
use crate::mailbox::MailboxReader;
use crate::message_id;
use crate::models::{Message, ThreadResult};

/// Anchor searches in flight at once; each one holds its own IMAP login
const MAX_CONCURRENT_SEARCHES: usize = 4;

/// Resolve the conversation containing `uid`
///
/// # Errors
///
/// Only errors from the initial fetch of the target (connection, login,
/// timeout) propagate. A missing or unparseable target yields an empty
/// result.
pub async fn resolve_thread<R>(reader: &R, uid: u32) -> AppResult<ThreadResult>
where
    R: MailboxReader,
{
    let thread_id = uid.to_string();

    let fetched = reader.fetch_full(&[uid]).await?;
    let Some(raw) = fetched.into_iter().find(|m| m.uid == uid) else {
        tracing::debug!(uid, "thread target not found");
        return Ok(ThreadResult::empty(thread_id));
    };
    let target = match raw.to_message() {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(uid, error = %e, "thread target could not be parsed");
            return Ok(ThreadResult::empty(thread_id));
        }
    };

    let anchors = anchor_tokens(&target);
    if anchors.is_empty() {
        return Ok(ThreadResult::new(thread_id, vec![target]));
    }

    let candidates = search_anchors(reader, &anchors).await;
    if candidates.is_empty() {
        return Ok(degrade_to_singleton(
            thread_id,
            target,
            "anchor searches matched nothing",
        ));
    }

    let uids: Vec<u32> = candidates.into_iter().collect();
    let raws = match reader.fetch_full(&uids).await {
        Ok(raws) => raws,
        Err(e) => {
            return Ok(degrade_to_singleton(
                thread_id,
                target,
                &format!("batch fetch failed: {e}"),
            ));
        }
    };

    let mut messages: Vec<Message> = raws
        .iter()
        .filter_map(|raw| match raw.to_message() {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(uid = raw.uid, error = %e, "dropping unparseable thread message");
                None
            }
        })
        .collect();
    if messages.is_empty() {
        return Ok(degrade_to_singleton(
            thread_id,
            target,
            "no thread candidate could be parsed",
        ));
    }

    // a target carrying only In-Reply-To matches none of its own searches
    if !messages.iter().any(|m| m.id == target.id) {
        messages.push(target);
    }

    sort_oldest_first(&mut messages);
    Ok(ThreadResult::new(thread_id, messages))
}

/// Degrade-to-singleton policy
///
/// Used once the target is known. The result always contains the target.
pub fn degrade_to_singleton(thread_id: String, target: Message, reason: &str) -> ThreadResult {
    tracing::warn!(thread_id = %thread_id, reason, "thread resolution degraded to singleton");
    ThreadResult::new(thread_id, vec![target])
}

/// Every threading token carried by the message, deduplicated
pub fn anchor_tokens(message: &Message) -> BTreeSet<String> {
    let mut anchors = BTreeSet::new();
    if let Some(id) = &message.message_id {
        anchors.insert(id.clone());
    }
    if let Some(parent) = &message.in_reply_to {
        anchors.insert(parent.clone());
    }
    if let Some(references) = &message.references {
        anchors.extend(references.iter().cloned());
    }
    anchors.retain(|token| !token.is_empty());
    anchors
}

/// Fan out two searches per anchor and union the matching UIDs
///
/// Each search runs on its own connection, at most
/// [`MAX_CONCURRENT_SEARCHES`] at a time. A failed search only loses its own
/// contribution.
async fn search_anchors<R>(reader: &R, anchors: &BTreeSet<String>) -> BTreeSet<u32>
where
    R: MailboxReader,
{
    let mut queries = Vec::with_capacity(anchors.len() * 2);
    for token in anchors {
        for header in ["Message-ID", "References"] {
            match message_id::header_search(header, token) {
                Ok(query) => queries.push(query),
                Err(e) => tracing::warn!(token = %token, error = %e, "skipping unsearchable anchor"),
            }
        }
    }

    let results: Vec<_> = stream::iter(queries)
        .map(|query| async move {
            let result = reader.search(&query).await;
            (query, result)
        })
        .buffer_unordered(MAX_CONCURRENT_SEARCHES)
        .collect()
        .await;

    let mut uids = BTreeSet::new();
    for (query, result) in results {
        match result {
            Ok(found) => uids.extend(found),
            Err(e) => tracing::warn!(query = %query, error = %e, "thread search failed"),
        }
    }
    uids
}

/// Oldest first; equal timestamps keep their relative order
pub fn sort_oldest_first(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.timestamp);
}
