// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Instagram webhook payloads.
//!
//! A delivery batches entries per receiving account; each entry carries a
//! list of field changes. Only `comments` changes are turned into
//! [`InboundComment`]s. Other fields and malformed values are skipped.

use autodm_core::types::CommentEvent;
use serde::Deserialize;
use tracing::{debug, warn};

/// The field name of comment changes.
pub const COMMENTS_FIELD: &str = "comments";

/// Top-level webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// One receiving account's batch of changes.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    /// Receiving Instagram business account id.
    pub id: String,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    /// Kept raw so one bad change does not reject the whole delivery.
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentValue {
    id: String,
    #[serde(default)]
    text: String,
    from: CommentAuthor,
    media: CommentMedia,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentAuthor {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentMedia {
    id: String,
}

/// A comment addressed to one of our connected accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundComment {
    pub platform_account_id: String,
    pub comment: CommentEvent,
}

/// Extract every well-formed comment in delivery order.
pub fn extract_comments(payload: &WebhookPayload) -> Vec<InboundComment> {
    let mut comments = Vec::new();
    for entry in &payload.entry {
        for change in &entry.changes {
            if change.field != COMMENTS_FIELD {
                debug!(field = change.field.as_str(), "ignoring webhook change");
                continue;
            }
            match parse_comment(&change.value) {
                Some(comment) => comments.push(InboundComment {
                    platform_account_id: entry.id.clone(),
                    comment,
                }),
                None => warn!(
                    account_id = entry.id.as_str(),
                    "skipping malformed comment change"
                ),
            }
        }
    }
    comments
}

fn parse_comment(value: &serde_json::Value) -> Option<CommentEvent> {
    let value = CommentValue::deserialize(value).ok()?;
    if value.id.is_empty() || value.from.id.is_empty() || value.media.id.is_empty() {
        return None;
    }
    Some(CommentEvent {
        comment_id: value.id,
        text: value.text,
        commenter_id: value.from.id,
        commenter_username: value.from.username.filter(|u| !u.is_empty()),
        media_id: value.media.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn comment_changes_are_extracted() {
        let payload = payload(json!({
            "object": "instagram",
            "entry": [{
                "id": "ig-1",
                "time": 1_700_000_000,
                "changes": [{
                    "field": "comments",
                    "value": {
                        "id": "c-1",
                        "text": "price please",
                        "from": {"id": "u-1", "username": "ana"},
                        "media": {"id": "m-1", "media_product_type": "FEED"}
                    }
                }]
            }]
        }));
        let comments = extract_comments(&payload);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].platform_account_id, "ig-1");
        assert_eq!(
            comments[0].comment,
            CommentEvent {
                comment_id: "c-1".into(),
                text: "price please".into(),
                commenter_id: "u-1".into(),
                commenter_username: Some("ana".into()),
                media_id: "m-1".into(),
            }
        );
    }

    #[test]
    fn other_fields_and_malformed_values_are_skipped() {
        let payload = payload(json!({
            "object": "instagram",
            "entry": [{
                "id": "ig-1",
                "changes": [
                    {"field": "mentions", "value": {"media_id": "m-1"}},
                    {"field": "comments", "value": {"id": "c-1", "text": "no author"}},
                    {"field": "comments", "value": {
                        "id": "", "text": "x", "from": {"id": "u-1"}, "media": {"id": "m-1"}
                    }},
                    {"field": "comments", "value": {
                        "id": "c-2", "text": "ok", "from": {"id": "u-2"}, "media": {"id": "m-1"}
                    }}
                ]
            }]
        }));
        let comments = extract_comments(&payload);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].comment.comment_id, "c-2");
        assert_eq!(comments[0].comment.commenter_username, None);
    }

    #[test]
    fn entries_keep_their_own_account() {
        let change = |id: &str| {
            json!({"field": "comments", "value": {
                "id": id, "text": "hi", "from": {"id": "u"}, "media": {"id": "m"}
            }})
        };
        let payload = payload(json!({
            "entry": [
                {"id": "ig-1", "changes": [change("c-1")]},
                {"id": "ig-2", "changes": [change("c-2"), change("c-3")]}
            ]
        }));
        let accounts: Vec<_> = extract_comments(&payload)
            .into_iter()
            .map(|c| (c.platform_account_id, c.comment.comment_id))
            .collect();
        assert_eq!(
            accounts,
            vec![
                ("ig-1".to_string(), "c-1".to_string()),
                ("ig-2".to_string(), "c-2".to_string()),
                ("ig-2".to_string(), "c-3".to_string()),
            ]
        );
    }

    #[test]
    fn empty_delivery_has_no_comments() {
        assert!(extract_comments(&payload(json!({"object": "instagram"}))).is_empty());
    }
}
