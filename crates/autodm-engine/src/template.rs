// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `{{placeholder}}` substitution for DM templates.

use autodm_core::types::{CommentEvent, MediaItem};

/// Values available to a rule's message template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub username: String,
    pub comment_text: String,
    pub post_caption: String,
    pub post_link: String,
}

impl TemplateVars {
    /// Build the variables for `comment`. Caption and link are empty when the
    /// post has not been synced into the media cache.
    pub fn for_comment(comment: &CommentEvent, media: Option<&MediaItem>) -> Self {
        Self {
            username: comment.commenter_username.clone().unwrap_or_default(),
            comment_text: comment.text.clone(),
            post_caption: media.and_then(|m| m.caption.clone()).unwrap_or_default(),
            post_link: media.and_then(|m| m.permalink.clone()).unwrap_or_default(),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "username" => Some(&self.username),
            "comment_text" => Some(&self.comment_text),
            "post_caption" => Some(&self.post_caption),
            "post_link" => Some(&self.post_link),
            _ => None,
        }
    }
}

/// Substitute every known `{{key}}` in `template`.
///
/// Whitespace inside the braces is ignored. Unknown keys and unterminated
/// braces are copied through unchanged.
pub fn format_message(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after_open[..end].trim();
        match vars.lookup(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Whether `template` references the cached post metadata.
pub fn needs_media(template: &str) -> bool {
    template.contains("post_caption") || template.contains("post_link")
}
