//! Message relay
//!
//! Formats and delivers a single chat message to a resolved room with both a
//! plain-text and an HTML rendering attributing authorship. Every send uses a
//! fresh client transaction id, so a transport-level retry cannot deliver the
//! same message twice. No internal retry; the router owns the response to a
//! failed send.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::Department;
use crate::error::RelayError;
use crate::matrix::{MatrixApi, MessageContent};
use crate::session::ConversationSession;

pub struct MessageRelay {
    api: Arc<dyn MatrixApi>,
}

impl MessageRelay {
    pub fn new(api: Arc<dyn MatrixApi>) -> Self {
        Self { api }
    }

    /// Forward a user's message verbatim, attributed to them
    pub async fn relay_text(
        &self,
        department: &Department,
        room_id: &str,
        display_name: &str,
        handle: &str,
        text: &str,
    ) -> Result<(), RelayError> {
        let content = MessageContent {
            msgtype: "m.text",
            body: format!("**{display_name}** (@{handle}):\n{text}"),
            format: Some("org.matrix.custom.html"),
            formatted_body: Some(format!(
                "<strong>{}</strong> <em>(@{})</em><br/>{}",
                escape_html(display_name),
                escape_html(handle),
                escape_html(text),
            )),
        };
        let event_id = self
            .api
            .send_message(&department.target(), room_id, &txn_id(), &content)
            .await?;
        debug!("Relayed message to {} as {}", room_id, event_id);
        Ok(())
    }

    /// Synthetic introduction notice so staff see conversation metadata
    /// before the user's first real message
    pub async fn send_introduction(
        &self,
        department: &Department,
        room_id: &str,
        session: &ConversationSession,
    ) -> Result<(), RelayError> {
        let content = MessageContent {
            msgtype: "m.notice",
            body: introduction_body(department, session),
            format: None,
            formatted_body: None,
        };
        self.api
            .send_message(&department.target(), room_id, &txn_id(), &content)
            .await?;
        Ok(())
    }
}

fn introduction_body(department: &Department, session: &ConversationSession) -> String {
    format!(
        "🎯 New {} conversation started\n\n\
         👤 Customer: {}\n\
         📱 Handle: @{}\n\
         🆔 User id: {}\n\
         🏷️ Department: {}\n\
         🕐 Started: {}\n\n\
         The customer's messages will appear in this room.",
        department.name,
        session.display_name,
        session.handle,
        session.external_user_id,
        department.name,
        session.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn txn_id() -> String {
    format!("deskhub-{}", Uuid::new_v4().simple())
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
