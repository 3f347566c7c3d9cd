//! Transport contract
//!
//! The router core is transport-agnostic: adapters translate platform
//! updates into `InboundEvent`s and render the returned `OutboundReply`s
//! back to the user. Telegram is the first adapter (`crate::telegram`).

use serde::{Deserialize, Serialize};

/// Normalized identity of an external platform user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalUser {
    /// Opaque platform user id, unique per transport
    pub id: String,
    pub display_name: Option<String>,
    pub handle: Option<String>,
}

impl ExternalUser {
    /// Human-readable name with platform-appropriate fallbacks
    pub fn display(&self) -> String {
        self.display_name
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.handle.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| format!("User {}", self.id))
    }

    /// Addressable handle, falling back to the raw id
    pub fn handle_or_id(&self) -> String {
        self.handle
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// The four inbound events every transport adapter produces
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// First contact or explicit restart; `department` carries an optional
    /// deep-link department id (e.g. `/start tech` from a web widget)
    Start {
        user: ExternalUser,
        department: Option<String>,
    },
    DepartmentChosen {
        user: ExternalUser,
        department_id: String,
    },
    Text {
        user: ExternalUser,
        text: String,
    },
    SessionEnd {
        user: ExternalUser,
    },
}

impl InboundEvent {
    pub fn user(&self) -> &ExternalUser {
        match self {
            Self::Start { user, .. }
            | Self::DepartmentChosen { user, .. }
            | Self::Text { user, .. }
            | Self::SessionEnd { user } => user,
        }
    }
}

/// What the router asks the adapter to render back to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundReply {
    Text(String),
    /// Message with selectable department options (inline keyboard on
    /// Telegram)
    DepartmentMenu {
        text: String,
        options: Vec<DepartmentOption>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartmentOption {
    pub id: String,
    pub label: String,
}
