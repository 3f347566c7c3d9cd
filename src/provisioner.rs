//! Room provisioner
//!
//! Turns a (session, department) pair into a conversation room: private,
//! named after the user and department, parented under the channel space,
//! power-levelled so the relay identity cannot moderate, and staffed via
//! invites. Provisioning is idempotent per (user, department): an existing
//! binding short-circuits with zero remote calls.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Department;
use crate::directory::{order_key, SpaceDirectory};
use crate::error::ProvisioningError;
use crate::matrix::{CreateRoomRequest, MatrixApi, StateEvent};
use crate::session::ConversationSession;

/// State event type marking a room with its originating conversation
pub const DEPARTMENT_MARKER_EVENT: &str = "org.deskhub.department";

/// Result of a provisioning call. Invite failures are warnings, not errors:
/// the room exists and is usable, merely understaffed.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub room_id: String,
    /// True when the idempotence short-circuit returned an existing room
    pub reused: bool,
    pub invite_warnings: Vec<InviteWarning>,
}

#[derive(Debug, Clone)]
pub struct InviteWarning {
    pub user_id: String,
    pub reason: String,
}

pub struct RoomProvisioner {
    api: Arc<dyn MatrixApi>,
    directory: Arc<SpaceDirectory>,
    channel_key: String,
    /// Display label used in room names, e.g. "Telegram"
    channel_label: String,
}

impl RoomProvisioner {
    pub fn new(
        api: Arc<dyn MatrixApi>,
        directory: Arc<SpaceDirectory>,
        channel_key: String,
        channel_label: String,
    ) -> Self {
        Self {
            api,
            directory,
            channel_key,
            channel_label,
        }
    }

    /// Return the session's room for `department`, creating it on first
    /// selection. The caller persists the binding onto the session.
    pub async fn provision(
        &self,
        session: &ConversationSession,
        department: &Department,
    ) -> Result<ProvisionOutcome, ProvisioningError> {
        if let Some(room_id) = session.room_for(&department.id) {
            return Ok(ProvisionOutcome {
                room_id: room_id.to_string(),
                reused: true,
                invite_warnings: Vec::new(),
            });
        }

        let space_id = self.directory.resolve_channel_space(&self.channel_key).await?;

        let target = department.target();
        let request = self.room_request(session, department);
        let room_id = self.api.create_room(&target, &request).await?;
        info!(
            "Provisioned room {} for user {} in department {}",
            room_id, session.external_user_id, department.id
        );

        if let Err(e) = self
            .api
            .set_space_child(&target, &space_id, &room_id, &order_key())
            .await
        {
            warn!("Failed to link room {} under space {}: {}", room_id, space_id, e);
        }

        let invite_warnings = self.invite_members(&target, &room_id, department).await;

        Ok(ProvisionOutcome {
            room_id,
            reused: false,
            invite_warnings,
        })
    }

    fn room_request(
        &self,
        session: &ConversationSession,
        department: &Department,
    ) -> CreateRoomRequest {
        CreateRoomRequest {
            name: format!(
                "{} ({}) - {} #{}",
                session.display_name, self.channel_label, department.name, session.conversation_id
            ),
            topic: format!(
                "{} conversation with @{} - {}",
                self.channel_label, session.handle, department.name
            ),
            preset: "private_chat",
            visibility: Some("private"),
            creation_content: Some(json!({ "m.federate": false })),
            initial_state: vec![
                power_levels_event(department),
                department_marker_event(session, department),
            ],
        }
    }

    /// Each invite is independent: a failure is logged and recorded but never
    /// aborts provisioning or blocks the remaining invites.
    async fn invite_members(
        &self,
        target: &crate::matrix::HomeserverTarget,
        room_id: &str,
        department: &Department,
    ) -> Vec<InviteWarning> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        for user_id in department.admins.iter().chain(department.staff.iter()) {
            if *user_id == department.bot_user_id || !seen.insert(user_id.as_str()) {
                continue;
            }
            match self.api.invite_user(target, room_id, user_id).await {
                Ok(()) => info!("Invited {} to room {}", user_id, room_id),
                Err(e) => {
                    warn!("Failed to invite {} to room {}: {}", user_id, room_id, e);
                    warnings.push(InviteWarning {
                        user_id: user_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        warnings
    }
}

/// Admins get full rights, staff moderation rights, everyone else (the relay
/// identity included) the lowest privilege.
fn power_levels_event(department: &Department) -> StateEvent {
    let mut users = serde_json::Map::new();
    for staff in &department.staff {
        users.insert(staff.clone(), json!(50));
    }
    for admin in &department.admins {
        users.insert(admin.clone(), json!(100));
    }

    StateEvent {
        event_type: "m.room.power_levels".to_string(),
        state_key: String::new(),
        content: json!({
            "users": users,
            "users_default": 0,
            "events_default": 0,
            "state_default": 50,
            "invite": 50,
            "kick": 50,
            "ban": 50,
            "redact": 50,
        }),
    }
}

fn department_marker_event(
    session: &ConversationSession,
    department: &Department,
) -> StateEvent {
    StateEvent {
        event_type: DEPARTMENT_MARKER_EVENT.to_string(),
        state_key: String::new(),
        content: json!({
            "department_id": department.id,
            "department_name": department.name,
            "external_user_id": session.external_user_id,
            "conversation_id": session.conversation_id,
            "created_at": session.created_at.to_rfc3339(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ExternalUser;

    fn department() -> Department {
        Department {
            id: "tech".to_string(),
            name: "Technical Support".to_string(),
            icon: "🛠️".to_string(),
            description: String::new(),
            homeserver: "http://localhost:8008".to_string(),
            access_token: "token".to_string(),
            bot_user_id: "@deskhub:localhost".to_string(),
            staff: vec!["@support:localhost".to_string(), "@admin:localhost".to_string()],
            admins: vec!["@admin:localhost".to_string()],
        }
    }

    fn session() -> ConversationSession {
        ConversationSession::new(&ExternalUser {
            id: "42".to_string(),
            display_name: Some("Ada".to_string()),
            handle: Some("ada_l".to_string()),
        })
    }

    #[test]
    fn power_levels_admins_override_staff() {
        let event = power_levels_event(&department());
        assert_eq!(event.event_type, "m.room.power_levels");
        let users = &event.content["users"];
        // Listed as both staff and admin: admin power wins.
        assert_eq!(users["@admin:localhost"], 100);
        assert_eq!(users["@support:localhost"], 50);
        assert_eq!(event.content["users_default"], 0);
        assert_eq!(event.content["events_default"], 0);
        assert_eq!(event.content["state_default"], 50);
    }

    #[test]
    fn marker_event_traces_back_to_conversation() {
        let session = session();
        let event = department_marker_event(&session, &department());
        assert_eq!(event.event_type, DEPARTMENT_MARKER_EVENT);
        assert_eq!(event.state_key, "");
        assert_eq!(event.content["department_id"], "tech");
        assert_eq!(event.content["external_user_id"], "42");
        assert_eq!(
            event.content["conversation_id"],
            session.conversation_id.as_str()
        );
    }

}
