//! Session router
//!
//! The per-user state machine. Consumes transport events and drives the
//! provisioner and the relay:
//!
//! - first contact greets and offers the department menu (rooms are
//!   provisioned lazily, on selection, never on greeting)
//! - selecting a department provisions (or reuses) its room, confirms to the
//!   user, and posts an introduction notice for staff
//! - free text relays only once a department is active; earlier text gets a
//!   prompt instead of being dropped
//! - selecting a different department switches the relay target to a second
//!   room; the prior room stays open but receives nothing further
//!
//! Remote failures surface as user-visible replies and never change state.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Department;
use crate::provisioner::RoomProvisioner;
use crate::registry::DepartmentRegistry;
use crate::relay::MessageRelay;
use crate::session::{ConversationSession, SessionState, SessionStore};
use crate::transport::{DepartmentOption, ExternalUser, InboundEvent, OutboundReply};

pub struct SessionRouter {
    registry: Arc<DepartmentRegistry>,
    provisioner: RoomProvisioner,
    relay: MessageRelay,
    sessions: SessionStore,
}

impl SessionRouter {
    pub fn new(
        registry: Arc<DepartmentRegistry>,
        provisioner: RoomProvisioner,
        relay: MessageRelay,
    ) -> Self {
        Self {
            registry,
            provisioner,
            relay,
            sessions: SessionStore::new(),
        }
    }

    /// The session table, exposed for the TTL sweeper
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Process one inbound event and return the replies to render.
    /// Events for the same user serialize on the session lock; different
    /// users run concurrently.
    pub async fn handle(&self, event: InboundEvent) -> Vec<OutboundReply> {
        match event {
            InboundEvent::Start { user, department } => {
                self.on_start(&user, department.as_deref()).await
            }
            InboundEvent::DepartmentChosen {
                user,
                department_id,
            } => self.on_department_chosen(&user, &department_id).await,
            InboundEvent::Text { user, text } => self.on_text(&user, &text).await,
            InboundEvent::SessionEnd { user } => self.on_session_end(&user).await,
        }
    }

    async fn on_start(
        &self,
        user: &ExternalUser,
        deep_link_department: Option<&str>,
    ) -> Vec<OutboundReply> {
        let (cell, created) = self.sessions.entry(user).await;
        let mut session = cell.lock().await;
        session.touch();

        if let Some(department_id) = deep_link_department {
            if let Some(department) = self.registry.lookup(department_id) {
                return self.select_department(&mut session, &department).await;
            }
            debug!(
                "Ignoring unknown deep-link department {:?} from user {}",
                department_id, user.id
            );
        }

        // /start on an existing session re-opens the menu; the conversation
        // id and room bindings survive, so re-selection reuses rooms.
        if !created {
            session.state = SessionState::AwaitingDepartment;
        }

        vec![self.department_menu(greeting(&session.display_name))]
    }

    async fn on_department_chosen(
        &self,
        user: &ExternalUser,
        department_id: &str,
    ) -> Vec<OutboundReply> {
        // Unknown id: reply and leave everything untouched, zero remote calls.
        let Some(department) = self.registry.lookup(department_id) else {
            debug!(
                "Unknown department {:?} selected by user {}",
                department_id, user.id
            );
            return vec![OutboundReply::Text(
                "❌ Department not found. Please try again.".to_string(),
            )];
        };

        let (cell, _) = self.sessions.entry(user).await;
        let mut session = cell.lock().await;
        session.touch();
        self.select_department(&mut session, &department).await
    }

    async fn on_text(&self, user: &ExternalUser, text: &str) -> Vec<OutboundReply> {
        let (cell, created) = self.sessions.entry(user).await;
        let mut session = cell.lock().await;
        session.touch();

        if created {
            // First contact was free text: greet, don't relay.
            return vec![self.department_menu(greeting(&session.display_name))];
        }

        match session.state {
            SessionState::AwaitingDepartment => vec![self.department_menu(
                "Please select a department first so I know where to route your message:"
                    .to_string(),
            )],
            SessionState::Active => self.relay_active_text(&session, text).await,
        }
    }

    async fn on_session_end(&self, user: &ExternalUser) -> Vec<OutboundReply> {
        let Some(cell) = self.sessions.get(&user.id).await else {
            return Vec::new();
        };
        // Hold the session lock so an in-flight transition finishes first.
        let _session = cell.lock().await;
        self.sessions.remove(&user.id).await;
        debug!("Session ended for user {}", user.id);
        vec![OutboundReply::Text(
            "👋 Your conversation has been closed. Send /start to begin a new one.".to_string(),
        )]
    }

    async fn select_department(
        &self,
        session: &mut ConversationSession,
        department: &Department,
    ) -> Vec<OutboundReply> {
        match self.provisioner.provision(session, department).await {
            Ok(outcome) => {
                session.bind_room(&department.id, &outcome.room_id);

                if !outcome.invite_warnings.is_empty() {
                    warn!(
                        "Room {} provisioned with {} failed invite(s)",
                        outcome.room_id,
                        outcome.invite_warnings.len()
                    );
                }

                if !outcome.reused {
                    if let Err(e) = self
                        .relay
                        .send_introduction(department, &outcome.room_id, session)
                        .await
                    {
                        warn!(
                            "Failed to post introduction to room {}: {}",
                            outcome.room_id, e
                        );
                    }
                }

                vec![OutboundReply::Text(confirmation(department))]
            }
            Err(e) => {
                // State untouched: a retry is a fresh department selection.
                warn!(
                    "Provisioning failed for user {} department {}: {}",
                    session.external_user_id, department.id, e
                );
                vec![OutboundReply::Text(
                    "❌ Sorry, I couldn't connect you to that department. Please try again later."
                        .to_string(),
                )]
            }
        }
    }

    async fn relay_active_text(
        &self,
        session: &ConversationSession,
        text: &str,
    ) -> Vec<OutboundReply> {
        let (Some(department_id), Some(room_id)) = (
            session.selected_department_id.as_deref(),
            session.active_room_id.as_deref(),
        ) else {
            // Unreachable through normal transitions; recover by re-prompting.
            return vec![self.department_menu(
                "Please select a department first so I know where to route your message:"
                    .to_string(),
            )];
        };
        let Some(department) = self.registry.lookup(department_id) else {
            warn!(
                "Active session {} references unknown department {}",
                session.external_user_id, department_id
            );
            return vec![OutboundReply::Text(
                "⚠️ Your message could not be delivered. Please try again.".to_string(),
            )];
        };

        match self
            .relay
            .relay_text(
                &department,
                room_id,
                &session.display_name,
                &session.handle,
                text,
            )
            .await
        {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(
                    "Relay to room {} failed for user {}: {}",
                    room_id, session.external_user_id, e
                );
                vec![OutboundReply::Text(
                    "⚠️ Your message could not be delivered. Please try again.".to_string(),
                )]
            }
        }
    }

    fn department_menu(&self, text: String) -> OutboundReply {
        OutboundReply::DepartmentMenu {
            text,
            options: self
                .registry
                .iter()
                .map(|d| DepartmentOption {
                    id: d.id.clone(),
                    label: d.label(),
                })
                .collect(),
        }
    }
}

fn greeting(display_name: &str) -> String {
    format!(
        "👋 Welcome {display_name}!\n\nI'm your support bot. \
         Please select the department you'd like to contact:"
    )
}

fn confirmation(department: &Department) -> String {
    let mut text = format!("✅ Connected to {}", department.label());
    if !department.description.is_empty() {
        text.push_str(&format!("\n\n{}", department.description));
    }
    text.push_str("\n\nYou can now send your message and our team will respond shortly!");
    text
}
