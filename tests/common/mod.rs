//! Shared test fixtures: an in-memory `MatrixApi` fake that records every
//! call and supports scripted failures, plus config builders.

#![allow(dead_code)]

use async_trait::async_trait;
use deskhub::{
    CreateRoomRequest, Department, ExternalUser, HomeserverTarget, MatrixApi, MatrixError,
    MessageContent, SpaceConfig,
};
use deskhub::config::{ChannelSpaceConfig, SpaceNodeConfig};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Call {
    CreateRoom {
        room_id: String,
        request: CreateRoomRequest,
    },
    Invite {
        room_id: String,
        user_id: String,
    },
    SpaceChild {
        parent_id: String,
        child_id: String,
    },
    Send {
        room_id: String,
        txn_id: String,
        msgtype: String,
        body: String,
    },
    Whoami,
}

/// In-memory Matrix backend. Failures are injected per call kind; every
/// attempt is recorded whether it succeeds or not.
#[derive(Default)]
pub struct FakeMatrix {
    calls: Mutex<Vec<Call>>,
    counter: AtomicUsize,
    pub fail_room_creation: AtomicBool,
    pub fail_space_creation: AtomicBool,
    pub fail_sends: AtomicBool,
    pub failing_invites: Mutex<HashSet<String>>,
    /// Artificial latency for creation calls, to widen race windows
    pub create_delay_ms: AtomicU64,
}

impl FakeMatrix {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_invite_for(&self, user_id: &str) {
        self.failing_invites
            .lock()
            .unwrap()
            .insert(user_id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded non-space creation attempts
    pub fn room_creations(&self) -> Vec<CreateRoomRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateRoom { request, .. } if !request.is_space() => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Recorded space creation attempts
    pub fn space_creations(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateRoom { request, .. } if request.is_space()))
            .count()
    }

    /// (msgtype, body) of every send attempted against `room_id`, in order
    pub fn sends_to(&self, room_id: &str) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send {
                    room_id: target,
                    msgtype,
                    body,
                    ..
                } if target == room_id => Some((msgtype, body)),
                _ => None,
            })
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Send { .. }))
            .count()
    }

    /// Invite attempts against `room_id`, in order
    pub fn invites_to(&self, room_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Invite {
                    room_id: target,
                    user_id,
                } if target == room_id => Some(user_id),
                _ => None,
            })
            .collect()
    }

    fn injected(endpoint: &str) -> MatrixError {
        MatrixError::Status {
            endpoint: endpoint.to_string(),
            status: 500,
            errcode: Some("M_UNKNOWN: injected failure".to_string()),
        }
    }
}

#[async_trait]
impl MatrixApi for FakeMatrix {
    async fn create_room(
        &self,
        _target: &HomeserverTarget,
        request: &CreateRoomRequest,
    ) -> Result<String, MatrixError> {
        let delay = self.create_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let is_space = request.is_space();
        let room_id = if is_space {
            format!("!space-{n}:deskhub.test")
        } else {
            format!("!room-{n}:deskhub.test")
        };
        self.calls.lock().unwrap().push(Call::CreateRoom {
            room_id: room_id.clone(),
            request: request.clone(),
        });

        if is_space && self.fail_space_creation.load(Ordering::Relaxed) {
            return Err(Self::injected("createRoom"));
        }
        if !is_space && self.fail_room_creation.load(Ordering::Relaxed) {
            return Err(Self::injected("createRoom"));
        }
        Ok(room_id)
    }

    async fn invite_user(
        &self,
        _target: &HomeserverTarget,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), MatrixError> {
        self.calls.lock().unwrap().push(Call::Invite {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        });
        if self.failing_invites.lock().unwrap().contains(user_id) {
            return Err(Self::injected("invite"));
        }
        Ok(())
    }

    async fn set_space_child(
        &self,
        _target: &HomeserverTarget,
        parent_id: &str,
        child_id: &str,
        _order: &str,
    ) -> Result<(), MatrixError> {
        self.calls.lock().unwrap().push(Call::SpaceChild {
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
        });
        Ok(())
    }

    async fn send_message(
        &self,
        _target: &HomeserverTarget,
        room_id: &str,
        txn_id: &str,
        content: &MessageContent,
    ) -> Result<String, MatrixError> {
        self.calls.lock().unwrap().push(Call::Send {
            room_id: room_id.to_string(),
            txn_id: txn_id.to_string(),
            msgtype: content.msgtype.to_string(),
            body: content.body.clone(),
        });
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(Self::injected("send"));
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(format!("$event-{n}"))
    }

    async fn whoami(&self, _target: &HomeserverTarget) -> Result<String, MatrixError> {
        self.calls.lock().unwrap().push(Call::Whoami);
        Ok("@deskhub:localhost".to_string())
    }
}

pub fn space_config() -> SpaceConfig {
    SpaceConfig {
        root: SpaceNodeConfig {
            name: "Customer Support".to_string(),
            topic: "All support conversations".to_string(),
        },
        channels: vec![ChannelSpaceConfig {
            key: "telegram".to_string(),
            name: "Telegram".to_string(),
            topic: "Conversations arriving via Telegram".to_string(),
        }],
    }
}

pub fn target() -> HomeserverTarget {
    HomeserverTarget {
        homeserver: "http://localhost:8008".to_string(),
        access_token: "syt_test".to_string(),
    }
}

pub fn department(id: &str, name: &str, staff: &[&str], admins: &[&str]) -> Department {
    Department {
        id: id.to_string(),
        name: name.to_string(),
        icon: String::new(),
        description: format!("{name} inquiries"),
        homeserver: "http://localhost:8008".to_string(),
        access_token: format!("syt_{id}"),
        bot_user_id: "@deskhub:localhost".to_string(),
        staff: staff.iter().map(|s| s.to_string()).collect(),
        admins: admins.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn external_user(id: &str, name: &str) -> ExternalUser {
    ExternalUser {
        id: id.to_string(),
        display_name: Some(name.to_string()),
        handle: Some(format!("{}_tg", name.to_lowercase())),
    }
}
