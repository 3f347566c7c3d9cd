//! DeskHub
//!
//! Telegram → Matrix department router. Routes each external user's
//! conversation into a department-scoped Matrix room nested under a stable
//! space hierarchy, with bidirectional message relay.
//!
//! # Architecture
//!
//! ```text
//! Telegram update ──► transport adapter ──► Session Router
//!                                               │
//!                            ┌──────────────────┼──────────────┐
//!                            ▼                  ▼              ▼
//!                    Department Registry  Space Directory  Message Relay
//!                                               │              │
//!                                               ▼              │
//!                                        Room Provisioner      │
//!                                               │              │
//!                                               ▼              ▼
//!                                          Matrix homeserver (HTTP)
//! ```
//!
//! One generic router core; transports plug in via `transport::InboundEvent`
//! and `transport::OutboundReply`.

pub mod config;
pub mod directory;
pub mod error;
pub mod matrix;
pub mod provisioner;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
pub mod telegram;
pub mod transport;

pub use config::{ChannelSpaceConfig, Config, ConfigError, Department, RouterConfig, SpaceConfig};
pub use directory::SpaceDirectory;
pub use error::{ProvisioningError, RelayError};
pub use matrix::{
    CreateRoomRequest, HomeserverTarget, MatrixApi, MatrixClient, MatrixError, MessageContent,
    StateEvent,
};
pub use provisioner::{InviteWarning, ProvisionOutcome, RoomProvisioner};
pub use registry::DepartmentRegistry;
pub use relay::MessageRelay;
pub use router::SessionRouter;
pub use session::{ConversationSession, SessionState, SessionStore};
pub use transport::{DepartmentOption, ExternalUser, InboundEvent, OutboundReply};
