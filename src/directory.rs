//! Space directory
//!
//! Resolves the two-level space hierarchy (root space → per-channel space)
//! into stable room ids, creating missing nodes idempotently.
//!
//! Concurrency: the root space is guarded by a `OnceCell` and channel entries
//! by moka's `try_get_with`, which collapses concurrent lookups for the same
//! key into a single in-flight creation (single-flight). A failed creation
//! populates nothing, so the next call retries; unrelated keys never contend.

use moka::future::Cache;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::{ChannelSpaceConfig, SpaceConfig};
use crate::error::ProvisioningError;
use crate::matrix::{CreateRoomRequest, HomeserverTarget, MatrixApi, MatrixError};

pub struct SpaceDirectory {
    api: Arc<dyn MatrixApi>,
    target: HomeserverTarget,
    config: SpaceConfig,
    root: OnceCell<String>,
    channels: Cache<String, String>,
}

impl SpaceDirectory {
    pub fn new(api: Arc<dyn MatrixApi>, target: HomeserverTarget, config: SpaceConfig) -> Self {
        Self {
            api,
            target,
            config,
            root: OnceCell::new(),
            channels: Cache::builder().build(),
        }
    }

    /// Resolve the space for `channel_key`, creating the hierarchy on first
    /// use. Identical concurrent calls share one creation attempt.
    pub async fn resolve_channel_space(
        &self,
        channel_key: &str,
    ) -> Result<String, ProvisioningError> {
        let channel = self
            .config
            .channel(channel_key)
            .ok_or_else(|| ProvisioningError::UnknownChannel(channel_key.to_string()))?
            .clone();

        self.channels
            .try_get_with(channel_key.to_string(), self.create_channel_space(&channel))
            .await
            .map_err(|e: Arc<MatrixError>| ProvisioningError::Space(e.to_string()))
    }

    async fn create_channel_space(
        &self,
        channel: &ChannelSpaceConfig,
    ) -> Result<String, MatrixError> {
        let root_id = self
            .root
            .get_or_try_init(|| self.create_root_space())
            .await?
            .clone();

        let request = space_request(&channel.name, &channel.topic);
        let space_id = self.api.create_room(&self.target, &request).await?;
        info!("Created channel space {} ({})", space_id, channel.key);

        // Link failure is non-fatal; the link is idempotent and can be
        // re-asserted, a lost space id cannot.
        if let Err(e) = self
            .api
            .set_space_child(&self.target, &root_id, &space_id, &order_key())
            .await
        {
            warn!("Failed to link space {} under {}: {}", space_id, root_id, e);
        }

        Ok(space_id)
    }

    async fn create_root_space(&self) -> Result<String, MatrixError> {
        let request = space_request(&self.config.root.name, &self.config.root.topic);
        let space_id = self.api.create_room(&self.target, &request).await?;
        info!("Created root space {}", space_id);
        Ok(space_id)
    }
}

fn space_request(name: &str, topic: &str) -> CreateRoomRequest {
    CreateRoomRequest {
        name: name.to_string(),
        topic: topic.to_string(),
        preset: "private_chat",
        visibility: None,
        creation_content: Some(serde_json::json!({ "type": "m.space" })),
        initial_state: Vec::new(),
    }
}

/// Display-ordering key for `m.space.child` links; ties are harmless.
pub(crate) fn order_key() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}
