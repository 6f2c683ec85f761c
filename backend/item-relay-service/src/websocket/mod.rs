/// WebSocket delivery
///
/// Architecture:
/// 1. ConnectionHub: live sessions hosted by this process, keyed by connection id
/// 2. ConnectionPusher: the push seam used by the notification dispatcher
/// 3. InstanceRelay: forwards frames to the instance that hosts a connection
/// 4. WsSession: actix actor bridging a socket to its hub channel
pub mod hub;
pub mod messages;
pub mod relay;
pub mod session;

pub use hub::ConnectionHub;
pub use messages::PushMessage;
pub use relay::{InstanceRelay, RedisRelay, RelayedFrame};
pub use session::WsSession;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Connection;

#[derive(Debug, Error)]
pub enum PushError {
    /// The connection no longer exists; its registry entry should be pruned.
    #[error("connection {0} is gone")]
    Gone(String),

    /// Hosted by another instance that cannot be reached from here. The
    /// registration stays; only the hosting instance may prune it.
    #[error("connection {0} is not hosted by this instance")]
    NotHosted(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl PushError {
    pub fn is_gone(&self) -> bool {
        matches!(self, PushError::Gone(_))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionPusher: Send + Sync {
    async fn push(&self, connection: &Connection, message: &PushMessage) -> Result<(), PushError>;
}
