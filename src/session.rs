//! The duplex-session seam between the bridge and whatever carries audio to
//! the remote service.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::EncodedFrame;
pub use crate::protocol::{InlineAudio, ServerContent};

/// Everything a session reports back, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Open,
    Message(ServerContent),
    Error(String),
    Close(Option<String>),
}

/// Opens duplex sessions. Implementations return as soon as the attempt is
/// under way and report the outcome through `events`.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<Box<dyn DuplexSession>>;
}

/// Send side of an open session. Neither call blocks: frames queue in the
/// transport's own buffer.
pub trait DuplexSession: Send {
    fn send(&self, frame: EncodedFrame) -> anyhow::Result<()>;

    fn close(&self) -> anyhow::Result<()>;
}
