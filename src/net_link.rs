use crate::audio::EncodedFrame;
use crate::config::Config;
use crate::protocol::{ClientMessage, ServerContent, ServerMessage};
use crate::session::{DuplexSession, LiveConnector, SessionEvent};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub enum LinkCommand {
    Send(EncodedFrame),
    Close,
}

/// WebSocket transport for the live generation endpoint.
pub struct LiveLink {
    url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl LiveLink {
    pub fn new(config: &Config, api_key: String) -> Self {
        Self {
            url: config.live_url.to_string(),
            api_key,
            model: config.live_model.to_string(),
            voice: config.live_voice.to_string(),
        }
    }

    fn request(&self) -> anyhow::Result<Request<()>> {
        let url = Url::parse(&self.url).with_context(|| format!("Invalid live URL {}", self.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            anyhow::bail!("Live URL must be ws:// or wss://, got {}", url.scheme());
        }
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("x-goog-api-key", HeaderValue::from_str(&self.api_key)?);
        Ok(request)
    }
}

#[async_trait]
impl LiveConnector for LiveLink {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<Box<dyn DuplexSession>> {
        let request = self.request()?;
        let setup = serde_json::to_string(&ClientMessage::setup(&self.model, &self.voice))?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            match run_link(request, setup, cmd_rx, &events).await {
                Ok(reason) => {
                    log::info!("Live link closed: {}", reason.as_deref().unwrap_or("-"));
                    let _ = events.send(SessionEvent::Close(reason));
                }
                Err(e) => {
                    log::error!("Live link error: {:#}", e);
                    let _ = events.send(SessionEvent::Error(format!("{:#}", e)));
                }
            }
        });

        Ok(Box::new(LiveSession { cmd_tx }))
    }
}

/// Handle the bridge holds for an open link.
pub struct LiveSession {
    cmd_tx: mpsc::UnboundedSender<LinkCommand>,
}

impl DuplexSession for LiveSession {
    fn send(&self, frame: EncodedFrame) -> anyhow::Result<()> {
        self.cmd_tx
            .send(LinkCommand::Send(frame))
            .map_err(|_| anyhow::anyhow!("Live link is gone"))
    }

    fn close(&self) -> anyhow::Result<()> {
        self.cmd_tx
            .send(LinkCommand::Close)
            .map_err(|_| anyhow::anyhow!("Live link is already closed"))
    }
}

enum Inbound {
    Continue,
    /// The bridge dropped its event receiver
    Abandoned,
}

fn handle_server_text(text: &str, events: &mpsc::UnboundedSender<SessionEvent>) -> Inbound {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("Ignoring unparseable server message: {}", e);
            return Inbound::Continue;
        }
    };

    if msg.setup_complete.is_some() {
        log::info!("Live session setup complete");
        if events.send(SessionEvent::Open).is_err() {
            return Inbound::Abandoned;
        }
    }
    if let Some(content) = msg.server_content {
        if events
            .send(SessionEvent::Message(ServerContent::from(content)))
            .is_err()
        {
            return Inbound::Abandoned;
        }
    }
    if let Some(go_away) = msg.go_away {
        log::warn!("Server is about to close the session: {}", go_away);
    }
    Inbound::Continue
}

// Handshake, setup, then pump frames out and server messages in until either side closes
async fn run_link(
    request: Request<()>,
    setup: String,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> anyhow::Result<Option<String>> {
    log::info!("Connecting to {}...", request.uri());
    let (ws_stream, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(request))
        .await
        .context("Timed out opening live session")??;
    log::info!("Connected, sending setup");

    let (mut write, mut read) = ws_stream.split();
    write.send(Message::Text(setup.into())).await?;

    loop {
        tokio::select! {
            msg = read.next() => {
                let flow = match msg {
                    Some(Ok(Message::Text(text))) => handle_server_text(text.as_str(), events),
                    // the service frames its JSON as binary messages too
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_server_text(text, events),
                        Err(_) => {
                            log::warn!("Ignoring {} bytes of non-UTF-8 binary data", data.len());
                            Inbound::Continue
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(frame.map(|f| format!("{} {}", f.code, f.reason)));
                    }
                    Some(Ok(_)) => Inbound::Continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(None),
                };
                if let Inbound::Abandoned = flow {
                    log::info!("Session was cancelled while connecting, closing");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Some("cancelled".to_string()));
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCommand::Send(frame)) => {
                        let json = serde_json::to_string(&ClientMessage::audio(frame))?;
                        write.send(Message::Text(json.into())).await?;
                    }
                    Some(LinkCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(Some("closed by client".to_string()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_complete_becomes_open_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(matches!(
            handle_server_text(r#"{"setupComplete":{}}"#, &tx),
            Inbound::Continue
        ));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Open);
    }

    #[test]
    fn dropped_receiver_abandons_the_link() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(matches!(
            handle_server_text(r#"{"setupComplete":{}}"#, &tx),
            Inbound::Abandoned
        ));
    }

    #[test]
    fn garbage_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(matches!(handle_server_text("not json", &tx), Inbound::Continue));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn request_carries_key_header() {
        let link = LiveLink {
            url: "wss://example.com/live".into(),
            api_key: "secret".into(),
            model: "m".into(),
            voice: "v".into(),
        };
        let request = link.request().unwrap();
        assert_eq!(request.headers()["x-goog-api-key"], "secret");

        let bad = LiveLink {
            url: "https://example.com/live".into(),
            ..link
        };
        assert!(bad.request().is_err());
    }
}
