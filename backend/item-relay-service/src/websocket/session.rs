use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::ConnectionHub;
use crate::services::ConnectionEvents;

// WebSocket actor for one client connection
pub struct WsSession {
    connection_id: String,
    events: Arc<ConnectionEvents>,
    hub: Arc<ConnectionHub>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    outbound: Option<UnboundedReceiver<String>>,
}

impl WsSession {
    /// `outbound` is the hub channel attached for `connection_id` before the upgrade.
    pub fn new(
        connection_id: String,
        events: Arc<ConnectionEvents>,
        hub: Arc<ConnectionHub>,
        outbound: UnboundedReceiver<String>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            events,
            hub,
            hb: Instant::now(),
            heartbeat_interval,
            client_timeout,
            outbound: Some(outbound),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    connection_id = %act.connection_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "WebSocket session started");

        self.hb(ctx);

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "WebSocket session stopped");

        let hub = self.hub.clone();
        let events = self.events.clone();
        let connection_id = self.connection_id.clone();

        actix::spawn(async move {
            hub.detach(&connection_id).await;
            if let Err(e) = events.disconnect(&connection_id).await {
                tracing::error!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to remove connection"
                );
            }
        });
    }
}

// Frames pushed through the hub
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(connection_id = %self.connection_id, "Hub channel closed");
        ctx.stop();
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                let events = self.events.clone();
                let connection_id = self.connection_id.clone();
                let body = text.to_string();

                actix::spawn(async move {
                    if let Err(e) = events.message(&connection_id, &body).await {
                        tracing::warn!(
                            connection_id = %connection_id,
                            error = %e,
                            "Failed to handle WebSocket message"
                        );
                    }
                });
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}
