use crate::error::AppError;
use crate::middleware::guards::User;
use crate::services::live::{self, BadgeSnapshot, SeenBySnapshot};
use crate::services::read_service::ReadService;
use crate::state::AppState;
use crate::websocket::message_types::{WsInboundEvent, WsOutboundEvent};
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Conversation whose seen-by labels the client is looking at
    pub conversation_id: Option<Uuid>,
}

// WebSocket Actor
struct WsSession {
    user_id: Uuid,
    conversation_id: Option<Uuid>,
    state: AppState,
    hb: Instant,
}

impl WsSession {
    fn new(user_id: Uuid, conversation_id: Option<Uuid>, state: AppState) -> Self {
        Self {
            user_id,
            conversation_id,
            state,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &WsOutboundEvent) {
        match serde_json::to_string(event) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!(error = %e, "failed to encode WS event"),
        }
    }

    fn send_error(ctx: &mut ws::WebsocketContext<Self>, err: &AppError) {
        Self::send_event(
            ctx,
            &WsOutboundEvent::Error {
                message: err.to_string(),
            },
        );
    }

    /// Start the badge observer; its snapshots arrive as a stream on this actor
    fn follow_badge(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let store = self.state.store.clone();
        let registry = self.state.registry.clone();
        let user_id = self.user_id;

        ctx.spawn(
            async move { live::spawn_badge_tracker(store, registry, user_id).await }
                .into_actor(self)
                .map(|res, _act, ctx| match res {
                    Ok(rx) => {
                        ctx.add_stream(WatchStream::new(rx));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to start badge tracker");
                        Self::send_error(ctx, &e);
                    }
                }),
        );
    }

    fn follow_conversation(&self, conversation_id: Uuid, ctx: &mut ws::WebsocketContext<Self>) {
        let store = self.state.store.clone();
        let registry = self.state.registry.clone();
        let user_id = self.user_id;
        let page_limit = self.state.config.message_page_limit;

        ctx.spawn(
            async move {
                live::spawn_conversation_view(store, registry, user_id, conversation_id, page_limit)
                    .await
            }
            .into_actor(self)
            .map(move |res, _act, ctx| match res {
                Ok(rx) => {
                    ctx.add_stream(WatchStream::new(rx));
                }
                Err(e) => {
                    tracing::warn!(%conversation_id, error = %e, "failed to start seen-by view");
                    Self::send_error(ctx, &e);
                }
            }),
        );
    }

    // Results of a mark-read still in flight when the socket closes are dropped
    // with the actor; the forward-only watermark makes a retry harmless.
    fn handle_inbound(&self, evt: WsInboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match evt {
            WsInboundEvent::MarkRead {
                conversation_id,
                message_id,
            } => {
                let store = self.state.store.clone();
                let registry = self.state.registry.clone();
                let user_id = self.user_id;

                ctx.spawn(
                    async move {
                        ReadService::mark_read(
                            store.as_ref(),
                            &registry,
                            user_id,
                            conversation_id,
                            message_id,
                        )
                        .await
                    }
                    .into_actor(self)
                    .map(move |res, _act, ctx| {
                        if let Err(e) = res {
                            tracing::debug!(%conversation_id, %message_id, error = %e, "WS mark-read rejected");
                            Self::send_error(ctx, &e);
                        }
                    }),
                );
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            conversation_id = ?self.conversation_id,
            "WebSocket session started"
        );

        self.hb(ctx);
        self.follow_badge(ctx);
        if let Some(conversation_id) = self.conversation_id {
            self.follow_conversation(conversation_id, ctx);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // observers unsubscribe once their streams are dropped with the context
        tracing::info!(user_id = %self.user_id, "WebSocket session stopped");
    }
}

impl StreamHandler<BadgeSnapshot> for WsSession {
    fn handle(&mut self, snapshot: BadgeSnapshot, ctx: &mut Self::Context) {
        Self::send_event(ctx, &snapshot.into());
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(user_id = %self.user_id, "badge stream ended");
    }
}

impl StreamHandler<SeenBySnapshot> for WsSession {
    fn handle(&mut self, snapshot: SeenBySnapshot, ctx: &mut Self::Context) {
        Self::send_event(ctx, &snapshot.into());
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(
            user_id = %self.user_id,
            conversation_id = ?self.conversation_id,
            "seen-by stream ended"
        );
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
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<WsInboundEvent>(&text) {
                Ok(evt) => self.handle_inbound(evt, ctx),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse WS message");
                    Self::send_error(ctx, &AppError::BadRequest(format!("invalid event: {e}")));
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// GET /ws
/// Live badge for the caller, plus seen-by labels for `conversation_id`
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    user: User,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();

    // reject before upgrading so the client gets a plain HTTP status
    if let Some(conversation_id) = params.conversation_id {
        ReadService::require_member(state.store.as_ref(), conversation_id, user.id).await?;
    }

    let session = WsSession::new(user.id, params.conversation_id, state.get_ref().clone());
    ws::start(session, &req, stream)
}
