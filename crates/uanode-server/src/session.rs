//! Client sessions.
//!
//! One task per WebSocket connection. The session:
//! - Sends a Hello with its session id and the advertised endpoints
//! - Answers read, write, browse and subscription requests
//! - Forwards data changes from its notification queue
//! - Closes all of its subscriptions when the client goes away

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode as HttpStatus;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use uanode_core::{MemoryNodeStore, NodeStore, StatusCode};
use uanode_protocol::{
    decode_client_message, encode_server_message, format_timestamp, request_id_of, BrowseResponse,
    ClientMessage, CodecError, CreateSubscriptionSpec, DataChangeNotification, EndpointDescription,
    ErrorResponse as ProtocolError, HelloMessage, ReadResponse, ReferenceDescription,
    ServerMessage, SubscriptionCreatedResponse, SubscriptionStatusResponse, WriteResponse,
};

use crate::engine::{EngineError, ItemRequest, SubscriptionEngine, SubscriptionRequest};
use crate::queue::NotificationQueue;
use crate::subscription::Notification;

/// WebSocket path clients connect to.
pub const STREAM_PATH: &str = "/uanode/v1/stream";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Identity sent in every Hello.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub product_name: String,
    pub build_number: String,
    pub build_date: String,
    pub endpoints: Vec<EndpointDescription>,
}

impl ServerIdentity {
    fn hello(&self, session_id: &str) -> HelloMessage {
        let mut hello = HelloMessage::new(&self.name, &self.product_name, session_id);
        hello.build_number = self.build_number.clone();
        hello.build_date = self.build_date.clone();
        hello.endpoints = self.endpoints.clone();
        hello
    }
}

/// State shared by every session of one server.
pub struct SessionContext {
    pub store: Arc<MemoryNodeStore>,
    pub engine: Arc<SubscriptionEngine>,
    pub identity: ServerIdentity,
    pub queue_capacity: usize,
}

/// Per-connection request handler, independent of the socket.
pub struct Session {
    id: String,
    ctx: Arc<SessionContext>,
    queue: NotificationQueue,
}

impl Session {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        let queue = NotificationQueue::new(ctx.queue_capacity);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ctx,
            queue,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn hello(&self) -> ServerMessage {
        ServerMessage::Hello(self.ctx.identity.hello(&self.id))
    }

    /// Decode and answer one text frame.
    pub async fn handle_text(&self, text: &str) -> ServerMessage {
        match decode_client_message(text) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                debug!(session = %self.id, "undecodable request: {}", e);
                ServerMessage::Error(ProtocolError {
                    request_id: request_id_of(text),
                    status_code: e.status_code(),
                    message: e.to_string(),
                })
            }
        }
    }

    pub async fn handle_message(&self, msg: ClientMessage) -> ServerMessage {
        debug!(session = %self.id, request = msg.request_id(), "handling request");
        let store = self.ctx.store.as_ref();
        match msg {
            ClientMessage::Read(req) => {
                let node_id = req.read.node_id;
                match store.read(&node_id) {
                    Ok(dv) => ServerMessage::Read(ReadResponse::from_data_value(
                        req.request_id,
                        node_id,
                        dv,
                    )),
                    Err(e) => {
                        debug!(session = %self.id, "read failed: {}", e);
                        ServerMessage::Read(ReadResponse::failed(
                            req.request_id,
                            node_id,
                            e.status_code(),
                        ))
                    }
                }
            }
            ClientMessage::Write(req) => {
                let node_id = req.write.node_id;
                let status_code = match store.write(&node_id, req.write.value) {
                    Ok(()) => {
                        debug!(session = %self.id, node = %node_id, "value written");
                        StatusCode::GOOD
                    }
                    Err(e) => {
                        debug!(session = %self.id, "write failed: {}", e);
                        e.status_code()
                    }
                };
                ServerMessage::Write(WriteResponse {
                    request_id: req.request_id,
                    node_id,
                    status_code,
                })
            }
            ClientMessage::Browse(req) => {
                let node_id = req.browse.node_id;
                let (status_code, references) = match store.children(&node_id) {
                    Ok(children) => (
                        StatusCode::GOOD,
                        children
                            .into_iter()
                            .map(ReferenceDescription::from)
                            .collect(),
                    ),
                    Err(e) => (e.status_code(), Vec::new()),
                };
                ServerMessage::Browse(BrowseResponse {
                    request_id: req.request_id,
                    node_id,
                    status_code,
                    references,
                })
            }
            ClientMessage::CreateSubscription(req) => {
                self.create_subscription(req.request_id, req.create_subscription)
            }
            ClientMessage::CancelSubscription(req) => {
                let id = req.cancel_subscription.subscription_id;
                let result = self.ctx.engine.cancel_subscription(&self.id, id).await;
                status_response(req.request_id, id, result.map(|_| ()))
            }
            ClientMessage::SetPublishingMode(req) => {
                let spec = req.set_publishing_mode;
                let result = self
                    .ctx
                    .engine
                    .set_publishing_mode(&self.id, spec.subscription_id, spec.enabled);
                status_response(req.request_id, spec.subscription_id, result.map(|_| ()))
            }
        }
    }

    fn create_subscription(&self, request_id: String, spec: CreateSubscriptionSpec) -> ServerMessage {
        let items = spec
            .node_ids
            .into_iter()
            .map(|node_id| ItemRequest {
                node_id,
                sampling_interval: None,
            })
            .chain(spec.items.into_iter().map(|item| ItemRequest {
                node_id: item.node_id,
                sampling_interval: item.sampling_interval.map(Duration::from_millis),
            }))
            .collect();
        let request = SubscriptionRequest {
            items,
            sampling_interval: spec.sampling_interval.map(Duration::from_millis),
        };

        match self
            .ctx
            .engine
            .create_subscription(&self.id, request, self.queue.clone())
        {
            Ok(created) => ServerMessage::SubscriptionCreated(SubscriptionCreatedResponse {
                request_id,
                subscription_id: created.subscription_id,
                revised_sampling_interval: created.revised_sampling_interval.as_millis() as u64,
                status_code: StatusCode::GOOD,
                item_status_codes: created.item_results,
            }),
            Err(EngineError::NoItems(item_status_codes)) => {
                ServerMessage::SubscriptionCreated(SubscriptionCreatedResponse {
                    request_id,
                    subscription_id: 0,
                    revised_sampling_interval: 0,
                    status_code: StatusCode::BAD_NOTHING_TO_DO,
                    item_status_codes,
                })
            }
            Err(e) => ServerMessage::Error(ProtocolError {
                request_id: Some(request_id),
                status_code: e.status_code(),
                message: e.to_string(),
            }),
        }
    }

    /// Release everything owned by this session.
    pub async fn close(&self) {
        self.queue.close();
        self.ctx.engine.close_session(&self.id).await;
    }
}

fn status_response(
    request_id: String,
    subscription_id: u32,
    result: Result<(), EngineError>,
) -> ServerMessage {
    ServerMessage::SubscriptionStatus(SubscriptionStatusResponse {
        request_id,
        subscription_id,
        status_code: match result {
            Ok(()) => StatusCode::GOOD,
            Err(e) => e.status_code(),
        },
    })
}

fn data_change(n: Notification) -> ServerMessage {
    ServerMessage::DataChange(DataChangeNotification {
        subscription_id: n.subscription_id,
        sequence_number: n.sequence_number,
        node_id: n.node_id,
        value: n.value.value,
        status_code: n.value.status,
        source_timestamp: format_timestamp(n.value.source_timestamp),
    })
}

fn text(msg: &ServerMessage) -> Result<Message, SessionError> {
    Ok(Message::Text(encode_server_message(msg)?))
}

/// Drive one WebSocket connection until the client leaves or the server stops.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<SessionContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SessionError> {
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() == STREAM_PATH {
            Ok(resp)
        } else {
            let mut not_found = ErrorResponse::new(Some(format!("use {}", STREAM_PATH)));
            *not_found.status_mut() = HttpStatus::NOT_FOUND;
            Err(not_found)
        }
    })
    .await?;

    let session = Session::new(ctx);
    info!(session = %session.id(), "new session from {}", addr);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    ws_tx.send(text(&session.hello())?).await?;

    let result = async {
        if *shutdown.borrow() {
            return Ok(());
        }
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!(session = %session.id(), "server stopping");
                    break;
                }

                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(body))) => {
                        let reply = session.handle_text(&body).await;
                        ws_tx.send(text(&reply)?).await?;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::Error(ProtocolError {
                            request_id: None,
                            status_code: StatusCode::BAD_DECODING_ERROR,
                            message: CodecError::BinaryFrame.to_string(),
                        });
                        ws_tx.send(text(&reply)?).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session = %session.id(), "client {} disconnected", addr);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session = %session.id(), "websocket error from {}: {}", addr, e);
                        break;
                    }
                },

                notification = session.queue().recv() => match notification {
                    Some(n) => ws_tx.send(text(&data_change(n))?).await?,
                    None => break,
                },
            }
        }
        Ok::<(), SessionError>(())
    }
    .await;

    session.close().await;
    let _ = ws_tx.send(Message::Close(None)).await;

    if let Err(e) = &result {
        error!(session = %session.id(), "session ended with error: {}", e);
    }
    result
}
