use std::collections::HashMap;
use std::sync::Arc;

use rocket::futures::{stream::SplitSink, SinkExt, StreamExt};
use rocket::{Route, State};
use rocket_ws as ws;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::model::{
    auth::{AuthToken, Voter},
    mongodb::{ApiId, Id},
};
use crate::realtime::{CampaignEvent, Hub, Session};

pub fn routes() -> Vec<Route> {
    routes![live]
}

/// Shared handle on the outgoing half of a connection, so per-room
/// forwarder tasks can interleave their sends.
type SharedSink = Arc<Mutex<SplitSink<ws::stream::DuplexStream, ws::Message>>>;

/// The realtime subscription endpoint. The auth guard runs against the
/// upgrade request, so an unauthenticated connection never reaches the
/// socket loop at all, let alone a room.
#[get("/live")]
fn live(
    token: AuthToken<Voter>,
    hub: &State<Arc<Hub>>,
    ws: ws::WebSocket,
) -> ws::Channel<'static> {
    let hub = hub.inner().clone();
    // The typed session record is created exactly once, from the verified
    // token, and lives for the whole connection.
    let session = Session::new(token.id(), token.rights());
    ws.channel(move |stream| Box::pin(handle_connection(stream, hub, session)))
}

/// The per-connection loop:
/// 1. Split the socket into sender and receiver halves.
/// 2. Process client frames (join, leave, ping).
/// 3. For each joined room, a forwarder task copies the room's events to
///    this connection.
/// 4. On disconnect, every forwarder is aborted, which is all it takes to
///    leave every room.
async fn handle_connection(
    stream: ws::stream::DuplexStream,
    hub: Arc<Hub>,
    mut session: Session,
) -> ws::result::Result<()> {
    let (sink, mut source) = stream.split();
    let sink: SharedSink = Arc::new(Mutex::new(sink));
    let mut forwarders: HashMap<Id, JoinHandle<()>> = HashMap::new();

    debug!("Live connection opened for user {}", session.user_id());

    while let Some(message) = source.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!("Live connection receive error: {err}");
                break;
            }
        };
        match message {
            ws::Message::Text(text) => {
                handle_client_frame(&text, &hub, &mut session, &mut forwarders, &sink).await;
            }
            ws::Message::Close(_) => break,
            // Tungstenite answers pings on its own.
            _ => {}
        }
    }

    // Client disconnected: abort all forwarders, implicitly leaving every
    // room this connection was a member of.
    for (_, handle) in forwarders.drain() {
        handle.abort();
    }
    debug!("Live connection closed for user {}", session.user_id());
    Ok(())
}

/// Process a single text frame from the client.
async fn handle_client_frame(
    text: &str,
    hub: &Hub,
    session: &mut Session,
    forwarders: &mut HashMap<Id, JoinHandle<()>>,
    sink: &SharedSink,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            send(sink, &ServerFrame::Error {
                message: format!("Invalid message: {err}"),
            })
            .await;
            return;
        }
    };

    match frame {
        ClientFrame::JoinCampaign { campaign_id } => {
            // Idempotent: a second join for the same room keeps the
            // existing forwarder.
            if let Some(rx) = session.join(hub, *campaign_id) {
                let forwarder = tokio::spawn(forward_events(rx, Arc::clone(sink)));
                forwarders.insert(*campaign_id, forwarder);
                debug!("User {} joined campaign {campaign_id}", session.user_id());
            }
            send(sink, &ServerFrame::Joined { campaign_id }).await;
        }
        ClientFrame::LeaveCampaign { campaign_id } => {
            if session.leave(*campaign_id) {
                if let Some(forwarder) = forwarders.remove(&*campaign_id) {
                    forwarder.abort();
                }
                debug!("User {} left campaign {campaign_id}", session.user_id());
                send(sink, &ServerFrame::Left { campaign_id }).await;
            } else {
                send(sink, &ServerFrame::Error {
                    message: format!("Not subscribed to campaign {campaign_id}"),
                })
                .await;
            }
        }
        ClientFrame::Ping => {
            send(sink, &ServerFrame::Pong).await;
        }
    }
}

/// Forwarder task: copies a room's events to one connection. A member that
/// joins mid-emission either gets an event whole or not at all; the
/// broadcast channel hands over complete events only.
async fn forward_events(mut rx: broadcast::Receiver<CampaignEvent>, sink: SharedSink) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!("Failed to serialize campaign event: {err}");
                        continue;
                    }
                };
                let mut sink = sink.lock().await;
                if sink.send(ws::Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Live connection lagged behind by {n} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send(sink: &SharedSink, frame: &ServerFrame) {
    if let Ok(payload) = serde_json::to_string(frame) {
        let mut sink = sink.lock().await;
        let _ = sink.send(ws::Message::Text(payload)).await;
    }
}

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    JoinCampaign { campaign_id: ApiId },
    #[serde(rename_all = "camelCase")]
    LeaveCampaign { campaign_id: ApiId },
    Ping,
}

/// Control frames sent back to the client, alongside the room events
/// themselves.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Joined { campaign_id: ApiId },
    #[serde(rename_all = "camelCase")]
    Left { campaign_id: ApiId },
    Error { message: String },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let id = Id::new();
        let frame: ClientFrame = serde_json::from_str(&format!(
            r#"{{"action":"joinCampaign","campaignId":"{id}"}}"#
        ))
        .unwrap();
        assert!(matches!(frame, ClientFrame::JoinCampaign { campaign_id } if *campaign_id == id));

        let frame: ClientFrame = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"action":"selfDestruct"}"#).is_err());
    }

    #[test]
    fn server_frames_are_tagged() {
        let payload = serde_json::to_string(&ServerFrame::Joined {
            campaign_id: Id::new().into(),
        })
        .unwrap();
        assert!(payload.contains(r#""event":"joined""#));
        assert!(payload.contains("campaignId"));
    }
}
