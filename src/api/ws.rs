use std::collections::HashSet;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::principal_from_token;
use crate::core::state::AppState;
use crate::services::attempt_lifecycle::Principal;
use crate::services::realtime::{RealtimeEvent, Topic};

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientCommand {
    JoinAttempt {
        #[serde(alias = "attemptId")]
        attempt_id: Uuid,
    },
    LeaveAttempt {
        #[serde(alias = "attemptId")]
        attempt_id: Uuid,
    },
    JoinAdmin,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerReply {
    Joined { topic: Topic },
    Left { topic: Topic },
    Error { detail: String },
}

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/ws", get(connect))
}

async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectQuery>,
) -> Result<Response, ApiError> {
    let principal = principal_from_token(&params.token, state.settings())?;
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, state, principal)))
}

/// Decides whether `principal` may follow `topic`.
async fn authorize(state: &AppState, principal: &Principal, topic: Topic) -> Result<(), String> {
    match topic {
        Topic::Admin if principal.role.is_staff() => Ok(()),
        Topic::Admin => Err("Admin access required".to_string()),
        Topic::Attempt(attempt_id) => {
            let attempt = state
                .attempts()
                .store()
                .find_attempt(attempt_id)
                .await
                .map_err(|err| {
                    tracing::error!(error = %err, attempt_id = %attempt_id, "Failed to load attempt for subscription");
                    "Failed to load attempt".to_string()
                })?
                .ok_or_else(|| "Attempt not found".to_string())?;

            if attempt.user_id == principal.user_id || principal.role.is_staff() {
                Ok(())
            } else {
                Err("Access denied".to_string())
            }
        }
    }
}

async fn handle_command(
    state: &AppState,
    principal: &Principal,
    subscriptions: &mut HashSet<Topic>,
    text: &str,
) -> ServerReply {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(err) => return ServerReply::Error { detail: format!("Invalid command: {err}") },
    };

    let topic = match command {
        ClientCommand::LeaveAttempt { attempt_id } => {
            let topic = Topic::Attempt(attempt_id);
            subscriptions.remove(&topic);
            return ServerReply::Left { topic };
        }
        ClientCommand::JoinAttempt { attempt_id } => Topic::Attempt(attempt_id),
        ClientCommand::JoinAdmin => Topic::Admin,
    };

    match authorize(state, principal, topic).await {
        Ok(()) => {
            subscriptions.insert(topic);
            ServerReply::Joined { topic }
        }
        Err(detail) => ServerReply::Error { detail },
    }
}

fn forwards(subscriptions: &HashSet<Topic>, event: &RealtimeEvent) -> bool {
    subscriptions.contains(&event.topic)
}

async fn serve_socket(socket: WebSocket, state: AppState, principal: Principal) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.hub().subscribe();
    let mut subscriptions = HashSet::new();

    tracing::debug!(user_id = %principal.user_id, "Realtime socket connected");

    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_command(&state, &principal, &mut subscriptions, &text).await;
                    serde_json::to_string(&reply)
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "Realtime socket read failed");
                    break;
                }
            },
            received = events.recv() => match received {
                Ok(event) if forwards(&subscriptions, &event) => serde_json::to_string(&event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, user_id = %principal.user_id, "Realtime socket lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let frame = match outgoing {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to encode realtime frame");
                continue;
            }
        };
        if sender.send(Message::Text(frame)).await.is_err() {
            break;
        }
    }

    tracing::debug!(user_id = %principal.user_id, "Realtime socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::realtime::events::EventKind;
    use crate::test_support;
    use serde_json::json;

    #[tokio::test]
    async fn students_join_only_their_own_attempt() {
        let ctx = test_support::setup_test_context().await;
        let definition = test_support::single_choice_test(30, 1, 1);
        let test_id = definition.test.id;
        ctx.store.put_test(definition).await;

        let owner = test_support::student();
        let stranger = test_support::student();
        let started = ctx.state.attempts().start(owner, test_id, None).await.expect("start");
        let command = json!({"action": "join_attempt", "attempt_id": started.attempt.id}).to_string();

        let mut subscriptions = HashSet::new();
        let reply = handle_command(&ctx.state, &stranger, &mut subscriptions, &command).await;
        assert!(matches!(reply, ServerReply::Error { .. }));
        assert!(subscriptions.is_empty());

        let reply = handle_command(&ctx.state, &owner, &mut subscriptions, &command).await;
        assert!(matches!(reply, ServerReply::Joined { topic } if topic == Topic::Attempt(started.attempt.id)));
        assert!(subscriptions.contains(&Topic::Attempt(started.attempt.id)));
    }

    #[tokio::test]
    async fn join_admin_requires_staff_role() {
        let ctx = test_support::setup_test_context().await;
        let command = json!({"action": "join_admin"}).to_string();

        let mut subscriptions = HashSet::new();
        let reply =
            handle_command(&ctx.state, &test_support::student(), &mut subscriptions, &command).await;
        assert!(matches!(reply, ServerReply::Error { .. }));

        let reply =
            handle_command(&ctx.state, &test_support::admin(), &mut subscriptions, &command).await;
        assert!(matches!(reply, ServerReply::Joined { topic: Topic::Admin }));
    }

    #[tokio::test]
    async fn leave_attempt_stops_forwarding() {
        let ctx = test_support::setup_test_context().await;
        let attempt_id = Uuid::new_v4();
        let topic = Topic::Attempt(attempt_id);
        let event = RealtimeEvent { topic, event: EventKind::AnswerSubmitted, payload: json!({}) };

        let mut subscriptions = HashSet::from([topic]);
        assert!(forwards(&subscriptions, &event));

        let command = json!({"action": "leave_attempt", "attemptId": attempt_id}).to_string();
        let reply =
            handle_command(&ctx.state, &test_support::student(), &mut subscriptions, &command).await;

        assert!(matches!(reply, ServerReply::Left { .. }));
        assert!(!forwards(&subscriptions, &event));
    }

    #[tokio::test]
    async fn malformed_command_is_reported() {
        let ctx = test_support::setup_test_context().await;
        let mut subscriptions = HashSet::new();

        let reply =
            handle_command(&ctx.state, &test_support::student(), &mut subscriptions, "{\"action\":\"dance\"}")
                .await;

        let encoded = serde_json::to_value(&reply).expect("encode");
        assert_eq!(encoded["type"], "error");
    }
}
