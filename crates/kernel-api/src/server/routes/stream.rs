use super::*;

#[derive(Debug, Deserialize)]
pub(in crate::server) struct StreamQuery {
    zone_id: Option<String>,
}

pub(in crate::server) async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let rx = state.api.subscribe();
    ws.on_upgrade(move |socket| stream_socket(socket, rx, query.zone_id))
}

async fn stream_socket(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<TickEvent>,
    zone_filter: Option<String>,
) {
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        break;
                    }
                    _ => {}
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Ok(event) => {
                        if !matches_zone(&event, zone_filter.as_deref()) {
                            continue;
                        }
                        if send_json(&mut socket, &StreamMessage::event(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let warning = StreamMessage::warning(format!(
                            "stream client lagged and skipped {skipped} event(s)"
                        ));
                        if send_json(&mut socket, &warning).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

fn matches_zone(event: &TickEvent, zone_filter: Option<&str>) -> bool {
    let Some(filter) = zone_filter else {
        return true;
    };
    match event {
        TickEvent::TierChanged { zone_id, .. } => zone_id == filter,
        TickEvent::FindingRecorded { finding } => finding.zone_id == filter,
    }
}

async fn send_json(socket: &mut WebSocket, message: &StreamMessage) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}

#[derive(Debug, Clone, Serialize)]
struct StreamMessage {
    schema_version: String,
    #[serde(rename = "type")]
    message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<TickEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl StreamMessage {
    fn event(event: TickEvent) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: "tick.event",
            event: Some(event),
            message: None,
        }
    }

    fn warning(message: String) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: "warning",
            event: None,
            message: Some(message),
        }
    }
}
