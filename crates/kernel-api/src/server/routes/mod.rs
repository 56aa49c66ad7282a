use super::*;

mod stream;

pub(super) use stream::stream_events;

#[derive(Debug, Serialize)]
pub(super) struct ZoneListResponse {
    schema_version: String,
    zones: Vec<ZoneStateView>,
}

#[derive(Debug, Deserialize)]
pub(super) struct EmitSignalRequest {
    category: Category,
    zone_id: String,
    severity: f64,
    payload: SignalPayload,
}

#[derive(Debug, Serialize)]
pub(super) struct EmitSignalResponse {
    schema_version: String,
    accepted: bool,
    zone_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct FindingsQuery {
    zone_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(super) struct FindingsResponse {
    schema_version: String,
    zone_id: Option<String>,
    pub(super) findings: Vec<Finding>,
}

const MAX_FINDINGS_LIMIT: usize = 5_000;

pub(super) async fn register_zone(
    State(state): State<AppState>,
    Json(registration): Json<ZoneRegistration>,
) -> Result<Json<ZoneStateView>, HttpApiError> {
    Ok(Json(state.api.register_zone(registration)?))
}

pub(super) async fn list_zones(State(state): State<AppState>) -> Json<ZoneListResponse> {
    Json(ZoneListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        zones: state.api.list_zone_states(),
    })
}

pub(super) async fn get_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
) -> Result<Json<ZoneStateView>, HttpApiError> {
    Ok(Json(state.api.get_zone_state(&zone_id)?))
}

pub(super) async fn emit_signal(
    State(state): State<AppState>,
    Json(request): Json<EmitSignalRequest>,
) -> Result<(StatusCode, Json<EmitSignalResponse>), HttpApiError> {
    state.api.emit(
        request.category,
        &request.zone_id,
        request.severity,
        request.payload,
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EmitSignalResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            accepted: true,
            zone_id: request.zone_id,
        }),
    ))
}

pub(super) async fn get_findings(
    State(state): State<AppState>,
    Query(query): Query<FindingsQuery>,
) -> Result<Json<FindingsResponse>, HttpApiError> {
    let zone_id = query.zone_id.filter(|zone| !zone.trim().is_empty());
    let limit = match query.limit {
        Some(0) => {
            return Err(HttpApiError::invalid_query(
                "limit must be at least 1",
                None,
            ))
        }
        Some(limit) => limit.min(MAX_FINDINGS_LIMIT),
        None => MAX_FINDINGS_LIMIT,
    };

    if let Some(zone) = zone_id.as_deref() {
        state.api.get_zone_state(zone)?;
    }
    let mut findings = state.api.get_active_findings(zone_id.as_deref());
    findings.truncate(limit);

    Ok(Json(FindingsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        zone_id,
        findings,
    }))
}

pub(super) async fn get_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.api.health())
}
