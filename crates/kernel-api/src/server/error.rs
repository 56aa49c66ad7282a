use super::*;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub(super) struct HttpApiError {
    pub(super) status: StatusCode,
    pub(super) error: ApiError,
}

impl HttpApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status,
            error: ApiError::new(code, message, details),
        }
    }

    pub(super) fn invalid_query(message: impl Into<String>, details: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidQuery, message, details)
    }
}

impl From<ZoneNotFound> for HttpApiError {
    fn from(err: ZoneNotFound) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ErrorCode::ZoneNotFound,
            "zone is not registered",
            Some(format!("zone_id={}", err.0)),
        )
    }
}

impl From<EmitError> for HttpApiError {
    fn from(err: EmitError) -> Self {
        let details = Some(err.to_string());
        match err {
            EmitError::UnknownZone(_) => Self::new(
                StatusCode::NOT_FOUND,
                ErrorCode::UnknownZone,
                "signal targets an unregistered zone",
                details,
            ),
            EmitError::InvalidSeverity(_) => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidSeverity,
                "severity must be within [0, 1]",
                details,
            ),
            EmitError::InvalidPayload(_) => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidPayload,
                "signal payload is invalid",
                details,
            ),
        }
    }
}

impl From<RegistrationError> for HttpApiError {
    fn from(err: RegistrationError) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidRegistration,
            "zone registration rejected",
            Some(err.to_string()),
        )
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
