//! Mapping of relay errors to HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error;

/// Handler error. Responds with an empty body and logs the cause.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::StreamNotFound(_) => StatusCode::NOT_FOUND,
            Error::CodecsNotReady(_) | Error::ActivationFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::SessionLimitReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::NegotiationFailed(_) | Error::Media(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            tracing::info!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: Error| ApiError(e).status();

        assert_eq!(status(Error::StreamNotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::CodecsNotReady("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(Error::SessionLimitReached(4)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(Error::NegotiationFailed("bad sdp".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(Error::StreamStalled), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
