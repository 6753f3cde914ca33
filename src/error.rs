use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::schemas::ParticipantId;
use crate::store::is_duplicate_key;

/// Input that would break the zero-sum split. The calculator rejects it
/// instead of coercing it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("cost entry of participant {participant_id} has invalid amount {amount}")]
    InvalidAmount {
        participant_id: ParticipantId,
        amount: f64,
    },
    #[error("participant {0} appears more than once")]
    DuplicateParticipant(ParticipantId),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error("database error: {0}")]
    Database(mongodb::error::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Settlement(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if let ApiError::Database(err) = self {
            tracing::error!(error = %err, "storage request failed");
        }
        HttpResponse::build(status).json(ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
        })
    }
}

// Unique index violations come from requests racing past the handler checks.
impl From<mongodb::error::Error> for ApiError {
    fn from(err: mongodb::error::Error) -> Self {
        if is_duplicate_key(&err) {
            return ApiError::Conflict("record already exists".into());
        }
        ApiError::Database(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(ApiError::NotFound("event"), 404)]
    #[case::bad_request(ApiError::BadRequest("name must not be blank".into()), 400)]
    #[case::conflict(ApiError::Conflict("event is finished".into()), 409)]
    #[case::settlement(
        ApiError::Settlement(SettlementError::DuplicateParticipant("p1".into())),
        422
    )]
    fn maps_errors_to_status(#[case] error: ApiError, #[case] expected: u16) {
        assert_eq!(error.status_code().as_u16(), expected);
    }

    #[actix_web::test]
    async fn error_body_carries_code_and_message() {
        let response = ApiError::NotFound("participant").error_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 404);
        assert_eq!(json["message"], "participant not found");
    }

    #[test]
    fn duplicate_keys_become_conflicts() {
        let error = ApiError::from(crate::store::tests::duplicate_key_error());
        assert!(matches!(error, ApiError::Conflict(_)));
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_amount_message_names_participant() {
        let error = SettlementError::InvalidAmount {
            participant_id: "ana".into(),
            amount: -3.5,
        };
        assert_eq!(
            error.to_string(),
            "cost entry of participant ana has invalid amount -3.5"
        );
    }
}
