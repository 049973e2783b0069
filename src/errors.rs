use axum::{
	http::StatusCode,
	response::{IntoResponse, Json, Response},
};
use logchefql::parser::QueryParseError;
use sqlbuilder::{vars::VarError, visit::ResolveError};
use thiserror::Error;

/// Stable error taxonomy. Each layer maps only the failures it
/// understands; everything else bubbles unchanged as Internal.
#[derive(Debug, Error)]
pub enum AppError {
	#[error("authentication required: {0}")]
	AuthRequired(String),
	#[error("forbidden: {0}")]
	AuthForbidden(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("invalid request: {0}")]
	Validation(String),
	#[error("{0}")]
	Parse(#[from] QueryParseError),
	#[error("cannot translate query: {0}")]
	Translation(String),
	#[error("query exceeded its {timeout_ms}ms timeout after {elapsed_ms}ms")]
	QueryTimeout { elapsed_ms: u64, timeout_ms: u64 },
	#[error("query {0} was canceled")]
	QueryCanceled(String),
	#[error("source unavailable: {0}")]
	BackendUnavailable(String),
	#[error("backend error: {0}")]
	Backend(String),
	#[error("rate limited: {0}")]
	RateLimited(String),
	#[error("configuration error: {0}")]
	Config(String),
	#[error("internal error: {0}")]
	Internal(#[from] anyhow::Error),
}

impl AppError {
	pub fn error_type(&self) -> &'static str {
		match self {
			AppError::AuthRequired(_) => "AuthRequired",
			AppError::AuthForbidden(_) => "AuthForbidden",
			AppError::NotFound(_) => "NotFound",
			AppError::Validation(_) => "ValidationError",
			AppError::Parse(_) => "ParseError",
			AppError::Translation(_) => "TranslationError",
			AppError::QueryTimeout { .. } => "QueryTimeout",
			AppError::QueryCanceled(_) => "QueryCanceled",
			AppError::BackendUnavailable(_) => "BackendUnavailable",
			AppError::Backend(_) => "BackendError",
			AppError::RateLimited(_) => "RateLimited",
			AppError::Config(_) => "ConfigError",
			AppError::Internal(_) => "InternalError",
		}
	}

	fn status(&self) -> StatusCode {
		match self {
			AppError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
			AppError::AuthForbidden(_) => StatusCode::FORBIDDEN,
			AppError::NotFound(_) => StatusCode::NOT_FOUND,
			AppError::Validation(_)
			| AppError::Parse(_)
			| AppError::Translation(_) => StatusCode::BAD_REQUEST,
			AppError::QueryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
			AppError::QueryCanceled(_) => StatusCode::OK,
			AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			AppError::Backend(_) => StatusCode::BAD_GATEWAY,
			AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
			AppError::Config(_) | AppError::Internal(_) => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		}
	}
}

impl From<ResolveError> for AppError {
	fn from(e: ResolveError) -> Self {
		AppError::Translation(e.to_string())
	}
}

impl From<VarError> for AppError {
	fn from(e: VarError) -> Self {
		AppError::Validation(e.to_string())
	}
}

impl From<sqlx::Error> for AppError {
	fn from(e: sqlx::Error) -> Self {
		match e {
			sqlx::Error::RowNotFound => {
				AppError::NotFound("record not found".to_string())
			}
			other => AppError::Internal(other.into()),
		}
	}
}

impl From<serde_json::Error> for AppError {
	fn from(e: serde_json::Error) -> Self {
		AppError::Internal(e.into())
	}
}

impl IntoResponse for AppError {
	fn into_response(self) -> Response {
		let body = serde_json::json!({
			"status": "error",
			"message": self.to_string(),
			"error_type": self.error_type(),
		});
		(self.status(), Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_error_type_strings_are_stable() {
		let cases: Vec<(AppError, &str)> = vec![
			(AppError::AuthRequired("x".into()), "AuthRequired"),
			(AppError::AuthForbidden("x".into()), "AuthForbidden"),
			(AppError::NotFound("x".into()), "NotFound"),
			(AppError::Validation("x".into()), "ValidationError"),
			(AppError::Translation("x".into()), "TranslationError"),
			(
				AppError::QueryTimeout {
					elapsed_ms: 31_000,
					timeout_ms: 30_000,
				},
				"QueryTimeout",
			),
			(AppError::QueryCanceled("q1".into()), "QueryCanceled"),
			(
				AppError::BackendUnavailable("x".into()),
				"BackendUnavailable",
			),
			(AppError::Backend("x".into()), "BackendError"),
			(AppError::RateLimited("x".into()), "RateLimited"),
			(AppError::Config("x".into()), "ConfigError"),
		];
		for (err, expect) in cases {
			assert_eq!(err.error_type(), expect);
		}
	}

	#[test]
	fn test_timeout_message_carries_both_durations() {
		let err = AppError::QueryTimeout {
			elapsed_ms: 31_200,
			timeout_ms: 30_000,
		};
		let msg = err.to_string();
		assert!(msg.contains("30000ms"), "{}", msg);
		assert!(msg.contains("31200ms"), "{}", msg);
	}

	#[test]
	fn test_row_not_found_collapses() {
		let err: AppError = sqlx::Error::RowNotFound.into();
		assert_eq!(err.error_type(), "NotFound");
	}
}
