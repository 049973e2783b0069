use crate::{
	auth::{self, Principal},
	errors::AppError,
	meta::{Source, TeamRole},
	state::AppState,
};
use axum::{
	http::StatusCode,
	response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

pub mod alerts;
pub mod auth_flow;
pub mod me;
pub mod query;
pub mod saved_queries;
pub mod settings;
pub mod sources;
pub mod teams;
pub mod users;

/// The success envelope: `{status: "success", data: …}`. Errors render
/// through `AppError`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
	pub status: &'static str,
	pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> ApiResponse<T> {
	ApiResponse {
		status: "success",
		data,
	}
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
	fn into_response(self) -> Response {
		(StatusCode::OK, Json(self)).into_response()
	}
}

pub async fn health() -> ApiResponse<serde_json::Value> {
	ok(json!({
		"status": "ok",
		"version": env!("CARGO_PKG_VERSION"),
	}))
}

pub async fn meta(
	axum::extract::State(state): axum::extract::State<AppState>,
) -> ApiResponse<serde_json::Value> {
	let oidc = state.config.auth.oidc.as_ref();
	ok(json!({
		"version": env!("CARGO_PKG_VERSION"),
		"oidc_issuer": oidc.map(|o| o.issuer.clone()),
		"oidc_client_id": oidc.map(|o| o.client_id.clone()),
	}))
}

pub async fn handler_404() -> AppError {
	AppError::NotFound("route not found".to_string())
}

/// The (team, source) scope every data endpoint runs in: membership
/// verified, link verified, source loaded. `role` is None for a global
/// admin acting outside their memberships.
pub(crate) struct Scope {
	pub source: Source,
	#[allow(dead_code)]
	pub role: Option<TeamRole>,
}

pub(crate) async fn read_scope(
	state: &AppState,
	principal: &Principal,
	team_id: i64,
	source_id: i64,
) -> Result<Scope, AppError> {
	let role = auth::require_team_member(
		&state.store,
		&principal.user,
		team_id,
	)
	.await?;
	let source =
		auth::require_team_source(&state.store, team_id, source_id).await?;
	Ok(Scope { source, role })
}

pub(crate) async fn edit_scope(
	state: &AppState,
	principal: &Principal,
	team_id: i64,
	source_id: i64,
) -> Result<Scope, AppError> {
	auth::require_team_editor(&state.store, &principal.user, team_id)
		.await?;
	let scope = read_scope(state, principal, team_id, source_id).await?;
	Ok(scope)
}
