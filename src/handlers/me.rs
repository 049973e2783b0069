use super::{ok, ApiResponse};
use crate::{
	auth::{token, Principal},
	errors::AppError,
	meta::ApiToken,
	state::AppState,
};
use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JSONValue};

/// GET /api/v1/me — the principal plus memberships with per-team role.
pub async fn me(
	State(state): State<AppState>,
	principal: Principal,
) -> Result<ApiResponse<JSONValue>, AppError> {
	let memberships = state
		.store
		.memberships_for_user(principal.user.id)
		.await?;
	Ok(ok(json!({
		"user": principal.user,
		"teams": memberships,
	})))
}

pub async fn get_preferences(
	State(state): State<AppState>,
	principal: Principal,
) -> Result<ApiResponse<JSONValue>, AppError> {
	let prefs = state.store.preferences(principal.user.id).await?;
	Ok(ok(prefs))
}

pub async fn put_preferences(
	State(state): State<AppState>,
	principal: Principal,
	Json(payload): Json<JSONValue>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	if !payload.is_object() {
		return Err(AppError::Validation(
			"preferences payload must be an object".to_string(),
		));
	}
	state
		.store
		.save_preferences(principal.user.id, &payload)
		.await?;
	Ok(ok(payload))
}

pub async fn list_tokens(
	State(state): State<AppState>,
	principal: Principal,
) -> Result<ApiResponse<Vec<ApiToken>>, AppError> {
	let tokens = state.store.list_api_tokens(principal.user.id).await?;
	Ok(ok(tokens))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
	pub name: String,
}

#[derive(Debug, Serialize)]
pub struct MintedToken {
	pub id: i64,
	pub name: String,
	pub prefix: String,
	// shown exactly once
	pub token: String,
}

pub async fn create_token(
	State(state): State<AppState>,
	principal: Principal,
	Json(req): Json<TokenRequest>,
) -> Result<ApiResponse<MintedToken>, AppError> {
	if req.name.trim().is_empty() {
		return Err(AppError::Validation(
			"token name must not be empty".to_string(),
		));
	}
	let secret = token::mint_secret(principal.user.id);
	let stored = state
		.store
		.create_api_token(
			principal.user.id,
			req.name.trim(),
			&token::display_prefix(&secret),
			&token::hash_secret(&secret),
		)
		.await?;
	Ok(ok(MintedToken {
		id: stored.id,
		name: stored.name,
		prefix: stored.prefix,
		token: secret,
	}))
}

pub async fn delete_token(
	State(state): State<AppState>,
	principal: Principal,
	Path(token_id): Path<i64>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	state
		.store
		.delete_api_token(principal.user.id, token_id)
		.await?;
	Ok(ok(json!({ "revoked": true })))
}
