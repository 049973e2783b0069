use super::{ok, ApiResponse};
use crate::{
	auth::{require_global_admin, Principal},
	errors::AppError,
	meta::settings::{
		SETTING_AI_ASSISTANT_ENABLED, SETTING_ALERTING_ENABLED,
	},
	state::AppState,
};
use axum::extract::{Json, State};
use serde::Deserialize;
use serde_json::{json, Value as JSONValue};
use std::collections::HashMap;

// the runtime-mutable subset; anything else needs a config change and a
// restart
static MUTABLE_KEYS: [&str; 2] =
	[SETTING_ALERTING_ENABLED, SETTING_AI_ASSISTANT_ENABLED];

pub async fn get_settings(
	State(state): State<AppState>,
	principal: Principal,
) -> Result<ApiResponse<HashMap<String, String>>, AppError> {
	require_global_admin(&principal.user)?;
	let settings = state.store.all_settings().await?;
	Ok(ok(settings))
}

#[derive(Debug, Deserialize)]
pub struct SettingRequest {
	pub key: String,
	pub value: String,
}

pub async fn put_setting(
	State(state): State<AppState>,
	principal: Principal,
	Json(req): Json<SettingRequest>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_global_admin(&principal.user)?;
	if !MUTABLE_KEYS.contains(&req.key.as_str()) {
		return Err(AppError::Validation(format!(
			"unknown or immutable setting: {}",
			req.key
		)));
	}
	state.store.put_setting(&req.key, &req.value).await?;
	// flipping the alerting toggle takes effect immediately
	state.scheduler.reconcile().await?;
	Ok(ok(json!({ "updated": true })))
}
