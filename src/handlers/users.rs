use super::{ok, ApiResponse};
use crate::{
	auth::{require_global_admin, Principal},
	errors::AppError,
	meta::{User, UserRole, UserStatus},
	state::AppState,
};
use axum::extract::{Json, Path, State};
use serde::Deserialize;
use serde_json::{json, Value as JSONValue};

pub async fn list_users(
	State(state): State<AppState>,
	principal: Principal,
) -> Result<ApiResponse<Vec<User>>, AppError> {
	require_global_admin(&principal.user)?;
	let users = state.store.list_users().await?;
	Ok(ok(users))
}

#[derive(Debug, Deserialize)]
pub struct UserUpdateRequest {
	#[serde(default)]
	pub role: Option<UserRole>,
	#[serde(default)]
	pub status: Option<UserStatus>,
}

/// PATCH /api/v1/users/{user} — role and status only; identities come
/// from the identity provider and are never destroyed here.
pub async fn update_user(
	State(state): State<AppState>,
	principal: Principal,
	Path(user_id): Path<i64>,
	Json(req): Json<UserUpdateRequest>,
) -> Result<ApiResponse<User>, AppError> {
	require_global_admin(&principal.user)?;
	if principal.user.id == user_id
		&& req.status == Some(UserStatus::Disabled)
	{
		return Err(AppError::Validation(
			"cannot disable your own account".to_string(),
		));
	}
	state.store.user_by_id(user_id).await?;
	if let Some(role) = req.role {
		state.store.set_user_role(user_id, role).await?;
	}
	if let Some(status) = req.status {
		state.store.set_user_status(user_id, status).await?;
	}
	let user = state.store.user_by_id(user_id).await?;
	Ok(ok(user))
}

pub async fn get_user(
	State(state): State<AppState>,
	principal: Principal,
	Path(user_id): Path<i64>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_global_admin(&principal.user)?;
	let user = state.store.user_by_id(user_id).await?;
	let memberships = state.store.memberships_for_user(user_id).await?;
	Ok(ok(json!({
		"user": user,
		"teams": memberships,
	})))
}
