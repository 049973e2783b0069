use super::{ok, ApiResponse};
use crate::{
	auth::{
		require_global_admin, require_team_admin, require_team_member,
		Principal,
	},
	errors::AppError,
	meta::{Team, TeamMember, TeamRole},
	state::AppState,
};
use axum::extract::{Json, Path, State};
use serde::Deserialize;
use serde_json::{json, Value as JSONValue};

#[derive(Debug, Deserialize)]
pub struct TeamRequest {
	pub name: String,
	#[serde(default)]
	pub description: String,
}

/// GET /api/v1/teams — global admins see every team, everyone else
/// their memberships.
pub async fn list_teams(
	State(state): State<AppState>,
	principal: Principal,
) -> Result<ApiResponse<JSONValue>, AppError> {
	if principal.user.is_admin() {
		let teams = state.store.list_teams().await?;
		return Ok(ok(serde_json::to_value(teams)?));
	}
	let memberships = state
		.store
		.memberships_for_user(principal.user.id)
		.await?;
	Ok(ok(serde_json::to_value(memberships)?))
}

pub async fn create_team(
	State(state): State<AppState>,
	principal: Principal,
	Json(req): Json<TeamRequest>,
) -> Result<ApiResponse<Team>, AppError> {
	require_global_admin(&principal.user)?;
	if req.name.trim().is_empty() {
		return Err(AppError::Validation(
			"team name must not be empty".to_string(),
		));
	}
	let team = state
		.store
		.create_team(req.name.trim(), &req.description)
		.await?;
	Ok(ok(team))
}

pub async fn get_team(
	State(state): State<AppState>,
	principal: Principal,
	Path(team_id): Path<i64>,
) -> Result<ApiResponse<Team>, AppError> {
	require_team_member(&state.store, &principal.user, team_id).await?;
	let team = state.store.team_by_id(team_id).await?;
	Ok(ok(team))
}

pub async fn update_team(
	State(state): State<AppState>,
	principal: Principal,
	Path(team_id): Path<i64>,
	Json(req): Json<TeamRequest>,
) -> Result<ApiResponse<Team>, AppError> {
	require_team_admin(&state.store, &principal.user, team_id).await?;
	let team = state
		.store
		.update_team(team_id, req.name.trim(), &req.description)
		.await?;
	Ok(ok(team))
}

/// DELETE /api/v1/teams/{team} — cascades memberships, source links,
/// saved queries, and alert rules.
pub async fn delete_team(
	State(state): State<AppState>,
	principal: Principal,
	Path(team_id): Path<i64>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_global_admin(&principal.user)?;
	state.store.delete_team(team_id).await?;
	// rules owned by the team are gone; drop their timers
	state.scheduler.reconcile().await?;
	Ok(ok(json!({ "deleted": true })))
}

pub async fn list_members(
	State(state): State<AppState>,
	principal: Principal,
	Path(team_id): Path<i64>,
) -> Result<ApiResponse<Vec<TeamMember>>, AppError> {
	require_team_member(&state.store, &principal.user, team_id).await?;
	let members = state.store.list_team_members(team_id).await?;
	Ok(ok(members))
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
	pub user_id: i64,
	pub role: TeamRole,
}

pub async fn upsert_member(
	State(state): State<AppState>,
	principal: Principal,
	Path(team_id): Path<i64>,
	Json(req): Json<MemberRequest>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_team_admin(&state.store, &principal.user, team_id).await?;
	// the target user must exist; membership on a ghost id is a footgun
	state.store.user_by_id(req.user_id).await?;
	state
		.store
		.add_team_member(team_id, req.user_id, req.role)
		.await?;
	Ok(ok(json!({ "updated": true })))
}

pub async fn remove_member(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, user_id)): Path<(i64, i64)>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_team_admin(&state.store, &principal.user, team_id).await?;
	state.store.remove_team_member(team_id, user_id).await?;
	Ok(ok(json!({ "removed": true })))
}

/// GET /api/v1/teams/{team}/sources — the sources this team may query.
pub async fn list_team_sources(
	State(state): State<AppState>,
	principal: Principal,
	Path(team_id): Path<i64>,
) -> Result<ApiResponse<Vec<super::sources::SourceView>>, AppError> {
	require_team_member(&state.store, &principal.user, team_id).await?;
	let sources = state.store.list_team_sources(team_id).await?;
	Ok(ok(sources
		.iter()
		.map(super::sources::SourceView::from)
		.collect()))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
	pub source_id: i64,
}

pub async fn link_source(
	State(state): State<AppState>,
	principal: Principal,
	Path(team_id): Path<i64>,
	Json(req): Json<LinkRequest>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_global_admin(&principal.user)?;
	state.store.team_by_id(team_id).await?;
	state.store.source_by_id(req.source_id).await?;
	state
		.store
		.link_team_source(team_id, req.source_id)
		.await?;
	Ok(ok(json!({ "linked": true })))
}

pub async fn unlink_source(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_global_admin(&principal.user)?;
	state
		.store
		.unlink_team_source(team_id, source_id)
		.await?;
	// rules scoped to the now-unlinked pair deactivate on reconcile
	state.scheduler.reconcile().await?;
	Ok(ok(json!({ "unlinked": true })))
}
