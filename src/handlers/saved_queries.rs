use super::{edit_scope, ok, read_scope, ApiResponse};
use crate::{
	auth::Principal,
	errors::AppError,
	meta::{
		saved_queries::NewSavedQuery, QueryKind, SavedQuery,
	},
	state::AppState,
};
use axum::extract::{Json, Path, State};
use serde::Deserialize;
use serde_json::{json, Value as JSONValue};

/// The serialized payload: version, query content, optional saved time
/// range, optional limit, optional variable bindings. Opaque to the
/// store; shape-checked here.
#[derive(Debug, Deserialize)]
struct PayloadShape {
	version: u32,
	content: String,
	#[serde(default)]
	time_range: Option<JSONValue>,
	#[serde(default)]
	limit: Option<u32>,
	#[serde(default)]
	variables: Option<JSONValue>,
}

#[derive(Debug, Deserialize)]
pub struct SavedQueryRequest {
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub query_kind: QueryKind,
	pub payload: JSONValue,
	#[serde(default)]
	pub bookmarked: bool,
}

impl SavedQueryRequest {
	fn into_new(self) -> Result<NewSavedQuery, AppError> {
		if self.name.trim().is_empty() {
			return Err(AppError::Validation(
				"saved query name must not be empty".to_string(),
			));
		}
		let shape: PayloadShape =
			serde_json::from_value(self.payload.clone()).map_err(|e| {
				AppError::Validation(format!(
					"invalid saved query payload: {}",
					e
				))
			})?;
		if shape.version == 0 || shape.content.trim().is_empty() {
			return Err(AppError::Validation(
				"saved query payload needs a version and content".to_string(),
			));
		}
		let _ = (shape.time_range, shape.limit, shape.variables);
		Ok(NewSavedQuery {
			name: self.name.trim().to_string(),
			description: self.description,
			query_kind: self.query_kind,
			payload: self.payload.to_string(),
			bookmarked: self.bookmarked,
		})
	}
}

pub async fn list(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
) -> Result<ApiResponse<Vec<SavedQuery>>, AppError> {
	read_scope(&state, &principal, team_id, source_id).await?;
	let queries = state
		.store
		.list_saved_queries(team_id, source_id)
		.await?;
	Ok(ok(queries))
}

pub async fn create(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<SavedQueryRequest>,
) -> Result<ApiResponse<SavedQuery>, AppError> {
	edit_scope(&state, &principal, team_id, source_id).await?;
	let q = state
		.store
		.create_saved_query(team_id, source_id, &req.into_new()?)
		.await?;
	Ok(ok(q))
}

pub async fn get(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
) -> Result<ApiResponse<SavedQuery>, AppError> {
	read_scope(&state, &principal, team_id, source_id).await?;
	let q = state
		.store
		.saved_query_by_id(team_id, source_id, id)
		.await?;
	Ok(ok(q))
}

pub async fn update(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
	Json(req): Json<SavedQueryRequest>,
) -> Result<ApiResponse<SavedQuery>, AppError> {
	edit_scope(&state, &principal, team_id, source_id).await?;
	let q = state
		.store
		.update_saved_query(team_id, source_id, id, &req.into_new()?)
		.await?;
	Ok(ok(q))
}

pub async fn delete(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	edit_scope(&state, &principal, team_id, source_id).await?;
	state
		.store
		.delete_saved_query(team_id, source_id, id)
		.await?;
	Ok(ok(json!({ "deleted": true })))
}
