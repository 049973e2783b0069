use super::{ok, read_scope, ApiResponse};
use crate::{
	auth::{require_global_admin, Principal},
	errors::AppError,
	meta::{
		sources::{NewSource, SourceConnection},
		Source,
	},
	state::AppState,
	storage::TableMeta,
};
use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};
use serde_json::Value as JSONValue;

/// Connection records go out with credentials blanked; the secret is
/// write-only through this surface.
#[derive(Debug, Serialize)]
pub struct SourceView {
	pub id: i64,
	pub name: String,
	pub kind: crate::meta::sources::BackendKind,
	pub connection: JSONValue,
	pub timestamp_field: String,
	pub severity_field: Option<String>,
	pub ttl_days: i64,
}

impl From<&Source> for SourceView {
	fn from(s: &Source) -> Self {
		let mut connection =
			serde_json::to_value(&s.connection).unwrap_or(JSONValue::Null);
		if let Some(obj) = connection
			.get_mut("clickhouse")
			.and_then(|v| v.as_object_mut())
		{
			obj.insert(
				"password".to_string(),
				JSONValue::String("".to_string()),
			);
		}
		Self {
			id: s.id,
			name: s.name.clone(),
			kind: s.kind,
			connection,
			timestamp_field: s.timestamp_field.clone(),
			severity_field: s.severity_field.clone(),
			ttl_days: s.ttl_days,
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
	pub name: String,
	pub connection: SourceConnection,
	pub timestamp_field: String,
	#[serde(default)]
	pub severity_field: Option<String>,
	#[serde(default)]
	pub ttl_days: i64,
}

impl SourceRequest {
	fn validate(&self) -> Result<(), AppError> {
		if self.name.trim().is_empty() {
			return Err(AppError::Validation(
				"source name must not be empty".to_string(),
			));
		}
		if self.timestamp_field.trim().is_empty() {
			return Err(AppError::Validation(
				"timestamp_field must not be empty".to_string(),
			));
		}
		Ok(())
	}

	fn into_new(self) -> NewSource {
		NewSource {
			name: self.name,
			connection: self.connection,
			timestamp_field: self.timestamp_field,
			severity_field: self.severity_field,
			ttl_days: self.ttl_days,
		}
	}
}

/// GET /api/v1/sources (global admin).
pub async fn list_sources(
	State(state): State<AppState>,
	principal: Principal,
) -> Result<ApiResponse<Vec<SourceView>>, AppError> {
	require_global_admin(&principal.user)?;
	let sources = state.store.list_sources().await?;
	Ok(ok(sources.iter().map(SourceView::from).collect()))
}

/// POST /api/v1/sources — validates the connection synchronously before
/// the source exists anywhere.
pub async fn create_source(
	State(state): State<AppState>,
	principal: Principal,
	Json(req): Json<SourceRequest>,
) -> Result<ApiResponse<SourceView>, AppError> {
	require_global_admin(&principal.user)?;
	req.validate()?;
	let source = state.store.create_source(&req.into_new()).await?;
	if let Err(e) = state.registry.register(&source, true).await {
		// roll the record back; a source that never connected should not
		// linger half-created
		let _ = state.store.delete_source(source.id).await;
		return Err(e);
	}
	Ok(ok(SourceView::from(&source)))
}

pub async fn get_source(
	State(state): State<AppState>,
	principal: Principal,
	Path(source_id): Path<i64>,
) -> Result<ApiResponse<SourceView>, AppError> {
	require_global_admin(&principal.user)?;
	let source = state.store.source_by_id(source_id).await?;
	Ok(ok(SourceView::from(&source)))
}

pub async fn update_source(
	State(state): State<AppState>,
	principal: Principal,
	Path(source_id): Path<i64>,
	Json(req): Json<SourceRequest>,
) -> Result<ApiResponse<SourceView>, AppError> {
	require_global_admin(&principal.user)?;
	req.validate()?;
	let source = state
		.store
		.update_source(source_id, &req.into_new())
		.await?;
	// reconnect and drop the stale column catalog
	state.registry.register(&source, true).await?;
	state.registry.invalidate_catalog(source.id);
	Ok(ok(SourceView::from(&source)))
}

pub async fn delete_source(
	State(state): State<AppState>,
	principal: Principal,
	Path(source_id): Path<i64>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	require_global_admin(&principal.user)?;
	state.store.delete_source(source_id).await?;
	state.registry.remove(source_id);
	Ok(ok(serde_json::json!({ "deleted": true })))
}

/// GET /api/v1/teams/{team}/sources/{source}/schema — the cached column
/// catalog, probing on first access.
pub async fn source_schema(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
) -> Result<ApiResponse<TableMeta>, AppError> {
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let catalog = state.registry.catalog(&scope.source).await?;
	Ok(ok((*catalog).clone()))
}
