use super::{edit_scope, ok, read_scope, ApiResponse};
use crate::{
	alerts::TestOutcome,
	auth::Principal,
	errors::AppError,
	meta::{
		alerts::NewAlertRule, AlertHistoryEntry, AlertRule, ThresholdOp,
	},
	state::AppState,
};
use axum::extract::{Json, Path, Query, State};
use serde::Deserialize;
use serde_json::{json, Value as JSONValue};

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub query: String,
	pub threshold_operator: ThresholdOp,
	pub threshold_value: f64,
	pub frequency_seconds: i64,
	#[serde(default = "default_severity")]
	pub severity: String,
	#[serde(default = "default_active")]
	pub active: bool,
}

fn default_severity() -> String {
	"warning".to_string()
}

const fn default_active() -> bool {
	true
}

impl AlertRequest {
	fn into_new(self, state: &AppState) -> Result<NewAlertRule, AppError> {
		if self.name.trim().is_empty() {
			return Err(AppError::Validation(
				"alert name must not be empty".to_string(),
			));
		}
		if self.query.trim().is_empty() {
			return Err(AppError::Validation(
				"alert query must not be empty".to_string(),
			));
		}
		if !self.threshold_value.is_finite() {
			return Err(AppError::Validation(
				"threshold must be a finite number".to_string(),
			));
		}
		let min_frequency =
			state.config.alerts.min_frequency.as_secs() as i64;
		if self.frequency_seconds < min_frequency {
			return Err(AppError::Validation(format!(
				"evaluation frequency must be at least {}s",
				min_frequency
			)));
		}
		Ok(NewAlertRule {
			name: self.name.trim().to_string(),
			description: self.description,
			query: self.query,
			threshold_operator: self.threshold_operator,
			threshold_value: self.threshold_value,
			frequency_seconds: self.frequency_seconds,
			severity: self.severity,
			active: self.active,
		})
	}
}

pub async fn list(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
) -> Result<ApiResponse<Vec<AlertRule>>, AppError> {
	read_scope(&state, &principal, team_id, source_id).await?;
	let rules = state.store.list_alert_rules(team_id, source_id).await?;
	Ok(ok(rules))
}

pub async fn create(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<AlertRequest>,
) -> Result<ApiResponse<AlertRule>, AppError> {
	edit_scope(&state, &principal, team_id, source_id).await?;
	let rule = state
		.store
		.create_alert_rule(team_id, source_id, &req.into_new(&state)?)
		.await?;
	state.scheduler.reconcile().await?;
	Ok(ok(rule))
}

pub async fn get(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
) -> Result<ApiResponse<AlertRule>, AppError> {
	read_scope(&state, &principal, team_id, source_id).await?;
	let rule = state
		.store
		.alert_rule_scoped(team_id, source_id, id)
		.await?;
	Ok(ok(rule))
}

pub async fn update(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
	Json(req): Json<AlertRequest>,
) -> Result<ApiResponse<AlertRule>, AppError> {
	edit_scope(&state, &principal, team_id, source_id).await?;
	let rule = state
		.store
		.update_alert_rule(team_id, source_id, id, &req.into_new(&state)?)
		.await?;
	state.scheduler.reconcile().await?;
	Ok(ok(rule))
}

pub async fn delete(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
) -> Result<ApiResponse<JSONValue>, AppError> {
	edit_scope(&state, &principal, team_id, source_id).await?;
	state
		.store
		.delete_alert_rule(team_id, source_id, id)
		.await?;
	state.scheduler.reconcile().await?;
	Ok(ok(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
	#[serde(default = "default_history_limit")]
	pub limit: u32,
}

const fn default_history_limit() -> u32 {
	50
}

pub async fn history(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
	Query(q): Query<HistoryQuery>,
) -> Result<ApiResponse<Vec<AlertHistoryEntry>>, AppError> {
	read_scope(&state, &principal, team_id, source_id).await?;
	let rule = state
		.store
		.alert_rule_scoped(team_id, source_id, id)
		.await?;
	let entries = state
		.store
		.list_alert_history(rule.id, q.limit.min(500))
		.await?;
	Ok(ok(entries))
}

/// POST …/alerts/{alert}/test — dry run, no state or history writes.
pub async fn test(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
) -> Result<ApiResponse<TestOutcome>, AppError> {
	read_scope(&state, &principal, team_id, source_id).await?;
	let rule = state
		.store
		.alert_rule_scoped(team_id, source_id, id)
		.await?;
	let outcome = state.scheduler.test_rule(&rule).await?;
	Ok(ok(outcome))
}

/// POST …/alerts/{alert}/resolve — manual resolution without waiting
/// for the next tick.
pub async fn resolve(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id, id)): Path<(i64, i64, i64)>,
) -> Result<ApiResponse<AlertRule>, AppError> {
	edit_scope(&state, &principal, team_id, source_id).await?;
	let rule = state
		.store
		.alert_rule_scoped(team_id, source_id, id)
		.await?;
	state.scheduler.force_resolve(&rule).await?;
	let rule = state.store.alert_rule(rule.id).await?;
	Ok(ok(rule))
}
