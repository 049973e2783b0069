use super::{ok, read_scope, ApiResponse};
use crate::{
	auth::Principal,
	errors::AppError,
	state::AppState,
	storage::{
		new_query_id, ColumnMeta, ContextParams, ExecOpts, FieldCardinality,
		FieldValuesParams, HistogramParams, TranslateParams,
	},
};
use axum::extract::{Json, Path, Query, State};
use chrono::DateTime;
use common::{QueryStats, TimeRange};
use serde::{Deserialize, Serialize};
use serde_json::Value as JSONValue;
use sqlbuilder::builder::bucket_width_seconds;
use sqlbuilder::vars::{self, TemplateVar, VarKind};
use std::{collections::HashMap, time::Duration};

// target series resolution for derived histogram windows
const HISTOGRAM_TARGET_BUCKETS: u32 = 100;
// per-field wall clock for distinct-value scans over free strings
const FIELD_VALUES_TIMEOUT: Duration = Duration::from_secs(15);
const FIELD_VALUES_TOP_N: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct VarBinding {
	pub name: String,
	#[serde(rename = "type", default)]
	pub kind: Option<String>,
	#[serde(default)]
	pub value: Option<String>,
}

fn to_template_vars(bindings: &[VarBinding]) -> Vec<TemplateVar> {
	bindings
		.iter()
		.map(|b| TemplateVar {
			name: b.name.clone(),
			kind: match b.kind.as_deref() {
				Some("number") => VarKind::Number,
				Some("date") => VarKind::Date,
				_ => VarKind::Text,
			},
			value: b.value.clone(),
		})
		.collect()
}

#[derive(Debug, Deserialize)]
pub struct RawQueryRequest {
	pub raw_sql: String,
	#[serde(default)]
	pub limit: Option<u32>,
	// seconds
	#[serde(default)]
	pub query_timeout: Option<u64>,
	#[serde(default)]
	pub variables: Vec<VarBinding>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
	pub columns: Vec<ColumnMeta>,
	pub rows: Vec<Vec<JSONValue>>,
	pub stats: QueryStats,
	pub query_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub generated_query: Option<String>,
}

fn clamp_limit(requested: Option<u32>, cfg: &crate::config::QueryCfg) -> u32 {
	requested
		.unwrap_or(cfg.default_limit)
		.min(cfg.max_limit)
		.max(1)
}

fn clamp_timeout(
	requested_secs: Option<u64>,
	cfg: &crate::config::QueryCfg,
) -> Duration {
	match requested_secs {
		Some(secs) if secs > 0 => {
			Duration::from_secs(secs).min(cfg.max_timeout)
		}
		_ => cfg.default_timeout,
	}
}

/// The caller's limit is authoritative; a statement without one gets the
/// clamped limit appended.
fn ensure_limit(sql: &str, limit: u32) -> String {
	let trimmed = sql.trim().trim_end_matches(';').trim_end();
	let lowered = trimmed.to_lowercase();
	if lowered
		.split_whitespace()
		.any(|word| word == "limit")
	{
		trimmed.to_string()
	} else {
		format!("{} LIMIT {}", trimmed, limit)
	}
}

async fn run(
	state: &AppState,
	client: &dyn crate::storage::LogBackend,
	text: &str,
	timeout: Duration,
	generated: Option<String>,
) -> Result<QueryResponse, AppError> {
	let query_id = new_query_id();
	let cancel = state.inflight.register(&query_id);
	let opts = ExecOpts {
		query_id: query_id.clone(),
		timeout,
		cancel: Some(cancel),
	};
	let result = client.query(text, &opts).await;
	state.inflight.finish(&query_id);
	let outcome = result?;
	Ok(QueryResponse {
		columns: outcome.columns,
		rows: outcome.rows,
		stats: outcome.stats,
		query_id,
		generated_query: generated,
	})
}

/// POST /api/v1/teams/{team}/sources/{source}/logs/query
pub async fn query_logs(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<RawQueryRequest>,
) -> Result<ApiResponse<QueryResponse>, AppError> {
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let client = state.registry.get_client(&scope.source).await?;
	let sql =
		vars::substitute(&req.raw_sql, &to_template_vars(&req.variables))?;
	let limit = clamp_limit(req.limit, &state.config.query);
	let sql = ensure_limit(&sql, limit);
	let timeout = clamp_timeout(req.query_timeout, &state.config.query);
	let resp = run(&state, client.as_ref(), &sql, timeout, None).await?;
	Ok(ok(resp))
}

#[derive(Debug, Deserialize)]
pub struct QLRequest {
	pub query: String,
	#[serde(default)]
	pub start_time: Option<i64>,
	#[serde(default)]
	pub end_time: Option<i64>,
	#[serde(default)]
	pub limit: Option<u32>,
	#[serde(default)]
	pub timezone: Option<String>,
	#[serde(default)]
	pub query_timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
	pub query: String,
}

/// POST …/logchefql/translate — parse and lower for display.
pub async fn translate_ql(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<QLRequest>,
) -> Result<ApiResponse<TranslateResponse>, AppError> {
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let parsed = logchefql::parser::parse(&req.query)?;
	let catalog = state.registry.catalog(&scope.source).await?;
	let client = state.registry.get_client(&scope.source).await?;
	let params = TranslateParams {
		range: TimeRange::from_millis(req.start_time, req.end_time),
		limit: clamp_limit(req.limit, &state.config.query),
		timezone: req.timezone.clone(),
	};
	let query = client.translate(&parsed, &catalog, &params)?;
	Ok(ok(TranslateResponse { query }))
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
	pub valid: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ValidateError>,
}

#[derive(Debug, Serialize)]
pub struct ValidateError {
	pub message: String,
	pub line: u32,
	pub column: u32,
}

/// POST …/logchefql/validate — never an error envelope; the verdict is
/// the payload.
pub async fn validate_ql(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<QLRequest>,
) -> Result<ApiResponse<ValidateResponse>, AppError> {
	read_scope(&state, &principal, team_id, source_id).await?;
	let resp = match logchefql::parser::validate(&req.query) {
		Ok(()) => ValidateResponse {
			valid: true,
			error: None,
		},
		Err(e) => ValidateResponse {
			valid: false,
			error: Some(ValidateError {
				message: e.to_string(),
				line: e.line,
				column: e.column,
			}),
		},
	};
	Ok(ok(resp))
}

/// POST …/logchefql/query — translate, then execute.
pub async fn query_ql(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<QLRequest>,
) -> Result<ApiResponse<QueryResponse>, AppError> {
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let parsed = logchefql::parser::parse(&req.query)?;
	let catalog = state.registry.catalog(&scope.source).await?;
	let client = state.registry.get_client(&scope.source).await?;
	let params = TranslateParams {
		range: TimeRange::from_millis(req.start_time, req.end_time),
		limit: clamp_limit(req.limit, &state.config.query),
		timezone: req.timezone.clone(),
	};
	let text = client.translate(&parsed, &catalog, &params)?;
	let timeout = clamp_timeout(req.query_timeout, &state.config.query);
	let resp = run(
		&state,
		client.as_ref(),
		&text,
		timeout,
		Some(text.clone()),
	)
	.await?;
	Ok(ok(resp))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
	pub query_id: String,
}

/// POST …/logs/cancel — aborts the in-flight context and, where the
/// backend has one, issues the out-of-band kill. Races with completion
/// are not errors.
pub async fn cancel_query(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<CancelRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let aborted = state.inflight.cancel(&req.query_id);
	if let Ok(client) = state.registry.get_client(&scope.source).await {
		if let Err(e) = client.cancel(&req.query_id).await {
			tracing::debug!(query_id = %req.query_id, error = %e, "out-of-band cancel failed");
		}
	}
	Ok(ok(serde_json::json!({ "canceled": aborted })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
	Logchefql,
	Sql,
}

impl Default for QueryMode {
	fn default() -> Self {
		QueryMode::Logchefql
	}
}

#[derive(Debug, Deserialize)]
pub struct HistogramRequest {
	#[serde(default)]
	pub query: String,
	#[serde(default)]
	pub mode: QueryMode,
	// derived from the range when absent
	#[serde(default)]
	pub window_seconds: Option<u32>,
	#[serde(default)]
	pub group_by: Option<String>,
	pub start_time: i64,
	pub end_time: i64,
	#[serde(default)]
	pub timezone: Option<String>,
	#[serde(default)]
	pub query_timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HistogramResponse {
	pub data: Vec<crate::storage::HistogramBucket>,
	pub granularity: String,
}

/// POST …/logs/histogram. Raw-SQL mode is refused outright: the server
/// cannot safely re-aggregate arbitrary SQL.
pub async fn histogram(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<HistogramRequest>,
) -> Result<ApiResponse<HistogramResponse>, AppError> {
	if req.mode == QueryMode::Sql {
		return Err(AppError::Validation(
			"histograms are only available for filter-language queries"
				.to_string(),
		));
	}
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let parsed = logchefql::parser::parse(&req.query)?;
	let range = TimeRange::from_millis(Some(req.start_time), Some(req.end_time));
	let span = range.span_seconds().ok_or_else(|| {
		AppError::Validation(
			"histogram requires start_time before end_time".to_string(),
		)
	})?;
	let width = match req.window_seconds {
		Some(w) if w > 0 => w,
		_ => bucket_width_seconds(span, HISTOGRAM_TARGET_BUCKETS),
	};
	let catalog = state.registry.catalog(&scope.source).await?;
	let client = state.registry.get_client(&scope.source).await?;
	let params = HistogramParams {
		range,
		bucket_seconds: width,
		timezone: req.timezone.clone(),
		group_by: req.group_by.clone(),
	};
	let query_id = new_query_id();
	let cancel = state.inflight.register(&query_id);
	let opts = ExecOpts {
		query_id: query_id.clone(),
		timeout: clamp_timeout(req.query_timeout, &state.config.query),
		cancel: Some(cancel),
	};
	let result = client.histogram(&parsed, &catalog, &params, &opts).await;
	state.inflight.finish(&query_id);
	let mut data = result?;
	// grouping by the severity column merges case variants of the same
	// level into one series
	if req.group_by.as_deref() == scope.source.severity_field.as_deref() {
		for bucket in &mut data {
			if let Some(level) = bucket
				.group
				.as_ref()
				.and_then(|g| common::LogLevel::try_from(g.clone()).ok())
			{
				bucket.group = Some(String::from(level));
			}
		}
	}
	Ok(ok(HistogramResponse {
		data,
		granularity: format!("{}s", width),
	}))
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
	// millisecond epoch of the anchor row
	pub timestamp: i64,
	#[serde(default = "default_context_limit")]
	pub before_limit: u32,
	#[serde(default = "default_context_limit")]
	pub after_limit: u32,
	#[serde(default)]
	pub before_offset: u32,
	#[serde(default)]
	pub after_offset: u32,
	#[serde(default)]
	pub query_timeout: Option<u64>,
}

const fn default_context_limit() -> u32 {
	50
}

/// POST …/logs/context. Before holds rows at or before the anchor,
/// after strictly later; continued pagination passes the retrieved row
/// count as the offset.
pub async fn log_context(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Json(req): Json<ContextRequest>,
) -> Result<ApiResponse<crate::storage::ContextOutcome>, AppError> {
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let target = DateTime::from_timestamp_millis(req.timestamp)
		.ok_or_else(|| {
			AppError::Validation(format!(
				"invalid timestamp: {}",
				req.timestamp
			))
		})?;
	let client = state.registry.get_client(&scope.source).await?;
	let max = state.config.query.max_limit;
	let params = ContextParams {
		target,
		before_limit: req.before_limit.min(max),
		after_limit: req.after_limit.min(max),
		before_offset: req.before_offset,
		after_offset: req.after_offset,
	};
	let query_id = new_query_id();
	let cancel = state.inflight.register(&query_id);
	let opts = ExecOpts {
		query_id: query_id.clone(),
		timeout: clamp_timeout(req.query_timeout, &state.config.query),
		cancel: Some(cancel),
	};
	let result = client.log_context(&params, &opts).await;
	state.inflight.finish(&query_id);
	Ok(ok(result?))
}

#[derive(Debug, Deserialize)]
pub struct FieldValuesQuery {
	// comma-separated, loaded progressively by the caller; omitted means
	// auto-load the source's low-cardinality columns
	#[serde(default)]
	pub fields: Option<String>,
	#[serde(default)]
	pub filter: Option<String>,
	#[serde(default)]
	pub start_time: Option<i64>,
	#[serde(default)]
	pub end_time: Option<i64>,
}

/// GET …/fields/values — each request carries the active filter so the
/// distribution reflects the caller's current context.
pub async fn field_values(
	State(state): State<AppState>,
	principal: Principal,
	Path((team_id, source_id)): Path<(i64, i64)>,
	Query(req): Query<FieldValuesQuery>,
) -> Result<ApiResponse<HashMap<String, FieldCardinality>>, AppError> {
	let scope = read_scope(&state, &principal, team_id, source_id).await?;
	let fields: Vec<String> = req
		.fields
		.as_deref()
		.unwrap_or_default()
		.split(',')
		.map(|f| f.trim().to_string())
		.filter(|f| !f.is_empty())
		.collect();
	let filter = match &req.filter {
		Some(f) if !f.trim().is_empty() => {
			Some(logchefql::parser::parse(f)?)
		}
		_ => None,
	};
	let catalog = state.registry.catalog(&scope.source).await?;
	let client = state.registry.get_client(&scope.source).await?;
	let params = FieldValuesParams {
		fields,
		filter,
		range: TimeRange::from_millis(req.start_time, req.end_time),
		top_n: FIELD_VALUES_TOP_N,
		field_timeout: FIELD_VALUES_TIMEOUT,
	};
	let values = client.field_values(&catalog, &params).await?;
	Ok(ok(values))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::QueryCfg;
	use pretty_assertions::assert_eq;

	fn query_cfg() -> QueryCfg {
		QueryCfg {
			max_limit: 1000,
			default_limit: 100,
			default_timeout: Duration::from_secs(30),
			max_timeout: Duration::from_secs(300),
		}
	}

	#[test]
	fn test_clamp_limit() {
		let cfg = query_cfg();
		assert_eq!(clamp_limit(None, &cfg), 100);
		assert_eq!(clamp_limit(Some(50), &cfg), 50);
		assert_eq!(clamp_limit(Some(99_999), &cfg), 1000);
		assert_eq!(clamp_limit(Some(0), &cfg), 1);
	}

	#[test]
	fn test_clamp_timeout() {
		let cfg = query_cfg();
		assert_eq!(clamp_timeout(None, &cfg), Duration::from_secs(30));
		assert_eq!(clamp_timeout(Some(0), &cfg), Duration::from_secs(30));
		assert_eq!(clamp_timeout(Some(10), &cfg), Duration::from_secs(10));
		assert_eq!(
			clamp_timeout(Some(9_999), &cfg),
			Duration::from_secs(300)
		);
	}

	#[test]
	fn test_ensure_limit() {
		assert_eq!(
			ensure_limit("SELECT * FROM t", 100),
			"SELECT * FROM t LIMIT 100"
		);
		assert_eq!(
			ensure_limit("SELECT * FROM t LIMIT 5;", 100),
			"SELECT * FROM t LIMIT 5"
		);
		assert_eq!(
			ensure_limit("SELECT * FROM t;  ", 10),
			"SELECT * FROM t LIMIT 10"
		);
		// `limit` appearing as an identifier substring must not count
		assert_eq!(
			ensure_limit("SELECT rate_limit FROM t", 10),
			"SELECT rate_limit FROM t LIMIT 10"
		);
	}

	#[test]
	fn test_var_binding_kinds() {
		let bindings = vec![
			VarBinding {
				name: "n".to_string(),
				kind: Some("number".to_string()),
				value: Some("1".to_string()),
			},
			VarBinding {
				name: "s".to_string(),
				kind: None,
				value: Some("x".to_string()),
			},
		];
		let vars = to_template_vars(&bindings);
		assert_eq!(vars[0].kind, VarKind::Number);
		assert_eq!(vars[1].kind, VarKind::Text);
	}
}
