use crate::{
	errors::AppError,
	meta::sources::ClickhouseConn,
	storage::{
		new_query_id, ColumnMeta, ContextOutcome, ContextParams, ExecOpts,
		FieldCardinality, FieldValuesParams, HistogramBucket, HistogramParams,
		LogBackend, QueryOutcome, TableMeta, TranslateParams, ValueCount,
	},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::QueryStats;
use http::Extensions;
use logchefql::parser::FieldPath;
use reqwest::{header::CONTENT_TYPE, Client, Request, Response};
use reqwest_middleware::{
	ClientBuilder, Middleware, Next, Result as ReqResult,
};
use serde::Deserialize;
use serde_json::Value as JSONValue;
use sqlbuilder::builder::{
	escape_literal, quote_ident, time_range_into_timing, OrdType, QueryPlan,
	SortType,
};
use sqlbuilder::visit::QLVisitor;
use std::{
	collections::HashMap,
	hash::{DefaultHasher, Hash, Hasher},
	time::{Duration, Instant},
};
use tracing::{debug, info};

mod converter;
pub use converter::{CKConverter, CKFieldResolver, LogTable};

#[derive(Clone, Debug)]
pub struct ClickhouseBackend {
	http: Client,
	conn: ClickhouseConn,
	schema: LogTable,
}

static QUERY_PARAMS: [(&str, &str); 5] = [
	("default_format", "JSONCompact"),
	// timestamps come back as epoch strings, independent of server tz
	("date_time_output_format", "unix_timestamp"),
	("output_format_json_quote_64bit_integers", "0"),
	("result_overflow_mode", "break"),
	("enable_http_compression", "1"),
];

#[derive(Debug, Deserialize)]
struct CKResponse {
	#[serde(default)]
	meta: Vec<CKMetaCol>,
	#[serde(default)]
	data: Vec<Vec<JSONValue>>,
	#[serde(default)]
	statistics: Option<CKStats>,
}

#[derive(Debug, Deserialize)]
struct CKMetaCol {
	name: String,
	#[serde(rename = "type")]
	type_: String,
}

#[derive(Debug, Deserialize)]
struct CKStats {
	#[serde(default)]
	elapsed: f64,
	#[serde(default)]
	rows_read: i64,
	#[serde(default)]
	bytes_read: i64,
}

impl ClickhouseBackend {
	pub fn new(
		conn: ClickhouseConn,
		ts_field: String,
	) -> Result<Self, AppError> {
		let http = Client::builder()
			.gzip(true)
			.build()
			.map_err(|e| AppError::Config(e.to_string()))?;
		let schema = LogTable {
			database: conn.database.clone(),
			table: conn.table.clone(),
			ts_field,
		};
		Ok(Self { http, conn, schema })
	}

	async fn execute(
		&self,
		sql: String,
		opts: &ExecOpts,
	) -> Result<CKResponse, AppError> {
		let started = Instant::now();
		let client = ClientBuilder::new(self.http.clone())
			.with(SqlLoggingMiddleware)
			.build();
		let max_exec = opts.timeout.as_secs().max(1).to_string();
		let req = client
			.post(self.conn.url.clone())
			.query(&QUERY_PARAMS)
			.query(&[
				("query_id", opts.query_id.as_str()),
				("max_execution_time", max_exec.as_str()),
			])
			.header(CONTENT_TYPE, "text/plain;charset=UTF-8")
			.body(sql)
			.basic_auth(
				self.conn.username.clone(),
				Some(self.conn.password.clone()),
			)
			.build()
			.map_err(|e| AppError::Backend(e.to_string()))?;
		let fut = async {
			let resp = client
				.execute(req)
				.await
				.map_err(|e| AppError::Backend(e.to_string()))?;
			let status = resp.status();
			let text = resp
				.text()
				.await
				.map_err(|e| AppError::Backend(e.to_string()))?;
			if !status.is_success() {
				return Err(map_ck_error(&text, started, opts));
			}
			serde_json::from_str::<CKResponse>(&text)
				.map_err(|_| AppError::Backend(truncate_body(&text)))
		};
		let bounded = tokio::time::timeout(opts.timeout, fut);
		match &opts.cancel {
			Some(cancel) => {
				tokio::select! {
					res = bounded => flatten_timeout(res, started, opts),
					_ = cancel.notified() => {
						// out-of-band kill rides a fresh connection
						let this = self.clone();
						let qid = opts.query_id.clone();
						tokio::spawn(async move {
							let _ = this.cancel(&qid).await;
						});
						Err(AppError::QueryCanceled(opts.query_id.clone()))
					}
				}
			}
			None => flatten_timeout(bounded.await, started, opts),
		}
	}

	fn histogram_sql(
		&self,
		q: &logchefql::parser::Query,
		catalog: &TableMeta,
		p: &HistogramParams,
	) -> Result<String, AppError> {
		if let Some(tz) = &p.timezone {
			validate_timezone(tz)?;
		}
		let selection =
			QLVisitor::new(CKFieldResolver { catalog }).visit(q)?;
		let ts = quote_ident(self.schema.ts_field.as_str());
		let bucket = match &p.timezone {
			Some(tz) => format!(
				"toStartOfInterval({}, INTERVAL {} SECOND, '{}') AS bucket",
				ts,
				p.bucket_seconds,
				escape_literal(tz)
			),
			None => format!(
				"toStartOfInterval({}, INTERVAL {} SECOND) AS bucket",
				ts, p.bucket_seconds
			),
		};
		let mut projection = vec![bucket];
		let mut grouping = vec!["bucket".to_string()];
		if let Some(group_by) = &p.group_by {
			let resolver = CKFieldResolver { catalog };
			let fr = sqlbuilder::visit::FieldResolver::resolve(
				&resolver,
				&field_path_of(group_by),
			)?;
			projection.push(format!(
				"toString({}) AS group_value",
				sqlbuilder::builder::QueryConverter::convert_field(
					&CKConverter,
					&fr
				)
			));
			grouping.push("group_value".to_string());
		}
		projection.push("count() AS total".to_string());
		let plan = QueryPlan::new(
			CKConverter,
			self.schema.clone(),
			projection,
			selection,
			grouping,
			vec![("bucket".to_string(), SortType::Asc)],
			time_range_into_timing(&p.range),
			None,
		);
		Ok(plan.as_sql())
	}

	fn context_sqls(&self, p: &ContextParams) -> (String, String) {
		let ts = quote_ident(self.schema.ts_field.as_str());
		let before = QueryPlan::new(
			CKConverter,
			self.schema.clone(),
			vec![],
			None,
			vec![],
			vec![(ts.clone(), SortType::Desc)],
			vec![(OrdType::SmallerEqual, p.target)],
			Some(p.before_limit),
		)
		.with_offset(p.before_offset);
		let after = QueryPlan::new(
			CKConverter,
			self.schema.clone(),
			vec![],
			None,
			vec![],
			vec![(ts, SortType::Asc)],
			vec![(OrdType::Larger, p.target)],
			Some(p.after_limit),
		)
		.with_offset(p.after_offset);
		(before.as_sql(), after.as_sql())
	}
}

#[async_trait]
impl LogBackend for ClickhouseBackend {
	async fn query(
		&self,
		text: &str,
		opts: &ExecOpts,
	) -> Result<QueryOutcome, AppError> {
		let resp = self.execute(text.to_string(), opts).await?;
		Ok(to_outcome(resp))
	}

	async fn table_info(&self) -> Result<TableMeta, AppError> {
		let opts = probe_opts();
		let cols_sql = format!(
			"SELECT name, type FROM system.columns WHERE database = '{}' AND table = '{}' ORDER BY position",
			escape_literal(&self.conn.database),
			escape_literal(&self.conn.table),
		);
		let cols = self.execute(cols_sql, &opts).await?;
		let columns = cols
			.data
			.iter()
			.filter_map(|row| {
				Some(ColumnMeta {
					name: row.first()?.as_str()?.to_string(),
					type_: row.get(1)?.as_str()?.to_string(),
				})
			})
			.collect();
		let opts = probe_opts();
		let tbl_sql = format!(
			"SELECT engine, sorting_key FROM system.tables WHERE database = '{}' AND name = '{}'",
			escape_literal(&self.conn.database),
			escape_literal(&self.conn.table),
		);
		let tbl = self.execute(tbl_sql, &opts).await?;
		let (engine, sort_keys) = match tbl.data.first() {
			Some(row) => (
				row.first()
					.and_then(|v| v.as_str())
					.unwrap_or_default()
					.to_string(),
				row.get(1)
					.and_then(|v| v.as_str())
					.map(|s| {
						s.split(',')
							.map(|k| k.trim().to_string())
							.filter(|k| !k.is_empty())
							.collect()
					})
					.unwrap_or_default(),
			),
			None => (String::new(), vec![]),
		};
		Ok(TableMeta {
			columns,
			engine,
			sort_keys,
		})
	}

	fn translate(
		&self,
		q: &logchefql::parser::Query,
		catalog: &TableMeta,
		p: &TranslateParams,
	) -> Result<String, AppError> {
		let selection =
			QLVisitor::new(CKFieldResolver { catalog }).visit(q)?;
		let projection = match &q.projection {
			Some(fields) => {
				let resolver = CKFieldResolver { catalog };
				fields
					.iter()
					.map(|f| {
						sqlbuilder::visit::FieldResolver::resolve(
							&resolver, f,
						)
						.map(|fr| {
							sqlbuilder::builder::QueryConverter::convert_field(
								&CKConverter,
								&fr,
							)
						})
					})
					.collect::<Result<Vec<_>, _>>()?
			}
			None => vec![],
		};
		let plan = QueryPlan::new(
			CKConverter,
			self.schema.clone(),
			projection,
			selection,
			vec![],
			vec![(
				quote_ident(self.schema.ts_field.as_str()),
				SortType::Desc,
			)],
			time_range_into_timing(&p.range),
			Some(p.limit),
		);
		Ok(plan.as_sql())
	}

	async fn histogram(
		&self,
		q: &logchefql::parser::Query,
		catalog: &TableMeta,
		p: &HistogramParams,
		opts: &ExecOpts,
	) -> Result<Vec<HistogramBucket>, AppError> {
		let sql = self.histogram_sql(q, catalog, p)?;
		let resp = self.execute(sql, opts).await?;
		let grouped = p.group_by.is_some();
		let mut out = Vec::with_capacity(resp.data.len());
		for row in &resp.data {
			let bucket = row
				.first()
				.and_then(parse_ck_timestamp)
				.ok_or_else(|| {
					AppError::Backend(
						"histogram bucket is not a timestamp".to_string(),
					)
				})?;
			let (group, count_idx) = if grouped {
				(
					row.get(1).map(|v| json_display(v)),
					2,
				)
			} else {
				(None, 1)
			};
			let count =
				row.get(count_idx).and_then(json_to_u64).unwrap_or(0);
			out.push(HistogramBucket {
				bucket,
				count,
				group,
			});
		}
		Ok(out)
	}

	async fn log_context(
		&self,
		p: &ContextParams,
		opts: &ExecOpts,
	) -> Result<ContextOutcome, AppError> {
		let (before_sql, after_sql) = self.context_sqls(p);
		let before = self.execute(before_sql, opts).await?;
		let after_opts = ExecOpts {
			query_id: new_query_id(),
			timeout: opts.timeout,
			cancel: opts.cancel.clone(),
		};
		let after = self.execute(after_sql, &after_opts).await?;
		Ok(ContextOutcome {
			before_logs: rows_to_objects(&before),
			after_logs: rows_to_objects(&after),
		})
	}

	async fn field_values(
		&self,
		catalog: &TableMeta,
		p: &FieldValuesParams,
	) -> Result<HashMap<String, FieldCardinality>, AppError> {
		let selection = match &p.filter {
			Some(q) => {
				QLVisitor::new(CKFieldResolver { catalog }).visit(q)?
			}
			None => None,
		};
		// no explicit fields: auto-serve the low-cardinality and enum
		// columns; free-string fields load only when named
		let requested = if p.fields.is_empty() {
			catalog.auto_load_columns()
		} else {
			p.fields.clone()
		};
		let mut out = HashMap::new();
		for field in &requested {
			let path = field_path_of(field);
			let resolver = CKFieldResolver { catalog };
			let fr = match sqlbuilder::visit::FieldResolver::resolve(
				&resolver, &path,
			) {
				Ok(fr) => fr,
				// unknown fields are omitted rather than failing the batch
				Err(_) => continue,
			};
			let low_cardinality = path.rest().is_empty()
				&& catalog
					.column(path.head())
					.is_some_and(|c| !c.is_map() && c.is_low_cardinality());
			let expr = sqlbuilder::builder::QueryConverter::convert_field(
				&CKConverter,
				&fr,
			);
			let plan = QueryPlan::new(
				CKConverter,
				self.schema.clone(),
				vec![
					format!("toString({}) AS value", expr),
					"count() AS total".to_string(),
				],
				selection.clone(),
				vec!["value".to_string()],
				vec![("total".to_string(), SortType::Desc)],
				time_range_into_timing(&p.range),
				Some(p.top_n),
			);
			let opts = ExecOpts {
				query_id: new_query_id(),
				timeout: p.field_timeout,
				cancel: None,
			};
			let resp = self.execute(plan.as_sql(), &opts).await?;
			let values: Vec<ValueCount> = resp
				.data
				.iter()
				.map(|row| ValueCount {
					value: row
						.first()
						.map(json_display)
						.unwrap_or_default(),
					count: row.get(1).and_then(json_to_u64).unwrap_or(0),
				})
				.collect();
			// a low-cardinality domain fits in the top-N result, so the
			// separate full scan is only paid for free-string fields
			let total_distinct = if low_cardinality
				&& (values.len() as u32) < p.top_n
			{
				values.len() as u64
			} else {
				let distinct_plan = QueryPlan::new(
					CKConverter,
					self.schema.clone(),
					vec![format!("uniqExact({}) AS total", expr)],
					selection.clone(),
					vec![],
					vec![],
					time_range_into_timing(&p.range),
					None,
				);
				let opts = ExecOpts {
					query_id: new_query_id(),
					timeout: p.field_timeout,
					cancel: None,
				};
				let distinct =
					self.execute(distinct_plan.as_sql(), &opts).await?;
				distinct
					.data
					.first()
					.and_then(|r| r.first())
					.and_then(json_to_u64)
					.unwrap_or(0)
			};
			out.insert(
				field.clone(),
				FieldCardinality {
					values,
					total_distinct,
				},
			);
		}
		Ok(out)
	}

	async fn ping(&self) -> Result<(), AppError> {
		let sql = format!(
			"SELECT 1 FROM {}.{} LIMIT 1",
			quote_ident(&self.conn.database),
			quote_ident(&self.conn.table),
		);
		self.execute(sql, &probe_opts()).await?;
		Ok(())
	}

	async fn cancel(&self, query_id: &str) -> Result<(), AppError> {
		// deliberately a fresh client so the kill never queues behind the
		// connection carrying the victim query
		let fresh = Client::new();
		let sql = format!(
			"KILL QUERY WHERE query_id = '{}'",
			escape_literal(query_id)
		);
		let resp = fresh
			.post(self.conn.url.clone())
			.query(&[("default_format", "JSONCompact")])
			.body(sql)
			.basic_auth(
				self.conn.username.clone(),
				Some(self.conn.password.clone()),
			)
			.send()
			.await
			.map_err(|e| AppError::Backend(e.to_string()))?;
		if !resp.status().is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(AppError::Backend(truncate_body(&body)));
		}
		info!(query_id = query_id, "issued KILL QUERY");
		Ok(())
	}
}

fn probe_opts() -> ExecOpts {
	ExecOpts {
		query_id: new_query_id(),
		timeout: Duration::from_secs(10),
		cancel: None,
	}
}

fn flatten_timeout(
	res: Result<Result<CKResponse, AppError>, tokio::time::error::Elapsed>,
	started: Instant,
	opts: &ExecOpts,
) -> Result<CKResponse, AppError> {
	match res {
		Ok(inner) => inner,
		Err(_) => Err(AppError::QueryTimeout {
			elapsed_ms: started.elapsed().as_millis() as u64,
			timeout_ms: opts.timeout.as_millis() as u64,
		}),
	}
}

fn map_ck_error(body: &str, started: Instant, opts: &ExecOpts) -> AppError {
	if body.contains("Code: 159") || body.contains("TIMEOUT_EXCEEDED") {
		return AppError::QueryTimeout {
			elapsed_ms: started.elapsed().as_millis() as u64,
			timeout_ms: opts.timeout.as_millis() as u64,
		};
	}
	if body.contains("Code: 394") || body.contains("QUERY_WAS_CANCELLED") {
		return AppError::QueryCanceled(opts.query_id.clone());
	}
	AppError::Backend(truncate_body(body))
}

fn truncate_body(body: &str) -> String {
	const MAX: usize = 500;
	if body.chars().count() > MAX {
		let cut: String = body.chars().take(MAX).collect();
		format!("{}…", cut)
	} else {
		body.to_string()
	}
}

fn to_outcome(resp: CKResponse) -> QueryOutcome {
	let stats = resp
		.statistics
		.map(|s| QueryStats {
			execution_time_ms: (s.elapsed * 1000.0) as i64,
			rows_read: s.rows_read,
			bytes_read: s.bytes_read,
		})
		.unwrap_or_default();
	QueryOutcome {
		columns: resp
			.meta
			.into_iter()
			.map(|m| ColumnMeta {
				name: m.name,
				type_: m.type_,
			})
			.collect(),
		rows: resp.data,
		stats,
	}
}

fn rows_to_objects(resp: &CKResponse) -> Vec<JSONValue> {
	resp.data
		.iter()
		.map(|row| {
			let mut obj = serde_json::Map::new();
			for (i, col) in resp.meta.iter().enumerate() {
				obj.insert(
					col.name.clone(),
					row.get(i).cloned().unwrap_or(JSONValue::Null),
				);
			}
			// content hash lets clients de-duplicate rows that share a
			// timestamp across page boundaries
			let mut hasher = DefaultHasher::new();
			JSONValue::Array(row.clone()).to_string().hash(&mut hasher);
			obj.insert(
				"_row_hash".to_string(),
				JSONValue::String(format!("{:x}", hasher.finish())),
			);
			JSONValue::Object(obj)
		})
		.collect()
}

fn field_path_of(s: &str) -> FieldPath {
	FieldPath::new(s.split('.').collect::<Vec<_>>())
}

fn validate_timezone(tz: &str) -> Result<(), AppError> {
	let ok = !tz.is_empty()
		&& tz
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || "/_+-:".contains(c));
	if !ok {
		return Err(AppError::Validation(format!(
			"invalid timezone identifier: {}",
			tz
		)));
	}
	Ok(())
}

fn json_display(v: &JSONValue) -> String {
	match v {
		JSONValue::String(s) => s.clone(),
		other => other.to_string(),
	}
}

fn json_to_u64(v: &JSONValue) -> Option<u64> {
	match v {
		JSONValue::Number(n) => n.as_u64(),
		JSONValue::String(s) => s.parse().ok(),
		_ => None,
	}
}

// unix_timestamp output renders DateTime as epoch seconds, DateTime64
// with a fractional part
static TS_FORMATS: [&str; 4] = ["%s%.9f", "%s", "%s%.6f", "%s%.3f"];

fn parse_ck_timestamp(v: &JSONValue) -> Option<DateTime<Utc>> {
	match v {
		JSONValue::Number(n) => {
			DateTime::from_timestamp(n.as_i64()?, 0)
		}
		JSONValue::String(s) => {
			for f in TS_FORMATS.iter() {
				if let Ok(dt) = DateTime::parse_from_str(s, f) {
					return Some(dt.to_utc());
				}
			}
			None
		}
		_ => None,
	}
}

struct SqlLoggingMiddleware;

#[async_trait]
impl Middleware for SqlLoggingMiddleware {
	async fn handle(
		&self,
		req: Request,
		extensions: &mut Extensions,
		next: Next<'_>,
	) -> ReqResult<Response> {
		if let Some(v) = req.body().and_then(|b| b.as_bytes()) {
			debug!(sql = %String::from_utf8_lossy(v), "executing clickhouse query");
		}
		let start = Instant::now();
		let res = next.run(req, extensions).await;
		info!(elapsed = ?start.elapsed(), "clickhouse round trip");
		res
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use common::TimeRange;
	use pretty_assertions::assert_eq;

	fn backend() -> ClickhouseBackend {
		ClickhouseBackend::new(
			ClickhouseConn {
				url: "http://127.0.0.1:8123".to_string(),
				database: "logs".to_string(),
				table: "app".to_string(),
				username: "default".to_string(),
				password: "".to_string(),
			},
			"timestamp".to_string(),
		)
		.unwrap()
	}

	fn catalog() -> TableMeta {
		TableMeta {
			columns: vec![
				ColumnMeta {
					name: "timestamp".to_string(),
					type_: "DateTime64(3)".to_string(),
				},
				ColumnMeta {
					name: "level".to_string(),
					type_: "LowCardinality(String)".to_string(),
				},
				ColumnMeta {
					name: "svc".to_string(),
					type_: "String".to_string(),
				},
			],
			engine: "MergeTree".to_string(),
			sort_keys: vec!["timestamp".to_string()],
		}
	}

	#[test]
	fn test_translate_filter_query() {
		let b = backend();
		let q =
			logchefql::parser::parse(r#"level="error" and svc~"api""#)
				.unwrap();
		let sql = b
			.translate(
				&q,
				&catalog(),
				&TranslateParams {
					range: TimeRange::from_millis(
						Some(1_700_000_000_000),
						Some(1_700_003_600_000),
					),
					limit: 100,
					timezone: None,
				},
			)
			.unwrap();
		assert_eq!(
			sql,
			"SELECT * FROM `logs`.`app` WHERE \
			 `timestamp` >= fromUnixTimestamp64Milli(1700000000000) AND \
			 `timestamp` <= fromUnixTimestamp64Milli(1700003600000) AND \
			 (`level` = 'error' AND positionCaseInsensitive(`svc`, 'api') > 0) \
			 ORDER BY `timestamp` DESC LIMIT 100"
		);
	}

	#[test]
	fn test_translate_projection() {
		let b = backend();
		let q = logchefql::parser::parse("level=error | timestamp level")
			.unwrap();
		let sql = b
			.translate(
				&q,
				&catalog(),
				&TranslateParams {
					range: TimeRange::default(),
					limit: 50,
					timezone: None,
				},
			)
			.unwrap();
		assert!(
			sql.starts_with("SELECT `timestamp`, `level` FROM `logs`.`app`"),
			"{}",
			sql
		);
	}

	#[test]
	fn test_histogram_sql_with_group_and_timezone() {
		let b = backend();
		let q = logchefql::parser::parse("level=error").unwrap();
		let sql = b
			.histogram_sql(
				&q,
				&catalog(),
				&HistogramParams {
					range: TimeRange::from_millis(
						Some(1_700_000_000_000),
						Some(1_700_003_600_000),
					),
					bucket_seconds: 60,
					timezone: Some("Asia/Kolkata".to_string()),
					group_by: Some("svc".to_string()),
				},
			)
			.unwrap();
		assert_eq!(
			sql,
			"SELECT toStartOfInterval(`timestamp`, INTERVAL 60 SECOND, 'Asia/Kolkata') AS bucket, \
			 toString(`svc`) AS group_value, count() AS total FROM `logs`.`app` WHERE \
			 `timestamp` >= fromUnixTimestamp64Milli(1700000000000) AND \
			 `timestamp` <= fromUnixTimestamp64Milli(1700003600000) AND \
			 `level` = 'error' GROUP BY bucket, group_value ORDER BY bucket ASC"
		);
	}

	#[test]
	fn test_histogram_rejects_bad_timezone() {
		let b = backend();
		let q = logchefql::parser::parse("level=error").unwrap();
		let err = b
			.histogram_sql(
				&q,
				&catalog(),
				&HistogramParams {
					range: TimeRange::default(),
					bucket_seconds: 60,
					timezone: Some("Asia'; DROP TABLE x".to_string()),
					group_by: None,
				},
			)
			.unwrap_err();
		assert_eq!(err.error_type(), "ValidationError");
	}

	#[test]
	fn test_context_sql_pair() {
		let b = backend();
		let target =
			DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
		let (before, after) = b.context_sqls(&ContextParams {
			target,
			before_limit: 50,
			after_limit: 20,
			before_offset: 50,
			after_offset: 0,
		});
		assert_eq!(
			before,
			"SELECT * FROM `logs`.`app` WHERE \
			 `timestamp` <= fromUnixTimestamp64Milli(1700000000000) \
			 ORDER BY `timestamp` DESC LIMIT 50 OFFSET 50"
		);
		assert_eq!(
			after,
			"SELECT * FROM `logs`.`app` WHERE \
			 `timestamp` > fromUnixTimestamp64Milli(1700000000000) \
			 ORDER BY `timestamp` ASC LIMIT 20"
		);
	}

	#[test]
	fn test_parse_ck_timestamp_forms() {
		assert_eq!(
			parse_ck_timestamp(&serde_json::json!("1700000000")),
			DateTime::from_timestamp(1_700_000_000, 0)
		);
		assert_eq!(
			parse_ck_timestamp(&serde_json::json!(1_700_000_000i64)),
			DateTime::from_timestamp(1_700_000_000, 0)
		);
		assert!(
			parse_ck_timestamp(&serde_json::json!("1700000000.123456789"))
				.is_some()
		);
		assert_eq!(parse_ck_timestamp(&serde_json::json!("nope")), None);
	}

	#[test]
	fn test_row_objects_carry_dedup_hash() {
		let resp = CKResponse {
			meta: vec![
				CKMetaCol {
					name: "timestamp".to_string(),
					type_: "DateTime64(3)".to_string(),
				},
				CKMetaCol {
					name: "body".to_string(),
					type_: "String".to_string(),
				},
			],
			data: vec![vec![
				serde_json::json!("1700000000"),
				serde_json::json!("hello"),
			]],
			statistics: None,
		};
		let objs = rows_to_objects(&resp);
		assert_eq!(objs.len(), 1);
		assert_eq!(objs[0]["body"], serde_json::json!("hello"));
		assert!(objs[0]["_row_hash"].is_string());
	}
}
