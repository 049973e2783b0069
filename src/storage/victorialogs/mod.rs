use crate::{
	errors::AppError,
	meta::sources::VictoriaLogsConn,
	storage::{
		ColumnMeta, ContextOutcome, ContextParams, ExecOpts,
		FieldCardinality, FieldValuesParams, HistogramBucket, HistogramParams,
		LogBackend, QueryOutcome, TableMeta, TranslateParams, ValueCount,
	},
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::{QueryStats, TimeRange};
use itertools::Itertools;
use logchefql::parser::Query;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JSONValue;
use std::{
	collections::HashMap,
	hash::{DefaultHasher, Hash, Hasher},
	time::{Duration, Instant},
};
use tracing::debug;

pub mod logsql;

/// Adapter for the schemaless pipe-log engine. Everything rides the
/// `/select/logsql/*` HTTP interface; tenant headers are forwarded
/// verbatim on every request.
#[derive(Clone, Debug)]
pub struct VictoriaLogsBackend {
	http: Client,
	conn: VictoriaLogsConn,
}

#[derive(Debug, Deserialize)]
struct VLHitsResponse {
	#[serde(default)]
	hits: Vec<VLHitGroup>,
}

#[derive(Debug, Deserialize)]
struct VLHitGroup {
	#[serde(default)]
	fields: HashMap<String, String>,
	#[serde(default)]
	timestamps: Vec<String>,
	#[serde(default)]
	values: Vec<JSONValue>,
}

#[derive(Debug, Deserialize)]
struct VLValuesResponse {
	#[serde(default)]
	values: Vec<VLValueCount>,
}

#[derive(Debug, Deserialize)]
struct VLValueCount {
	value: String,
	#[serde(default)]
	hits: JSONValue,
}

impl VictoriaLogsBackend {
	pub fn new(
		conn: VictoriaLogsConn,
		_ts_field: String,
	) -> Result<Self, AppError> {
		let http = Client::builder()
			.gzip(true)
			.build()
			.map_err(|e| AppError::Config(e.to_string()))?;
		Ok(Self { http, conn })
	}

	fn endpoint(&self, path: &str) -> String {
		format!("{}{}", self.conn.url.trim_end_matches('/'), path)
	}

	async fn post_form(
		&self,
		path: &str,
		form: &[(&str, String)],
		opts: &ExecOpts,
	) -> Result<String, AppError> {
		let started = Instant::now();
		let mut req = self.http.post(self.endpoint(path)).form(form);
		for (k, v) in &self.conn.headers {
			req = req.header(k.as_str(), v.as_str());
		}
		debug!(path = path, "victorialogs request");
		let fut = async {
			let resp = req
				.send()
				.await
				.map_err(|e| AppError::Backend(e.to_string()))?;
			let status = resp.status();
			let text = resp
				.text()
				.await
				.map_err(|e| AppError::Backend(e.to_string()))?;
			if !status.is_success() {
				return Err(AppError::Backend(text));
			}
			Ok(text)
		};
		let bounded = tokio::time::timeout(opts.timeout, fut);
		match &opts.cancel {
			// no out-of-band cancel primitive; dropping the transport is
			// the whole protocol
			Some(cancel) => tokio::select! {
				res = bounded => flatten_timeout(res, started, opts),
				_ = cancel.notified() => {
					Err(AppError::QueryCanceled(opts.query_id.clone()))
				}
			},
			None => flatten_timeout(bounded.await, started, opts),
		}
	}

	async fn run_logsql(
		&self,
		query: String,
		opts: &ExecOpts,
	) -> Result<QueryOutcome, AppError> {
		let started = Instant::now();
		let text = self
			.post_form(
				"/select/logsql/query",
				&[("query", query)],
				opts,
			)
			.await?;
		// the engine streams one JSON object per line
		let mut columns: Vec<String> = vec![];
		let mut objects: Vec<serde_json::Map<String, JSONValue>> = vec![];
		for line in text.lines() {
			if line.trim().is_empty() {
				continue;
			}
			let obj: serde_json::Map<String, JSONValue> =
				serde_json::from_str(line).map_err(|_| {
					AppError::Backend(
						"unexpected line in query response".to_string(),
					)
				})?;
			for key in obj.keys() {
				if !columns.iter().any(|c| c == key) {
					columns.push(key.clone());
				}
			}
			objects.push(obj);
		}
		let rows: Vec<Vec<JSONValue>> = objects
			.iter()
			.map(|obj| {
				columns
					.iter()
					.map(|c| obj.get(c).cloned().unwrap_or(JSONValue::Null))
					.collect()
			})
			.collect();
		let rows_read = rows.len() as i64;
		Ok(QueryOutcome {
			columns: columns
				.into_iter()
				.map(|name| ColumnMeta {
					name,
					type_: "String".to_string(),
				})
				.collect(),
			rows,
			stats: QueryStats {
				execution_time_ms: started.elapsed().as_millis() as i64,
				rows_read,
				bytes_read: text.len() as i64,
			},
		})
	}
}

#[async_trait]
impl LogBackend for VictoriaLogsBackend {
	async fn query(
		&self,
		text: &str,
		opts: &ExecOpts,
	) -> Result<QueryOutcome, AppError> {
		self.run_logsql(text.to_string(), opts).await
	}

	/// The engine is schemaless; the catalog is synthesized from the
	/// field-name index.
	async fn table_info(&self) -> Result<TableMeta, AppError> {
		let opts = probe_opts();
		let text = self
			.post_form(
				"/select/logsql/field_names",
				&[("query", "*".to_string())],
				&opts,
			)
			.await?;
		let parsed: VLValuesResponse = serde_json::from_str(&text)
			.map_err(|_| {
				AppError::Backend("unexpected field_names response".into())
			})?;
		Ok(TableMeta {
			columns: parsed
				.values
				.into_iter()
				.map(|v| ColumnMeta {
					name: v.value,
					type_: "String".to_string(),
				})
				.collect(),
			engine: "VictoriaLogs".to_string(),
			sort_keys: vec!["_time".to_string()],
		})
	}

	fn translate(
		&self,
		q: &Query,
		_catalog: &TableMeta,
		p: &TranslateParams,
	) -> Result<String, AppError> {
		Ok(logsql::query_string(q, &p.range, p.limit))
	}

	async fn histogram(
		&self,
		q: &Query,
		_catalog: &TableMeta,
		p: &HistogramParams,
		opts: &ExecOpts,
	) -> Result<Vec<HistogramBucket>, AppError> {
		let (Some(start), Some(end)) = (p.range.start, p.range.end) else {
			return Err(AppError::Validation(
				"histogram requires a bounded time range".to_string(),
			));
		};
		let mut form = vec![
			("query", logsql::render_filter(q)),
			("start", rfc3339(start)),
			("end", rfc3339(end)),
			("step", format!("{}s", p.bucket_seconds)),
		];
		if let Some(group_by) = &p.group_by {
			form.push(("field", group_by.clone()));
		}
		let text = self
			.post_form("/select/logsql/hits", &form, opts)
			.await?;
		let parsed: VLHitsResponse =
			serde_json::from_str(&text).map_err(|_| {
				AppError::Backend("unexpected hits response".to_string())
			})?;
		let mut out = vec![];
		for hit in &parsed.hits {
			let group = if hit.fields.is_empty() {
				None
			} else {
				Some(hit.fields.values().sorted().join(","))
			};
			for (ts, val) in hit.timestamps.iter().zip(hit.values.iter()) {
				let bucket = DateTime::parse_from_rfc3339(ts)
					.map_err(|_| {
						AppError::Backend(format!(
							"unexpected hits timestamp: {}",
							ts
						))
					})?
					.to_utc();
				let count = match val {
					JSONValue::Number(n) => n.as_u64().unwrap_or(0),
					JSONValue::String(s) => s.parse().unwrap_or(0),
					_ => 0,
				};
				out.push(HistogramBucket {
					bucket,
					count,
					group: group.clone(),
				});
			}
		}
		out.sort_by_key(|b| b.bucket);
		Ok(out)
	}

	async fn log_context(
		&self,
		p: &ContextParams,
		opts: &ExecOpts,
	) -> Result<ContextOutcome, AppError> {
		let before_q = format!(
			"_time:<={} | sort by (_time) desc | offset {} | limit {}",
			rfc3339(p.target),
			p.before_offset,
			p.before_limit
		);
		let after_q = format!(
			"_time:>{} | sort by (_time) | offset {} | limit {}",
			rfc3339(p.target),
			p.after_offset,
			p.after_limit
		);
		let before = self.run_logsql(before_q, opts).await?;
		let after = self.run_logsql(after_q, opts).await?;
		Ok(ContextOutcome {
			before_logs: outcome_to_objects(&before),
			after_logs: outcome_to_objects(&after),
		})
	}

	async fn field_values(
		&self,
		_catalog: &TableMeta,
		p: &FieldValuesParams,
	) -> Result<HashMap<String, FieldCardinality>, AppError> {
		// the engine is schemaless: every field is a free string, so
		// nothing qualifies for auto-serve and each field must be named
		if p.fields.is_empty() {
			return Err(AppError::Validation(
				"this source has no auto-loadable fields; name the fields to load"
					.to_string(),
			));
		}
		let filter = match &p.filter {
			Some(q) => logsql::render_filter(q),
			None => "*".to_string(),
		};
		let filter = match time_suffix(&p.range) {
			Some(t) if filter == "*" => t,
			Some(t) => format!("{} {}", filter, t),
			None => filter,
		};
		let mut out = HashMap::new();
		for field in &p.fields {
			let opts = ExecOpts {
				query_id: crate::storage::new_query_id(),
				timeout: p.field_timeout,
				cancel: None,
			};
			let text = self
				.post_form(
					"/select/logsql/field_values",
					&[
						("query", filter.clone()),
						("field", field.clone()),
						("limit", p.top_n.to_string()),
					],
					&opts,
				)
				.await?;
			let parsed: VLValuesResponse = serde_json::from_str(&text)
				.map_err(|_| {
					AppError::Backend(
						"unexpected field_values response".to_string(),
					)
				})?;
			let values: Vec<ValueCount> = parsed
				.values
				.into_iter()
				.map(|v| ValueCount {
					count: match &v.hits {
						JSONValue::Number(n) => n.as_u64().unwrap_or(0),
						JSONValue::String(s) => s.parse().unwrap_or(0),
						_ => 0,
					},
					value: v.value,
				})
				.collect();
			let total_distinct = values.len() as u64;
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
		let mut req = self.http.get(self.endpoint("/health"));
		for (k, v) in &self.conn.headers {
			req = req.header(k.as_str(), v.as_str());
		}
		let resp = req
			.timeout(Duration::from_secs(5))
			.send()
			.await
			.map_err(|e| AppError::Backend(e.to_string()))?;
		if !resp.status().is_success() {
			return Err(AppError::Backend(format!(
				"health endpoint returned {}",
				resp.status()
			)));
		}
		Ok(())
	}

	async fn cancel(&self, _query_id: &str) -> Result<(), AppError> {
		// nothing out-of-band to issue; aborting the transport is all
		// the engine offers
		Ok(())
	}
}

fn probe_opts() -> ExecOpts {
	ExecOpts {
		query_id: crate::storage::new_query_id(),
		timeout: Duration::from_secs(10),
		cancel: None,
	}
}

fn flatten_timeout(
	res: Result<Result<String, AppError>, tokio::time::error::Elapsed>,
	started: Instant,
	opts: &ExecOpts,
) -> Result<String, AppError> {
	match res {
		Ok(inner) => inner,
		Err(_) => Err(AppError::QueryTimeout {
			elapsed_ms: started.elapsed().as_millis() as u64,
			timeout_ms: opts.timeout.as_millis() as u64,
		}),
	}
}

fn rfc3339(t: DateTime<Utc>) -> String {
	t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn time_suffix(range: &TimeRange) -> Option<String> {
	match (range.start, range.end) {
		(Some(s), Some(e)) => Some(format!(
			"_time:[{}, {}]",
			rfc3339(s),
			rfc3339(e)
		)),
		(Some(s), None) => Some(format!("_time:>={}", rfc3339(s))),
		(None, Some(e)) => Some(format!("_time:<={}", rfc3339(e))),
		(None, None) => None,
	}
}

fn outcome_to_objects(outcome: &QueryOutcome) -> Vec<JSONValue> {
	outcome
		.rows
		.iter()
		.map(|row| {
			let mut obj = serde_json::Map::new();
			for (i, col) in outcome.columns.iter().enumerate() {
				obj.insert(
					col.name.clone(),
					row.get(i).cloned().unwrap_or(JSONValue::Null),
				);
			}
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
