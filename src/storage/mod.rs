use crate::{
	config::ProbeCfg,
	errors::AppError,
	meta::{Source, SourceConnection},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{QueryStats, TimeRange};
use dashmap::DashMap;
use dyn_clone::DynClone;
use moka::sync::Cache;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value as JSONValue;
use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, AtomicU32, Ordering},
		Arc,
	},
	time::Duration,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod clickhouse;
pub mod victorialogs;

// consecutive probe failures before a pool is marked unavailable
pub const UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ColumnMeta {
	pub name: String,
	#[serde(rename = "type")]
	pub type_: String,
}

impl ColumnMeta {
	pub fn is_map(&self) -> bool {
		self.type_.starts_with("Map(")
	}
	pub fn is_json(&self) -> bool {
		self.type_.contains("JSON") || self.type_.contains("Object(")
	}
	pub fn is_low_cardinality(&self) -> bool {
		self.type_.contains("LowCardinality")
			|| self.type_.contains("Enum")
			|| self.type_ == "Bool"
	}
}

/// Column catalog cached in memory after the first probe; advisory, not
/// authoritative persisted state.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TableMeta {
	pub columns: Vec<ColumnMeta>,
	pub engine: String,
	pub sort_keys: Vec<String>,
}

impl TableMeta {
	pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
		self.columns.iter().find(|c| c.name == name)
	}
	pub fn first_map_column(&self) -> Option<&ColumnMeta> {
		self.columns.iter().find(|c| c.is_map())
	}
	/// Columns cheap enough to serve distributions for without being
	/// asked by name: low-cardinality, enum, and bool types. Map columns
	/// carry LowCardinality in their key type and do not qualify.
	pub fn auto_load_columns(&self) -> Vec<String> {
		self.columns
			.iter()
			.filter(|c| !c.is_map() && c.is_low_cardinality())
			.map(|c| c.name.clone())
			.collect()
	}
}

/// Per-execution context threaded down to the transport.
pub struct ExecOpts {
	pub query_id: String,
	pub timeout: Duration,
	pub cancel: Option<Arc<Notify>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
	pub columns: Vec<ColumnMeta>,
	pub rows: Vec<Vec<JSONValue>>,
	pub stats: QueryStats,
}

pub struct TranslateParams {
	pub range: TimeRange,
	pub limit: u32,
	pub timezone: Option<String>,
}

pub struct HistogramParams {
	pub range: TimeRange,
	pub bucket_seconds: u32,
	pub timezone: Option<String>,
	pub group_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBucket {
	pub bucket: DateTime<Utc>,
	pub count: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub group: Option<String>,
}

pub struct ContextParams {
	pub target: DateTime<Utc>,
	pub before_limit: u32,
	pub after_limit: u32,
	pub before_offset: u32,
	pub after_offset: u32,
}

#[derive(Debug, Serialize)]
pub struct ContextOutcome {
	pub before_logs: Vec<JSONValue>,
	pub after_logs: Vec<JSONValue>,
}

pub struct FieldValuesParams {
	// empty means auto-serve: the adapter picks its low-cardinality and
	// enum columns; free-string fields load only when named explicitly
	pub fields: Vec<String>,
	pub filter: Option<logchefql::parser::Query>,
	pub range: TimeRange,
	pub top_n: u32,
	// hard wall clock per free-string field to prevent pileup
	pub field_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueCount {
	pub value: String,
	pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldCardinality {
	pub values: Vec<ValueCount>,
	pub total_distinct: u64,
}

/// The capability set every backend adapter implements. Handlers and the
/// alert evaluator only ever see this trait object.
#[async_trait]
pub trait LogBackend: DynClone + Send + Sync + std::fmt::Debug {
	async fn query(
		&self,
		text: &str,
		opts: &ExecOpts,
	) -> Result<QueryOutcome, AppError>;
	async fn table_info(&self) -> Result<TableMeta, AppError>;
	fn translate(
		&self,
		q: &logchefql::parser::Query,
		catalog: &TableMeta,
		p: &TranslateParams,
	) -> Result<String, AppError>;
	async fn histogram(
		&self,
		q: &logchefql::parser::Query,
		catalog: &TableMeta,
		p: &HistogramParams,
		opts: &ExecOpts,
	) -> Result<Vec<HistogramBucket>, AppError>;
	async fn log_context(
		&self,
		p: &ContextParams,
		opts: &ExecOpts,
	) -> Result<ContextOutcome, AppError>;
	async fn field_values(
		&self,
		catalog: &TableMeta,
		p: &FieldValuesParams,
	) -> Result<HashMap<String, FieldCardinality>, AppError>;
	async fn ping(&self) -> Result<(), AppError>;
	/// Out-of-band cancel for backends that have one; otherwise a no-op.
	async fn cancel(&self, query_id: &str) -> Result<(), AppError>;
}

dyn_clone::clone_trait_object!(LogBackend);

pub fn new_query_id() -> String {
	let mut buf = [0u8; 12];
	rand::thread_rng().fill_bytes(&mut buf);
	format!("lc_{}", hex::encode(buf))
}

/// Server-side correlation ids for in-flight queries. Cancel wakes the
/// executor; a cancel after completion finds no entry and is a no-op.
#[derive(Default)]
pub struct InflightQueries {
	m: DashMap<String, Arc<Notify>>,
}

impl InflightQueries {
	pub fn register(&self, id: &str) -> Arc<Notify> {
		let n = Arc::new(Notify::new());
		self.m.insert(id.to_string(), n.clone());
		n
	}
	pub fn finish(&self, id: &str) {
		self.m.remove(id);
	}
	pub fn cancel(&self, id: &str) -> bool {
		match self.m.remove(id) {
			Some((_, n)) => {
				// the stored permit covers a cancel landing before the
				// executor awaits
				n.notify_one();
				true
			}
			None => false,
		}
	}
}

pub struct PoolHealth {
	failures: AtomicU32,
	healthy: AtomicBool,
}

impl PoolHealth {
	pub fn new() -> Self {
		Self {
			failures: AtomicU32::new(0),
			healthy: AtomicBool::new(true),
		}
	}
	pub fn record_success(&self) {
		self.failures.store(0, Ordering::Relaxed);
		self.healthy.store(true, Ordering::Relaxed);
	}
	pub fn record_failure(&self) -> u32 {
		let n = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
		if n >= UNHEALTHY_AFTER {
			self.healthy.store(false, Ordering::Relaxed);
		}
		n
	}
	pub fn is_healthy(&self) -> bool {
		self.healthy.load(Ordering::Relaxed)
	}
}

impl Default for PoolHealth {
	fn default() -> Self {
		Self::new()
	}
}

struct PoolEntry {
	client: Box<dyn LogBackend>,
	health: Arc<PoolHealth>,
	probe: JoinHandle<()>,
}

impl Drop for PoolEntry {
	fn drop(&mut self) {
		self.probe.abort();
	}
}

/// One pool entry per source with fine-grained map locking, so one slow
/// source never stalls the rest.
pub struct BackendRegistry {
	pools: DashMap<i64, PoolEntry>,
	catalogs: Cache<i64, Arc<TableMeta>>,
	probe_interval: Duration,
	probe_timeout: Duration,
}

impl BackendRegistry {
	pub fn new(probe: &ProbeCfg) -> Self {
		Self {
			pools: DashMap::new(),
			catalogs: Cache::builder()
				.max_capacity(1024)
				.time_to_live(Duration::from_secs(300))
				.build(),
			probe_interval: probe.interval,
			probe_timeout: probe.timeout,
		}
	}

	fn build_client(source: &Source) -> Result<Box<dyn LogBackend>, AppError> {
		match &source.connection {
			SourceConnection::Clickhouse(c) => {
				Ok(Box::new(clickhouse::ClickhouseBackend::new(
					c.clone(),
					source.timestamp_field.clone(),
				)?))
			}
			SourceConnection::VictoriaLogs(c) => {
				Ok(Box::new(victorialogs::VictoriaLogsBackend::new(
					c.clone(),
					source.timestamp_field.clone(),
				)?))
			}
		}
	}

	/// First-time registration validates the connection synchronously;
	/// re-registration after a restart is lazy and skips the probe.
	pub async fn register(
		&self,
		source: &Source,
		validate: bool,
	) -> Result<(), AppError> {
		let client = Self::build_client(source)?;
		if validate {
			client.ping().await.map_err(|e| {
				AppError::Validation(format!(
					"cannot connect to source {}: {}",
					source.name, e
				))
			})?;
		}
		let health = Arc::new(PoolHealth::new());
		let probe = spawn_probe(
			client.clone(),
			health.clone(),
			source.name.clone(),
			self.probe_interval,
			self.probe_timeout,
		);
		// replacing an entry drops the old one and aborts its probe
		self.pools.insert(
			source.id,
			PoolEntry {
				client,
				health,
				probe,
			},
		);
		self.catalogs.invalidate(&source.id);
		Ok(())
	}

	pub async fn get_client(
		&self,
		source: &Source,
	) -> Result<Box<dyn LogBackend>, AppError> {
		if let Some(entry) = self.pools.get(&source.id) {
			if !entry.health.is_healthy() {
				return Err(AppError::BackendUnavailable(format!(
					"source {} failed {} consecutive health probes",
					source.name, UNHEALTHY_AFTER
				)));
			}
			return Ok(entry.client.clone());
		}
		self.register(source, false).await?;
		self.pools
			.get(&source.id)
			.map(|e| e.client.clone())
			.ok_or_else(|| {
				AppError::BackendUnavailable(format!(
					"source {} is not registered",
					source.name
				))
			})
	}

	pub fn remove(&self, source_id: i64) {
		self.pools.remove(&source_id);
		self.catalogs.invalidate(&source_id);
	}

	/// Read-through column catalog; refreshed on source update or
	/// explicit invalidation, last writer wins.
	pub async fn catalog(
		&self,
		source: &Source,
	) -> Result<Arc<TableMeta>, AppError> {
		if let Some(c) = self.catalogs.get(&source.id) {
			return Ok(c);
		}
		let client = self.get_client(source).await?;
		let meta = Arc::new(client.table_info().await?);
		self.catalogs.insert(source.id, meta.clone());
		Ok(meta)
	}

	pub fn invalidate_catalog(&self, source_id: i64) {
		self.catalogs.invalidate(&source_id);
	}

	#[cfg(test)]
	pub(crate) fn insert_for_tests(
		&self,
		source_id: i64,
		client: Box<dyn LogBackend>,
		health: Arc<PoolHealth>,
	) {
		let probe = tokio::spawn(async {});
		self.pools.insert(
			source_id,
			PoolEntry {
				client,
				health,
				probe,
			},
		);
	}
}

fn spawn_probe(
	client: Box<dyn LogBackend>,
	health: Arc<PoolHealth>,
	source_name: String,
	interval: Duration,
	timeout: Duration,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker
			.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			match tokio::time::timeout(timeout, client.ping()).await {
				Ok(Ok(())) => {
					if !health.is_healthy() {
						debug!(source = %source_name, "source recovered");
					}
					health.record_success();
				}
				Ok(Err(e)) => {
					let n = health.record_failure();
					warn!(source = %source_name, failures = n, error = %e, "health probe failed");
				}
				Err(_) => {
					let n = health.record_failure();
					warn!(source = %source_name, failures = n, "health probe timed out");
				}
			}
		}
	})
}


#[cfg(test)]
mod tests {
	use super::tests_support::FakeBackend;
	use super::*;
	use crate::meta::sources::tests_support::sample_source;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_health_three_strikes() {
		let h = PoolHealth::new();
		assert!(h.is_healthy());
		h.record_failure();
		h.record_failure();
		assert!(h.is_healthy());
		h.record_failure();
		assert!(!h.is_healthy());
		h.record_success();
		assert!(h.is_healthy());
	}

	#[test]
	fn test_auto_load_columns_pick_cheap_types() {
		let meta = TableMeta {
			columns: vec![
				ColumnMeta {
					name: "level".to_string(),
					type_: "LowCardinality(String)".to_string(),
				},
				ColumnMeta {
					name: "env".to_string(),
					type_: "Enum8('prod' = 1, 'dev' = 2)".to_string(),
				},
				ColumnMeta {
					name: "body".to_string(),
					type_: "String".to_string(),
				},
				ColumnMeta {
					name: "attributes".to_string(),
					type_: "Map(LowCardinality(String), String)".to_string(),
				},
			],
			engine: "MergeTree".to_string(),
			sort_keys: vec![],
		};
		assert_eq!(
			meta.auto_load_columns(),
			vec!["level".to_string(), "env".to_string()]
		);
	}

	#[test]
	fn test_query_ids_are_unique() {
		let a = new_query_id();
		let b = new_query_id();
		assert_ne!(a, b);
		assert!(a.starts_with("lc_"));
	}

	#[tokio::test]
	async fn test_cancel_is_noop_after_finish() {
		let inflight = InflightQueries::default();
		let id = new_query_id();
		let notify = inflight.register(&id);
		assert!(inflight.cancel(&id));
		// the permit is stored, so a late waiter still observes it
		tokio::time::timeout(Duration::from_millis(100), notify.notified())
			.await
			.expect("cancel permit should wake the waiter");
		assert!(!inflight.cancel(&id));
	}

	#[tokio::test]
	async fn test_unhealthy_pool_returns_unavailable() {
		let registry = BackendRegistry::new(&crate::config::ProbeCfg {
			interval: Duration::from_secs(3600),
			timeout: Duration::from_secs(1),
		});
		let store = crate::meta::Store::memory().await.unwrap();
		let source = store
			.create_source(&sample_source("app-logs"))
			.await
			.unwrap();
		let fake = FakeBackend::returning(vec![]);
		let health = Arc::new(PoolHealth::new());
		registry.insert_for_tests(source.id, Box::new(fake), health.clone());

		assert!(registry.get_client(&source).await.is_ok());
		for _ in 0..UNHEALTHY_AFTER {
			health.record_failure();
		}
		let err = registry.get_client(&source).await.unwrap_err();
		assert_eq!(err.error_type(), "BackendUnavailable");
		health.record_success();
		assert!(registry.get_client(&source).await.is_ok());
	}
}
