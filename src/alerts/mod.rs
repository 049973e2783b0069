use crate::{
	config::AlertsCfg,
	errors::AppError,
	meta::{
		settings::SETTING_ALERTING_ENABLED, AlertHistoryStatus, AlertRule,
		AlertState, Store,
	},
	storage::{new_query_id, BackendRegistry, ExecOpts, QueryOutcome},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value as JSONValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

pub mod notifier;
pub use notifier::{AlertNotification, Notifier};

struct RuleTask {
	frequency: i64,
	handle: JoinHandle<()>,
	lock: Arc<Mutex<()>>,
}

impl Drop for RuleTask {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

#[derive(Debug, Serialize)]
pub struct TestOutcome {
	pub value: f64,
	pub threshold_met: bool,
	pub execution_time_ms: i64,
	pub rows_read: i64,
}

/// Process-wide rule scheduler: a map of rule-id to cancellable periodic
/// task plus a reconciliation procedure. The per-rule mutex guarantees
/// at-most-one in-flight evaluation; tick bodies run outside the map.
pub struct Scheduler {
	store: Store,
	registry: Arc<BackendRegistry>,
	notifier: Notifier,
	cfg: AlertsCfg,
	tasks: DashMap<i64, RuleTask>,
}

impl Scheduler {
	pub fn new(
		store: Store,
		registry: Arc<BackendRegistry>,
		cfg: AlertsCfg,
	) -> Arc<Self> {
		let notifier = Notifier::new(&cfg);
		Arc::new(Self {
			store,
			registry,
			notifier,
			cfg,
			tasks: DashMap::new(),
		})
	}

	/// Runs on startup and on every rule mutation: new rules get a
	/// timer, changed frequencies replace it, deleted or deactivated
	/// rules are unscheduled. A rule whose source lost its team link is
	/// deactivated here.
	pub async fn reconcile(self: &Arc<Self>) -> Result<(), AppError> {
		let enabled = self
			.store
			.setting_bool(SETTING_ALERTING_ENABLED, self.cfg.enabled)
			.await?;
		if !enabled {
			if !self.tasks.is_empty() {
				info!("alerting disabled, unscheduling all rules");
				self.tasks.clear();
			}
			return Ok(());
		}
		let rules = self.store.list_active_alert_rules().await?;
		let mut seen = HashSet::new();
		for rule in rules {
			if !self
				.store
				.team_source_linked(rule.team_id, rule.source_id)
				.await?
			{
				warn!(
					rule = rule.id,
					"source no longer linked to team, deactivating rule"
				);
				self.store.deactivate_alert_rule(rule.id).await?;
				continue;
			}
			seen.insert(rule.id);
			let fresh = match self.tasks.get(&rule.id) {
				Some(task) if task.frequency == rule.frequency_seconds => {
					false
				}
				_ => true,
			};
			if fresh {
				self.schedule(&rule);
			}
		}
		self.tasks.retain(|id, _| seen.contains(id));
		Ok(())
	}

	fn schedule(self: &Arc<Self>, rule: &AlertRule) {
		let frequency = rule.frequency_seconds.max(10) as u64;
		let lock = Arc::new(Mutex::new(()));
		let this = self.clone();
		let rule_id = rule.id;
		let tick_lock = lock.clone();
		let handle = tokio::spawn(async move {
			let mut ticker =
				tokio::time::interval(Duration::from_secs(frequency));
			ticker.set_missed_tick_behavior(
				tokio::time::MissedTickBehavior::Delay,
			);
			// interval fires immediately; the first real tick comes one
			// period after scheduling
			ticker.tick().await;
			loop {
				ticker.tick().await;
				if let Err(e) = this.evaluate(rule_id, &tick_lock).await {
					error!(rule = rule_id, error = %e, "alert evaluation failed");
				}
			}
		});
		debug!(rule = rule_id, frequency = frequency, "scheduled rule");
		self.tasks.insert(
			rule_id,
			RuleTask {
				frequency: rule.frequency_seconds,
				handle,
				lock,
			},
		);
	}

	async fn evaluate(
		&self,
		rule_id: i64,
		lock: &Mutex<()>,
	) -> Result<(), AppError> {
		// a tick that outlives its interval must not overlap the next one
		let Ok(_guard) = lock.try_lock() else {
			warn!(rule = rule_id, "previous evaluation still running, skipping tick");
			return Ok(());
		};
		let rule = self.store.alert_rule(rule_id).await?;
		if !rule.active {
			return Ok(());
		}
		let source = self.store.source_by_id(rule.source_id).await?;
		let client = self.registry.get_client(&source).await?;
		let now = Utc::now();
		self.store.mark_rule_evaluated(rule.id, now).await?;
		let opts = ExecOpts {
			query_id: new_query_id(),
			timeout: self.cfg.eval_timeout,
			cancel: None,
		};
		match client.query(&rule.query, &opts).await {
			Err(e) => {
				self.record_rule_error(
					&rule,
					&format!("rule query failed: {}", e),
				)
				.await
			}
			Ok(outcome) => match extract_scalar(&outcome) {
				Err(msg) => self.record_rule_error(&rule, &msg).await,
				Ok(value) => self.transition(&rule, value, now).await,
			},
		}
	}

	/// The two stable states and their only transitions; true+firing and
	/// false+resolved are deliberate no-ops.
	async fn transition(
		&self,
		rule: &AlertRule,
		value: f64,
		now: DateTime<Utc>,
	) -> Result<(), AppError> {
		let met = rule
			.threshold_operator
			.compare(value, rule.threshold_value);
		match (met, rule.last_state) {
			(true, AlertState::Resolved) => {
				self.fire(rule, value, now).await
			}
			(true, AlertState::Firing) => Ok(()),
			(false, AlertState::Firing) => {
				self.resolve(rule, format_value(value), now).await
			}
			(false, AlertState::Resolved) => Ok(()),
		}
	}

	async fn fire(
		&self,
		rule: &AlertRule,
		value: f64,
		now: DateTime<Utc>,
	) -> Result<(), AppError> {
		let value_text = format_value(value);
		let message = if rule.description.is_empty() {
			None
		} else {
			Some(rule.description.as_str())
		};
		let history_id = self
			.store
			.append_alert_history(
				rule.id,
				AlertHistoryStatus::Triggered,
				&value_text,
				message,
			)
			.await?;
		self.store.set_rule_firing(rule.id, now).await?;
		self.store
			.prune_alert_history(rule.id, self.cfg.history_limit)
			.await?;
		info!(rule = rule.id, value = %value_text, "alert firing");
		let payload = build_payload(rule, &value_text, now, None);
		match self.notifier.push(&[payload]).await {
			Ok(()) => {
				self.store
					.set_history_delivery_failed(history_id, false)
					.await
			}
			Err(e) => {
				warn!(rule = rule.id, error = %e, "firing notification undeliverable");
				self.store
					.set_history_delivery_failed(history_id, true)
					.await
			}
		}
	}

	async fn resolve(
		&self,
		rule: &AlertRule,
		value_text: String,
		now: DateTime<Utc>,
	) -> Result<(), AppError> {
		let history_id =
			self.store.resolve_latest_triggered(rule.id, now).await?;
		self.store.set_rule_resolved(rule.id).await?;
		info!(rule = rule.id, "alert resolved");
		let starts_at = rule.last_triggered_at.unwrap_or(now);
		let mut payload =
			build_payload(rule, &value_text, starts_at, Some(now));
		payload
			.annotations
			.insert("summary".to_string(), format!("{} resolved", rule.name));
		match self.notifier.push(&[payload]).await {
			Ok(()) => {
				if let Some(id) = history_id {
					self.store
						.set_history_delivery_failed(id, false)
						.await?;
				}
				Ok(())
			}
			Err(e) => {
				warn!(rule = rule.id, error = %e, "resolution notification undeliverable");
				if let Some(id) = history_id {
					self.store
						.set_history_delivery_failed(id, true)
						.await?;
				}
				Ok(())
			}
		}
	}

	async fn record_rule_error(
		&self,
		rule: &AlertRule,
		message: &str,
	) -> Result<(), AppError> {
		// distinct from the firing state machine; last_state is untouched
		warn!(rule = rule.id, message = message, "rule error");
		self.store
			.append_alert_history(
				rule.id,
				AlertHistoryStatus::Error,
				"",
				Some(message),
			)
			.await?;
		self.store
			.prune_alert_history(rule.id, self.cfg.history_limit)
			.await?;
		Ok(())
	}

	/// Dry run for an authorized caller: executes the rule query once,
	/// reports the outcome, and touches neither state nor history.
	pub async fn test_rule(
		&self,
		rule: &AlertRule,
	) -> Result<TestOutcome, AppError> {
		let source = self.store.source_by_id(rule.source_id).await?;
		let client = self.registry.get_client(&source).await?;
		let opts = ExecOpts {
			query_id: new_query_id(),
			timeout: self.cfg.eval_timeout,
			cancel: None,
		};
		let outcome = client.query(&rule.query, &opts).await?;
		let value = extract_scalar(&outcome)
			.map_err(AppError::Validation)?;
		Ok(TestOutcome {
			value,
			threshold_met: rule
				.threshold_operator
				.compare(value, rule.threshold_value),
			execution_time_ms: outcome.stats.execution_time_ms,
			rows_read: outcome.stats.rows_read,
		})
	}

	/// Manual resolution: stamps history and sends the resolution
	/// notification without waiting for the next tick.
	pub async fn force_resolve(
		&self,
		rule: &AlertRule,
	) -> Result<(), AppError> {
		if rule.last_state != AlertState::Firing {
			return Err(AppError::Validation(
				"alert is not firing".to_string(),
			));
		}
		self.resolve(rule, "manually resolved".to_string(), Utc::now())
			.await
	}

	#[cfg(test)]
	pub(crate) fn notifier_sent(&self) -> Vec<AlertNotification> {
		self.notifier.sent.lock().unwrap().clone()
	}

	#[cfg(test)]
	pub(crate) async fn tick_for_tests(
		&self,
		rule_id: i64,
	) -> Result<(), AppError> {
		let lock = Mutex::new(());
		self.evaluate(rule_id, &lock).await
	}

	#[cfg(test)]
	pub(crate) fn scheduled_rule_ids(&self) -> Vec<i64> {
		self.tasks.iter().map(|e| *e.key()).collect()
	}
}

/// row[0][column[0]] as a float; anything else is a rule error.
fn extract_scalar(out: &QueryOutcome) -> Result<f64, String> {
	if out.rows.is_empty() {
		return Err("rule query returned no rows".to_string());
	}
	if out.rows.len() > 1 {
		return Err(format!(
			"rule query returned {} rows, expected one",
			out.rows.len()
		));
	}
	let cell = out.rows[0]
		.first()
		.ok_or_else(|| "rule query returned no columns".to_string())?;
	match cell {
		JSONValue::Number(n) => n
			.as_f64()
			.ok_or_else(|| "rule value is not finite".to_string()),
		JSONValue::String(s) => s.parse::<f64>().map_err(|_| {
			format!("rule value is not numeric: {}", s)
		}),
		other => Err(format!("rule value is not numeric: {}", other)),
	}
}

fn format_value(value: f64) -> String {
	if value.fract() == 0.0 && value.abs() < 1e15 {
		format!("{}", value as i64)
	} else {
		format!("{}", value)
	}
}

fn build_payload(
	rule: &AlertRule,
	value_text: &str,
	starts_at: DateTime<Utc>,
	ends_at: Option<DateTime<Utc>>,
) -> AlertNotification {
	let labels = HashMap::from([
		("alertname".to_string(), rule.name.clone()),
		("severity".to_string(), rule.severity.clone()),
		("team_id".to_string(), rule.team_id.to_string()),
		("source_id".to_string(), rule.source_id.to_string()),
		("rule_id".to_string(), rule.id.to_string()),
	]);
	let query_param: String =
		form_urlencoded::byte_serialize(rule.query.as_bytes()).collect();
	let annotations = HashMap::from([
		(
			"summary".to_string(),
			format!(
				"{} {} {}",
				rule.name,
				rule.threshold_operator.as_str(),
				rule.threshold_value
			),
		),
		("description".to_string(), rule.description.clone()),
		("value".to_string(), value_text.to_string()),
		(
			"generator_url".to_string(),
			format!(
				"/teams/{}/sources/{}/logs?mode=sql&query={}",
				rule.team_id, rule.source_id, query_param
			),
		),
	]);
	AlertNotification {
		labels,
		annotations,
		starts_at,
		ends_at,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::AlertsCfg;
	use crate::meta::alerts::NewAlertRule;
	use crate::meta::sources::tests_support::sample_scope;
	use crate::meta::ThresholdOp;
	use crate::storage::tests_support::FakeBackend;
	use crate::storage::PoolHealth;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	fn alerts_cfg() -> AlertsCfg {
		AlertsCfg {
			enabled: true,
			alertmanager_url: None,
			eval_timeout: Duration::from_secs(5),
			min_frequency: Duration::from_secs(10),
			history_limit: 100,
			notify_retries: 0,
			notify_timeout: Duration::from_secs(1),
		}
	}

	fn probe_cfg() -> crate::config::ProbeCfg {
		crate::config::ProbeCfg {
			interval: Duration::from_secs(3600),
			timeout: Duration::from_secs(1),
		}
	}

	async fn setup(
		results: Vec<JSONValue>,
	) -> (Arc<Scheduler>, Store, AlertRule) {
		let (store, team_id, source_id) = sample_scope().await;
		let rule = store
			.create_alert_rule(
				team_id,
				source_id,
				&NewAlertRule {
					name: "error spike".to_string(),
					description: "too many errors".to_string(),
					query: "SELECT count() FROM default.app_logs WHERE level = 'error'".to_string(),
					threshold_operator: ThresholdOp::Gt,
					threshold_value: 10.0,
					frequency_seconds: 60,
					severity: "critical".to_string(),
					active: true,
				},
			)
			.await
			.unwrap();
		let registry = Arc::new(BackendRegistry::new(&probe_cfg()));
		registry.insert_for_tests(
			source_id,
			Box::new(FakeBackend::returning(results)),
			Arc::new(PoolHealth::new()),
		);
		let scheduler =
			Scheduler::new(store.clone(), registry, alerts_cfg());
		(scheduler, store, rule)
	}

	#[tokio::test]
	async fn test_firing_is_idempotent() {
		// two consecutive ticks above threshold: one history entry, one
		// notification
		let (scheduler, store, rule) =
			setup(vec![json!(12), json!(12)]).await;
		scheduler.tick_for_tests(rule.id).await.unwrap();
		scheduler.tick_for_tests(rule.id).await.unwrap();

		let rule = store.alert_rule(rule.id).await.unwrap();
		assert_eq!(rule.last_state, AlertState::Firing);
		assert!(rule.last_triggered_at.is_some());
		assert!(rule.last_evaluated_at.is_some());

		let history = store.list_alert_history(rule.id, 10).await.unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].status, AlertHistoryStatus::Triggered);
		assert_eq!(history[0].value_text, "12");
		assert!(!history[0].delivery_failed);

		let sent = scheduler.notifier_sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].labels["alertname"], "error spike");
		assert_eq!(sent[0].annotations["value"], "12");
		assert!(sent[0].ends_at.is_none());
	}

	#[tokio::test]
	async fn test_recovery_resolves_and_notifies_once() {
		let (scheduler, store, rule) =
			setup(vec![json!(12), json!(3), json!(3)]).await;
		scheduler.tick_for_tests(rule.id).await.unwrap();
		scheduler.tick_for_tests(rule.id).await.unwrap();
		scheduler.tick_for_tests(rule.id).await.unwrap();

		let rule = store.alert_rule(rule.id).await.unwrap();
		assert_eq!(rule.last_state, AlertState::Resolved);

		let history = store.list_alert_history(rule.id, 10).await.unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].status, AlertHistoryStatus::Resolved);
		assert!(history[0].resolved_at.is_some());

		let sent = scheduler.notifier_sent();
		assert_eq!(sent.len(), 2);
		assert!(sent[0].ends_at.is_none());
		assert!(sent[1].ends_at.is_some());
	}

	#[tokio::test]
	async fn test_rule_error_does_not_flip_state() {
		// null scripts an empty result set
		let (scheduler, store, rule) =
			setup(vec![json!(null), json!("not-a-number")]).await;
		scheduler.tick_for_tests(rule.id).await.unwrap();
		scheduler.tick_for_tests(rule.id).await.unwrap();

		let rule = store.alert_rule(rule.id).await.unwrap();
		assert_eq!(rule.last_state, AlertState::Resolved);
		let history = store.list_alert_history(rule.id, 10).await.unwrap();
		assert_eq!(history.len(), 2);
		assert!(history
			.iter()
			.all(|h| h.status == AlertHistoryStatus::Error));
		assert_eq!(scheduler.notifier_sent().len(), 0);
	}

	#[tokio::test]
	async fn test_test_rule_leaves_no_trace() {
		let (scheduler, store, rule) = setup(vec![json!(42)]).await;
		let out = scheduler.test_rule(&rule).await.unwrap();
		assert_eq!(out.value, 42.0);
		assert!(out.threshold_met);
		let rule = store.alert_rule(rule.id).await.unwrap();
		assert_eq!(rule.last_state, AlertState::Resolved);
		assert!(rule.last_evaluated_at.is_none());
		assert!(store
			.list_alert_history(rule.id, 10)
			.await
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_force_resolve_requires_firing() {
		let (scheduler, store, rule) = setup(vec![json!(12)]).await;
		let err = scheduler.force_resolve(&rule).await.unwrap_err();
		assert_eq!(err.error_type(), "ValidationError");
		scheduler.tick_for_tests(rule.id).await.unwrap();
		let rule = store.alert_rule(rule.id).await.unwrap();
		scheduler.force_resolve(&rule).await.unwrap();
		let rule = store.alert_rule(rule.id).await.unwrap();
		assert_eq!(rule.last_state, AlertState::Resolved);
		assert_eq!(scheduler.notifier_sent().len(), 2);
	}

	#[tokio::test]
	async fn test_reconcile_deactivates_unlinked_rules() {
		let (scheduler, store, rule) = setup(vec![]).await;
		scheduler.reconcile().await.unwrap();
		assert_eq!(scheduler.scheduled_rule_ids(), vec![rule.id]);

		store
			.unlink_team_source(rule.team_id, rule.source_id)
			.await
			.unwrap();
		scheduler.reconcile().await.unwrap();
		assert!(scheduler.scheduled_rule_ids().is_empty());
		let rule = store.alert_rule(rule.id).await.unwrap();
		assert!(!rule.active);
	}

	#[tokio::test]
	async fn test_reconcile_honors_runtime_toggle() {
		let (scheduler, store, rule) = setup(vec![]).await;
		scheduler.reconcile().await.unwrap();
		assert_eq!(scheduler.scheduled_rule_ids(), vec![rule.id]);
		store
			.put_setting(SETTING_ALERTING_ENABLED, "false")
			.await
			.unwrap();
		scheduler.reconcile().await.unwrap();
		assert!(scheduler.scheduled_rule_ids().is_empty());
	}

	#[test]
	fn test_extract_scalar_shapes() {
		let mk = |rows: Vec<Vec<JSONValue>>| QueryOutcome {
			columns: vec![],
			rows,
			stats: Default::default(),
		};
		assert_eq!(extract_scalar(&mk(vec![vec![json!(12)]])), Ok(12.0));
		assert_eq!(
			extract_scalar(&mk(vec![vec![json!("3.5")]])),
			Ok(3.5)
		);
		assert!(extract_scalar(&mk(vec![])).is_err());
		assert!(extract_scalar(&mk(vec![vec![json!(1)], vec![json!(2)]]))
			.is_err());
		assert!(extract_scalar(&mk(vec![vec![json!([1, 2])]])).is_err());
	}
}
