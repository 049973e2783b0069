use super::Store;
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ThresholdOp {
	Gt,
	Gte,
	Lt,
	Lte,
	Eq,
	Neq,
}

impl ThresholdOp {
	pub fn compare(&self, value: f64, threshold: f64) -> bool {
		match self {
			ThresholdOp::Gt => value > threshold,
			ThresholdOp::Gte => value >= threshold,
			ThresholdOp::Lt => value < threshold,
			ThresholdOp::Lte => value <= threshold,
			ThresholdOp::Eq => value == threshold,
			ThresholdOp::Neq => value != threshold,
		}
	}
	pub fn as_str(&self) -> &'static str {
		match self {
			ThresholdOp::Gt => ">",
			ThresholdOp::Gte => ">=",
			ThresholdOp::Lt => "<",
			ThresholdOp::Lte => "<=",
			ThresholdOp::Eq => "==",
			ThresholdOp::Neq => "!=",
		}
	}
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AlertState {
	Firing,
	Resolved,
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AlertHistoryStatus {
	Triggered,
	Resolved,
	Error,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRule {
	pub id: i64,
	pub team_id: i64,
	pub source_id: i64,
	pub name: String,
	pub description: String,
	// raw dialect query; must evaluate to a single numeric scalar
	pub query: String,
	pub threshold_operator: ThresholdOp,
	pub threshold_value: f64,
	pub frequency_seconds: i64,
	pub severity: String,
	pub active: bool,
	pub last_evaluated_at: Option<DateTime<Utc>>,
	pub last_triggered_at: Option<DateTime<Utc>>,
	pub last_state: AlertState,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertHistoryEntry {
	pub id: i64,
	pub rule_id: i64,
	pub status: AlertHistoryStatus,
	pub triggered_at: DateTime<Utc>,
	pub resolved_at: Option<DateTime<Utc>>,
	pub value_text: String,
	pub message: Option<String>,
	pub delivery_failed: bool,
}

pub struct NewAlertRule {
	pub name: String,
	pub description: String,
	pub query: String,
	pub threshold_operator: ThresholdOp,
	pub threshold_value: f64,
	pub frequency_seconds: i64,
	pub severity: String,
	pub active: bool,
}

impl Store {
	pub async fn create_alert_rule(
		&self,
		team_id: i64,
		source_id: i64,
		r: &NewAlertRule,
	) -> Result<AlertRule, AppError> {
		let now = Utc::now();
		let res = sqlx::query(
			"INSERT INTO alert_rules (team_id, source_id, name, description, query, threshold_operator, threshold_value, frequency_seconds, severity, active, last_state, created_at, updated_at) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'resolved', ?, ?)",
		)
		.bind(team_id)
		.bind(source_id)
		.bind(&r.name)
		.bind(&r.description)
		.bind(&r.query)
		.bind(r.threshold_operator)
		.bind(r.threshold_value)
		.bind(r.frequency_seconds)
		.bind(&r.severity)
		.bind(r.active)
		.bind(now)
		.bind(now)
		.execute(self.pool())
		.await?;
		self.alert_rule(res.last_insert_rowid()).await
	}

	pub async fn alert_rule(&self, id: i64) -> Result<AlertRule, AppError> {
		let rule = sqlx::query_as::<_, AlertRule>(
			"SELECT * FROM alert_rules WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(self.pool())
		.await?
		.ok_or_else(|| AppError::NotFound("alert not found".to_string()))?;
		Ok(rule)
	}

	pub async fn alert_rule_scoped(
		&self,
		team_id: i64,
		source_id: i64,
		id: i64,
	) -> Result<AlertRule, AppError> {
		let rule = self.alert_rule(id).await?;
		if rule.team_id != team_id || rule.source_id != source_id {
			return Err(AppError::NotFound("alert not found".to_string()));
		}
		Ok(rule)
	}

	pub async fn list_alert_rules(
		&self,
		team_id: i64,
		source_id: i64,
	) -> Result<Vec<AlertRule>, AppError> {
		let rules = sqlx::query_as::<_, AlertRule>(
			"SELECT * FROM alert_rules WHERE team_id = ? AND source_id = ? ORDER BY name",
		)
		.bind(team_id)
		.bind(source_id)
		.fetch_all(self.pool())
		.await?;
		Ok(rules)
	}

	pub async fn list_active_alert_rules(
		&self,
	) -> Result<Vec<AlertRule>, AppError> {
		let rules = sqlx::query_as::<_, AlertRule>(
			"SELECT * FROM alert_rules WHERE active = 1",
		)
		.fetch_all(self.pool())
		.await?;
		Ok(rules)
	}

	pub async fn update_alert_rule(
		&self,
		team_id: i64,
		source_id: i64,
		id: i64,
		r: &NewAlertRule,
	) -> Result<AlertRule, AppError> {
		let res = sqlx::query(
			"UPDATE alert_rules SET name = ?, description = ?, query = ?, threshold_operator = ?, threshold_value = ?, frequency_seconds = ?, severity = ?, active = ?, updated_at = ? \
			 WHERE id = ? AND team_id = ? AND source_id = ?",
		)
		.bind(&r.name)
		.bind(&r.description)
		.bind(&r.query)
		.bind(r.threshold_operator)
		.bind(r.threshold_value)
		.bind(r.frequency_seconds)
		.bind(&r.severity)
		.bind(r.active)
		.bind(Utc::now())
		.bind(id)
		.bind(team_id)
		.bind(source_id)
		.execute(self.pool())
		.await?;
		if res.rows_affected() == 0 {
			return Err(AppError::NotFound("alert not found".to_string()));
		}
		self.alert_rule(id).await
	}

	pub async fn delete_alert_rule(
		&self,
		team_id: i64,
		source_id: i64,
		id: i64,
	) -> Result<(), AppError> {
		let res = sqlx::query(
			"DELETE FROM alert_rules WHERE id = ? AND team_id = ? AND source_id = ?",
		)
		.bind(id)
		.bind(team_id)
		.bind(source_id)
		.execute(self.pool())
		.await?;
		if res.rows_affected() == 0 {
			return Err(AppError::NotFound("alert not found".to_string()));
		}
		Ok(())
	}

	pub async fn deactivate_alert_rule(&self, id: i64) -> Result<(), AppError> {
		sqlx::query(
			"UPDATE alert_rules SET active = 0, updated_at = ? WHERE id = ?",
		)
		.bind(Utc::now())
		.bind(id)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn mark_rule_evaluated(
		&self,
		id: i64,
		at: DateTime<Utc>,
	) -> Result<(), AppError> {
		sqlx::query(
			"UPDATE alert_rules SET last_evaluated_at = ? WHERE id = ?",
		)
		.bind(at)
		.bind(id)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn set_rule_firing(
		&self,
		id: i64,
		at: DateTime<Utc>,
	) -> Result<(), AppError> {
		sqlx::query(
			"UPDATE alert_rules SET last_state = 'firing', last_triggered_at = ? WHERE id = ?",
		)
		.bind(at)
		.bind(id)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn set_rule_resolved(&self, id: i64) -> Result<(), AppError> {
		sqlx::query(
			"UPDATE alert_rules SET last_state = 'resolved' WHERE id = ?",
		)
		.bind(id)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn append_alert_history(
		&self,
		rule_id: i64,
		status: AlertHistoryStatus,
		value_text: &str,
		message: Option<&str>,
	) -> Result<i64, AppError> {
		let res = sqlx::query(
			"INSERT INTO alert_history (rule_id, status, triggered_at, value_text, message) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(rule_id)
		.bind(status)
		.bind(Utc::now())
		.bind(value_text)
		.bind(message)
		.execute(self.pool())
		.await?;
		Ok(res.last_insert_rowid())
	}

	/// Stamps the most recent triggered entry; returns its id when one
	/// was still open.
	pub async fn resolve_latest_triggered(
		&self,
		rule_id: i64,
		at: DateTime<Utc>,
	) -> Result<Option<i64>, AppError> {
		let id = sqlx::query_scalar::<_, i64>(
			"SELECT id FROM alert_history WHERE rule_id = ? AND status = 'triggered' ORDER BY triggered_at DESC LIMIT 1",
		)
		.bind(rule_id)
		.fetch_optional(self.pool())
		.await?;
		if let Some(id) = id {
			sqlx::query(
				"UPDATE alert_history SET status = 'resolved', resolved_at = ? WHERE id = ?",
			)
			.bind(at)
			.bind(id)
			.execute(self.pool())
			.await?;
		}
		Ok(id)
	}

	pub async fn set_history_delivery_failed(
		&self,
		history_id: i64,
		failed: bool,
	) -> Result<(), AppError> {
		sqlx::query(
			"UPDATE alert_history SET delivery_failed = ? WHERE id = ?",
		)
		.bind(failed)
		.bind(history_id)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn list_alert_history(
		&self,
		rule_id: i64,
		limit: u32,
	) -> Result<Vec<AlertHistoryEntry>, AppError> {
		let rows = sqlx::query_as::<_, AlertHistoryEntry>(
			"SELECT * FROM alert_history WHERE rule_id = ? ORDER BY triggered_at DESC, id DESC LIMIT ?",
		)
		.bind(rule_id)
		.bind(limit)
		.fetch_all(self.pool())
		.await?;
		Ok(rows)
	}

	/// Retention is bounded per rule; the oldest entries go first.
	pub async fn prune_alert_history(
		&self,
		rule_id: i64,
		keep: u32,
	) -> Result<(), AppError> {
		sqlx::query(
			"DELETE FROM alert_history WHERE rule_id = ? AND id NOT IN \
			 (SELECT id FROM alert_history WHERE rule_id = ? ORDER BY triggered_at DESC, id DESC LIMIT ?)",
		)
		.bind(rule_id)
		.bind(rule_id)
		.bind(keep)
		.execute(self.pool())
		.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta::sources::tests_support::sample_scope;
	use pretty_assertions::assert_eq;

	pub(crate) fn sample_rule() -> NewAlertRule {
		NewAlertRule {
			name: "error spike".to_string(),
			description: "too many errors".to_string(),
			query: "SELECT count() FROM default.app_logs WHERE level = 'error'"
				.to_string(),
			threshold_operator: ThresholdOp::Gt,
			threshold_value: 10.0,
			frequency_seconds: 60,
			severity: "critical".to_string(),
			active: true,
		}
	}

	#[test]
	fn test_threshold_compare() {
		assert!(ThresholdOp::Gt.compare(12.0, 10.0));
		assert!(!ThresholdOp::Gt.compare(10.0, 10.0));
		assert!(ThresholdOp::Gte.compare(10.0, 10.0));
		assert!(ThresholdOp::Lt.compare(3.0, 10.0));
		assert!(ThresholdOp::Eq.compare(10.0, 10.0));
		assert!(ThresholdOp::Neq.compare(9.0, 10.0));
	}

	#[tokio::test]
	async fn test_rule_lifecycle() {
		let (store, team_id, source_id) = sample_scope().await;
		let rule = store
			.create_alert_rule(team_id, source_id, &sample_rule())
			.await
			.unwrap();
		assert_eq!(rule.last_state, AlertState::Resolved);
		assert!(rule.active);

		let at = Utc::now();
		store.set_rule_firing(rule.id, at).await.unwrap();
		let rule = store.alert_rule(rule.id).await.unwrap();
		assert_eq!(rule.last_state, AlertState::Firing);
		assert!(rule.last_triggered_at.is_some());

		store.set_rule_resolved(rule.id).await.unwrap();
		let rule = store.alert_rule(rule.id).await.unwrap();
		assert_eq!(rule.last_state, AlertState::Resolved);
	}

	#[tokio::test]
	async fn test_history_resolve_updates_latest_triggered() {
		let (store, team_id, source_id) = sample_scope().await;
		let rule = store
			.create_alert_rule(team_id, source_id, &sample_rule())
			.await
			.unwrap();
		let hid = store
			.append_alert_history(
				rule.id,
				AlertHistoryStatus::Triggered,
				"12",
				Some("too many errors"),
			)
			.await
			.unwrap();
		let resolved = store
			.resolve_latest_triggered(rule.id, Utc::now())
			.await
			.unwrap();
		assert_eq!(resolved, Some(hid));
		let entries = store.list_alert_history(rule.id, 10).await.unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].status, AlertHistoryStatus::Resolved);
		assert!(entries[0].resolved_at.is_some());
		// nothing left to resolve
		assert_eq!(
			store
				.resolve_latest_triggered(rule.id, Utc::now())
				.await
				.unwrap(),
			None
		);
	}

	#[tokio::test]
	async fn test_history_pruned_beyond_cap() {
		let (store, team_id, source_id) = sample_scope().await;
		let rule = store
			.create_alert_rule(team_id, source_id, &sample_rule())
			.await
			.unwrap();
		for i in 0..5 {
			store
				.append_alert_history(
					rule.id,
					AlertHistoryStatus::Triggered,
					&i.to_string(),
					None,
				)
				.await
				.unwrap();
		}
		store.prune_alert_history(rule.id, 3).await.unwrap();
		let entries = store.list_alert_history(rule.id, 10).await.unwrap();
		assert_eq!(entries.len(), 3);
	}

	#[tokio::test]
	async fn test_rule_cascades_with_team() {
		let (store, team_id, source_id) = sample_scope().await;
		let rule = store
			.create_alert_rule(team_id, source_id, &sample_rule())
			.await
			.unwrap();
		store
			.append_alert_history(
				rule.id,
				AlertHistoryStatus::Triggered,
				"1",
				None,
			)
			.await
			.unwrap();
		// the team delete cascades links, rules, and their history
		store.delete_team(team_id).await.unwrap();
		let err = store.alert_rule(rule.id).await.unwrap_err();
		assert_eq!(err.error_type(), "NotFound");
	}
}
