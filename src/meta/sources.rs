use super::Store;
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BackendKind {
	Clickhouse,
	Victorialogs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickhouseConn {
	pub url: String,
	pub database: String,
	pub table: String,
	pub username: String,
	pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictoriaLogsConn {
	pub url: String,
	// forwarded verbatim, e.g. AccountID/ProjectID tenant headers
	#[serde(default)]
	pub headers: HashMap<String, String>,
}

/// Exactly one connection record is populated per backend kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceConnection {
	#[serde(rename = "clickhouse")]
	Clickhouse(ClickhouseConn),
	#[serde(rename = "victorialogs")]
	VictoriaLogs(VictoriaLogsConn),
}

impl SourceConnection {
	pub fn kind(&self) -> BackendKind {
		match self {
			SourceConnection::Clickhouse(_) => BackendKind::Clickhouse,
			SourceConnection::VictoriaLogs(_) => BackendKind::Victorialogs,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Source {
	pub id: i64,
	pub name: String,
	pub kind: BackendKind,
	pub connection: SourceConnection,
	// the column used for time ordering and windowing; never inferred
	pub timestamp_field: String,
	pub severity_field: Option<String>,
	pub ttl_days: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source, AppError> {
	let connection: String = row.get("connection");
	Ok(Source {
		id: row.get("id"),
		name: row.get("name"),
		kind: row.get("kind"),
		connection: serde_json::from_str(&connection)?,
		timestamp_field: row.get("timestamp_field"),
		severity_field: row.get("severity_field"),
		ttl_days: row.get("ttl_days"),
		created_at: row.get("created_at"),
		updated_at: row.get("updated_at"),
	})
}

pub struct NewSource {
	pub name: String,
	pub connection: SourceConnection,
	pub timestamp_field: String,
	pub severity_field: Option<String>,
	pub ttl_days: i64,
}

impl Store {
	pub async fn create_source(
		&self,
		src: &NewSource,
	) -> Result<Source, AppError> {
		let now = Utc::now();
		let res = sqlx::query(
			"INSERT INTO sources (name, kind, connection, timestamp_field, severity_field, ttl_days, created_at, updated_at) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(&src.name)
		.bind(src.connection.kind())
		.bind(serde_json::to_string(&src.connection)?)
		.bind(&src.timestamp_field)
		.bind(&src.severity_field)
		.bind(src.ttl_days)
		.bind(now)
		.bind(now)
		.execute(self.pool())
		.await?;
		self.source_by_id(res.last_insert_rowid()).await
	}

	pub async fn source_by_id(&self, id: i64) -> Result<Source, AppError> {
		let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
			.bind(id)
			.fetch_optional(self.pool())
			.await?
			.ok_or_else(|| {
				AppError::NotFound("source not found".to_string())
			})?;
		row_to_source(&row)
	}

	pub async fn list_sources(&self) -> Result<Vec<Source>, AppError> {
		let rows = sqlx::query("SELECT * FROM sources ORDER BY name")
			.fetch_all(self.pool())
			.await?;
		rows.iter().map(row_to_source).collect()
	}

	pub async fn list_team_sources(
		&self,
		team_id: i64,
	) -> Result<Vec<Source>, AppError> {
		let rows = sqlx::query(
			"SELECT s.* FROM sources s \
			 JOIN team_sources ts ON ts.source_id = s.id \
			 WHERE ts.team_id = ? ORDER BY s.name",
		)
		.bind(team_id)
		.fetch_all(self.pool())
		.await?;
		rows.iter().map(row_to_source).collect()
	}

	pub async fn update_source(
		&self,
		id: i64,
		src: &NewSource,
	) -> Result<Source, AppError> {
		sqlx::query(
			"UPDATE sources SET name = ?, kind = ?, connection = ?, timestamp_field = ?, \
			 severity_field = ?, ttl_days = ?, updated_at = ? WHERE id = ?",
		)
		.bind(&src.name)
		.bind(src.connection.kind())
		.bind(serde_json::to_string(&src.connection)?)
		.bind(&src.timestamp_field)
		.bind(&src.severity_field)
		.bind(src.ttl_days)
		.bind(Utc::now())
		.bind(id)
		.execute(self.pool())
		.await?;
		self.source_by_id(id).await
	}

	/// Refused while any team still links to the source.
	pub async fn delete_source(&self, id: i64) -> Result<(), AppError> {
		let links = self.source_link_count(id).await?;
		if links > 0 {
			return Err(AppError::Validation(format!(
				"source is linked to {} team(s); unlink it first",
				links
			)));
		}
		let res = sqlx::query("DELETE FROM sources WHERE id = ?")
			.bind(id)
			.execute(self.pool())
			.await?;
		if res.rows_affected() == 0 {
			return Err(AppError::NotFound("source not found".to_string()));
		}
		Ok(())
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn sample() -> NewSource {
		NewSource {
			name: "app-logs".to_string(),
			connection: SourceConnection::Clickhouse(ClickhouseConn {
				url: "http://127.0.0.1:8123".to_string(),
				database: "default".to_string(),
				table: "app_logs".to_string(),
				username: "default".to_string(),
				password: "".to_string(),
			}),
			timestamp_field: "timestamp".to_string(),
			severity_field: Some("level".to_string()),
			ttl_days: 30,
		}
	}

	#[tokio::test]
	async fn test_source_roundtrip() {
		let store = Store::memory().await.unwrap();
		let src = store.create_source(&sample()).await.unwrap();
		assert_eq!(src.kind, BackendKind::Clickhouse);
		let got = store.source_by_id(src.id).await.unwrap();
		assert_eq!(got.connection, src.connection);
		assert_eq!(got.timestamp_field, "timestamp");
	}

	#[tokio::test]
	async fn test_delete_refused_while_linked() {
		let store = Store::memory().await.unwrap();
		let src = store.create_source(&sample()).await.unwrap();
		let team = store.create_team("platform", "").await.unwrap();
		store.link_team_source(team.id, src.id).await.unwrap();
		let err = store.delete_source(src.id).await.unwrap_err();
		assert_eq!(err.error_type(), "ValidationError");
		store.unlink_team_source(team.id, src.id).await.unwrap();
		store.delete_source(src.id).await.unwrap();
	}

	#[tokio::test]
	async fn test_team_scoped_listing() {
		let store = Store::memory().await.unwrap();
		let src = store.create_source(&sample()).await.unwrap();
		let team = store.create_team("platform", "").await.unwrap();
		assert!(store
			.list_team_sources(team.id)
			.await
			.unwrap()
			.is_empty());
		store.link_team_source(team.id, src.id).await.unwrap();
		let listed = store.list_team_sources(team.id).await.unwrap();
		assert_eq!(listed.len(), 1);
		assert_eq!(listed[0].id, src.id);
	}
}
