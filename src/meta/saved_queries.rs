use super::Store;
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QueryKind {
	Logchefql,
	RawSql,
}

/// The payload is an opaque serialized document, not a foreign-key graph:
/// version, query content, optional saved time range (relative string or
/// absolute millisecond pair), optional limit, optional variable bindings.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SavedQuery {
	pub id: i64,
	pub team_id: i64,
	pub source_id: i64,
	pub name: String,
	pub description: String,
	pub query_kind: QueryKind,
	pub payload: String,
	pub bookmarked: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

pub struct NewSavedQuery {
	pub name: String,
	pub description: String,
	pub query_kind: QueryKind,
	pub payload: String,
	pub bookmarked: bool,
}

impl Store {
	pub async fn create_saved_query(
		&self,
		team_id: i64,
		source_id: i64,
		q: &NewSavedQuery,
	) -> Result<SavedQuery, AppError> {
		let now = Utc::now();
		let res = sqlx::query(
			"INSERT INTO saved_queries (team_id, source_id, name, description, query_kind, payload, bookmarked, created_at, updated_at) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(team_id)
		.bind(source_id)
		.bind(&q.name)
		.bind(&q.description)
		.bind(q.query_kind)
		.bind(&q.payload)
		.bind(q.bookmarked)
		.bind(now)
		.bind(now)
		.execute(self.pool())
		.await?;
		self.saved_query_by_id(team_id, source_id, res.last_insert_rowid())
			.await
	}

	pub async fn saved_query_by_id(
		&self,
		team_id: i64,
		source_id: i64,
		id: i64,
	) -> Result<SavedQuery, AppError> {
		let q = sqlx::query_as::<_, SavedQuery>(
			"SELECT * FROM saved_queries WHERE id = ? AND team_id = ? AND source_id = ?",
		)
		.bind(id)
		.bind(team_id)
		.bind(source_id)
		.fetch_optional(self.pool())
		.await?
		.ok_or_else(|| {
			AppError::NotFound("saved query not found".to_string())
		})?;
		Ok(q)
	}

	/// Bookmarked entries first, then most recently updated.
	pub async fn list_saved_queries(
		&self,
		team_id: i64,
		source_id: i64,
	) -> Result<Vec<SavedQuery>, AppError> {
		let rows = sqlx::query_as::<_, SavedQuery>(
			"SELECT * FROM saved_queries WHERE team_id = ? AND source_id = ? \
			 ORDER BY bookmarked DESC, updated_at DESC",
		)
		.bind(team_id)
		.bind(source_id)
		.fetch_all(self.pool())
		.await?;
		Ok(rows)
	}

	pub async fn update_saved_query(
		&self,
		team_id: i64,
		source_id: i64,
		id: i64,
		q: &NewSavedQuery,
	) -> Result<SavedQuery, AppError> {
		let res = sqlx::query(
			"UPDATE saved_queries SET name = ?, description = ?, query_kind = ?, payload = ?, bookmarked = ?, updated_at = ? \
			 WHERE id = ? AND team_id = ? AND source_id = ?",
		)
		.bind(&q.name)
		.bind(&q.description)
		.bind(q.query_kind)
		.bind(&q.payload)
		.bind(q.bookmarked)
		.bind(Utc::now())
		.bind(id)
		.bind(team_id)
		.bind(source_id)
		.execute(self.pool())
		.await?;
		if res.rows_affected() == 0 {
			return Err(AppError::NotFound(
				"saved query not found".to_string(),
			));
		}
		self.saved_query_by_id(team_id, source_id, id).await
	}

	pub async fn delete_saved_query(
		&self,
		team_id: i64,
		source_id: i64,
		id: i64,
	) -> Result<(), AppError> {
		let res = sqlx::query(
			"DELETE FROM saved_queries WHERE id = ? AND team_id = ? AND source_id = ?",
		)
		.bind(id)
		.bind(team_id)
		.bind(source_id)
		.execute(self.pool())
		.await?;
		if res.rows_affected() == 0 {
			return Err(AppError::NotFound(
				"saved query not found".to_string(),
			));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta::sources::tests_support::sample_scope;
	use pretty_assertions::assert_eq;

	fn saved(name: &str, bookmarked: bool) -> NewSavedQuery {
		NewSavedQuery {
			name: name.to_string(),
			description: "".to_string(),
			query_kind: QueryKind::Logchefql,
			payload: r#"{"version":1,"content":"level=error"}"#.to_string(),
			bookmarked,
		}
	}

	#[tokio::test]
	async fn test_listing_orders_bookmarked_first() {
		let (store, team_id, source_id) = sample_scope().await;
		store
			.create_saved_query(team_id, source_id, &saved("first", false))
			.await
			.unwrap();
		store
			.create_saved_query(team_id, source_id, &saved("second", false))
			.await
			.unwrap();
		store
			.create_saved_query(team_id, source_id, &saved("pinned", true))
			.await
			.unwrap();
		let listed = store
			.list_saved_queries(team_id, source_id)
			.await
			.unwrap();
		let names: Vec<&str> =
			listed.iter().map(|q| q.name.as_str()).collect();
		assert_eq!(names[0], "pinned");
		assert_eq!(listed.len(), 3);
	}

	#[tokio::test]
	async fn test_scope_is_enforced_on_lookup() {
		let (store, team_id, source_id) = sample_scope().await;
		let q = store
			.create_saved_query(team_id, source_id, &saved("q", false))
			.await
			.unwrap();
		// a different team cannot address the same id
		let err = store
			.saved_query_by_id(team_id + 1, source_id, q.id)
			.await
			.unwrap_err();
		assert_eq!(err.error_type(), "NotFound");
	}
}
