use super::Store;
use crate::errors::AppError;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
	pub id: String,
	pub user_id: i64,
	pub created_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

impl Store {
	pub async fn create_session(
		&self,
		id: &str,
		user_id: i64,
		expires_at: DateTime<Utc>,
	) -> Result<(), AppError> {
		sqlx::query(
			"INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
		)
		.bind(id)
		.bind(user_id)
		.bind(Utc::now())
		.bind(expires_at)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	/// Expired rows are treated as absent and reaped on sight.
	pub async fn session_by_id(
		&self,
		id: &str,
	) -> Result<Option<Session>, AppError> {
		let session = sqlx::query_as::<_, Session>(
			"SELECT * FROM sessions WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(self.pool())
		.await?;
		match session {
			Some(s) if s.expires_at <= Utc::now() => {
				self.delete_session(id).await?;
				Ok(None)
			}
			other => Ok(other),
		}
	}

	pub async fn delete_session(&self, id: &str) -> Result<(), AppError> {
		sqlx::query("DELETE FROM sessions WHERE id = ?")
			.bind(id)
			.execute(self.pool())
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta::users::UserRole;
	use chrono::Duration;

	#[tokio::test]
	async fn test_expired_session_is_absent() {
		let store = Store::memory().await.unwrap();
		let user = store
			.upsert_user("a@example.com", "Alice", UserRole::Member)
			.await
			.unwrap();
		store
			.create_session("live", user.id, Utc::now() + Duration::hours(1))
			.await
			.unwrap();
		store
			.create_session("stale", user.id, Utc::now() - Duration::hours(1))
			.await
			.unwrap();
		assert!(store.session_by_id("live").await.unwrap().is_some());
		assert!(store.session_by_id("stale").await.unwrap().is_none());
	}
}
