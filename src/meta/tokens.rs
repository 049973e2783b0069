use super::Store;
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Long-lived bearer credential. Only the salted hash is at rest; the
/// secret itself is shown once, at creation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiToken {
	pub id: i64,
	pub user_id: i64,
	pub name: String,
	// short display prefix, e.g. `logchef_42_ab12`
	pub prefix: String,
	#[serde(skip_serializing)]
	pub token_hash: String,
	pub created_at: DateTime<Utc>,
	pub last_used_at: Option<DateTime<Utc>>,
}

impl Store {
	pub async fn create_api_token(
		&self,
		user_id: i64,
		name: &str,
		prefix: &str,
		token_hash: &str,
	) -> Result<ApiToken, AppError> {
		let res = sqlx::query(
			"INSERT INTO api_tokens (user_id, name, prefix, token_hash, created_at) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(user_id)
		.bind(name)
		.bind(prefix)
		.bind(token_hash)
		.bind(Utc::now())
		.execute(self.pool())
		.await?;
		let token = sqlx::query_as::<_, ApiToken>(
			"SELECT * FROM api_tokens WHERE id = ?",
		)
		.bind(res.last_insert_rowid())
		.fetch_one(self.pool())
		.await?;
		Ok(token)
	}

	pub async fn list_api_tokens(
		&self,
		user_id: i64,
	) -> Result<Vec<ApiToken>, AppError> {
		let tokens = sqlx::query_as::<_, ApiToken>(
			"SELECT * FROM api_tokens WHERE user_id = ? ORDER BY created_at DESC",
		)
		.bind(user_id)
		.fetch_all(self.pool())
		.await?;
		Ok(tokens)
	}

	pub async fn api_tokens_by_prefix(
		&self,
		prefix: &str,
	) -> Result<Vec<ApiToken>, AppError> {
		let tokens = sqlx::query_as::<_, ApiToken>(
			"SELECT * FROM api_tokens WHERE prefix = ?",
		)
		.bind(prefix)
		.fetch_all(self.pool())
		.await?;
		Ok(tokens)
	}

	pub async fn touch_api_token(&self, id: i64) -> Result<(), AppError> {
		sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE id = ?")
			.bind(Utc::now())
			.bind(id)
			.execute(self.pool())
			.await?;
		Ok(())
	}

	/// Revocation is deletion; the owner scope keeps one user from
	/// revoking another's token.
	pub async fn delete_api_token(
		&self,
		user_id: i64,
		id: i64,
	) -> Result<(), AppError> {
		let res = sqlx::query(
			"DELETE FROM api_tokens WHERE id = ? AND user_id = ?",
		)
		.bind(id)
		.bind(user_id)
		.execute(self.pool())
		.await?;
		if res.rows_affected() == 0 {
			return Err(AppError::NotFound("token not found".to_string()));
		}
		Ok(())
	}
}
