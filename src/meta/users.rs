use super::Store;
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
	Admin,
	Member,
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserStatus {
	Active,
	Disabled,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
	pub id: i64,
	pub email: String,
	pub full_name: String,
	pub role: UserRole,
	pub status: UserStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl User {
	pub fn is_admin(&self) -> bool {
		self.role == UserRole::Admin
	}
	pub fn is_active(&self) -> bool {
		self.status == UserStatus::Active
	}
}

impl Store {
	pub async fn user_by_id(&self, id: i64) -> Result<User, AppError> {
		let user = sqlx::query_as::<_, User>(
			"SELECT * FROM users WHERE id = ?",
		)
		.bind(id)
		.fetch_one(self.pool())
		.await?;
		Ok(user)
	}

	pub async fn user_by_email(
		&self,
		email: &str,
	) -> Result<Option<User>, AppError> {
		let user = sqlx::query_as::<_, User>(
			"SELECT * FROM users WHERE email = ?",
		)
		.bind(email)
		.fetch_optional(self.pool())
		.await?;
		Ok(user)
	}

	pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
		let users = sqlx::query_as::<_, User>(
			"SELECT * FROM users ORDER BY email",
		)
		.fetch_all(self.pool())
		.await?;
		Ok(users)
	}

	/// Identities are created on first successful OIDC login and never
	/// destroyed; repeat logins refresh the display name.
	pub async fn upsert_user(
		&self,
		email: &str,
		full_name: &str,
		role: UserRole,
	) -> Result<User, AppError> {
		let now = Utc::now();
		if let Some(existing) = self.user_by_email(email).await? {
			sqlx::query(
				"UPDATE users SET full_name = ?, updated_at = ? WHERE id = ?",
			)
			.bind(full_name)
			.bind(now)
			.bind(existing.id)
			.execute(self.pool())
			.await?;
			return self.user_by_id(existing.id).await;
		}
		let res = sqlx::query(
			"INSERT INTO users (email, full_name, role, status, created_at, updated_at) \
			 VALUES (?, ?, ?, 'active', ?, ?)",
		)
		.bind(email)
		.bind(full_name)
		.bind(role)
		.bind(now)
		.bind(now)
		.execute(self.pool())
		.await?;
		self.user_by_id(res.last_insert_rowid()).await
	}

	pub async fn set_user_role(
		&self,
		id: i64,
		role: UserRole,
	) -> Result<(), AppError> {
		sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
			.bind(role)
			.bind(Utc::now())
			.bind(id)
			.execute(self.pool())
			.await?;
		Ok(())
	}

	/// Soft disable; the row stays so audit references keep resolving.
	pub async fn set_user_status(
		&self,
		id: i64,
		status: UserStatus,
	) -> Result<(), AppError> {
		sqlx::query(
			"UPDATE users SET status = ?, updated_at = ? WHERE id = ?",
		)
		.bind(status)
		.bind(Utc::now())
		.bind(id)
		.execute(self.pool())
		.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn test_upsert_is_idempotent_on_email() {
		let store = Store::memory().await.unwrap();
		let a = store
			.upsert_user("a@example.com", "Alice", UserRole::Member)
			.await
			.unwrap();
		let b = store
			.upsert_user("a@example.com", "Alice Cooper", UserRole::Member)
			.await
			.unwrap();
		assert_eq!(a.id, b.id);
		assert_eq!(b.full_name, "Alice Cooper");
		// a repeat login never escalates the stored role
		assert_eq!(b.role, UserRole::Member);
	}

	#[tokio::test]
	async fn test_disable_user() {
		let store = Store::memory().await.unwrap();
		let u = store
			.upsert_user("a@example.com", "Alice", UserRole::Member)
			.await
			.unwrap();
		assert!(u.is_active());
		store
			.set_user_status(u.id, UserStatus::Disabled)
			.await
			.unwrap();
		let u = store.user_by_id(u.id).await.unwrap();
		assert!(!u.is_active());
	}
}
