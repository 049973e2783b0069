use super::Store;
use crate::errors::AppError;
use chrono::Utc;
use serde_json::Value as JSONValue;

impl Store {
	/// UI state (theme, timezone, density, panel layout). Persistence is
	/// opportunistic; clients keep local overrides.
	pub async fn preferences(
		&self,
		user_id: i64,
	) -> Result<JSONValue, AppError> {
		let payload = sqlx::query_scalar::<_, String>(
			"SELECT payload FROM user_preferences WHERE user_id = ?",
		)
		.bind(user_id)
		.fetch_optional(self.pool())
		.await?;
		match payload {
			Some(p) => Ok(serde_json::from_str(&p)?),
			None => Ok(JSONValue::Object(Default::default())),
		}
	}

	pub async fn save_preferences(
		&self,
		user_id: i64,
		payload: &JSONValue,
	) -> Result<(), AppError> {
		sqlx::query(
			"INSERT INTO user_preferences (user_id, payload, updated_at) VALUES (?, ?, ?) \
			 ON CONFLICT(user_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
		)
		.bind(user_id)
		.bind(serde_json::to_string(payload)?)
		.bind(Utc::now())
		.execute(self.pool())
		.await?;
		Ok(())
	}
}
