use super::Store;
use crate::errors::AppError;
use std::collections::HashMap;

pub const SETTING_ALERTING_ENABLED: &str = "alerting_enabled";
pub const SETTING_AI_ASSISTANT_ENABLED: &str = "ai_assistant_enabled";

impl Store {
	/// Runtime-mutable toggles mirrored from config so the UI can flip
	/// them without a restart. Mirroring never overwrites an operator's
	/// runtime choice.
	pub async fn mirror_setting_default(
		&self,
		key: &str,
		value: &str,
	) -> Result<(), AppError> {
		sqlx::query(
			"INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
		)
		.bind(key)
		.bind(value)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn setting(
		&self,
		key: &str,
	) -> Result<Option<String>, AppError> {
		let v = sqlx::query_scalar::<_, String>(
			"SELECT value FROM settings WHERE key = ?",
		)
		.bind(key)
		.fetch_optional(self.pool())
		.await?;
		Ok(v)
	}

	pub async fn setting_bool(
		&self,
		key: &str,
		default: bool,
	) -> Result<bool, AppError> {
		Ok(self
			.setting(key)
			.await?
			.map(|v| v == "true" || v == "1")
			.unwrap_or(default))
	}

	pub async fn put_setting(
		&self,
		key: &str,
		value: &str,
	) -> Result<(), AppError> {
		sqlx::query(
			"INSERT INTO settings (key, value) VALUES (?, ?) \
			 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
		)
		.bind(key)
		.bind(value)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn all_settings(
		&self,
	) -> Result<HashMap<String, String>, AppError> {
		let rows = sqlx::query_as::<_, (String, String)>(
			"SELECT key, value FROM settings",
		)
		.fetch_all(self.pool())
		.await?;
		Ok(rows.into_iter().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn test_mirror_does_not_clobber_runtime_value() {
		let store = Store::memory().await.unwrap();
		store
			.mirror_setting_default(SETTING_ALERTING_ENABLED, "true")
			.await
			.unwrap();
		store
			.put_setting(SETTING_ALERTING_ENABLED, "false")
			.await
			.unwrap();
		// a restart re-mirrors the config default; the operator's choice wins
		store
			.mirror_setting_default(SETTING_ALERTING_ENABLED, "true")
			.await
			.unwrap();
		assert_eq!(
			store
				.setting_bool(SETTING_ALERTING_ENABLED, true)
				.await
				.unwrap(),
			false
		);
	}
}
