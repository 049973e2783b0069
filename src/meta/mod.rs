use crate::errors::AppError;
use sqlx::{
	sqlite::{SqliteConnectOptions, SqlitePoolOptions},
	SqlitePool,
};
use std::str::FromStr;
use tracing::info;

pub mod alerts;
pub mod preferences;
pub mod saved_queries;
pub mod sessions;
pub mod settings;
pub mod sources;
pub mod teams;
pub mod tokens;
pub mod users;

pub use alerts::{
	AlertHistoryEntry, AlertHistoryStatus, AlertRule, AlertState, ThresholdOp,
};
pub use saved_queries::{QueryKind, SavedQuery};
pub use sessions::Session;
pub use sources::{Source, SourceConnection};
pub use teams::{Team, TeamMember, TeamRole};
pub use tokens::ApiToken;
pub use users::{User, UserRole, UserStatus};

/// The durable relational metadata store. Log entries never land here;
/// only tenancy, sources, saved artifacts, and alert state do.
#[derive(Clone)]
pub struct Store {
	pool: SqlitePool,
}

impl Store {
	pub async fn connect(path: &str) -> Result<Self, AppError> {
		let opts = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true)
			.foreign_keys(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(8)
			.connect_with(opts)
			.await?;
		let store = Self { pool };
		store.migrate().await?;
		info!(path = path, "metadata store ready");
		Ok(store)
	}

	/// In-memory store for tests. A single connection keeps every query
	/// on the same database.
	pub async fn memory() -> Result<Self, AppError> {
		let opts = SqliteConnectOptions::from_str("sqlite::memory:")
			.map_err(|e| AppError::Config(e.to_string()))?
			.foreign_keys(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts)
			.await?;
		let store = Self { pool };
		store.migrate().await?;
		Ok(store)
	}

	pub(crate) fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	async fn migrate(&self) -> Result<(), AppError> {
		for ddl in SCHEMA.iter().copied() {
			sqlx::query(ddl).execute(&self.pool).await?;
		}
		Ok(())
	}
}

static SCHEMA: &[&str] = &[
	r#"CREATE TABLE IF NOT EXISTS users (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		email TEXT NOT NULL UNIQUE,
		full_name TEXT NOT NULL DEFAULT '',
		role TEXT NOT NULL DEFAULT 'member',
		status TEXT NOT NULL DEFAULT 'active',
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)"#,
	r#"CREATE TABLE IF NOT EXISTS teams (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		name TEXT NOT NULL UNIQUE,
		description TEXT NOT NULL DEFAULT '',
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)"#,
	r#"CREATE TABLE IF NOT EXISTS team_members (
		team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
		user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
		role TEXT NOT NULL DEFAULT 'member',
		created_at TEXT NOT NULL,
		UNIQUE(team_id, user_id)
	)"#,
	r#"CREATE TABLE IF NOT EXISTS sources (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		name TEXT NOT NULL UNIQUE,
		kind TEXT NOT NULL,
		connection TEXT NOT NULL,
		timestamp_field TEXT NOT NULL,
		severity_field TEXT,
		ttl_days INTEGER NOT NULL DEFAULT 0,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)"#,
	// source deletion is refused while links exist, so no cascade from
	// sources here
	r#"CREATE TABLE IF NOT EXISTS team_sources (
		team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
		source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE RESTRICT,
		created_at TEXT NOT NULL,
		UNIQUE(team_id, source_id)
	)"#,
	r#"CREATE TABLE IF NOT EXISTS saved_queries (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
		source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
		name TEXT NOT NULL,
		description TEXT NOT NULL DEFAULT '',
		query_kind TEXT NOT NULL,
		payload TEXT NOT NULL,
		bookmarked INTEGER NOT NULL DEFAULT 0,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)"#,
	r#"CREATE TABLE IF NOT EXISTS alert_rules (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
		source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
		name TEXT NOT NULL,
		description TEXT NOT NULL DEFAULT '',
		query TEXT NOT NULL,
		threshold_operator TEXT NOT NULL,
		threshold_value REAL NOT NULL,
		frequency_seconds INTEGER NOT NULL,
		severity TEXT NOT NULL DEFAULT 'warning',
		active INTEGER NOT NULL DEFAULT 1,
		last_evaluated_at TEXT,
		last_triggered_at TEXT,
		last_state TEXT NOT NULL DEFAULT 'resolved',
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)"#,
	r#"CREATE TABLE IF NOT EXISTS alert_history (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		rule_id INTEGER NOT NULL REFERENCES alert_rules(id) ON DELETE CASCADE,
		status TEXT NOT NULL,
		triggered_at TEXT NOT NULL,
		resolved_at TEXT,
		value_text TEXT NOT NULL DEFAULT '',
		message TEXT,
		delivery_failed INTEGER NOT NULL DEFAULT 0
	)"#,
	r#"CREATE TABLE IF NOT EXISTS api_tokens (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
		name TEXT NOT NULL,
		prefix TEXT NOT NULL,
		token_hash TEXT NOT NULL,
		created_at TEXT NOT NULL,
		last_used_at TEXT
	)"#,
	r#"CREATE TABLE IF NOT EXISTS sessions (
		id TEXT PRIMARY KEY,
		user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
		created_at TEXT NOT NULL,
		expires_at TEXT NOT NULL
	)"#,
	r#"CREATE TABLE IF NOT EXISTS user_preferences (
		user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
		payload TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)"#,
	r#"CREATE TABLE IF NOT EXISTS settings (
		key TEXT PRIMARY KEY,
		value TEXT NOT NULL
	)"#,
	"CREATE INDEX IF NOT EXISTS idx_saved_queries_scope ON saved_queries(team_id, source_id)",
	"CREATE INDEX IF NOT EXISTS idx_alert_rules_scope ON alert_rules(team_id, source_id)",
	"CREATE INDEX IF NOT EXISTS idx_alert_history_rule ON alert_history(rule_id)",
	"CREATE INDEX IF NOT EXISTS idx_api_tokens_prefix ON api_tokens(prefix)",
];
