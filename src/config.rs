use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::{env, net::SocketAddr, str::FromStr, time::Duration};
use tracing_subscriber::filter::Builder;
use validator::{Validate, ValidationError};

#[derive(Clone, Deserialize, Validate)]
pub struct AppConfig {
	#[validate(nested)]
	pub server: Server,
	#[serde(default = "default_metadata")]
	pub metadata: Metadata,
	#[serde(default)]
	pub auth: Auth,
	#[serde(default = "default_query")]
	#[validate(nested)]
	pub query: QueryCfg,
	#[serde(default = "default_alerts")]
	#[validate(nested)]
	pub alerts: AlertsCfg,
	#[serde(default = "default_probe")]
	pub probe: ProbeCfg,
}

#[derive(Clone, Deserialize, Validate)]
pub struct Server {
	#[validate(custom(function = "validate_ip_addr"))]
	pub listen_addr: String,
	#[serde(with = "humantime_serde", default = "default_server_timeout")]
	pub timeout: Duration,
	#[serde(default)]
	#[validate(nested)]
	pub log: Log,
}

#[derive(Clone, Deserialize, Validate)]
pub struct Log {
	pub file: String,
	// see https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives
	#[validate(custom(function = "validate_log_filter_directives"))]
	pub filter_directives: String,
}

impl Default for Log {
	fn default() -> Self {
		Self {
			file: "stdout".to_string(),
			filter_directives: "info".to_string(),
		}
	}
}

#[derive(Clone, Deserialize)]
pub struct Metadata {
	pub path: String,
}

fn default_metadata() -> Metadata {
	Metadata {
		path: "logchef.db".to_string(),
	}
}

#[derive(Clone, Deserialize, Default)]
pub struct Auth {
	#[serde(default = "default_session")]
	pub session: SessionCfg,
	pub oidc: Option<OidcCfg>,
	// emails promoted to global admin on first login
	#[serde(default)]
	pub admin_emails: Vec<String>,
}

#[derive(Clone, Deserialize)]
pub struct SessionCfg {
	#[serde(default = "default_cookie_name")]
	pub cookie_name: String,
	#[serde(default)]
	pub cookie_secure: bool,
	#[serde(with = "humantime_serde", default = "default_session_max_age")]
	pub max_age: Duration,
}

impl Default for SessionCfg {
	fn default() -> Self {
		default_session()
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct OidcCfg {
	pub issuer: String,
	pub client_id: String,
	pub client_secret: String,
	pub auth_url: String,
	pub token_url: String,
	pub userinfo_url: String,
	pub redirect_url: String,
}

#[derive(Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_query_cfg"))]
pub struct QueryCfg {
	#[serde(default = "default_max_limit")]
	pub max_limit: u32,
	#[serde(default = "default_limit")]
	pub default_limit: u32,
	#[serde(with = "humantime_serde", default = "default_query_timeout")]
	pub default_timeout: Duration,
	#[serde(with = "humantime_serde", default = "default_max_query_timeout")]
	pub max_timeout: Duration,
}

fn validate_query_cfg(cfg: &QueryCfg) -> Result<(), ValidationError> {
	if cfg.default_timeout > cfg.max_timeout {
		return Err(ValidationError::new(
			"default_timeout must be no greater than max_timeout",
		));
	}
	if cfg.default_limit > cfg.max_limit {
		return Err(ValidationError::new(
			"default_limit must be no greater than max_limit",
		));
	}
	Ok(())
}

#[derive(Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_alerts_cfg"))]
pub struct AlertsCfg {
	#[serde(default = "default_true")]
	pub enabled: bool,
	pub alertmanager_url: Option<String>,
	#[serde(with = "humantime_serde", default = "default_eval_timeout")]
	pub eval_timeout: Duration,
	#[serde(with = "humantime_serde", default = "default_min_frequency")]
	pub min_frequency: Duration,
	#[serde(default = "default_history_limit")]
	pub history_limit: u32,
	#[serde(default = "default_notify_retries")]
	pub notify_retries: u32,
	#[serde(with = "humantime_serde", default = "default_notify_timeout")]
	pub notify_timeout: Duration,
}

fn validate_alerts_cfg(cfg: &AlertsCfg) -> Result<(), ValidationError> {
	// evaluation frequency is bounded below; anything tighter hammers the
	// backends for no benefit
	if cfg.min_frequency < Duration::from_secs(10) {
		return Err(ValidationError::new(
			"min_frequency must be at least 10s",
		));
	}
	Ok(())
}

#[derive(Clone, Deserialize)]
pub struct ProbeCfg {
	#[serde(with = "humantime_serde", default = "default_probe_interval")]
	pub interval: Duration,
	#[serde(with = "humantime_serde", default = "default_probe_timeout")]
	pub timeout: Duration,
}

const fn default_server_timeout() -> Duration {
	Duration::from_secs(60)
}

fn default_cookie_name() -> String {
	"logchef_session".to_string()
}

const fn default_session_max_age() -> Duration {
	Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_session() -> SessionCfg {
	SessionCfg {
		cookie_name: default_cookie_name(),
		cookie_secure: false,
		max_age: default_session_max_age(),
	}
}

const fn default_max_limit() -> u32 {
	10_000
}

const fn default_limit() -> u32 {
	100
}

const fn default_query_timeout() -> Duration {
	Duration::from_secs(30)
}

const fn default_max_query_timeout() -> Duration {
	Duration::from_secs(300)
}

const fn default_query() -> QueryCfg {
	QueryCfg {
		max_limit: default_max_limit(),
		default_limit: default_limit(),
		default_timeout: default_query_timeout(),
		max_timeout: default_max_query_timeout(),
	}
}

const fn default_true() -> bool {
	true
}

const fn default_eval_timeout() -> Duration {
	Duration::from_secs(30)
}

const fn default_min_frequency() -> Duration {
	Duration::from_secs(10)
}

const fn default_history_limit() -> u32 {
	100
}

const fn default_notify_retries() -> u32 {
	3
}

const fn default_notify_timeout() -> Duration {
	Duration::from_secs(5)
}

fn default_alerts() -> AlertsCfg {
	AlertsCfg {
		enabled: true,
		alertmanager_url: None,
		eval_timeout: default_eval_timeout(),
		min_frequency: default_min_frequency(),
		history_limit: default_history_limit(),
		notify_retries: default_notify_retries(),
		notify_timeout: default_notify_timeout(),
	}
}

const fn default_probe_interval() -> Duration {
	Duration::from_secs(60)
}

const fn default_probe_timeout() -> Duration {
	Duration::from_secs(5)
}

const fn default_probe() -> ProbeCfg {
	ProbeCfg {
		interval: default_probe_interval(),
		timeout: default_probe_timeout(),
	}
}

fn validate_ip_addr(addr: &str) -> Result<(), ValidationError> {
	SocketAddr::from_str(addr)
		.map_err(|_| ValidationError::new("invalid bind address"))
		.map(|_| ())
}

fn validate_log_filter_directives(dirs: &str) -> Result<(), ValidationError> {
	Builder::default()
		.parse(dirs)
		.map_err(|_| ValidationError::new("invalid log filter directives"))
		.map(|_| ())
}

impl AppConfig {
	/// File settings first, then `LOGCHEF_*` environment overrides
	/// (double underscore separates nesting: LOGCHEF_SERVER__LISTEN_ADDR).
	pub fn new() -> Result<Self, ConfigError> {
		let default_config =
			env::var("LOGCHEF_CONFIG").unwrap_or("config.yaml".to_string());
		Config::builder()
			.add_source(File::with_name(&default_config))
			.add_source(
				Environment::with_prefix("LOGCHEF").separator("__"),
			)
			.build()?
			.try_deserialize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_defaults_from_minimal_config() {
		let j = serde_json::json!({
			"server": {
				"listen_addr": "0.0.0.0:5120"
			}
		});
		let cfg: AppConfig = serde_json::from_value(j).unwrap();
		cfg.validate().unwrap();
		assert_eq!(cfg.query.max_limit, 10_000);
		assert_eq!(cfg.query.default_timeout, Duration::from_secs(30));
		assert_eq!(cfg.alerts.min_frequency, Duration::from_secs(10));
		assert!(cfg.alerts.enabled);
		assert_eq!(cfg.metadata.path, "logchef.db");
		assert_eq!(cfg.auth.session.cookie_name, "logchef_session");
	}

	#[test]
	fn test_humantime_durations() {
		let j = serde_json::json!({
			"server": {
				"listen_addr": "127.0.0.1:5120",
				"timeout": "90s"
			},
			"query": {
				"default_timeout": "10s",
				"max_timeout": "2m"
			}
		});
		let cfg: AppConfig = serde_json::from_value(j).unwrap();
		assert_eq!(cfg.server.timeout, Duration::from_secs(90));
		assert_eq!(cfg.query.default_timeout, Duration::from_secs(10));
		assert_eq!(cfg.query.max_timeout, Duration::from_secs(120));
	}

	#[test]
	fn test_server_config_validate() {
		let test_cases = vec![
			(
				Server {
					listen_addr: "0.0.0.0:5120".to_string(),
					timeout: Duration::from_secs(30),
					log: Log::default(),
				},
				0,
			),
			(
				Server {
					listen_addr: ":5120".to_string(),
					timeout: Duration::from_secs(30),
					log: Log::default(),
				},
				1,
			),
			(
				Server {
					listen_addr: "0.0.0.0:5120".to_string(),
					timeout: Duration::from_secs(30),
					log: Log {
						file: "info.log".to_string(),
						filter_directives: "wtf,,;asd".to_string(),
					},
				},
				1,
			),
		];
		for (i, (input, expect)) in test_cases.into_iter().enumerate() {
			let actual = input.validate();
			if expect > 0 {
				assert!(actual.is_err(), "case {}", i);
			} else {
				assert!(actual.is_ok(), "case {}, err: {:?}", i, actual);
			}
		}
	}

	#[test]
	fn test_query_cfg_validate() {
		let bad = QueryCfg {
			max_limit: 100,
			default_limit: 1000,
			default_timeout: Duration::from_secs(30),
			max_timeout: Duration::from_secs(300),
		};
		assert!(bad.validate().is_err());
		let bad = QueryCfg {
			max_limit: 1000,
			default_limit: 100,
			default_timeout: Duration::from_secs(600),
			max_timeout: Duration::from_secs(300),
		};
		assert!(bad.validate().is_err());
	}

	#[test]
	fn test_alerts_cfg_validate() {
		let mut cfg = default_alerts();
		cfg.min_frequency = Duration::from_secs(1);
		assert!(cfg.validate().is_err());
	}
}
