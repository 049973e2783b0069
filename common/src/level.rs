use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Hash, Eq, PartialEq, Copy)]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
	Fatal,
}

impl TryFrom<String> for LogLevel {
	type Error = anyhow::Error;

	fn try_from(value: String) -> Result<Self> {
		use LogLevel::*;
		let u = value.to_uppercase();
		match u.as_str() {
			"TRACE" => Ok(Trace),
			"DEBUG" => Ok(Debug),
			"INFO" => Ok(Info),
			"WARN" => Ok(Warn),
			"ERROR" => Ok(Error),
			"FATAL" | "CRITICAL" => Ok(Fatal),
			_ => {
				if u.starts_with("TRACE") {
					Ok(Trace)
				} else if u.starts_with("DEBUG") {
					Ok(Debug)
				} else if u.starts_with("INFO") {
					Ok(Info)
				} else if u.starts_with("WARN") {
					Ok(Warn)
				} else if u.starts_with("ERR") {
					Ok(Error)
				} else if u.starts_with("FATAL") || u.starts_with("CRIT") {
					Ok(Fatal)
				} else {
					Err(anyhow!("Invalid log level: {}", value))
				}
			},
		}
	}
}

impl From<LogLevel> for String {
	fn from(val: LogLevel) -> String {
		use LogLevel::*;
		match val {
			Trace => "TRACE".to_string(),
			Debug => "DEBUG".to_string(),
			Info => "INFO".to_string(),
			Warn => "WARN".to_string(),
			Error => "ERROR".to_string(),
			Fatal => "FATAL".to_string(),
		}
	}
}
