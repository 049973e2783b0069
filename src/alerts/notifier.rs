use crate::{config::AlertsCfg, errors::AppError};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// One element of the JSON array posted to the notification router's
/// ingest endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
	pub labels: HashMap<String, String>,
	pub annotations: HashMap<String, String>,
	#[serde(rename = "startsAt")]
	pub starts_at: DateTime<Utc>,
	#[serde(rename = "endsAt", skip_serializing_if = "Option::is_none")]
	pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct Notifier {
	http: Client,
	url: Option<String>,
	retries: u32,
	#[cfg(test)]
	pub(crate) sent: std::sync::Arc<std::sync::Mutex<Vec<AlertNotification>>>,
}

impl Notifier {
	pub fn new(cfg: &AlertsCfg) -> Self {
		let http = Client::builder()
			.timeout(cfg.notify_timeout)
			.build()
			.unwrap_or_default();
		Self {
			http,
			url: cfg.alertmanager_url.clone(),
			retries: cfg.notify_retries,
			#[cfg(test)]
			sent: Default::default(),
		}
	}

	/// Bounded retries with a short backoff. Exhaustion surfaces to the
	/// caller; it never aborts a rule state transition.
	pub async fn push(
		&self,
		payload: &[AlertNotification],
	) -> Result<(), AppError> {
		let Some(url) = &self.url else {
			#[cfg(test)]
			self.sent.lock().unwrap().extend(payload.iter().cloned());
			return Ok(());
		};
		let mut last_err = String::new();
		for attempt in 0..=self.retries {
			if attempt > 0 {
				tokio::time::sleep(Duration::from_millis(
					500 * attempt as u64,
				))
				.await;
			}
			match self.http.post(url).json(&payload).send().await {
				Ok(resp) if resp.status().is_success() => return Ok(()),
				Ok(resp) => {
					last_err =
						format!("notification router returned {}", resp.status());
					warn!(attempt = attempt, status = %resp.status(), "notification push rejected");
				}
				Err(e) => {
					last_err = e.to_string();
					warn!(attempt = attempt, error = %e, "notification push failed");
				}
			}
		}
		Err(AppError::Backend(last_err))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_wire_format() {
		let n = AlertNotification {
			labels: HashMap::from([(
				"alertname".to_string(),
				"error spike".to_string(),
			)]),
			annotations: HashMap::from([(
				"value".to_string(),
				"12".to_string(),
			)]),
			starts_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
			ends_at: None,
		};
		let j = serde_json::to_value(vec![n]).unwrap();
		assert_eq!(j[0]["labels"]["alertname"], "error spike");
		assert_eq!(j[0]["annotations"]["value"], "12");
		assert!(j[0].get("endsAt").is_none());
		assert!(j[0]["startsAt"].is_string());
	}
}
