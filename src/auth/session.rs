use super::{AuthMethod, Principal};
use crate::{config::SessionCfg, errors::AppError, meta::Store};
use axum::http::{header, request::Parts};
use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;

pub fn new_session_id() -> String {
	let mut buf = [0u8; 32];
	rand::thread_rng().fill_bytes(&mut buf);
	hex::encode(buf)
}

pub fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
	for header_value in parts.headers.get_all(header::COOKIE) {
		let Ok(raw) = header_value.to_str() else {
			continue;
		};
		for pair in raw.split(';') {
			if let Some((k, v)) = pair.trim().split_once('=') {
				if k == name {
					return Some(v.to_string());
				}
			}
		}
	}
	None
}

pub fn build_cookie(cfg: &SessionCfg, id: &str) -> String {
	let mut cookie = format!(
		"{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
		cfg.cookie_name,
		id,
		cfg.max_age.as_secs()
	);
	if cfg.cookie_secure {
		cookie.push_str("; Secure");
	}
	cookie
}

pub fn clear_cookie(cfg: &SessionCfg) -> String {
	format!(
		"{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
		cfg.cookie_name
	)
}

/// Creates the server-side record and returns (session id, Set-Cookie).
pub async fn start(
	store: &Store,
	cfg: &SessionCfg,
	user_id: i64,
) -> Result<(String, String), AppError> {
	let id = new_session_id();
	let expires_at = Utc::now()
		+ ChronoDuration::from_std(cfg.max_age)
			.unwrap_or_else(|_| ChronoDuration::days(7));
	store.create_session(&id, user_id, expires_at).await?;
	let cookie = build_cookie(cfg, &id);
	Ok((id, cookie))
}

/// Sessions carry no authorization; they only name a user. Every
/// protected handler re-derives authorization from the store.
pub async fn resolve(
	store: &Store,
	session_id: &str,
) -> Result<Principal, AppError> {
	let session = store
		.session_by_id(session_id)
		.await?
		.ok_or_else(|| {
			AppError::AuthRequired("session expired or unknown".to_string())
		})?;
	let user = store.user_by_id(session.user_id).await?;
	if !user.is_active() {
		return Err(AppError::AuthForbidden(
			"user is disabled".to_string(),
		));
	}
	Ok(Principal {
		user,
		via: AuthMethod::Session,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta::UserRole;
	use pretty_assertions::assert_eq;
	use std::time::Duration;

	fn cfg() -> SessionCfg {
		SessionCfg {
			cookie_name: "logchef_session".to_string(),
			cookie_secure: false,
			max_age: Duration::from_secs(3600),
		}
	}

	#[test]
	fn test_cookie_shape() {
		let cookie = build_cookie(&cfg(), "abc123");
		assert_eq!(
			cookie,
			"logchef_session=abc123; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600"
		);
		assert!(clear_cookie(&cfg()).contains("Max-Age=0"));
	}

	#[tokio::test]
	async fn test_session_roundtrip_and_logout() {
		let store = Store::memory().await.unwrap();
		let user = store
			.upsert_user("a@example.com", "Alice", UserRole::Member)
			.await
			.unwrap();
		let (sid, _cookie) = start(&store, &cfg(), user.id).await.unwrap();
		let principal = resolve(&store, &sid).await.unwrap();
		assert_eq!(principal.user.id, user.id);
		assert_eq!(principal.via, AuthMethod::Session);

		// logout clears the server-side record
		store.delete_session(&sid).await.unwrap();
		let err = resolve(&store, &sid).await.unwrap_err();
		assert_eq!(err.error_type(), "AuthRequired");
	}
}
