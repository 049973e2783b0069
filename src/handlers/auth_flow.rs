use super::{ok, ApiResponse};
use crate::{
	auth::{session, Principal},
	errors::AppError,
	meta::UserRole,
	state::AppState,
};
use axum::{
	extract::{Query, State},
	http::{header, request::Parts, HeaderMap, HeaderValue},
	response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::{json, Value as JSONValue};

const STATE_COOKIE: &str = "logchef_oidc_state";

/// GET /api/v1/auth/login — redirect to the identity provider with a
/// nonce bound to a short-lived cookie.
pub async fn login(
	State(state): State<AppState>,
) -> Result<Response, AppError> {
	let oidc = state.oidc.as_ref().ok_or_else(|| {
		AppError::Config("OIDC is not configured".to_string())
	})?;
	let nonce = session::new_session_id();
	let url = oidc.authorize_url(&nonce);
	let cookie = format!(
		"{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age=600",
		STATE_COOKIE, nonce
	);
	let mut headers = HeaderMap::new();
	headers.insert(
		header::SET_COOKIE,
		HeaderValue::from_str(&cookie)
			.map_err(|e| AppError::Internal(e.into()))?,
	);
	Ok((headers, Redirect::temporary(&url)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
	pub code: String,
	pub state: String,
}

/// GET /api/v1/auth/callback — code exchange, user upsert, session
/// issue. Users are created on first login; admin status comes from the
/// configured allow-list.
pub async fn callback(
	State(state): State<AppState>,
	parts: Parts,
	Query(q): Query<CallbackQuery>,
) -> Result<Response, AppError> {
	let oidc = state.oidc.as_ref().ok_or_else(|| {
		AppError::Config("OIDC is not configured".to_string())
	})?;
	let expected = session::cookie_value(&parts, STATE_COOKIE)
		.ok_or_else(|| {
			AppError::AuthRequired(
				"missing login state cookie".to_string(),
			)
		})?;
	if expected != q.state {
		return Err(AppError::AuthRequired(
			"login state mismatch".to_string(),
		));
	}
	let tokens = oidc.exchange_code(&q.code).await?;
	let info = oidc.userinfo(&tokens.access_token).await?;
	let role = if state
		.config
		.auth
		.admin_emails
		.iter()
		.any(|e| e.eq_ignore_ascii_case(&info.email))
	{
		UserRole::Admin
	} else {
		UserRole::Member
	};
	let user = state
		.store
		.upsert_user(
			&info.email,
			info.name.as_deref().unwrap_or(&info.email),
			role,
		)
		.await?;
	if !user.is_active() {
		return Err(AppError::AuthForbidden(
			"user is disabled".to_string(),
		));
	}
	// promotion applies even for pre-existing accounts added to the list
	if role == UserRole::Admin && !user.is_admin() {
		state.store.set_user_role(user.id, UserRole::Admin).await?;
	}
	let (_, cookie) = session::start(
		&state.store,
		&state.config.auth.session,
		user.id,
	)
	.await?;
	let mut headers = HeaderMap::new();
	headers.append(
		header::SET_COOKIE,
		HeaderValue::from_str(&cookie)
			.map_err(|e| AppError::Internal(e.into()))?,
	);
	let clear_state = format!(
		"{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
		STATE_COOKIE
	);
	headers.append(
		header::SET_COOKIE,
		HeaderValue::from_str(&clear_state)
			.map_err(|e| AppError::Internal(e.into()))?,
	);
	Ok((headers, Redirect::temporary("/")).into_response())
}

/// POST /api/v1/auth/logout — clears the server-side session and the
/// cookie. Token callers have nothing to log out of.
pub async fn logout(
	State(state): State<AppState>,
	parts: Parts,
	_principal: Principal,
) -> Result<Response, AppError> {
	let cfg = &state.config.auth.session;
	if let Some(sid) = session::cookie_value(&parts, &cfg.cookie_name) {
		state.store.delete_session(&sid).await?;
	}
	let mut headers = HeaderMap::new();
	headers.insert(
		header::SET_COOKIE,
		HeaderValue::from_str(&session::clear_cookie(cfg))
			.map_err(|e| AppError::Internal(e.into()))?,
	);
	let body: ApiResponse<JSONValue> = ok(json!({ "logged_out": true }));
	Ok((headers, body).into_response())
}
