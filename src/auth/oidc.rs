use crate::{config::OidcCfg, errors::AppError};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Thin client for the external identity provider: authorize redirect,
/// code exchange, userinfo. Discovery is deliberately not performed; the
/// three endpoints come from configuration.
#[derive(Clone, Debug)]
pub struct OidcClient {
	cfg: OidcCfg,
	http: Client,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
	pub access_token: String,
	#[serde(default)]
	pub id_token: Option<String>,
	#[serde(default)]
	pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
	#[serde(default)]
	pub sub: String,
	pub email: String,
	#[serde(default)]
	pub name: Option<String>,
}

impl OidcClient {
	pub fn new(cfg: OidcCfg) -> Result<Self, AppError> {
		// surface malformed endpoints at startup, not on first login
		for u in [&cfg.auth_url, &cfg.token_url, &cfg.userinfo_url] {
			Url::parse(u).map_err(|e| {
				AppError::Config(format!("invalid OIDC endpoint {}: {}", u, e))
			})?;
		}
		let http = Client::builder()
			.timeout(Duration::from_secs(10))
			.build()
			.map_err(|e| AppError::Config(e.to_string()))?;
		Ok(Self { cfg, http })
	}

	pub fn authorize_url(&self, state: &str) -> String {
		let mut url = Url::parse(&self.cfg.auth_url).expect("validated at construction");
		url.query_pairs_mut()
			.append_pair("response_type", "code")
			.append_pair("client_id", &self.cfg.client_id)
			.append_pair("redirect_uri", &self.cfg.redirect_url)
			.append_pair("scope", "openid email profile")
			.append_pair("state", state);
		url.to_string()
	}

	pub async fn exchange_code(
		&self,
		code: &str,
	) -> Result<TokenResponse, AppError> {
		let form = [
			("grant_type", "authorization_code"),
			("code", code),
			("redirect_uri", self.cfg.redirect_url.as_str()),
			("client_id", self.cfg.client_id.as_str()),
			("client_secret", self.cfg.client_secret.as_str()),
		];
		let resp = self
			.http
			.post(&self.cfg.token_url)
			.form(&form)
			.send()
			.await
			.map_err(|e| {
				AppError::AuthRequired(format!("code exchange failed: {}", e))
			})?;
		if !resp.status().is_success() {
			return Err(AppError::AuthRequired(format!(
				"identity provider rejected the code: {}",
				resp.status()
			)));
		}
		resp.json().await.map_err(|e| {
			AppError::AuthRequired(format!(
				"unexpected token response: {}",
				e
			))
		})
	}

	pub async fn userinfo(
		&self,
		access_token: &str,
	) -> Result<UserInfo, AppError> {
		let resp = self
			.http
			.get(&self.cfg.userinfo_url)
			.bearer_auth(access_token)
			.send()
			.await
			.map_err(|e| {
				AppError::AuthRequired(format!("userinfo failed: {}", e))
			})?;
		if !resp.status().is_success() {
			return Err(AppError::AuthRequired(format!(
				"identity provider refused userinfo: {}",
				resp.status()
			)));
		}
		resp.json().await.map_err(|e| {
			AppError::AuthRequired(format!(
				"unexpected userinfo response: {}",
				e
			))
		})
	}
}
