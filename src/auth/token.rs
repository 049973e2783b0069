use super::{AuthMethod, Principal};
use crate::{errors::AppError, meta::Store};
use rand::{distributions::Alphanumeric, Rng, RngCore};
use sha2::{Digest, Sha256};

const SECRET_RANDOM_LEN: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 16;

/// `logchef_<user>_<random>`; shown to the caller exactly once.
pub fn mint_secret(user_id: i64) -> String {
	let random: String = rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(SECRET_RANDOM_LEN)
		.map(char::from)
		.collect();
	format!("logchef_{}_{}", user_id, random)
}

/// The stored lookup key and what listings display.
pub fn display_prefix(secret: &str) -> String {
	secret.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// `salt$hex(sha256(salt || secret))`.
pub fn hash_secret(secret: &str) -> String {
	let mut salt = [0u8; 8];
	rand::thread_rng().fill_bytes(&mut salt);
	let salt = hex::encode(salt);
	format!("{}${}", salt, digest(&salt, secret))
}

fn digest(salt: &str, secret: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(salt.as_bytes());
	hasher.update(secret.as_bytes());
	hex::encode(hasher.finalize())
}

pub fn verify_secret(stored: &str, presented: &str) -> bool {
	match stored.split_once('$') {
		Some((salt, hash)) => digest(salt, presented) == hash,
		None => false,
	}
}

pub async fn resolve(
	store: &Store,
	presented: &str,
) -> Result<Principal, AppError> {
	if !presented.starts_with("logchef_") {
		return Err(AppError::AuthRequired(
			"malformed bearer token".to_string(),
		));
	}
	let prefix = display_prefix(presented);
	for token in store.api_tokens_by_prefix(&prefix).await? {
		if verify_secret(&token.token_hash, presented) {
			let user = store.user_by_id(token.user_id).await?;
			if !user.is_active() {
				return Err(AppError::AuthForbidden(
					"user is disabled".to_string(),
				));
			}
			store.touch_api_token(token.id).await?;
			return Ok(Principal {
				user,
				via: AuthMethod::Token,
			});
		}
	}
	Err(AppError::AuthRequired("invalid bearer token".to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta::{UserRole, UserStatus};
	use pretty_assertions::assert_eq;

	#[test]
	fn test_hash_and_verify() {
		let secret = mint_secret(42);
		assert!(secret.starts_with("logchef_42_"));
		let stored = hash_secret(&secret);
		assert!(verify_secret(&stored, &secret));
		assert!(!verify_secret(&stored, "logchef_42_wrong"));
		// salts differ per mint, hashes are never equal for equal secrets
		assert_ne!(stored, hash_secret(&secret));
	}

	#[tokio::test]
	async fn test_resolve_roundtrip() {
		let store = Store::memory().await.unwrap();
		let user = store
			.upsert_user("a@example.com", "Alice", UserRole::Member)
			.await
			.unwrap();
		let secret = mint_secret(user.id);
		store
			.create_api_token(
				user.id,
				"laptop",
				&display_prefix(&secret),
				&hash_secret(&secret),
			)
			.await
			.unwrap();

		let principal = resolve(&store, &secret).await.unwrap();
		assert_eq!(principal.user.id, user.id);
		assert_eq!(principal.via, AuthMethod::Token);

		let err = resolve(&store, "logchef_1_nope").await.unwrap_err();
		assert_eq!(err.error_type(), "AuthRequired");

		// revocation is deletion
		let tokens = store.list_api_tokens(user.id).await.unwrap();
		store
			.delete_api_token(user.id, tokens[0].id)
			.await
			.unwrap();
		let err = resolve(&store, &secret).await.unwrap_err();
		assert_eq!(err.error_type(), "AuthRequired");
	}

	#[tokio::test]
	async fn test_disabled_user_is_refused() {
		let store = Store::memory().await.unwrap();
		let user = store
			.upsert_user("a@example.com", "Alice", UserRole::Member)
			.await
			.unwrap();
		let secret = mint_secret(user.id);
		store
			.create_api_token(
				user.id,
				"laptop",
				&display_prefix(&secret),
				&hash_secret(&secret),
			)
			.await
			.unwrap();
		store
			.set_user_status(user.id, UserStatus::Disabled)
			.await
			.unwrap();
		let err = resolve(&store, &secret).await.unwrap_err();
		assert_eq!(err.error_type(), "AuthForbidden");
	}
}
