use crate::{
	errors::AppError,
	meta::{Source, Store, TeamRole, User},
	state::AppState,
};
use axum::{
	extract::FromRequestParts,
	http::{header, request::Parts},
};

pub mod oidc;
pub mod session;
pub mod token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
	Session,
	Token,
}

/// The resolved caller. Sessions and tokens are two strategies over this
/// one abstraction; nothing downstream cares which one was used.
#[derive(Debug, Clone)]
pub struct Principal {
	pub user: User,
	pub via: AuthMethod,
}

impl FromRequestParts<AppState> for Principal {
	type Rejection = AppError;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &AppState,
	) -> Result<Self, Self::Rejection> {
		if let Some(presented) = bearer_token(parts) {
			return token::resolve(&state.store, &presented).await;
		}
		if let Some(sid) = session::cookie_value(
			parts,
			&state.config.auth.session.cookie_name,
		) {
			return session::resolve(&state.store, &sid).await;
		}
		Err(AppError::AuthRequired(
			"missing session or bearer token".to_string(),
		))
	}
}

fn bearer_token(parts: &Parts) -> Option<String> {
	parts
		.headers
		.get(header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
		.map(|v| v.trim().to_string())
}

/// Membership gate. Global admins bypass membership; for everyone else a
/// team they don't belong to is indistinguishable from one that does not
/// exist.
pub async fn require_team_member(
	store: &Store,
	user: &User,
	team_id: i64,
) -> Result<Option<TeamRole>, AppError> {
	if user.is_admin() {
		store.team_by_id(team_id).await?;
		return Ok(None);
	}
	match store.team_role(team_id, user.id).await? {
		Some(role) => Ok(Some(role)),
		None => Err(AppError::NotFound("team not found".to_string())),
	}
}

/// Mutations on saved queries and alert rules need team admin or editor.
pub async fn require_team_editor(
	store: &Store,
	user: &User,
	team_id: i64,
) -> Result<(), AppError> {
	match require_team_member(store, user, team_id).await? {
		None => Ok(()),
		Some(role) if role.can_edit() => Ok(()),
		Some(_) => Err(AppError::AuthForbidden(
			"requires team admin or editor role".to_string(),
		)),
	}
}

pub async fn require_team_admin(
	store: &Store,
	user: &User,
	team_id: i64,
) -> Result<(), AppError> {
	match require_team_member(store, user, team_id).await? {
		None => Ok(()),
		Some(TeamRole::Admin) => Ok(()),
		Some(_) => Err(AppError::AuthForbidden(
			"requires team admin role".to_string(),
		)),
	}
}

pub fn require_global_admin(user: &User) -> Result<(), AppError> {
	if user.is_admin() {
		Ok(())
	} else {
		Err(AppError::AuthForbidden(
			"requires global admin role".to_string(),
		))
	}
}

/// (team, source) must be linked; an unlinked source reads as absent.
pub async fn require_team_source(
	store: &Store,
	team_id: i64,
	source_id: i64,
) -> Result<Source, AppError> {
	if !store.team_source_linked(team_id, source_id).await? {
		return Err(AppError::NotFound("source not found".to_string()));
	}
	store.source_by_id(source_id).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta::sources::tests_support::sample_scope;
	use crate::meta::UserRole;
	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn test_non_member_sees_not_found() {
		let (store, team_id, source_id) = sample_scope().await;
		let outsider = store
			.upsert_user("out@example.com", "Out", UserRole::Member)
			.await
			.unwrap();
		let err = require_team_member(&store, &outsider, team_id)
			.await
			.unwrap_err();
		assert_eq!(err.error_type(), "NotFound");
		// the (team, source) pair is equally invisible
		let err = require_team_source(&store, team_id + 7, source_id)
			.await
			.unwrap_err();
		assert_eq!(err.error_type(), "NotFound");
	}

	#[tokio::test]
	async fn test_member_roles_gate_mutations() {
		let (store, team_id, _source_id) = sample_scope().await;
		let viewer = store
			.upsert_user("v@example.com", "V", UserRole::Member)
			.await
			.unwrap();
		store
			.add_team_member(team_id, viewer.id, TeamRole::Member)
			.await
			.unwrap();
		assert_eq!(
			require_team_member(&store, &viewer, team_id)
				.await
				.unwrap(),
			Some(TeamRole::Member)
		);
		let err = require_team_editor(&store, &viewer, team_id)
			.await
			.unwrap_err();
		assert_eq!(err.error_type(), "AuthForbidden");

		let editor = store
			.upsert_user("e@example.com", "E", UserRole::Member)
			.await
			.unwrap();
		store
			.add_team_member(team_id, editor.id, TeamRole::Editor)
			.await
			.unwrap();
		require_team_editor(&store, &editor, team_id)
			.await
			.unwrap();
		let err = require_team_admin(&store, &editor, team_id)
			.await
			.unwrap_err();
		assert_eq!(err.error_type(), "AuthForbidden");
	}

	#[tokio::test]
	async fn test_global_admin_bypasses_membership() {
		let (store, team_id, source_id) = sample_scope().await;
		let admin = store
			.upsert_user("root@example.com", "Root", UserRole::Admin)
			.await
			.unwrap();
		assert_eq!(
			require_team_member(&store, &admin, team_id)
				.await
				.unwrap(),
			None
		);
		require_team_editor(&store, &admin, team_id).await.unwrap();
		require_team_source(&store, team_id, source_id)
			.await
			.unwrap();
		// but a team that truly does not exist is still absent
		let err = require_team_member(&store, &admin, team_id + 99)
			.await
			.unwrap_err();
		assert_eq!(err.error_type(), "NotFound");
	}
}
