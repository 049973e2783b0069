use super::Store;
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TeamRole {
	Admin,
	Editor,
	Member,
}

impl TeamRole {
	pub fn can_edit(&self) -> bool {
		matches!(self, TeamRole::Admin | TeamRole::Editor)
	}
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Team {
	pub id: i64,
	pub name: String,
	pub description: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeamMember {
	pub team_id: i64,
	pub user_id: i64,
	pub role: TeamRole,
	pub email: String,
	pub full_name: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Membership {
	pub team_id: i64,
	pub team_name: String,
	pub role: TeamRole,
}

impl Store {
	pub async fn create_team(
		&self,
		name: &str,
		description: &str,
	) -> Result<Team, AppError> {
		let now = Utc::now();
		let res = sqlx::query(
			"INSERT INTO teams (name, description, created_at, updated_at) VALUES (?, ?, ?, ?)",
		)
		.bind(name)
		.bind(description)
		.bind(now)
		.bind(now)
		.execute(self.pool())
		.await?;
		self.team_by_id(res.last_insert_rowid()).await
	}

	pub async fn team_by_id(&self, id: i64) -> Result<Team, AppError> {
		let team = sqlx::query_as::<_, Team>(
			"SELECT * FROM teams WHERE id = ?",
		)
		.bind(id)
		.fetch_one(self.pool())
		.await?;
		Ok(team)
	}

	pub async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
		let teams = sqlx::query_as::<_, Team>(
			"SELECT * FROM teams ORDER BY name",
		)
		.fetch_all(self.pool())
		.await?;
		Ok(teams)
	}

	pub async fn update_team(
		&self,
		id: i64,
		name: &str,
		description: &str,
	) -> Result<Team, AppError> {
		sqlx::query(
			"UPDATE teams SET name = ?, description = ?, updated_at = ? WHERE id = ?",
		)
		.bind(name)
		.bind(description)
		.bind(Utc::now())
		.bind(id)
		.execute(self.pool())
		.await?;
		self.team_by_id(id).await
	}

	/// Memberships, source links, saved queries, and alert rules go with
	/// the team; history follows its rule.
	pub async fn delete_team(&self, id: i64) -> Result<(), AppError> {
		let res = sqlx::query("DELETE FROM teams WHERE id = ?")
			.bind(id)
			.execute(self.pool())
			.await?;
		if res.rows_affected() == 0 {
			return Err(AppError::NotFound("team not found".to_string()));
		}
		Ok(())
	}

	pub async fn add_team_member(
		&self,
		team_id: i64,
		user_id: i64,
		role: TeamRole,
	) -> Result<(), AppError> {
		sqlx::query(
			"INSERT INTO team_members (team_id, user_id, role, created_at) VALUES (?, ?, ?, ?) \
			 ON CONFLICT(team_id, user_id) DO UPDATE SET role = excluded.role",
		)
		.bind(team_id)
		.bind(user_id)
		.bind(role)
		.bind(Utc::now())
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn remove_team_member(
		&self,
		team_id: i64,
		user_id: i64,
	) -> Result<(), AppError> {
		sqlx::query(
			"DELETE FROM team_members WHERE team_id = ? AND user_id = ?",
		)
		.bind(team_id)
		.bind(user_id)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn team_role(
		&self,
		team_id: i64,
		user_id: i64,
	) -> Result<Option<TeamRole>, AppError> {
		let role = sqlx::query_scalar::<_, TeamRole>(
			"SELECT role FROM team_members WHERE team_id = ? AND user_id = ?",
		)
		.bind(team_id)
		.bind(user_id)
		.fetch_optional(self.pool())
		.await?;
		Ok(role)
	}

	pub async fn list_team_members(
		&self,
		team_id: i64,
	) -> Result<Vec<TeamMember>, AppError> {
		let members = sqlx::query_as::<_, TeamMember>(
			"SELECT tm.team_id, tm.user_id, tm.role, u.email, u.full_name \
			 FROM team_members tm JOIN users u ON u.id = tm.user_id \
			 WHERE tm.team_id = ? ORDER BY u.email",
		)
		.bind(team_id)
		.fetch_all(self.pool())
		.await?;
		Ok(members)
	}

	pub async fn memberships_for_user(
		&self,
		user_id: i64,
	) -> Result<Vec<Membership>, AppError> {
		let rows = sqlx::query_as::<_, Membership>(
			"SELECT tm.team_id, t.name AS team_name, tm.role \
			 FROM team_members tm JOIN teams t ON t.id = tm.team_id \
			 WHERE tm.user_id = ? ORDER BY t.name",
		)
		.bind(user_id)
		.fetch_all(self.pool())
		.await?;
		Ok(rows)
	}

	pub async fn link_team_source(
		&self,
		team_id: i64,
		source_id: i64,
	) -> Result<(), AppError> {
		sqlx::query(
			"INSERT INTO team_sources (team_id, source_id, created_at) VALUES (?, ?, ?) \
			 ON CONFLICT(team_id, source_id) DO NOTHING",
		)
		.bind(team_id)
		.bind(source_id)
		.bind(Utc::now())
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn unlink_team_source(
		&self,
		team_id: i64,
		source_id: i64,
	) -> Result<(), AppError> {
		sqlx::query(
			"DELETE FROM team_sources WHERE team_id = ? AND source_id = ?",
		)
		.bind(team_id)
		.bind(source_id)
		.execute(self.pool())
		.await?;
		Ok(())
	}

	pub async fn team_source_linked(
		&self,
		team_id: i64,
		source_id: i64,
	) -> Result<bool, AppError> {
		let n = sqlx::query_scalar::<_, i64>(
			"SELECT count(*) FROM team_sources WHERE team_id = ? AND source_id = ?",
		)
		.bind(team_id)
		.bind(source_id)
		.fetch_one(self.pool())
		.await?;
		Ok(n > 0)
	}

	pub async fn source_link_count(
		&self,
		source_id: i64,
	) -> Result<i64, AppError> {
		let n = sqlx::query_scalar::<_, i64>(
			"SELECT count(*) FROM team_sources WHERE source_id = ?",
		)
		.bind(source_id)
		.fetch_one(self.pool())
		.await?;
		Ok(n)
	}
}
