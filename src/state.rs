use crate::{
	alerts::Scheduler,
	auth::oidc::OidcClient,
	config::AppConfig,
	meta::Store,
	metrics::Instrumentations,
	storage::{BackendRegistry, InflightQueries},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
	pub config: Arc<AppConfig>,
	pub store: Store,
	pub registry: Arc<BackendRegistry>,
	pub inflight: Arc<InflightQueries>,
	pub scheduler: Arc<Scheduler>,
	pub metrics: Arc<Instrumentations>,
	pub oidc: Option<Arc<OidcClient>>,
}
