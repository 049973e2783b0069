use crate::{
	alerts::Scheduler,
	auth::oidc::OidcClient,
	config::AppConfig,
	meta::{
		settings::{
			SETTING_AI_ASSISTANT_ENABLED, SETTING_ALERTING_ENABLED,
		},
		Store,
	},
	metrics, routes,
	state::AppState,
	storage::{BackendRegistry, InflightQueries},
};
use anyhow::Result;
use std::{fs::OpenOptions, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

pub async fn start() -> Result<()> {
	// load configuration
	let cfg = AppConfig::new()?;
	cfg.validate()?;

	init_tracing_subscriber(
		cfg.server.log.file.clone(),
		cfg.server.log.filter_directives.as_str(),
	);

	// init metrics
	let metrics_handle = metrics::setup_metrics();

	let store = Store::connect(&cfg.metadata.path).await?;
	mirror_runtime_settings(&store, &cfg).await?;

	let registry = Arc::new(BackendRegistry::new(&cfg.probe));
	// reconnect persisted sources lazily; an unreachable backend must
	// not block startup
	for source in store.list_sources().await? {
		if let Err(e) = registry.register(&source, false).await {
			warn!(source = %source.name, error = %e, "source registration deferred");
		}
	}

	let scheduler =
		Scheduler::new(store.clone(), registry.clone(), cfg.alerts.clone());
	scheduler.reconcile().await?;

	let oidc = match &cfg.auth.oidc {
		Some(oidc_cfg) => Some(Arc::new(OidcClient::new(oidc_cfg.clone())?)),
		None => None,
	};

	let app_state = AppState {
		config: Arc::new(cfg.clone()),
		store,
		registry,
		inflight: Arc::new(InflightQueries::default()),
		scheduler,
		metrics: Arc::new(metrics_handle),
		oidc,
	};
	// build our application with a route
	let app = routes::new_router(app_state);

	let listener =
		tokio::net::TcpListener::bind(cfg.server.listen_addr.clone())
			.await?;
	info!("Listening on: {}", cfg.server.listen_addr);
	axum::serve(listener, app).await?;
	Ok(())
}

/// Config defaults for the runtime-mutable toggles land in the store
/// once; operator changes through the API survive restarts.
async fn mirror_runtime_settings(
	store: &Store,
	cfg: &AppConfig,
) -> Result<()> {
	store
		.mirror_setting_default(
			SETTING_ALERTING_ENABLED,
			if cfg.alerts.enabled { "true" } else { "false" },
		)
		.await?;
	store
		.mirror_setting_default(SETTING_AI_ASSISTANT_ENABLED, "false")
		.await?;
	Ok(())
}

fn init_tracing_subscriber(file: String, filter_directives: &str) {
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter_directives))
		.with(
			tracing_subscriber::fmt::layer()
				.json()
				.with_writer(move || get_writer(file.clone())),
		)
		.init();
}

fn get_writer(file: String) -> Box<dyn std::io::Write> {
	if file.as_str().eq_ignore_ascii_case("stdout") {
		Box::new(std::io::stdout())
	} else if file.as_str().eq_ignore_ascii_case("stderr") {
		Box::new(std::io::stderr())
	} else {
		match OpenOptions::new().append(true).create(true).open(&file) {
			Ok(f) => Box::new(f),
			Err(e) => {
				eprintln!("cannot open log file {}: {}, using stderr", file, e);
				Box::new(std::io::stderr())
			}
		}
	}
}
