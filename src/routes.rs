use crate::{handlers, metrics, state};
use axum::{
	http::Request as HttpRequest,
	middleware::from_fn_with_state,
	routing::{delete, get, post},
	Router,
};
use tower::ServiceBuilder;
use tower_http::trace::DefaultOnResponse;
use tower_http::{
	compression::CompressionLayer, decompression::RequestDecompressionLayer,
	timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, Span};

static SKIP_LOGGING_PATHS: [&str; 2] = ["/api/v1/health", "/metrics"];

pub fn new_router(state: state::AppState) -> Router {
	let cfg = state.config.clone();
	let scoped = Router::new()
		// DELETE on the scope root unlinks the source from the team
		.route("/", delete(handlers::teams::unlink_source))
		.route("/logs/query", post(handlers::query::query_logs))
		.route("/logs/histogram", post(handlers::query::histogram))
		.route("/logs/context", post(handlers::query::log_context))
		.route("/logs/cancel", post(handlers::query::cancel_query))
		.route("/logchefql/translate", post(handlers::query::translate_ql))
		.route("/logchefql/validate", post(handlers::query::validate_ql))
		.route("/logchefql/query", post(handlers::query::query_ql))
		.route("/fields/values", get(handlers::query::field_values))
		.route("/schema", get(handlers::sources::source_schema))
		.route(
			"/collections",
			get(handlers::saved_queries::list)
				.post(handlers::saved_queries::create),
		)
		.route(
			"/collections/{id}",
			get(handlers::saved_queries::get)
				.put(handlers::saved_queries::update)
				.delete(handlers::saved_queries::delete),
		)
		.route(
			"/alerts",
			get(handlers::alerts::list).post(handlers::alerts::create),
		)
		.route(
			"/alerts/{id}",
			get(handlers::alerts::get)
				.put(handlers::alerts::update)
				.delete(handlers::alerts::delete),
		)
		.route("/alerts/{id}/history", get(handlers::alerts::history))
		.route("/alerts/{id}/test", post(handlers::alerts::test))
		.route("/alerts/{id}/resolve", post(handlers::alerts::resolve));

	let api = Router::new()
		.route("/health", get(handlers::health))
		.route("/meta", get(handlers::meta))
		.route("/auth/login", get(handlers::auth_flow::login))
		.route("/auth/callback", get(handlers::auth_flow::callback))
		.route("/auth/logout", post(handlers::auth_flow::logout))
		.route("/me", get(handlers::me::me))
		.route(
			"/me/preferences",
			get(handlers::me::get_preferences)
				.put(handlers::me::put_preferences),
		)
		.route(
			"/me/tokens",
			get(handlers::me::list_tokens).post(handlers::me::create_token),
		)
		.route("/me/tokens/{id}", delete(handlers::me::delete_token))
		.route("/users", get(handlers::users::list_users))
		.route(
			"/users/{id}",
			get(handlers::users::get_user)
				.patch(handlers::users::update_user),
		)
		.route(
			"/teams",
			get(handlers::teams::list_teams)
				.post(handlers::teams::create_team),
		)
		.route(
			"/teams/{team}",
			get(handlers::teams::get_team)
				.put(handlers::teams::update_team)
				.delete(handlers::teams::delete_team),
		)
		.route(
			"/teams/{team}/members",
			get(handlers::teams::list_members)
				.post(handlers::teams::upsert_member),
		)
		.route(
			"/teams/{team}/members/{user}",
			delete(handlers::teams::remove_member),
		)
		.route(
			"/teams/{team}/sources",
			get(handlers::teams::list_team_sources)
				.post(handlers::teams::link_source),
		)
		.route(
			"/sources",
			get(handlers::sources::list_sources)
				.post(handlers::sources::create_source),
		)
		.route(
			"/sources/{id}",
			get(handlers::sources::get_source)
				.put(handlers::sources::update_source)
				.delete(handlers::sources::delete_source),
		)
		.route(
			"/admin/settings",
			get(handlers::settings::get_settings)
				.put(handlers::settings::put_setting),
		)
		.nest("/teams/{team}/sources/{source}", scoped);

	Router::new()
		.route("/metrics", get(metrics::export_metrics))
		.nest("/api/v1", api)
		.fallback(handlers::handler_404)
		.with_state(state.clone())
		.layer(
			ServiceBuilder::new()
				.layer(
					TraceLayer::new_for_http()
						.on_request(|req: &HttpRequest<_>, _: &Span| {
							let p = req.uri().path();
							if SKIP_LOGGING_PATHS.contains(&p) {
								return;
							}
							info!(method = ?req.method(), path = p, query = req.uri().query(), "request received");
						})
						.on_response(
							DefaultOnResponse::new()
								.level(tracing::Level::INFO),
						),
				)
				.layer(from_fn_with_state(state, metrics::record_middleware))
				.layer(TimeoutLayer::new(cfg.server.timeout))
				.layer(CompressionLayer::new())
				.layer(RequestDecompressionLayer::new()),
		)
}
