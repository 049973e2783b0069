use crate::state::AppState;
use axum::{
	extract::{Request, State},
	http::StatusCode,
	middleware::Next,
	response::{IntoResponse, Response},
};
use opentelemetry::{
	metrics::{Counter, Histogram, MeterProvider as _},
	KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::time::Instant;

const HTTP_REQUEST_TOTAL_NAME: &str = "http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

#[derive(Clone)]
pub struct Instrumentations {
	registry: Registry,
	_provider: SdkMeterProvider,
	pub http_request_total: Counter<u64>,
	pub http_request_duration: Histogram<f64>,
}

#[derive(Clone)]
pub struct RequestTags {
	pub method: String,
	pub status: i64,
	pub uri: String,
}

impl Instrumentations {
	fn key_values(req: &RequestTags) -> [KeyValue; 4] {
		[
			KeyValue::new("service", "logchef"),
			KeyValue::new("method", req.method.clone()),
			KeyValue::new("status", req.status),
			KeyValue::new("uri", req.uri.clone()),
		]
	}
	pub fn add_req_total(&self, req: &RequestTags) {
		self.http_request_total.add(1, &Self::key_values(req))
	}
	pub fn observe_req_duration(&self, seconds: f64, req: &RequestTags) {
		self.http_request_duration
			.record(seconds, &Self::key_values(req))
	}
}

pub fn setup_metrics() -> Instrumentations {
	let registry = Registry::new();
	let exporter = opentelemetry_prometheus::exporter()
		.with_registry(registry.clone())
		.build()
		.expect("prometheus exporter");
	let provider = SdkMeterProvider::builder().with_reader(exporter).build();
	let meter = provider.meter("logchef");
	let http_request_total = meter
		.u64_counter(HTTP_REQUEST_TOTAL_NAME)
		.with_description("Total number of http requests")
		.build();
	let http_request_duration = meter
		.f64_histogram(HTTP_REQUEST_DURATION_SECONDS)
		.with_unit("s")
		.with_description("The HTTP request latencies in seconds")
		.build();
	Instrumentations {
		registry,
		_provider: provider,
		http_request_total,
		http_request_duration,
	}
}

pub async fn record_middleware(
	State(state): State<AppState>,
	request: Request,
	next: Next,
) -> Response {
	let start = Instant::now();
	let mut tags = RequestTags {
		method: request.method().to_string(),
		status: 200,
		uri: request.uri().path().to_string(),
	};
	let response = next.run(request).await;

	tags.status = response.status().as_u16() as i64;
	state.metrics.add_req_total(&tags);
	state
		.metrics
		.observe_req_duration(start.elapsed().as_secs_f64(), &tags);
	response
}

pub async fn export_metrics(State(state): State<AppState>) -> Response {
	let encoder = TextEncoder::new();
	let metric_families = state.metrics.registry.gather();
	let mut buffer = vec![];
	match encoder.encode(&metric_families, &mut buffer) {
		Ok(()) => match String::from_utf8(buffer) {
			Ok(resp) => resp.into_response(),
			Err(e) => {
				(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
					.into_response()
			}
		},
		Err(e) => {
			(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
		}
	}
}
