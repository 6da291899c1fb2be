use crate::{
    alerts::{AlertSink, DisabledAlerts, GatewayAlerts},
    convert, get_plans, get_rate, refresh_rate, routes, HtmlRateFetcher, RateCache, RateStore,
    RateUpdater, Settings,
};
use anyhow::Context;
use axum::{
    body::Body,
    extract::Request,
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use hyper::{header::CONTENT_TYPE, Method};
use log::{info, warn};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<RateCache>,
    pub updater: Arc<RateUpdater>,
}

impl AppState {
    pub fn new(updater: Arc<RateUpdater>) -> Self {
        Self {
            cache: updater.cache().clone(),
            updater,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::rate::get_rate,
        routes::rate::get_plans,
        routes::rate::convert,
        routes::rate::refresh_rate,
    ),
    components(
        schemas(
            routes::rate::RateResponse,
            routes::rate::PlansResponse,
            routes::rate::ConversionResponse,
            routes::rate::RefreshResponse,
        )
    ),
    tags(
        (name = "rate oracle api", description = "publishes the official exchange rate, plan prices and conversions")
    )
)]
struct ApiDoc;

/// Wires the live fetcher and alert sink around `store`.
pub fn build_app_state(settings: &Settings, store: Arc<dyn RateStore>) -> anyhow::Result<AppState> {
    let fetcher = Arc::new(
        HtmlRateFetcher::new(
            settings.source_url.clone(),
            &settings.source_element,
            settings.fetch_timeout,
            settings.accept_invalid_certs,
        )
        .context("error setting up rate fetcher")?,
    );

    let alerts: Arc<dyn AlertSink> = match &settings.alerts {
        Some(target) => Arc::new(
            GatewayAlerts::new(target.api_url.clone(), target.recipient.clone())
                .context("error setting up alert gateway")?,
        ),
        None => {
            warn!("no alert gateway configured, fetch failures will only be logged");
            Arc::new(DisabledAlerts)
        }
    };

    let updater = Arc::new(RateUpdater::new(
        store,
        fetcher,
        alerts,
        Arc::new(RateCache::new()),
        settings.utc_offset,
    ));

    Ok(AppState::new(updater))
}

pub fn app(app_state: AppState) -> Router {
    let api_docs = ApiDoc::openapi();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/", get(get_rate))
        .route("/plans", get(get_plans))
        .route("/convert", get(convert))
        .route("/rate/refresh", post(refresh_rate))
        .with_state(Arc::new(app_state))
        .layer(middleware::from_fn(log_request))
        .merge(Scalar::with_url("/docs", api_docs))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default()
        .to_string();
    info!(target: "http_request", "new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}
