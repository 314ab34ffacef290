//! HTTP surface: one render pass per `POST /v1/render`, plus the record
//! store pass-through and health.

pub mod handlers;
pub mod visitors;

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{
        header::{CONTENT_TYPE, COOKIE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa::OpenApi;

use crate::auth::{
    session::Profile, AuthMode, AuthScreen, GoTrueClient, Notice, NoticeLevel, SessionKind,
    UserAction, View,
};
use crate::store::PostgrestStore;
use handlers::{health, records, render};
use visitors::Visitors;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        render::render,
        records::fetch_one,
        records::insert,
        records::update,
        records::delete,
    ),
    components(
        schemas(
            health::Health,
            render::RenderRequest,
            View,
            UserAction,
            AuthMode,
            AuthScreen,
            Notice,
            NoticeLevel,
            Profile,
            SessionKind,
        )
    ),
    tags(
        (name = "spendline", description = "Spendline session and recovery controller"),
        (name = "auth", description = "Render passes driving the auth state machine"),
        (name = "records", description = "Per-user record store access"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Shared server state: the visit registry and the record store.
#[derive(Debug)]
pub struct AppState {
    visitors: Visitors<GoTrueClient>,
    store: PostgrestStore,
    secure_cookies: bool,
    allowed_origin: Option<HeaderValue>,
}

impl AppState {
    #[must_use]
    pub fn new(visitors: Visitors<GoTrueClient>, store: PostgrestStore) -> Self {
        Self {
            visitors,
            store,
            secure_cookies: false,
            allowed_origin: None,
        }
    }

    /// Derive the cookie `Secure` flag and the CORS origin from the public
    /// app URL.
    ///
    /// # Errors
    /// Returns an error if the URL has no host.
    pub fn with_app_url(mut self, app_url: Option<&str>) -> Result<Self> {
        if let Some(app_url) = app_url {
            let origin = app_origin(app_url)?;
            self.secure_cookies = origin
                .to_str()
                .is_ok_and(|origin| origin.starts_with("https://"));
            self.allowed_origin = Some(origin);
        }
        Ok(self)
    }

    #[must_use]
    pub fn visitors(&self) -> &Visitors<GoTrueClient> {
        &self.visitors
    }

    #[must_use]
    pub fn store(&self) -> &PostgrestStore {
        &self.store
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}

/// Build the application router with all layers.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, COOKIE])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_origin(AllowOrigin::list(state.allowed_origin.clone()))
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/v1/render", post(render::render))
        .route(
            "/v1/records/:table",
            get(records::fetch_one)
                .post(records::insert)
                .patch(records::update)
                .delete(records::delete),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: AppState) -> Result<()> {
    let state = Arc::new(state);

    // Idle visits are also dropped lazily on access; the sweep bounds memory.
    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let period = sweeper
            .visitors()
            .ttl()
            .clamp(Duration::from_secs(1), Duration::from_secs(60));
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            sweeper.visitors().evict_idle().await;
        }
    });

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn app_origin(app_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(app_url).with_context(|| format!("Invalid app URL: {app_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("App URL must include a valid host: {app_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build app origin header")
}
