//! # repogate: a transactional data-access layer behind a uniform request pipeline
//!
//! `repogate` serves a small HTTP API over PostgreSQL, optionally shadowed by Redis. The
//! interesting parts are the two layers every endpoint goes through rather than the endpoints
//! themselves.
//!
//! ## Architecture
//!
//! ### Request pipeline ([`api::executor`])
//!
//! Every route is an [`Endpoint`](api::executor::Endpoint): a handler plus declarations of what
//! it needs. The pipeline authenticates the request, checks the caller's role, decodes and
//! validates the query string, path parameters and body, and only then calls the handler with a
//! typed [`RequestContext`](api::executor::RequestContext). Results are wrapped in a fixed JSON
//! envelope and every failure is rendered through the closed [`errors::Error`] taxonomy, so
//! clients always see the same shape:
//!
//! ```json
//! { "data": ..., "msg": "...", "code": "00", "errors": {} }
//! ```
//!
//! ### Data access ([`db`], [`cache`])
//!
//! A single generic [`Repository`](db::handlers::Repository) serves every table, driven by a
//! declarative [`TableSchema`](db::schema::TableSchema). Reads and writes run in an explicit
//! request-scoped [`Session`](db::Session) that owns one transaction. Reads can opt into
//! cache-aside behaviour through a [`CacheStore`](cache::CacheStore); writes can run detached
//! in the background.
//!
//! ### Authentication ([`auth`])
//!
//! Endpoints choose an [`Authenticator`](auth::Authenticator): API keys looked up in the
//! `api_keys` table, or signed bearer tokens issued in exchange for such a key.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use repogate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = repogate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     repogate::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run automatically on startup. To run them by hand:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! repogate::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod types;

use crate::api::executor::Endpoint;
use crate::api::handlers::{auth as auth_handlers, balances, health, nfts};
use crate::api::models::{
    auth::RefreshRequest,
    balances::{ChangeBalance, GetBalance},
    nfts::{AddNft, ShowNft},
    pagination::Pagination,
};
use crate::auth::{Authenticator, api_key::KeyLookupAuthenticator, token::TokenAuthenticator};
use crate::cache::CacheStore;
use crate::config::CorsOrigin;
use crate::db::handlers::Repository;
use crate::db::models::{api_keys, balances as balance_table, nfts as nft_table};
use crate::errors::Error;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{any::Any, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, error, info, instrument};

/// One repository per table, built once at start-up
#[derive(Debug, Clone)]
pub struct Repositories {
    pub balances: Repository,
    pub nfts: Repository,
    pub api_keys: Repository,
}

impl Repositories {
    pub fn new(cache: &CacheStore) -> Self {
        Self {
            balances: Repository::new(balance_table::table(), cache),
            nfts: Repository::new(nft_table::table(), cache),
            api_keys: Repository::new(api_keys::table(), cache),
        }
    }
}

/// Application state shared across all request handlers.
///
/// Everything a handler reaches for is constructed once and injected here; nothing is looked up
/// from globals.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .repos(Repositories::new(&cache))
///     .cache(cache)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Disconnected when no cache is configured or reachable
    pub cache: CacheStore,
    pub repos: Repositories,
    /// Present only when a signing key is configured
    pub tokens: Option<Arc<TokenAuthenticator>>,
}

/// Get the repogate database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect the pool described by `config.database` and run migrations
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let url = config.database.connection_url()?;
    let settings = &config.database.pool;
    info!("Connecting to database at {}", types::mask_url(&url));

    let mut options = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs));
    if settings.idle_timeout_secs > 0 {
        options = options.idle_timeout(Duration::from_secs(settings.idle_timeout_secs));
    }
    if settings.max_lifetime_secs > 0 {
        options = options.max_lifetime(Duration::from_secs(settings.max_lifetime_secs));
    }

    let pool = options.connect(&url).await?;
    migrator().run(&pool).await?;
    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;
    let allow_origin = if cors_config.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::with_capacity(cors_config.allowed_origins.len());
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(vec![http::header::CONTENT_TYPE]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

async fn route_not_found() -> Error {
    Error::not_found()
}

async fn method_not_allowed() -> Error {
    Error::method_not_allowed()
}

/// Rendered in place of a handler that panicked
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!("Handler panicked: {detail}");
    Error::internal().into_response()
}

/// Build the router: every route wrapped in the request pipeline, plus the envelope-rendering
/// fallbacks, panic recovery, CORS and request tracing.
///
/// The `/auth` routes are mounted only when `state.tokens` is set.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let api_keys: Arc<dyn Authenticator> = Arc::new(KeyLookupAuthenticator::new(
        state.repos.api_keys.clone(),
        state.config.auth.accepted_roles.clone(),
    ));

    let mut router = Router::new()
        .route("/health_check", get(Endpoint::new(health::health_check).into_handler()))
        .route(
            "/balance",
            get(Endpoint::new(balances::get_balance).query::<GetBalance>().into_handler())
                .post(Endpoint::new(balances::change_balance).body::<ChangeBalance>().into_handler()),
        )
        .route(
            "/balances",
            get(Endpoint::new(balances::list_balances)
                .authenticate(Arc::clone(&api_keys))
                .allow_roles(["admin"])
                .query::<Pagination>()
                .into_handler()),
        )
        .route(
            "/nft",
            get(Endpoint::new(nfts::show_nft).query::<ShowNft>().into_handler())
                .post(Endpoint::new(nfts::add_nft).body::<AddNft>().into_handler()),
        );

    if let Some(tokens) = &state.tokens {
        let bearer: Arc<dyn Authenticator> = tokens.clone();
        let auth_routes = Router::new()
            .route(
                "/token",
                post(Endpoint::new(auth_handlers::issue_token).authenticate(api_keys).into_handler()),
            )
            .route(
                "/refresh",
                post(Endpoint::new(auth_handlers::refresh_token).body::<RefreshRequest>().into_handler()),
            )
            .route("/me", get(Endpoint::new(auth_handlers::me).authenticate(bearer).into_handler()));
        router = router.nest("/auth", auth_routes);
    }

    let cors_layer = create_cors_layer(&state.config)?;
    let body_limit = DefaultBodyLimit::max(state.config.max_body_size);

    let router = router
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(body_limit)
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Connect the database and cache, run migrations and build the router
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// As [`new`](Self::new), reusing `pool` when given
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        let pool = match pool {
            Some(pool) => {
                migrator().run(&pool).await?;
                pool
            }
            None => setup_database(&config).await?,
        };
        let cache = cache::connect(config.cache.url.as_deref()).await;
        Self::from_parts(config, pool, cache)
    }

    /// Assemble the application from already-connected resources
    pub fn from_parts(config: Config, pool: PgPool, cache: CacheStore) -> anyhow::Result<Self> {
        debug!("Starting repogate with configuration: {:#?}", config);

        let tokens = TokenAuthenticator::from_config(&config.auth)
            .map_err(|e| anyhow::anyhow!("Invalid auth configuration: {}", e.user_message()))?
            .map(Arc::new);
        if tokens.is_none() {
            info!("No auth.secret_key configured, /auth routes are disabled");
        }

        let state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .repos(Repositories::new(&cache))
            .cache(cache)
            .maybe_tokens(tokens)
            .build();
        let router = build_router(state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Serve until `shutdown` resolves, then close the pool and flush telemetry
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("repogate listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
