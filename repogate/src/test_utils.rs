//! Test utilities: configs, app state and servers wired the same way as production.

use crate::auth::token::TokenAuthenticator;
use crate::cache::CacheStore;
use crate::config::{Config, CorsConfig, CorsOrigin};
use crate::{AppState, Application, Repositories};
use axum_test::TestServer;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        trace_errors: true,
        cors: CorsConfig {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: None,
        },
        ..Default::default()
    };
    config.auth.secret_key = Some("test-secret-key-for-testing-only".to_string());
    config
}

/// A pool that never connects until used; for tests that must not touch the database
pub fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://localhost/unused")
        .expect("Failed to create lazy pool")
}

pub fn create_test_state(pool: PgPool, config: Config) -> AppState {
    let cache = CacheStore::disconnected();
    let tokens = TokenAuthenticator::from_config(&config.auth)
        .expect("Invalid test auth config")
        .map(Arc::new);
    AppState::builder()
        .db(pool)
        .config(config)
        .repos(Repositories::new(&cache))
        .cache(cache)
        .maybe_tokens(tokens)
        .build()
}

/// The full router over `pool`, without a cache
pub async fn create_test_app(pool: PgPool) -> TestServer {
    create_test_app_with_cache(pool, CacheStore::disconnected()).await
}

pub async fn create_test_app_with_cache(pool: PgPool, cache: CacheStore) -> TestServer {
    Application::from_parts(create_test_config(), pool, cache)
        .expect("Failed to create application")
        .into_test_server()
}

pub async fn seed_api_key(pool: &PgPool, key: &str, role: &str) {
    sqlx::query("INSERT INTO api_keys (name, api_key, role) VALUES ($1, $2, $3)")
        .bind(format!("{role} key"))
        .bind(key)
        .bind(role)
        .execute(pool)
        .await
        .expect("Failed to seed API key");
}
