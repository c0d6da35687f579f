//! HTTP handlers for NFTs held by an address.

use serde_json::json;
use tracing::instrument;

use crate::api::executor::RequestContext;
use crate::api::models::{
    nfts::{AddNft, ShowNft},
    response::Reply,
};
use crate::api::validation::NoParams;
use crate::db::handlers::FindOptions;
use crate::errors::{Error, Result};
use crate::types::{Filter, Record};

const NFT_COLUMNS: [&str; 3] = ["address", "nft_id", "base_url"];

/// Register an NFT and drop the address's cached listing
#[instrument(skip_all, fields(address = %ctx.body.address))]
pub async fn add_nft(mut ctx: RequestContext<NoParams, NoParams, AddNft>) -> Result<Reply> {
    let nfts = &ctx.state.repos.nfts;
    let AddNft { address, nft_id, base_url } = ctx.body;

    let mut record = Record::new();
    record.insert("address".to_string(), json!(address));
    record.insert("nft_id".to_string(), json!(nft_id));
    record.insert("base_url".to_string(), json!(base_url));
    nfts.insert(&mut ctx.session, record).await?;

    nfts.invalidate(&Filter::new().with("address", address)).await;
    Reply::data("success")
}

/// The NFTs of one address, cached per address
#[instrument(skip_all, fields(address = %ctx.query.address))]
pub async fn show_nft(mut ctx: RequestContext<ShowNft>) -> Result<Reply> {
    let options = FindOptions::builder()
        .projection(NFT_COLUMNS.iter().map(|c| c.to_string()).collect())
        .from_cache(true)
        .cache_on_success(true)
        .hash_field_key("address")
        .build();
    let filter = Filter::new().with("address", ctx.query.address.as_str());

    let nfts = ctx.state.repos.nfts.find(&mut ctx.session, filter, &options).await?;
    if nfts.is_empty() {
        return Err(Error::not_found().with_details("Not found address"));
    }
    Reply::data(nfts)
}

#[cfg(test)]
mod tests {
    use crate::cache::{CacheStore, MemoryBackend};
    use crate::test_utils::{create_test_app, create_test_app_with_cache};
    use axum::http::StatusCode;
    use axum_test::multipart::MultipartForm;
    use serde_json::{Value, json};
    use sqlx::PgPool;
    use std::sync::Arc;

    #[sqlx::test]
    #[test_log::test]
    async fn test_add_and_show_nfts(pool: PgPool) {
        let cache = CacheStore::new(Arc::new(MemoryBackend::new()));
        let app = create_test_app_with_cache(pool, cache).await;

        app.post("/nft")
            .json(&json!({"address": "abc", "nft_id": "1", "base_url": "https://meta.example/1"}))
            .await
            .assert_status_ok();

        let body: Value = app.get("/nft").add_query_param("address", "abc").await.json();
        assert_eq!(body["data"], json!([{"address": "abc", "nft_id": "1", "base_url": "https://meta.example/1"}]));

        // Multipart bodies are accepted too; the new row must not be hidden by the cached listing
        let form = MultipartForm::new()
            .add_text("address", "abc")
            .add_text("nft_id", "2")
            .add_text("base_url", "https://meta.example/2");
        app.post("/nft").multipart(form).await.assert_status_ok();

        let body: Value = app.get("/nft").add_query_param("address", "abc").await.json();
        let ids: Vec<_> = body["data"].as_array().unwrap().iter().map(|nft| nft["nft_id"].clone()).collect();
        assert_eq!(ids, vec![json!("1"), json!("2")]);
    }

    #[sqlx::test]
    async fn test_address_without_nfts_is_not_found(pool: PgPool) {
        let app = create_test_app(pool).await;

        let response = app.get("/nft").add_query_param("address", "empty").await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["code"], "100");
    }

    #[sqlx::test]
    async fn test_invalid_base_url_is_a_format_error(pool: PgPool) {
        let app = create_test_app(pool).await;

        let response = app
            .post("/nft")
            .json(&json!({"address": "abc", "nft_id": "1", "base_url": "not a url"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["errors"], json!({"base_url": "must be an absolute URL"}));
    }
}
