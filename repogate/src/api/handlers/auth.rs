//! HTTP handlers for bearer-token exchange.
//!
//! Mounted under `/auth` only when a signing key is configured.

use tracing::instrument;

use crate::api::executor::RequestContext;
use crate::api::models::{auth::{AccessToken, RefreshRequest}, response::Reply};
use crate::api::validation::NoParams;
use crate::auth::token::TokenAuthenticator;
use crate::errors::{Error, Result};
use crate::AppState;

fn tokens(state: &AppState) -> Result<&TokenAuthenticator> {
    state.tokens.as_deref().ok_or_else(Error::not_found)
}

/// Exchange an API key (checked by the pipeline) for a token pair
#[instrument(skip_all)]
pub async fn issue_token(ctx: RequestContext) -> Result<Reply> {
    let principal = ctx.principal.ok_or_else(Error::forbidden)?;
    Reply::data(tokens(&ctx.state)?.issue(&principal)?)
}

#[instrument(skip_all)]
pub async fn refresh_token(ctx: RequestContext<NoParams, NoParams, RefreshRequest>) -> Result<Reply> {
    let token = tokens(&ctx.state)?.refresh(&ctx.body.refresh_token)?;
    Reply::data(AccessToken { token })
}

/// The principal carried by the bearer token
pub async fn me(ctx: RequestContext) -> Result<Reply> {
    Reply::data(ctx.principal)
}
