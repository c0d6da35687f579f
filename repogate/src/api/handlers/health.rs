//! Liveness check.

use crate::api::executor::RequestContext;
use crate::api::models::response::Reply;
use crate::errors::Result;

pub async fn health_check(_ctx: RequestContext) -> Result<Reply> {
    Reply::data("health check")
}
