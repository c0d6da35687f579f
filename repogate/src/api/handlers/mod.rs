//! HTTP request handlers.
//!
//! Each handler takes the [`RequestContext`](crate::api::executor::RequestContext) the request
//! pipeline resolved for it and returns a [`Reply`](crate::api::models::response::Reply). Routes
//! and the inputs each handler declares are wired up in [`crate::build_router`].

pub mod auth;
pub mod balances;
pub mod health;
pub mod nfts;
