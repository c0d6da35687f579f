//! API layer for HTTP request handling and data models.
//!
//! - **[`executor`]**: the request pipeline every route runs through
//! - **[`validation`]**: decoding and validation of declared request inputs
//! - **[`handlers`]**: the route handlers
//! - **[`models`]**: request/response data structures, including the response envelope
//!
//! # Routes
//!
//! - `GET /health_check`
//! - `GET /balance?address=`, `POST /balance`
//! - `GET /balances?skip=&limit=` (API key with the `admin` role)
//! - `GET /nft?address=`, `POST /nft`
//! - `POST /auth/token`, `POST /auth/refresh`, `GET /auth/me` (only with a signing key)

pub mod executor;
pub mod handlers;
pub mod models;
pub mod validation;
