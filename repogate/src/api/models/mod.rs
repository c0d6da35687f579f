//! API request and response data models.
//!
//! Request models implement [`Schema`](crate::api::validation::Schema) so the request pipeline
//! can decode and validate them before a handler runs. Numeric fields accept either JSON numbers
//! or their text form, since multipart bodies and query strings only carry text.
//!
//! - [`response`]: the response envelope and the published response codes
//! - [`pagination`]: `skip`/`limit` query parameters and the paged list wrapper
//! - [`balances`]: balance changes and lookups
//! - [`nfts`]: NFT registration and lookups
//! - [`auth`]: token exchange payloads

pub mod auth;
pub mod balances;
pub mod nfts;
pub mod pagination;
pub mod response;
