//! The request pipeline wrapped around every API handler.
//!
//! An [`Endpoint`] declares what a handler needs: an optional [`Authenticator`], the roles it
//! admits, and the [`Schema`] types of its query string, path parameters and body. Converted
//! with [`Endpoint::into_handler`], it runs these steps in order and stops at the first failure:
//!
//! 1. authenticate (when an authenticator is set)
//! 2. check the principal's role (when roles narrower than `ALL` are set)
//! 3. decode and validate the query string
//! 4. decode and validate the path parameters
//! 5. decode and validate the body (`application/json` or `multipart/form-data`)
//! 6. call the handler with a [`RequestContext`] holding exactly the resolved inputs
//! 7. wrap [`Reply::Data`] in the success envelope, or pass [`Reply::Raw`] through
//!
//! Every error raised on the way is rendered through [`Error`]'s `IntoResponse`.
//!
//! ```ignore
//! Router::new().route(
//!     "/balance",
//!     get(Endpoint::new(balances::get_balance).query::<GetBalance>().into_handler()),
//! )
//! ```

use axum::{
    body::{Body, to_bytes},
    extract::{FromRequest, FromRequestParts, Multipart, RawPathParams, Request, State},
    http::{header::CONTENT_TYPE, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::{collections::HashSet, marker::PhantomData, pin::Pin, sync::Arc};
use tracing::{Level, error, warn};

use crate::AppState;
use crate::api::models::response::{Reply, ResponseCode};
use crate::api::validation::{self, NoParams, ROOT_FIELD, Schema};
use crate::auth::{Authenticator, Principal};
use crate::db::Session;
use crate::errors::{Error, Result};
use crate::types::Record;

/// Role list that disables the role check
pub const ALL_ROLES: &str = "ALL";

/// Everything a handler may read, resolved before it is called
pub struct RequestContext<Q = NoParams, P = NoParams, B = NoParams> {
    pub state: AppState,
    /// The request's own session; the authenticator has already used it
    pub session: Session,
    /// Set when the endpoint authenticates
    pub principal: Option<Principal>,
    pub query: Q,
    pub path: P,
    pub body: B,
}

pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

pub struct Endpoint<H, Q = NoParams, P = NoParams, B = NoParams> {
    handler: H,
    authenticator: Option<Arc<dyn Authenticator>>,
    allowed_roles: Option<HashSet<String>>,
    trace_errors: Option<bool>,
    _inputs: PhantomData<fn() -> (Q, P, B)>,
}

impl<H> Endpoint<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            authenticator: None,
            allowed_roles: None,
            trace_errors: None,
            _inputs: PhantomData,
        }
    }
}

impl<H, Q, P, B> Endpoint<H, Q, P, B> {
    fn with_inputs<Q2, P2, B2>(self) -> Endpoint<H, Q2, P2, B2> {
        Endpoint {
            handler: self.handler,
            authenticator: self.authenticator,
            allowed_roles: self.allowed_roles,
            trace_errors: self.trace_errors,
            _inputs: PhantomData,
        }
    }

    pub fn authenticate(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Admit only principals whose `role` is listed. A list containing `ALL` (or an empty list)
    /// admits everyone.
    pub fn allow_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: HashSet<String> = roles.into_iter().map(Into::into).collect();
        self.allowed_roles = (!roles.is_empty() && !roles.contains(ALL_ROLES)).then_some(roles);
        self
    }

    /// Override the configured `trace_errors` for this endpoint
    pub fn trace_errors(mut self, enabled: bool) -> Self {
        self.trace_errors = Some(enabled);
        self
    }

    pub fn query<T: Schema>(self) -> Endpoint<H, T, P, B> {
        self.with_inputs()
    }

    pub fn path<T: Schema>(self) -> Endpoint<H, Q, T, B> {
        self.with_inputs()
    }

    pub fn body<T: Schema>(self) -> Endpoint<H, Q, P, T> {
        self.with_inputs()
    }
}

fn permission_denied() -> Error {
    Error::bad_request()
        .with_code(ResponseCode::Forbidden)
        .with_message("Permission denied")
}

fn data_required() -> Error {
    Error::fail_format(Value::String("data is required".to_string()))
}

fn unreadable_body(e: impl std::fmt::Display) -> Error {
    let mut errors = Record::new();
    errors.insert(ROOT_FIELD.to_string(), Value::String(e.to_string()));
    Error::fail_format(errors)
}

async fn decode_path<T: Schema>(parts: &mut Parts, state: &AppState) -> Result<T> {
    let params = RawPathParams::from_request_parts(parts, state)
        .await
        .map_err(|rejection| unreadable_body(rejection.body_text()))?;
    validation::from_pairs(params.iter())
}

/// Multipart text fields become strings and file parts become byte arrays
async fn multipart_fields(mut multipart: Multipart) -> Result<Record> {
    let mut fields = Record::new();
    while let Some(field) = multipart.next_field().await.map_err(unreadable_body)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let value = if field.file_name().is_some() {
            let bytes = field.bytes().await.map_err(unreadable_body)?;
            Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
        } else {
            Value::String(field.text().await.map_err(unreadable_body)?)
        };
        fields.insert(name, value);
    }
    Ok(fields)
}

async fn decode_body<T: Schema>(request: Request<Body>, state: &AppState) -> Result<T> {
    let Some(content_type) = request.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return Err(data_required());
    };
    let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

    match mime.as_str() {
        "application/json" => {
            let bytes = to_bytes(request.into_body(), state.config.max_body_size)
                .await
                .map_err(unreadable_body)?;
            validation::from_json_slice(&bytes)
        }
        "multipart/form-data" => {
            let multipart = Multipart::from_request(request, state)
                .await
                .map_err(|rejection| unreadable_body(rejection.body_text()))?;
            validation::from_value(Value::Object(multipart_fields(multipart).await?))
        }
        _ => Err(data_required()),
    }
}

/// Unidentified and server-side failures are always logged; the rest only with `trace_errors`
fn failure_level(err: &Error, trace_errors: bool) -> Option<Level> {
    if !err.is_declared() || err.status_code().is_server_error() {
        Some(Level::ERROR)
    } else if trace_errors {
        Some(Level::WARN)
    } else {
        None
    }
}

impl<H, Fut, Q, P, B> Endpoint<H, Q, P, B>
where
    H: Fn(RequestContext<Q, P, B>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
    Q: Schema,
    P: Schema,
    B: Schema,
{
    async fn execute(&self, state: AppState, request: Request) -> Result<Reply> {
        let (mut parts, body) = request.into_parts();
        let mut session = Session::new(state.db.clone());

        let principal = match &self.authenticator {
            Some(authenticator) => Some(authenticator.validate(&parts.headers, &mut session).await?),
            None => None,
        };

        if let Some(allowed) = &self.allowed_roles {
            let role = principal.as_ref().and_then(Principal::role);
            if !role.is_some_and(|role| allowed.contains(role)) {
                warn!(role = ?role, "Role not permitted on this endpoint");
                return Err(permission_denied());
            }
        }

        let query = match Q::undeclared() {
            Some(query) => query,
            None => validation::from_urlencoded(parts.uri.query().unwrap_or_default())?,
        };

        let path = match P::undeclared() {
            Some(path) => path,
            None => decode_path(&mut parts, &state).await?,
        };

        let body = match B::undeclared() {
            Some(body) => body,
            None => decode_body(Request::from_parts(parts, body), &state).await?,
        };

        let context = RequestContext {
            state,
            session,
            principal,
            query,
            path,
            body,
        };
        (self.handler)(context).await
    }

    async fn run(&self, state: AppState, request: Request) -> Response {
        let trace_errors = self.trace_errors.unwrap_or(state.config.trace_errors);
        let method = request.method().clone();
        let uri = request.uri().path().to_string();

        match self.execute(state, request).await {
            Ok(reply) => reply.into_response(),
            Err(err) => {
                match failure_level(&err, trace_errors) {
                    Some(level) if level == Level::ERROR => {
                        error!(%method, uri, status = %err.status_code(), code = %err.code(), "Request failed: {err:#}");
                    }
                    Some(_) => {
                        warn!(%method, uri, status = %err.status_code(), code = %err.code(), "Request failed: {err}");
                    }
                    None => {}
                }
                err.into_response()
            }
        }
    }

    /// Turn the endpoint into an axum handler for a `Router<AppState>`
    pub fn into_handler(self) -> impl Fn(State<AppState>, Request) -> ResponseFuture + Clone + Send + Sync + 'static {
        let endpoint = Arc::new(self);
        move |State(state): State<AppState>, request: Request| {
            let endpoint = Arc::clone(&endpoint);
            Box::pin(async move { endpoint.run(state, request).await }) as ResponseFuture
        }
    }
}
