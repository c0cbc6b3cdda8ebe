//! HTTP binding for the dispatcher.
//!
//! [`CrudRouter`] mounts one model's CRUD operations under a route prefix:
//!
//! ```text
//! GET    {prefix}/{id}                      get
//! GET    {prefix}?field=&value=&opr=        get_many
//! POST   {prefix}                           create (object) or create_many (array)
//! PUT    {prefix}/{id}  |  PUT    {prefix}  put / put_many
//! PATCH  {prefix}/{id}  |  PATCH  {prefix}  patch / patch_many
//! DELETE {prefix}/{id}  |  DELETE {prefix}  delete / delete_many (array of ids)
//! ```
//!
//! [`CrudApp`] collects several routers and ties their backends' lifecycle
//! to the server: every backend is started before the listener accepts, and
//! stopped after graceful shutdown.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{CrudError, CrudResult, ValidationError};
use crate::filter::{Filter, FilterOp};
use crate::model::{CrudModel, Patch, Record, RecordId};
use crate::storage::AsyncStorage;

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind, see [`CrudError::kind`].
    pub error: String,
    pub message: String,
}

impl CrudError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InvalidOperator { .. } | Self::Serialization { .. } => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CrudError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        } else {
            debug!(error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Answer to a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub uid: RecordId,
    pub deleted: bool,
}

impl Deleted {
    fn of<T>(record: &Record<T>) -> Self {
        Self {
            uid: record.uid,
            deleted: true,
        }
    }
}

/// Query string of `GET {prefix}`.
#[derive(Debug, Default, Deserialize)]
struct FilterQuery {
    field: Option<String>,
    value: Option<String>,
    opr: Option<String>,
}

impl FilterQuery {
    fn into_filter(self) -> CrudResult<Filter> {
        let field = self.field.ok_or_else(|| ValidationError::MissingField {
            field: "field".to_string(),
        })?;
        let op = match self.opr {
            Some(opr) => opr.parse()?,
            None => FilterOp::default(),
        };
        Ok(Filter::new(field, self.value.unwrap_or_default(), op))
    }
}

/// Malformed JSON is a serialization error; well-formed JSON of the wrong
/// shape is a validation error.
fn parse_body<B: DeserializeOwned>(body: &[u8]) -> CrudResult<B> {
    serde_json::from_slice(body).map_err(|e| {
        if e.is_data() {
            ValidationError::InvalidRecord {
                reason: e.to_string(),
            }
            .into()
        } else {
            CrudError::from(e)
        }
    })
}

fn parse_id(raw: &str) -> CrudResult<RecordId> {
    Ok(raw.parse()?)
}

/// `{ "uid": ... }` as one object or an array of them.
#[derive(Debug)]
enum OneOrMany<R> {
    One(R),
    Many(Vec<R>),
}

fn parse_one_or_many<R: DeserializeOwned>(body: &[u8]) -> CrudResult<OneOrMany<R>> {
    let value: serde_json::Value = parse_body(body)?;
    let shape = |e: serde_json::Error| -> CrudError {
        ValidationError::InvalidRecord {
            reason: e.to_string(),
        }
        .into()
    };
    if value.is_array() {
        serde_json::from_value(value).map(OneOrMany::Many).map_err(shape)
    } else {
        serde_json::from_value(value).map(OneOrMany::One).map_err(shape)
    }
}

async fn get_one<T, S>(
    State(crud): State<Dispatcher<T, S>>,
    Path(id): Path<String>,
) -> CrudResult<Json<Record<T>>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    Ok(Json(crud.get(parse_id(&id)?).await?))
}

async fn get_many<T, S>(
    State(crud): State<Dispatcher<T, S>>,
    query: Result<Query<FilterQuery>, QueryRejection>,
) -> CrudResult<Json<Vec<Record<T>>>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    let Query(query) = query.map_err(|rejection| ValidationError::InvalidQuery {
        reason: rejection.body_text(),
    })?;
    let filter = query.into_filter()?;
    Ok(Json(crud.get_many(&filter).await?))
}

async fn create<T, S>(State(crud): State<Dispatcher<T, S>>, body: Bytes) -> CrudResult<Response>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    let response = match parse_one_or_many::<Record<T>>(&body)? {
        OneOrMany::One(record) => (StatusCode::CREATED, Json(crud.create(record).await?)).into_response(),
        OneOrMany::Many(records) => {
            (StatusCode::CREATED, Json(crud.create_many(records).await?)).into_response()
        }
    };
    Ok(response)
}

async fn put_one<T, S>(
    State(crud): State<Dispatcher<T, S>>,
    Path(id): Path<String>,
    body: Bytes,
) -> CrudResult<Json<Record<T>>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    let id = parse_id(&id)?;
    Ok(Json(crud.put(id, parse_body(&body)?).await?))
}

async fn put_many<T, S>(State(crud): State<Dispatcher<T, S>>, body: Bytes) -> CrudResult<Json<Vec<Record<T>>>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    Ok(Json(crud.put_many(parse_body(&body)?).await?))
}

async fn patch_one<T, S>(
    State(crud): State<Dispatcher<T, S>>,
    Path(id): Path<String>,
    body: Bytes,
) -> CrudResult<Json<Record<T>>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    let id = parse_id(&id)?;
    let patch: Patch = parse_body(&body)?;
    Ok(Json(crud.patch(id, patch).await?))
}

async fn patch_many<T, S>(State(crud): State<Dispatcher<T, S>>, body: Bytes) -> CrudResult<Json<Vec<Record<T>>>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    Ok(Json(crud.patch_many(parse_body(&body)?).await?))
}

async fn delete_one<T, S>(State(crud): State<Dispatcher<T, S>>, Path(id): Path<String>) -> CrudResult<Json<Deleted>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    let removed = crud.delete(parse_id(&id)?).await?;
    Ok(Json(Deleted::of(&removed)))
}

async fn delete_many<T, S>(State(crud): State<Dispatcher<T, S>>, body: Bytes) -> CrudResult<Json<Vec<Deleted>>>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    let ids: Vec<RecordId> = parse_body(&body)?;
    let removed = crud.delete_many(ids).await?;
    Ok(Json(removed.iter().map(Deleted::of).collect()))
}

/// Normalizes a route prefix to `/segment[/segment..]`, or `/` for the root.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    format!("/{trimmed}")
}

/// CRUD routes for one model.
///
/// # Examples
///
/// ```
/// use fastcrud::http::CrudRouter;
/// use fastcrud::{Dispatcher, Document, MemoryStorage};
///
/// let crud = Dispatcher::blocking(MemoryStorage::<Document>::new());
/// let routes = CrudRouter::new(crud).with_prefix("/api/docs");
/// assert_eq!(routes.prefix(), "/api/docs");
/// let _app: axum::Router = routes.into_router();
/// ```
pub struct CrudRouter<T, S> {
    dispatcher: Dispatcher<T, S>,
    prefix: String,
}

impl<T, S> std::fmt::Debug for CrudRouter<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudRouter")
            .field("prefix", &self.prefix)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl<T, S> CrudRouter<T, S>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    /// Routes under `/` + the model's lowercase name.
    #[must_use]
    pub fn new(dispatcher: Dispatcher<T, S>) -> Self {
        Self {
            dispatcher,
            prefix: normalize_prefix(&T::collection()),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<T, S> {
        &self.dispatcher
    }

    /// Builds the axum router. Lifecycle is not attached; see [`CrudApp`].
    pub fn into_router(self) -> Router {
        let routes = Router::new()
            .route(
                "/",
                get(get_many::<T, S>)
                    .post(create::<T, S>)
                    .put(put_many::<T, S>)
                    .patch(patch_many::<T, S>)
                    .delete(delete_many::<T, S>),
            )
            .route(
                "/{id}",
                get(get_one::<T, S>)
                    .put(put_one::<T, S>)
                    .patch(patch_one::<T, S>)
                    .delete(delete_one::<T, S>),
            )
            .with_state(self.dispatcher);

        // axum refuses to nest at the root.
        if self.prefix == "/" {
            routes
        } else {
            Router::new().nest(&self.prefix, routes)
        }
    }
}

/// Build the HTTP router for one dispatcher under its default prefix.
pub fn build_router<T, S>(dispatcher: Dispatcher<T, S>) -> Router
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    CrudRouter::new(dispatcher).into_router()
}

/// Start/stop hooks of a mounted backend, with the model type erased.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Route prefix or other label used in logs.
    fn name(&self) -> &str;

    async fn start(&self) -> CrudResult<()>;

    async fn stop(&self) -> CrudResult<()>;
}

struct Mounted<T, S> {
    prefix: String,
    dispatcher: Dispatcher<T, S>,
}

#[async_trait]
impl<T, S> Lifecycle for Mounted<T, S>
where
    T: CrudModel,
    S: AsyncStorage<T> + 'static,
{
    fn name(&self) -> &str {
        &self.prefix
    }

    async fn start(&self) -> CrudResult<()> {
        self.dispatcher.start().await
    }

    async fn stop(&self) -> CrudResult<()> {
        self.dispatcher.stop().await
    }
}

/// Errors from [`CrudApp::serve`].
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Backend lifecycle failed: {0}")]
    Backend(#[from] CrudError),

    #[error("HTTP server failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Several [`CrudRouter`]s served together, with backend lifecycle.
#[derive(Default)]
pub struct CrudApp {
    router: Router,
    hooks: Vec<Arc<dyn Lifecycle>>,
}

impl std::fmt::Debug for CrudApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mounted: Vec<&str> = self.hooks.iter().map(|h| h.name()).collect();
        f.debug_struct("CrudApp").field("mounted", &mounted).finish()
    }
}

impl CrudApp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model's routes and registers its backend for start/stop.
    #[must_use]
    pub fn mount<T, S>(mut self, routes: CrudRouter<T, S>) -> Self
    where
        T: CrudModel,
        S: AsyncStorage<T> + 'static,
    {
        self.hooks.push(Arc::new(Mounted {
            prefix: routes.prefix().to_string(),
            dispatcher: routes.dispatcher().clone(),
        }));
        self.router = self.router.merge(routes.into_router());
        self
    }

    /// Adds routes that have no backend lifecycle.
    #[must_use]
    pub fn merge(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// The combined router, without lifecycle.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Starts every mounted backend in mount order.
    ///
    /// If one fails, those already started are stopped again before the
    /// error is returned.
    pub async fn start(&self) -> CrudResult<()> {
        for (started, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.start().await {
                error!(backend = hook.name(), error = %e, "backend failed to start");
                for earlier in self.hooks[..started].iter().rev() {
                    if let Err(stop_err) = earlier.stop().await {
                        warn!(backend = earlier.name(), error = %stop_err, "backend failed to stop");
                    }
                }
                return Err(e);
            }
            info!(backend = hook.name(), "backend started");
        }
        Ok(())
    }

    /// Stops every mounted backend in reverse mount order.
    ///
    /// All backends are asked to stop; the first error is returned.
    pub async fn stop(&self) -> CrudResult<()> {
        let mut first_err = None;
        for hook in self.hooks.iter().rev() {
            match hook.stop().await {
                Ok(()) => info!(backend = hook.name(), "backend stopped"),
                Err(e) => {
                    warn!(backend = hook.name(), error = %e, "backend failed to stop");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Starts the backends, serves until `shutdown` resolves, then stops them.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start().await?;
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "HTTP server listening");
        }

        let served = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown)
            .await;
        let stopped = self.stop().await;

        served?;
        stopped?;
        Ok(())
    }
}
