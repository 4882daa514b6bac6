//! Config variants and live source instances.
//!
//! Every backend provides two types:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`SourceConfig`] | Decoded, immutable connection parameters for one configured source |
//! | [`Source`] | The verified, connected instance produced from that config |
//!
//! [`SourceConfig::initialize`] builds client handles, applies defaults for
//! unset optional fields, and issues exactly one non-mutating verification
//! call. A source that fails verification is never returned.
//!
//! # Example Implementation
//!
//! ```rust,ignore
//! impl SourceConfig for MyConfig {
//!     fn name(&self) -> &str { &self.name }
//!     fn kind(&self) -> &str { "my-backend" }
//!     fn to_document(&self) -> serde_json::Value { to_document(self, "my-backend") }
//!     fn initialize<'a>(
//!         self: Arc<Self>,
//!         ctx: &'a InitContext,
//!     ) -> BoxFuture<'a, Result<Arc<dyn Source>, SourceError>> {
//!         Box::pin(async move {
//!             let executor = RequestExecutor::new(ctx.http_client(), &self.base_url);
//!             executor.probe("/health", ctx.cancellation()).await.map_err(|e| {
//!                 SourceError::connection(self.name(), self.kind(), e)
//!             })?;
//!             Ok(Arc::new(MySource { config: self, executor }) as Arc<dyn Source>)
//!         })
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SourceError;
use crate::http_client::{HttpClient, ReqwestHttpClient};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared inputs for source construction.
///
/// The bootstrap id is the trace context recorded on every construction span.
#[derive(Clone)]
pub struct InitContext {
    http_client: Arc<dyn HttpClient>,
    cancel: CancellationToken,
    bootstrap_id: Uuid,
}

impl InitContext {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            cancel: CancellationToken::new(),
            bootstrap_id: Uuid::new_v4(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn http_client(&self) -> Arc<dyn HttpClient> {
        Arc::clone(&self.http_client)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub const fn bootstrap_id(&self) -> Uuid {
        self.bootstrap_id
    }
}

impl Default for InitContext {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()))
    }
}

impl Debug for InitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitContext")
            .field("bootstrap_id", &self.bootstrap_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Decoded configuration of one source. Immutable after decode.
pub trait SourceConfig: Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Always equals the registry key the config was decoded under.
    fn kind(&self) -> &str;

    /// Serializable form of the config, including `kind`.
    fn to_document(&self) -> serde_json::Value;

    /// Connects and verifies. Failure leaves nothing behind.
    fn initialize<'a>(
        self: Arc<Self>,
        ctx: &'a InitContext,
    ) -> BoxFuture<'a, Result<Arc<dyn Source>, SourceError>>;
}

/// A live, verified handle to one configured backend.
///
/// Handles are shared read-only by concurrent callers.
pub trait Source: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    /// The configuration this source was built from.
    fn to_config(&self) -> Arc<dyn SourceConfig>;

    /// Releases client handles. Safe to call any number of times.
    fn close(&self) -> Result<(), SourceError>;

    fn is_closed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl dyn Source {
    /// Borrows the concrete backend behind a source handle.
    pub fn downcast_ref<T: Source>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Closes a source that may never have been constructed.
pub fn close_source(source: Option<&Arc<dyn Source>>) -> Result<(), SourceError> {
    match source {
        Some(source) => source.close(),
        None => Ok(()),
    }
}

/// Serializes a config and stamps its kind, for [`SourceConfig::to_document`].
pub fn to_document<T: Serialize>(config: &T, kind: &str) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            String::from("kind"),
            serde_json::Value::String(kind.to_owned()),
        );
    }
    value
}
