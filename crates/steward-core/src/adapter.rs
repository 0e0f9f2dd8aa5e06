//! The boundary to remote service clients.
//!
//! Concrete clients (HTTP webhooks, browser sessions, SDKs) implement
//! [`Adapter`]. The core only sees [`AdapterError`] and the JSON value a
//! successful call returns.

use crate::config::Config;
use crate::http_adapter::HttpAdapter;
use crate::remediation::FailureType;
use crate::resource::{LazyResource, ResourceState};
use crate::retry::{text_signals_rate_limit, RateLimitSignal};
use crate::schema::{OperationSpec, Server};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// Errors that make every later call to the same adapter pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Unavailable(_))
    }

    /// Map to the remediation taxonomy. `None` means the failure is not an
    /// infrastructure problem a human checklist would help with.
    pub fn failure_type(&self) -> Option<FailureType> {
        if self.is_rate_limited() {
            return Some(FailureType::RateLimit);
        }
        match self {
            AdapterError::Http { status, .. } if *status == 401 || *status == 403 => {
                Some(FailureType::AuthFailure)
            }
            AdapterError::Http { status, .. } if *status >= 500 => Some(FailureType::ServerError),
            AdapterError::Permission(_) => Some(FailureType::AuthFailure),
            AdapterError::Timeout(_) | AdapterError::Unavailable(_) => {
                Some(FailureType::ConnectionTimeout)
            }
            _ => None,
        }
    }
}

impl RateLimitSignal for AdapterError {
    fn is_rate_limited(&self) -> bool {
        match self {
            AdapterError::Http { status: 429, .. } => true,
            AdapterError::Http { message, .. } | AdapterError::Other(message) => {
                text_signals_rate_limit(message)
            }
            // Permission errors never retry, whatever their text says.
            AdapterError::Permission(_) => false,
            AdapterError::Timeout(_) | AdapterError::Unavailable(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub trait Adapter: Send {
    /// Perform one validated operation.
    fn invoke(
        &mut self,
        spec: &OperationSpec,
        params: &Map<String, Value>,
    ) -> Result<Value, AdapterError>;

    /// Release the underlying session. Called once on shutdown.
    fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Hands out adapters by server name.
pub trait AdapterProvider {
    fn adapter(&mut self, server: Server) -> Result<&mut dyn Adapter, AdapterError>;
}

// ---------------------------------------------------------------------------
// AdapterPool
// ---------------------------------------------------------------------------

type AdapterSlot = LazyResource<Box<dyn Adapter>>;

/// One lazily-constructed adapter per server.
#[derive(Default)]
pub struct AdapterPool {
    slots: BTreeMap<Server, AdapterSlot>,
}

impl AdapterPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register HTTP adapters for every server named under `adapters:`.
    pub fn from_config(config: &Config) -> Self {
        let mut pool = Self::new();
        for server in Server::all() {
            if let Some(endpoint) = config.adapter(*server) {
                let endpoint = endpoint.clone();
                let server = *server;
                pool.register(server, move || {
                    HttpAdapter::connect(server, &endpoint)
                        .map(|a| Box::new(a) as Box<dyn Adapter>)
                });
            }
        }
        pool
    }

    pub fn register<F>(&mut self, server: Server, factory: F)
    where
        F: FnMut() -> Result<Box<dyn Adapter>, AdapterError> + Send + 'static,
    {
        self.slots
            .insert(server, LazyResource::new(server.as_str(), factory));
    }

    pub fn state(&self, server: Server) -> Option<ResourceState> {
        self.slots.get(&server).map(|slot| slot.state())
    }

    /// Close every constructed adapter. Safe to call more than once.
    pub fn close_all(&mut self) {
        for (server, slot) in self.slots.iter_mut() {
            slot.close_with(|mut adapter| {
                if let Err(e) = adapter.close() {
                    warn!(server = %server, error = %e, "adapter close failed");
                }
            });
        }
    }
}

impl AdapterProvider for AdapterPool {
    fn adapter(&mut self, server: Server) -> Result<&mut dyn Adapter, AdapterError> {
        let slot = self.slots.get_mut(&server).ok_or_else(|| {
            AdapterError::Unavailable(format!("no adapter configured for {server}"))
        })?;
        let adapter = slot.get()?;
        Ok(adapter.as_mut())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
