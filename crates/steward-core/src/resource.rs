//! An owned, lazily-constructed handle to an expensive external resource.
//!
//! Lifecycle: `Uninitialized → Ready → Closed`. A failed construction leaves
//! the handle `Uninitialized` so the next caller tries again; once closed it
//! never reopens.

use crate::adapter::AdapterError;
use serde::Serialize;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Uninitialized,
    Ready,
    Closed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Uninitialized => f.write_str("uninitialized"),
            ResourceState::Ready => f.write_str("ready"),
            ResourceState::Closed => f.write_str("closed"),
        }
    }
}

enum Slot<T> {
    Empty,
    Ready(T),
    Closed,
}

type Factory<T> = Box<dyn FnMut() -> Result<T, AdapterError> + Send>;

pub struct LazyResource<T> {
    name: String,
    factory: Factory<T>,
    slot: Slot<T>,
}

impl<T> LazyResource<T> {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: FnMut() -> Result<T, AdapterError> + Send + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            slot: Slot::Empty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ResourceState {
        match self.slot {
            Slot::Empty => ResourceState::Uninitialized,
            Slot::Ready(_) => ResourceState::Ready,
            Slot::Closed => ResourceState::Closed,
        }
    }

    /// Borrow the resource, constructing it on first use.
    pub fn get(&mut self) -> Result<&mut T, AdapterError> {
        if let Slot::Empty = self.slot {
            let value = (self.factory)()?;
            info!(resource = %self.name, "resource initialized");
            self.slot = Slot::Ready(value);
        }
        match &mut self.slot {
            Slot::Ready(value) => Ok(value),
            Slot::Closed => Err(AdapterError::Unavailable(format!(
                "{} has been closed",
                self.name
            ))),
            Slot::Empty => Err(AdapterError::Unavailable(format!(
                "{} failed to initialize",
                self.name
            ))),
        }
    }

    /// Hand the resource to `release` and mark the handle closed.
    /// A no-op when already closed; never-initialized handles just close.
    pub fn close_with(&mut self, release: impl FnOnce(T)) {
        match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Ready(value) => {
                release(value);
                info!(resource = %self.name, "resource closed");
            }
            Slot::Empty | Slot::Closed => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
