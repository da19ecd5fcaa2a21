//! In-process event dispatch.
//!
//! Handlers register against an `EventKind`. A handler registered for a kind
//! receives events of that kind and of every kind below it in the hierarchy.
//! The routing table is computed once by `DispatcherBuilder::build`, so
//! dispatch is a single map lookup followed by an ordered walk.
//!
//! Dispatch is synchronous. The first failing handler stops the walk and its
//! error is returned to the caller; later handlers are not invoked.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::event::{DomainEvent, EventKind};

pub mod handlers;

pub use handlers::AccountCreatedLogHandler;

/// Error type handlers return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A local reaction to domain events.
pub trait EventHandler: Send + Sync {
    /// Name used in logs and in `HandlerError`.
    fn name(&self) -> &str;

    /// React to one event.
    fn handle(&self, event: &DomainEvent) -> Result<(), BoxError>;
}

/// A handler failed while processing an event.
#[derive(Debug, thiserror::Error)]
#[error("Handler '{handler}' failed: {source}")]
pub struct HandlerError {
    pub handler: String,
    #[source]
    pub source: BoxError,
}

/// Adapter that lets a closure act as an `EventHandler`.
struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&DomainEvent) -> Result<(), BoxError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), BoxError> {
        (self.f)(event)
    }
}

/// Collects handler registrations in order.
#[derive(Default)]
pub struct DispatcherBuilder {
    registrations: Vec<(EventKind, Arc<dyn EventHandler>)>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events assignable to `kind`.
    pub fn register(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.registrations.push((kind, handler));
        self
    }

    /// Register a closure as a named handler.
    pub fn register_fn<F>(self, kind: EventKind, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&DomainEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let handler = FnHandler {
            name: name.into(),
            f,
        };
        self.register(kind, Arc::new(handler))
    }

    /// Precompute the handler list for every event kind.
    pub fn build(self) -> EventDispatcher {
        let routes = EventKind::ALL
            .iter()
            .map(|&kind| {
                let matching = self
                    .registrations
                    .iter()
                    .filter(|(registered, _)| registered.accepts(kind))
                    .map(|(_, handler)| Arc::clone(handler))
                    .collect();
                (kind, matching)
            })
            .collect();

        EventDispatcher { routes }
    }
}

/// Routes events to local handlers.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    routes: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Handlers that receive events of `kind`, in invocation order.
    pub fn handlers_for(&self, kind: EventKind) -> &[Arc<dyn EventHandler>] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Deliver `event` to every matching handler, stopping at the first error.
    pub fn dispatch(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        for handler in self.handlers_for(event.kind()) {
            handler.handle(event).map_err(|source| HandlerError {
                handler: handler.name().to_string(),
                source,
            })?;
            debug!(
                handler = handler.name(),
                event_id = %event.event_id(),
                "Handler completed"
            );
        }
        Ok(())
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            let names: Vec<&str> = self.handlers_for(kind).iter().map(|h| h.name()).collect();
            map.entry(&kind, &names);
        }
        map.finish()
    }
}
