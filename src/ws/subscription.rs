//! Two-scope publish/subscribe dispatcher.
//!
//! [`Dispatcher`] keeps handler registries keyed by service name and by
//! `service#object`. A broadcast runs service-scope handlers first, then
//! object-scope handlers, each list in registration order. Every handler
//! call is isolated: an error or panic is reported to the injected
//! [`ErrorReporter`] and the fan-out continues.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::Message;
use crate::domain::message_type::object_key;

/// Handler signature for broadcast messages.
pub type HandlerFn = dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync;

/// Registry a handler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Keyed by service name.
    Service,
    /// Keyed by `service#object`.
    Object,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str("service"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Why a handler invocation failed.
#[derive(Debug)]
pub enum HandlerFailure {
    /// The handler returned an error.
    Error(anyhow::Error),
    /// The handler panicked; the payload message when it was a string.
    Panic(String),
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "handler error: {err:#}"),
            Self::Panic(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}

/// Receives failures of isolated handler invocations.
pub trait ErrorReporter: Send + Sync + fmt::Debug {
    /// Called once per failed handler invocation.
    fn handler_failed(&self, scope: Scope, key: &str, identity: &str, failure: &HandlerFailure);
}

/// Reporter that logs failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn handler_failed(&self, scope: Scope, key: &str, identity: &str, failure: &HandlerFailure) {
        tracing::warn!(%scope, key, identity, %failure, "message handler failed");
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<HandlerFn>,
    identity: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

type Registry = Mutex<HashMap<String, Vec<Registration>>>;

/// Handler registries for both subscription scopes.
#[derive(Debug)]
pub struct Dispatcher {
    services: Registry,
    objects: Registry,
    reporter: Arc<dyn ErrorReporter>,
}

impl Dispatcher {
    /// Creates an empty dispatcher reporting failures to `reporter`.
    #[must_use]
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            reporter,
        }
    }

    /// Registers a handler for every message of `service`.
    ///
    /// Duplicate registrations are kept and fire once each. An empty
    /// `identity` opts out of bulk unregistration.
    pub fn register_service<F>(&self, service: &str, handler: F, identity: impl Into<String>)
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        push(&self.services, service.to_string(), handler, identity.into());
    }

    /// Registers a handler for messages of `service` naming `object`.
    pub fn register_object<F>(
        &self,
        service: &str,
        object: &str,
        handler: F,
        identity: impl Into<String>,
    ) where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        push(&self.objects, object_key(service, object), handler, identity.into());
    }

    /// Removes every registration under `identity` from the service bucket
    /// of `service` and the object bucket of `service#object`.
    ///
    /// Returns the number of removed registrations. An empty identity
    /// removes nothing.
    pub fn unregister(&self, identity: &str, service: &str, object: Option<&str>) -> usize {
        if identity.is_empty() {
            return 0;
        }
        let object_bucket = object_key(service, object.unwrap_or_default());
        remove_identity(&self.services, service, identity)
            + remove_identity(&self.objects, &object_bucket, identity)
    }

    /// Drops the whole service bucket, including anonymous registrations.
    pub fn clear_service(&self, service: &str) -> usize {
        self.services
            .lock()
            .remove(service)
            .map_or(0, |bucket| bucket.len())
    }

    /// Drops the whole `service#object` bucket.
    pub fn clear_object(&self, service: &str, object: &str) -> usize {
        self.objects
            .lock()
            .remove(&object_key(service, object))
            .map_or(0, |bucket| bucket.len())
    }

    /// Drops every registration in both scopes.
    pub fn clear(&self) {
        self.services.lock().clear();
        self.objects.lock().clear();
    }

    /// Number of registrations under `key` in `scope`.
    #[must_use]
    pub fn handler_count(&self, scope: Scope, key: &str) -> usize {
        let registry = match scope {
            Scope::Service => &self.services,
            Scope::Object => &self.objects,
        };
        registry.lock().get(key).map_or(0, Vec::len)
    }

    /// Fans `message` out to the service scope and, when the message names
    /// an object, to the object scope.
    ///
    /// Returns the number of handlers that completed without failure.
    pub fn broadcast(&self, message: &Message) -> usize {
        let service = message.service();
        let mut delivered = self.fan_out(Scope::Service, &self.services, service, message);
        if let Some(key) = message.message_type.object_scope_key() {
            delivered += self.fan_out(Scope::Object, &self.objects, &key, message);
        }
        delivered
    }

    fn fan_out(&self, scope: Scope, registry: &Registry, key: &str, message: &Message) -> usize {
        // Snapshot so handlers may (un)register without deadlocking.
        let handlers = registry.lock().get(key).cloned().unwrap_or_default();
        let mut delivered = 0;
        for registration in &handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (registration.handler)(message)));
            let failure = match outcome {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(err)) => HandlerFailure::Error(err),
                Err(payload) => HandlerFailure::Panic(panic_message(payload.as_ref())),
            };
            self.reporter
                .handler_failed(scope, key, &registration.identity, &failure);
        }
        delivered
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Arc::new(TracingReporter))
    }
}

fn push<F>(registry: &Registry, key: String, handler: F, identity: String)
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    registry.lock().entry(key).or_default().push(Registration {
        handler: Arc::new(handler),
        identity,
    });
}

fn remove_identity(registry: &Registry, key: &str, identity: &str) -> usize {
    let mut map = registry.lock();
    let Some(bucket) = map.get_mut(key) else {
        return 0;
    };
    let before = bucket.len();
    bucket.retain(|r| r.identity != identity);
    before - bucket.len()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingReporter {
        failures: AtomicUsize,
    }

    impl ErrorReporter for CountingReporter {
        fn handler_failed(&self, _: Scope, _: &str, _: &str, _: &HandlerFailure) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &str,
    ) -> impl Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        move |msg: &Message| {
            log.lock().push(format!("{tag}:{}", msg.message_type));
            Ok(())
        }
    }

    #[test]
    fn service_scope_receives_all_events_of_service() {
        let dispatcher = Dispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register_service("Users", recorder(&log, "svc"), "a");

        dispatcher.broadcast(&Message::new("Users#Profile#Updated", Value::Null));
        dispatcher.broadcast(&Message::new("Users", Value::Null));
        dispatcher.broadcast(&Message::new("Orders", Value::Null));

        assert_eq!(
            *log.lock(),
            vec!["svc:Users#Profile#Updated".to_string(), "svc:Users".to_string()]
        );
    }

    #[test]
    fn object_scope_requires_object() {
        let dispatcher = Dispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register_object("Users", "", recorder(&log, "empty"), "a");
        dispatcher.register_object("Users", "Profile", recorder(&log, "obj"), "a");

        dispatcher.broadcast(&Message::new("Users", Value::Null));
        dispatcher.broadcast(&Message::new("Users#Profile#Updated", Value::Null));

        assert_eq!(*log.lock(), vec!["obj:Users#Profile#Updated".to_string()]);
    }

    #[test]
    fn service_scope_runs_before_object_scope() {
        let dispatcher = Dispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register_object("Users", "Profile", recorder(&log, "obj"), "");
        dispatcher.register_service("Users", recorder(&log, "svc1"), "");
        dispatcher.register_service("Users", recorder(&log, "svc2"), "");

        let delivered = dispatcher.broadcast(&Message::new("Users#Profile", Value::Null));

        assert_eq!(delivered, 3);
        let tags: Vec<String> = log
            .lock()
            .iter()
            .filter_map(|entry| entry.split(':').next().map(str::to_string))
            .collect();
        assert_eq!(tags, vec!["svc1", "svc2", "obj"]);
    }

    #[test]
    fn failing_handler_does_not_stop_fan_out() {
        let reporter = Arc::new(CountingReporter::default());
        let dispatcher = Dispatcher::new(Arc::clone(&reporter) as Arc<dyn ErrorReporter>);
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register_service("Users", |_: &Message| anyhow::bail!("boom"), "bad");
        dispatcher.register_service("Users", recorder(&log, "second"), "good");
        dispatcher.register_object("Users", "Profile", recorder(&log, "obj"), "good");

        let delivered = dispatcher.broadcast(&Message::new("Users#Profile", Value::Null));

        assert_eq!(delivered, 2);
        assert_eq!(log.lock().len(), 2);
        assert_eq!(reporter.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let reporter = Arc::new(CountingReporter::default());
        let dispatcher = Dispatcher::new(Arc::clone(&reporter) as Arc<dyn ErrorReporter>);
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register_service("Users", |_: &Message| panic!("handler exploded"), "bad");
        dispatcher.register_service("Users", recorder(&log, "after"), "good");

        assert_eq!(dispatcher.broadcast(&Message::new("Users", Value::Null)), 1);
        assert_eq!(log.lock().len(), 1);
        assert_eq!(reporter.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_removes_every_registration_of_identity() {
        let dispatcher = Dispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            dispatcher.register_service("Users", recorder(&log, "x"), "X");
        }
        dispatcher.register_object("Users", "Profile", recorder(&log, "x"), "X");
        dispatcher.register_service("Users", recorder(&log, "y"), "Y");

        let removed = dispatcher.unregister("X", "Users", Some("Profile"));

        assert_eq!(removed, 4);
        assert_eq!(dispatcher.handler_count(Scope::Service, "Users"), 1);
        assert_eq!(dispatcher.handler_count(Scope::Object, "Users#Profile"), 0);
        dispatcher.broadcast(&Message::new("Users#Profile", Value::Null));
        assert_eq!(*log.lock(), vec!["y:Users#Profile".to_string()]);
    }

    #[test]
    fn empty_identity_cannot_be_bulk_unregistered() {
        let dispatcher = Dispatcher::default();
        dispatcher.register_service("Users", |_: &Message| Ok(()), "");
        assert_eq!(dispatcher.unregister("", "Users", None), 0);
        assert_eq!(dispatcher.handler_count(Scope::Service, "Users"), 1);
        assert_eq!(dispatcher.clear_service("Users"), 1);
        assert_eq!(dispatcher.handler_count(Scope::Service, "Users"), 0);
    }

    #[test]
    fn handler_may_register_during_broadcast() {
        let dispatcher = Arc::new(Dispatcher::default());
        let inner = Arc::clone(&dispatcher);
        dispatcher.register_service(
            "Users",
            move |_: &Message| {
                inner.register_service("Users", |_: &Message| Ok(()), "late");
                Ok(())
            },
            "",
        );
        assert_eq!(dispatcher.broadcast(&Message::new("Users", Value::Null)), 1);
        assert_eq!(dispatcher.handler_count(Scope::Service, "Users"), 2);
    }
}
