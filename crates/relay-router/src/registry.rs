//! Route registry: an ordered, concurrently readable route set with
//! lifecycle fan-out.
//!
//! Readers take a copy-on-write snapshot and never block; writers (route
//! mutation and lifecycle transitions) are serialized on an async mutex and
//! publish a fresh list in one atomic swap, so an in-flight dispatch sees
//! either the pre- or post-mutation list, never a partially linked route.
//!
//! Lifecycle fan-outs run in registration order and stop at the first
//! failure. Completed transitions on earlier routes are not rolled back; the
//! registry only enters the target state once the whole fan-out succeeds.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use relay_common::FlowContext;

use crate::error::{LifecyclePhase, RouterError};
use crate::route::Route;
use crate::Result;

/// Lifecycle state of the registry and, transitively, of its routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryState {
    #[default]
    Created,
    Initialized,
    Started,
    Stopped,
    Disposed,
}

impl RegistryState {
    /// True once `initialize` has completed, including across restarts.
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized | Self::Started | Self::Stopped)
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

pub struct RouteRegistry {
    routes: RwLock<Arc<Vec<Arc<dyn Route>>>>,
    state: RwLock<RegistryState>,
    flow: RwLock<Option<Arc<FlowContext>>>,
    /// Serializes mutation and lifecycle transitions. Never held by readers.
    mutation: Mutex<()>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Arc::new(Vec::new())),
            state: RwLock::new(RegistryState::Created),
            flow: RwLock::new(None),
            mutation: Mutex::new(()),
        }
    }

    pub fn state(&self) -> RegistryState {
        *self.state.read()
    }

    /// Snapshot of the current route list, in registration order. The
    /// snapshot stays valid for iteration while mutations proceed.
    pub fn routes(&self) -> Arc<Vec<Arc<dyn Route>>> {
        Arc::clone(&self.routes.read())
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Look up an addressable route by name. Plain handler routes are not
    /// matched.
    pub fn find_route(&self, name: &str) -> Option<Arc<dyn Route>> {
        self.routes()
            .iter()
            .find(|route| route.address().is_some() && route.name() == name)
            .cloned()
    }

    /// Replace the full route set. Implemented as clear-then-add-each: a
    /// failure while wiring leaves the registry holding only the routes
    /// added so far, which callers must treat as a fatal configuration
    /// error. Cleared routes are not stopped or disposed; use
    /// [`remove_route`](Self::remove_route) to retire a live route.
    pub async fn set_routes(&self, routes: Vec<Arc<dyn Route>>) -> Result<()> {
        let _guard = self.mutation.lock().await;
        if self.state().is_disposed() {
            return Err(RouterError::AlreadyDisposed);
        }
        *self.routes.write() = Arc::new(Vec::new());
        for route in routes {
            self.wire_and_link(route).await?;
        }
        Ok(())
    }

    /// Add one route. When the registry is already initialized the route is
    /// wired (context injected, initialized, started if the registry is
    /// started) before it becomes visible to dispatch.
    pub async fn add_route(&self, route: Arc<dyn Route>) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.wire_and_link(route).await
    }

    /// Remove one route: stop it if the registry is started, dispose it if
    /// the registry is initialized, then unlink it.
    pub async fn remove_route(&self, route: &Arc<dyn Route>) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let state = self.state();
        if let Some(lifecycle) = route.lifecycle() {
            if state.is_started() {
                lifecycle
                    .stop()
                    .await
                    .map_err(|source| lifecycle_error(LifecyclePhase::Stop, route.as_ref(), source))?;
            }
            if state.is_initialized() {
                lifecycle
                    .dispose()
                    .await
                    .map_err(|source| lifecycle_error(LifecyclePhase::Dispose, route.as_ref(), source))?;
            }
        }
        let removed = {
            let mut routes = self.routes.write();
            let next: Vec<Arc<dyn Route>> = routes
                .iter()
                .filter(|candidate| !Arc::ptr_eq(candidate, route))
                .cloned()
                .collect();
            let removed = next.len() != routes.len();
            *routes = Arc::new(next);
            removed
        };
        debug!(route = route.name(), removed, "Route removed from registry");
        Ok(())
    }

    /// Initialize the registry: wire every registered route with the flow
    /// context, then enter `Initialized`. The first route failure surfaces
    /// and leaves the registry in `Created`; earlier routes keep their
    /// completed initialization.
    pub async fn initialize(&self, flow: Arc<FlowContext>) -> Result<()> {
        let _guard = self.mutation.lock().await;
        match self.state() {
            RegistryState::Created => {}
            RegistryState::Disposed => return Err(RouterError::AlreadyDisposed),
            state => {
                return Err(RouterError::Config(format!(
                    "cannot initialize registry in state {state:?}"
                )))
            }
        }
        *self.flow.write() = Some(Arc::clone(&flow));
        for route in self.routes().iter() {
            if let Some(lifecycle) = route.lifecycle() {
                lifecycle
                    .initialize(&flow)
                    .await
                    .map_err(|source| lifecycle_error(LifecyclePhase::Initialize, route.as_ref(), source))?;
            }
        }
        *self.state.write() = RegistryState::Initialized;
        debug!(flow = flow.name(), routes = self.len(), "Route registry initialized");
        Ok(())
    }

    /// Start every registered route in order, then enter `Started`.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        match self.state() {
            RegistryState::Initialized | RegistryState::Stopped => {}
            RegistryState::Disposed => return Err(RouterError::AlreadyDisposed),
            state => {
                return Err(RouterError::Config(format!(
                    "cannot start registry in state {state:?}"
                )))
            }
        }
        for route in self.routes().iter() {
            if let Some(lifecycle) = route.lifecycle() {
                lifecycle
                    .start()
                    .await
                    .map_err(|source| lifecycle_error(LifecyclePhase::Start, route.as_ref(), source))?;
            }
        }
        *self.state.write() = RegistryState::Started;
        Ok(())
    }

    /// Stop every registered route in order, then enter `Stopped`. The
    /// registry can be started again afterwards.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        match self.state() {
            RegistryState::Started => {}
            RegistryState::Disposed => return Err(RouterError::AlreadyDisposed),
            state => {
                return Err(RouterError::Config(format!(
                    "cannot stop registry in state {state:?}"
                )))
            }
        }
        for route in self.routes().iter() {
            if let Some(lifecycle) = route.lifecycle() {
                lifecycle
                    .stop()
                    .await
                    .map_err(|source| lifecycle_error(LifecyclePhase::Stop, route.as_ref(), source))?;
            }
        }
        *self.state.write() = RegistryState::Stopped;
        Ok(())
    }

    /// Dispose every registered route in order, clear the registry and enter
    /// the terminal `Disposed` state. Idempotent once disposed; any further
    /// mutation fails with [`RouterError::AlreadyDisposed`].
    pub async fn dispose(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        if self.state().is_disposed() {
            return Ok(());
        }
        for route in self.routes().iter() {
            if let Some(lifecycle) = route.lifecycle() {
                lifecycle
                    .dispose()
                    .await
                    .map_err(|source| lifecycle_error(LifecyclePhase::Dispose, route.as_ref(), source))?;
            }
        }
        *self.routes.write() = Arc::new(Vec::new());
        *self.flow.write() = None;
        *self.state.write() = RegistryState::Disposed;
        info!("Route registry disposed");
        Ok(())
    }

    /// Wire a route for the current registry state, then publish it.
    /// Callers hold the mutation guard.
    async fn wire_and_link(&self, route: Arc<dyn Route>) -> Result<()> {
        let state = self.state();
        if state.is_disposed() {
            return Err(RouterError::AlreadyDisposed);
        }
        if let Some(lifecycle) = route.lifecycle() {
            if state.is_initialized() {
                let flow = self.flow.read().clone();
                if let Some(flow) = flow {
                    lifecycle
                        .initialize(&flow)
                        .await
                        .map_err(|source| lifecycle_error(LifecyclePhase::Initialize, route.as_ref(), source))?;
                }
            }
            if state.is_started() {
                lifecycle
                    .start()
                    .await
                    .map_err(|source| lifecycle_error(LifecyclePhase::Start, route.as_ref(), source))?;
            }
        }
        let mut routes = self.routes.write();
        let mut next: Vec<Arc<dyn Route>> = routes.as_ref().clone();
        next.push(Arc::clone(&route));
        *routes = Arc::new(next);
        debug!(route = route.name(), total = routes.len(), "Route added to registry");
        Ok(())
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lifecycle_error(phase: LifecyclePhase, route: &dyn Route, source: anyhow::Error) -> RouterError {
    RouterError::Lifecycle {
        phase,
        route: route.name().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouteError;
    use crate::route::RouteLifecycle;
    use async_trait::async_trait;
    use relay_common::MessageEvent;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct LifecycleRoute {
        name: String,
        initialized: AtomicU32,
        started: AtomicU32,
        stopped: AtomicU32,
        disposed: AtomicU32,
        fail_initialize: bool,
    }

    impl LifecycleRoute {
        fn new(name: &str) -> Arc<Self> {
            Self::build(name, false)
        }

        fn failing_initialize(name: &str) -> Arc<Self> {
            Self::build(name, true)
        }

        fn build(name: &str, fail_initialize: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                initialized: AtomicU32::new(0),
                started: AtomicU32::new(0),
                stopped: AtomicU32::new(0),
                disposed: AtomicU32::new(0),
                fail_initialize,
            })
        }
    }

    #[async_trait]
    impl Route for LifecycleRoute {
        fn name(&self) -> &str {
            &self.name
        }

        async fn accept(
            &self,
            _event: MessageEvent,
        ) -> std::result::Result<Option<MessageEvent>, RouteError> {
            Ok(None)
        }

        fn lifecycle(&self) -> Option<&dyn RouteLifecycle> {
            Some(self)
        }
    }

    #[async_trait]
    impl RouteLifecycle for LifecycleRoute {
        async fn initialize(&self, _flow: &FlowContext) -> anyhow::Result<()> {
            if self.fail_initialize {
                anyhow::bail!("wiring refused");
            }
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn dispose(&self) -> anyhow::Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn flow() -> Arc<FlowContext> {
        Arc::new(FlowContext::new("test-flow"))
    }

    #[tokio::test]
    async fn length_tracks_adds_and_removes() {
        let registry = RouteRegistry::new();
        let a = LifecycleRoute::new("a");
        let b = LifecycleRoute::new("b");

        registry.add_route(a.clone()).await.unwrap();
        registry.add_route(b.clone()).await.unwrap();
        assert_eq!(registry.len(), 2);

        registry.remove_route(&(a as Arc<dyn Route>)).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.routes()[0].name(), "b");
    }

    #[tokio::test]
    async fn routes_added_before_initialize_are_wired_by_the_fanout() {
        let registry = RouteRegistry::new();
        let route = LifecycleRoute::new("a");
        registry.add_route(route.clone()).await.unwrap();
        assert_eq!(route.initialized.load(Ordering::SeqCst), 0);

        registry.initialize(flow()).await.unwrap();
        assert_eq!(route.initialized.load(Ordering::SeqCst), 1);
        assert!(registry.state().is_initialized());
    }

    #[tokio::test]
    async fn routes_added_to_a_started_registry_are_initialized_and_started() {
        let registry = RouteRegistry::new();
        registry.initialize(flow()).await.unwrap();
        registry.start().await.unwrap();

        let route = LifecycleRoute::new("late");
        registry.add_route(route.clone()).await.unwrap();
        assert_eq!(route.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(route.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removal_from_a_started_registry_stops_then_disposes() {
        let registry = RouteRegistry::new();
        let route = LifecycleRoute::new("a");
        registry.add_route(route.clone()).await.unwrap();
        registry.initialize(flow()).await.unwrap();
        registry.start().await.unwrap();

        registry
            .remove_route(&(route.clone() as Arc<dyn Route>))
            .await
            .unwrap();
        assert_eq!(route.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(route.disposed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dispose_clears_and_rejects_further_mutation() {
        let registry = RouteRegistry::new();
        let route = LifecycleRoute::new("a");
        registry.add_route(route.clone()).await.unwrap();
        registry.initialize(flow()).await.unwrap();
        registry.dispose().await.unwrap();

        assert_eq!(route.disposed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(registry.state().is_disposed());

        let err = registry.add_route(LifecycleRoute::new("b")).await.unwrap_err();
        assert!(matches!(err, RouterError::AlreadyDisposed));
    }

    #[tokio::test]
    async fn start_requires_initialization() {
        let registry = RouteRegistry::new();
        let err = registry.start().await.unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[tokio::test]
    async fn stopped_registry_can_restart() {
        let registry = RouteRegistry::new();
        let route = LifecycleRoute::new("a");
        registry.add_route(route.clone()).await.unwrap();
        registry.initialize(flow()).await.unwrap();
        registry.start().await.unwrap();
        registry.stop().await.unwrap();
        registry.start().await.unwrap();

        assert_eq!(route.started.load(Ordering::SeqCst), 2);
        assert_eq!(route.stopped.load(Ordering::SeqCst), 1);
        assert!(registry.state().is_started());
    }

    #[tokio::test]
    async fn initialize_failure_surfaces_and_keeps_earlier_transitions() {
        let registry = RouteRegistry::new();
        let first = LifecycleRoute::new("first");
        let failing = LifecycleRoute::failing_initialize("failing");
        registry.add_route(first.clone()).await.unwrap();
        registry.add_route(failing).await.unwrap();

        let err = registry.initialize(flow()).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Lifecycle {
                phase: LifecyclePhase::Initialize,
                ..
            }
        ));
        // The first route was wired and stays wired; the registry itself
        // never reached Initialized.
        assert_eq!(first.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state(), RegistryState::Created);
    }

    #[tokio::test]
    async fn set_routes_failure_keeps_the_added_prefix() {
        let registry = RouteRegistry::new();
        registry.initialize(flow()).await.unwrap();

        let good = LifecycleRoute::new("good");
        let bad = LifecycleRoute::failing_initialize("bad");
        let never = LifecycleRoute::new("never");
        let err = registry
            .set_routes(vec![good as Arc<dyn Route>, bad, never.clone()])
            .await
            .unwrap_err();

        assert!(matches!(err, RouterError::Lifecycle { .. }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.routes()[0].name(), "good");
        assert_eq!(never.initialized.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn find_route_matches_addressable_routes_only() {
        struct Addressed;

        #[async_trait]
        impl Route for Addressed {
            fn name(&self) -> &str {
                "addressed"
            }

            async fn accept(
                &self,
                _event: MessageEvent,
            ) -> std::result::Result<Option<MessageEvent>, RouteError> {
                Ok(None)
            }

            fn address(&self) -> Option<relay_common::EndpointAddress> {
                Some(relay_common::EndpointAddress::new("tcp://addressed"))
            }
        }

        let registry = RouteRegistry::new();
        registry.add_route(LifecycleRoute::new("plain")).await.unwrap();
        registry.add_route(Arc::new(Addressed)).await.unwrap();

        assert!(registry.find_route("addressed").is_some());
        assert!(registry.find_route("plain").is_none());
    }
}
