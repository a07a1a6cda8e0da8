//! Outbound router: the transactional facade around route selection and
//! dispatch.
//!
//! `OutboundRouter` owns the route registry, the dispatch configuration and
//! the dispatcher (`send_to_route`); the selection sequence itself is
//! supplied by a [`RoutingStrategy`](crate::strategy::RoutingStrategy) and
//! runs as the unit of work inside the configured transactional boundary.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use relay_common::{
    truncate_for_log, CorrelationMode, FlowContext, MessageEnvelope, MessageEvent,
};

use crate::aggregator::{LastResultAggregator, ResultsAggregator};
use crate::error::{RouteError, RouterError};
use crate::properties;
use crate::registry::{RegistryState, RouteRegistry};
use crate::route::Route;
use crate::router_metrics;
use crate::stats::RouterStatistics;
use crate::strategy::RoutingStrategy;
use crate::transaction::{TransactionConfig, TransactionTemplate};
use crate::Result;

/// Characters of payload kept in trace previews.
const PAYLOAD_PREVIEW_CHARS: usize = 100;

/// Dispatch configuration, immutable once the router is initialized.
#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    /// Address destinations should send asynchronous replies to.
    pub reply_to: Option<String>,
    /// Whether outgoing messages are stamped with a correlation id.
    pub correlation_mode: CorrelationMode,
}

pub struct OutboundRouter {
    flow: Arc<FlowContext>,
    registry: RouteRegistry,
    settings: RwLock<RouterSettings>,
    transaction_config: RwLock<Option<TransactionConfig>>,
    statistics: RwLock<Option<Arc<RouterStatistics>>>,
    aggregator: RwLock<Arc<dyn ResultsAggregator>>,
    strategy: Arc<dyn RoutingStrategy>,
}

impl OutboundRouter {
    pub fn new(flow: Arc<FlowContext>, strategy: Arc<dyn RoutingStrategy>) -> Self {
        Self {
            flow,
            registry: RouteRegistry::new(),
            settings: RwLock::new(RouterSettings::default()),
            transaction_config: RwLock::new(None),
            statistics: RwLock::new(None),
            aggregator: RwLock::new(Arc::new(LastResultAggregator)),
            strategy,
        }
    }

    pub fn flow(&self) -> &Arc<FlowContext> {
        &self.flow
    }

    // ------------------------------------------------------------------
    // Route set
    // ------------------------------------------------------------------

    pub fn routes(&self) -> Arc<Vec<Arc<dyn Route>>> {
        self.registry.routes()
    }

    pub fn find_route(&self, name: &str) -> Option<Arc<dyn Route>> {
        self.registry.find_route(name)
    }

    pub async fn add_route(&self, route: Arc<dyn Route>) -> Result<()> {
        self.registry.add_route(route).await
    }

    pub async fn remove_route(&self, route: &Arc<dyn Route>) -> Result<()> {
        self.registry.remove_route(route).await
    }

    pub async fn set_routes(&self, routes: Vec<Arc<dyn Route>>) -> Result<()> {
        self.registry.set_routes(routes).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn state(&self) -> RegistryState {
        self.registry.state()
    }

    pub async fn initialize(&self) -> Result<()> {
        self.registry.initialize(Arc::clone(&self.flow)).await
    }

    pub async fn start(&self) -> Result<()> {
        self.registry.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.registry.stop().await
    }

    pub async fn dispose(&self) -> Result<()> {
        self.registry.dispose().await
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn reply_to(&self) -> Option<String> {
        self.settings.read().reply_to.clone()
    }

    pub fn set_reply_to(&self, reply_to: Option<String>) -> Result<()> {
        self.ensure_configurable()?;
        self.settings.write().reply_to = reply_to;
        Ok(())
    }

    pub fn correlation_mode(&self) -> CorrelationMode {
        self.settings.read().correlation_mode
    }

    pub fn set_correlation_mode(&self, mode: CorrelationMode) -> Result<()> {
        self.ensure_configurable()?;
        self.settings.write().correlation_mode = mode;
        Ok(())
    }

    /// Parse and set the correlation mode from its configuration string.
    pub fn set_correlation_mode_str(&self, mode: &str) -> Result<()> {
        let mode = mode
            .parse::<CorrelationMode>()
            .map_err(|error| RouterError::Config(error.to_string()))?;
        self.set_correlation_mode(mode)
    }

    pub fn transaction_config(&self) -> Option<TransactionConfig> {
        self.transaction_config.read().clone()
    }

    pub fn set_transaction_config(&self, config: Option<TransactionConfig>) -> Result<()> {
        self.ensure_configurable()?;
        *self.transaction_config.write() = config;
        Ok(())
    }

    pub fn statistics(&self) -> Option<Arc<RouterStatistics>> {
        self.statistics.read().clone()
    }

    /// Attach or detach the externally owned statistics counter. Unlike the
    /// dispatch configuration this may change at any time; monitoring is
    /// wired independently of the router's lifecycle.
    pub fn set_statistics(&self, statistics: Option<Arc<RouterStatistics>>) {
        *self.statistics.write() = statistics;
    }

    pub fn aggregator(&self) -> Arc<dyn ResultsAggregator> {
        Arc::clone(&self.aggregator.read())
    }

    pub fn set_aggregator(&self, aggregator: Arc<dyn ResultsAggregator>) {
        *self.aggregator.write() = aggregator;
    }

    fn ensure_configurable(&self) -> Result<()> {
        let state = self.state();
        if state.is_disposed() {
            return Err(RouterError::AlreadyDisposed);
        }
        if state.is_initialized() {
            return Err(RouterError::Config(
                "router configuration cannot change after initialization".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// Route one inbound event: run the routing strategy as the unit of work
    /// inside the configured transactional boundary, committing on success
    /// and rolling back on failure.
    ///
    /// Typed dispatch/routing failures from the unit of work propagate
    /// unchanged; anything else is wrapped into a single routing failure
    /// carrying the event id, this router's flow and the original cause.
    pub async fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>> {
        let event_id = event.id().to_string();
        let template = TransactionTemplate::new(self.transaction_config());
        let outcome = template
            .execute(async {
                self.strategy
                    .route(self, &event)
                    .await
                    .map_err(anyhow::Error::new)
            })
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(error) => match error.downcast::<RouterError>() {
                Ok(typed @ (RouterError::Dispatch { .. } | RouterError::Routing { .. })) => {
                    Err(typed)
                }
                Ok(other) => Err(self.routing_failure(event_id, None, anyhow::Error::new(other))),
                Err(foreign) => Err(self.routing_failure(event_id, None, foreign)),
            },
        }
    }

    /// Dispatch one prepared envelope to one destination, optionally
    /// awaiting its in-band reply.
    ///
    /// A reply-to configuration demotes `await_reply` to fire-and-forget:
    /// replies travel out-of-band, so blocking for an in-band one would
    /// deadlock that path. Statistics are incremented only after a verified
    /// successful send.
    pub async fn send_to_route(
        &self,
        event: &MessageEvent,
        mut envelope: MessageEnvelope,
        route: &Arc<dyn Route>,
        mut await_reply: bool,
    ) -> Result<Option<MessageEvent>> {
        let settings = self.settings.read().clone();
        if await_reply && settings.reply_to.is_some() {
            debug!(
                route = route.name(),
                "Event was dispatched synchronously, but a reply-to route is set, using \
                 fire-and-forget dispatch"
            );
            await_reply = false;
        }

        let flow = Arc::clone(event.session().flow());
        properties::apply_dispatch_properties(
            settings.reply_to.as_deref(),
            settings.correlation_mode,
            &flow,
            &mut envelope,
            route.as_ref(),
        );

        if let Some(address) = route.address() {
            debug!(route = route.name(), address = %address, "Message being sent");
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(
                route = route.name(),
                payload = %preview_payload(&envelope),
                "Request payload"
            );
        }

        let mut outbound = event.for_dispatch(envelope, route.address());
        if await_reply {
            if let Some(timeout_ms) = outbound.envelope().timeout_millis() {
                if timeout_ms >= 0 {
                    outbound.set_timeout(Duration::from_millis(timeout_ms as u64));
                }
            }
        }

        let dispatch_started = Instant::now();
        let reply = match route.accept(outbound).await {
            Ok(reply) => reply,
            Err(RouteError::Rejected(reason)) => {
                router_metrics::record_dispatch_failed(route.name());
                return Err(RouterError::Dispatch {
                    route: route.name().to_string(),
                    event_id: event.id().to_string(),
                    source: anyhow::anyhow!(reason),
                });
            }
            Err(RouteError::Other(cause)) => {
                router_metrics::record_dispatch_failed(route.name());
                return Err(self.routing_failure(event.id().to_string(), None, cause));
            }
        };

        if let Some(statistics) = self.statistics() {
            statistics.increment_routed(route.name());
        }
        router_metrics::record_route_dispatched(route.name(), await_reply);
        router_metrics::record_dispatch_latency(route.name(), dispatch_started.elapsed());

        if let Some(reply) = &reply {
            if tracing::enabled!(tracing::Level::TRACE) {
                trace!(
                    route = route.name(),
                    payload = %preview_payload(reply.envelope()),
                    "Response payload"
                );
            }
        }

        Ok(reply)
    }

    pub(crate) fn routing_failure(
        &self,
        event_id: String,
        route: Option<String>,
        source: anyhow::Error,
    ) -> RouterError {
        RouterError::Routing {
            router: self.flow.name().to_string(),
            event_id,
            route,
            source,
        }
    }
}

/// Bounded payload rendering for trace logs. Rendering failures never reach
/// the dispatch path; they are replaced with a placeholder.
fn preview_payload(envelope: &MessageEnvelope) -> String {
    match envelope.payload_preview() {
        Ok(preview) => truncate_for_log(&preview, PAYLOAD_PREVIEW_CHARS),
        Err(error) => format!("(unable to render payload: {error})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::MulticastStrategy;
    use serde_json::json;

    fn router() -> OutboundRouter {
        OutboundRouter::new(
            Arc::new(FlowContext::new("config-test")),
            Arc::new(MulticastStrategy),
        )
    }

    #[tokio::test]
    async fn configuration_is_rejected_after_initialization() {
        let router = router();
        router.set_reply_to(Some("queue://replies".into())).unwrap();
        router.set_correlation_mode(CorrelationMode::Always).unwrap();

        router.initialize().await.unwrap();

        assert!(matches!(
            router.set_reply_to(None),
            Err(RouterError::Config(_))
        ));
        assert!(matches!(
            router.set_correlation_mode(CorrelationMode::Never),
            Err(RouterError::Config(_))
        ));
        assert!(matches!(
            router.set_transaction_config(None),
            Err(RouterError::Config(_))
        ));
        // The settings made before initialization survive.
        assert_eq!(router.reply_to().as_deref(), Some("queue://replies"));
        assert_eq!(router.correlation_mode(), CorrelationMode::Always);
    }

    #[test]
    fn correlation_mode_string_must_be_recognised() {
        let router = router();
        router.set_correlation_mode_str("NEVER").unwrap();
        assert_eq!(router.correlation_mode(), CorrelationMode::Never);

        let err = router.set_correlation_mode_str("OCCASIONALLY").unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn payload_preview_is_bounded() {
        let envelope = MessageEnvelope::new(json!("x".repeat(500)));
        let preview = preview_payload(&envelope);
        assert!(preview.len() < 150);
        assert!(preview.contains("chars total"));
    }
}
