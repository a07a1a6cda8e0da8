//! Route selection strategies.
//!
//! A strategy is the subclass-specific part of an outbound router: it
//! selects destinations from the registry and drives the dispatcher, while
//! the [`OutboundRouter`] supplies the transactional boundary, property
//! stamping and statistics around it.

use async_trait::async_trait;
use tracing::warn;

use relay_common::{MessageEvent, MessageExchange};

use crate::properties::propagate_session_properties;
use crate::router::OutboundRouter;
use crate::Result;

/// The route-selection-and-dispatch sequence executed as the unit of work of
/// one `process` call.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    async fn route(
        &self,
        router: &OutboundRouter,
        event: &MessageEvent,
    ) -> Result<Option<MessageEvent>>;
}

/// Dispatches to every registered route in order and aggregates the replies
/// through the router's results aggregator. The first failing leg aborts
/// the remaining legs and surfaces its failure.
#[derive(Debug, Default)]
pub struct MulticastStrategy;

#[async_trait]
impl RoutingStrategy for MulticastStrategy {
    async fn route(
        &self,
        router: &OutboundRouter,
        event: &MessageEvent,
    ) -> Result<Option<MessageEvent>> {
        let routes = router.routes();
        if routes.is_empty() {
            return Err(router.routing_failure(
                event.id().to_string(),
                None,
                anyhow::anyhow!("no routes configured"),
            ));
        }

        let await_reply = event.exchange() == MessageExchange::RequestResponse;
        let mut replies = Vec::with_capacity(routes.len());
        for route in routes.iter() {
            let mut envelope = event.envelope().for_dispatch();
            propagate_session_properties(event.envelope(), &mut envelope);
            let reply = router.send_to_route(event, envelope, route, await_reply).await?;
            replies.push(reply);
        }

        Ok(router.aggregator().aggregate(replies, event))
    }
}

/// Tries each registered route in order and returns the first successful
/// reply; legs that fail are logged and skipped. Every leg failing is a
/// routing failure carrying the last leg's cause.
#[derive(Debug, Default)]
pub struct FirstSuccessfulStrategy;

#[async_trait]
impl RoutingStrategy for FirstSuccessfulStrategy {
    async fn route(
        &self,
        router: &OutboundRouter,
        event: &MessageEvent,
    ) -> Result<Option<MessageEvent>> {
        let routes = router.routes();
        if routes.is_empty() {
            return Err(router.routing_failure(
                event.id().to_string(),
                None,
                anyhow::anyhow!("no routes configured"),
            ));
        }

        let await_reply = event.exchange() == MessageExchange::RequestResponse;
        let mut last_failure = None;
        for route in routes.iter() {
            let mut envelope = event.envelope().for_dispatch();
            propagate_session_properties(event.envelope(), &mut envelope);
            match router.send_to_route(event, envelope, route, await_reply).await {
                Ok(reply) => return Ok(reply),
                Err(failure) => {
                    warn!(
                        route = route.name(),
                        error = %failure,
                        "Route failed, trying the next one"
                    );
                    last_failure = Some(failure);
                }
            }
        }

        let cause = match last_failure {
            Some(failure) => anyhow::Error::new(failure).context("all routes failed"),
            None => anyhow::anyhow!("all routes failed"),
        };
        Err(router.routing_failure(event.id().to_string(), None, cause))
    }
}
