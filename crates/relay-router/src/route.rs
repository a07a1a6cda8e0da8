//! Destination capability traits.
//!
//! A route is anything able to accept a dispatched message and optionally
//! return a reply. Address and lifecycle support are optional capabilities
//! discovered through query methods that return absent when unsupported, so
//! plain handler destinations implement nothing beyond `accept`.

use async_trait::async_trait;
use relay_common::{EndpointAddress, FlowContext, MessageEvent};

use crate::error::RouteError;

/// A target the router can dispatch a message event to.
#[async_trait]
pub trait Route: Send + Sync {
    /// Identity used in logs, statistics and failures.
    fn name(&self) -> &str;

    /// Accept a message event, returning the in-band reply when one is
    /// produced. Fire-and-forget destinations return `None`.
    async fn accept(&self, event: MessageEvent) -> Result<Option<MessageEvent>, RouteError>;

    /// Identifying address, when this is a network-style destination.
    fn address(&self) -> Option<EndpointAddress> {
        None
    }

    /// Lifecycle hooks, when this destination manages resources.
    fn lifecycle(&self) -> Option<&dyn RouteLifecycle> {
        None
    }
}

/// Optional lifecycle capability of a route.
///
/// Each hook is independently implementable; the defaults do nothing, so a
/// route may care about any subset of its lifecycle.
#[async_trait]
pub trait RouteLifecycle: Send + Sync {
    /// Wire shared context and prepare resources. Called before the route
    /// becomes visible to dispatch.
    async fn initialize(&self, _flow: &FlowContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
