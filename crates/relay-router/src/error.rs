use std::fmt;
use thiserror::Error;

/// Phase of a lifecycle fan-out across the route registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Initialize,
    Start,
    Stop,
    Dispose,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialize => f.write_str("initialize"),
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
            Self::Dispose => f.write_str("dispose"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RouterError {
    /// Invalid or late configuration. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A destination rejected or failed to process a message.
    #[error("Dispatch to route '{route}' failed for event {event_id}: {source}")]
    Dispatch {
        route: String,
        event_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Any other failure during route selection or dispatch, wrapped
    /// uniformly with the original cause preserved. `route` is absent when
    /// the failing destination is unknown.
    #[error("Routing failed in '{router}' for event {event_id}: {source}")]
    Routing {
        router: String,
        event_id: String,
        route: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// One route's lifecycle call failed during fan-out. Earlier routes keep
    /// their completed transitions; the remainder of the fan-out is skipped.
    #[error("Route '{route}' failed to {phase}: {source}")]
    Lifecycle {
        phase: LifecyclePhase,
        route: String,
        #[source]
        source: anyhow::Error,
    },

    /// Mutation attempted after terminal disposal.
    #[error("Router already disposed")]
    AlreadyDisposed,
}

/// Failure reported by a destination while accepting a message.
#[derive(Error, Debug)]
pub enum RouteError {
    /// The destination rejected this particular message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// Anything else; the origin is opaque to the router.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
