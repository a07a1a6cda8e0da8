//! Relay Outbound Routing Engine
//!
//! This crate provides the outbound message-routing core with:
//! - OutboundRouter: transactional facade around route selection and dispatch
//! - RouteRegistry: ordered, concurrently readable route set with lifecycle fan-out
//! - RoutingStrategy: pluggable selection sequences (multicast, first-successful)
//! - Route / RouteLifecycle: destination capability traits
//! - ResultsAggregator: combining per-destination replies into one result
//! - TransactionTemplate: begin/commit/rollback boundary around the unit of work
//! - RouterStatistics: per-destination dispatch counters
//! - router_metrics: dispatch counters/latency through the `metrics` facade

pub mod aggregator;
pub mod error;
pub mod properties;
pub mod registry;
pub mod route;
pub mod router;
pub mod router_metrics;
pub mod stats;
pub mod strategy;
pub mod transaction;

pub use aggregator::{CollectListAggregator, LastResultAggregator, ResultsAggregator};
pub use error::{LifecyclePhase, RouteError, RouterError};
pub use registry::{RegistryState, RouteRegistry};
pub use route::{Route, RouteLifecycle};
pub use router::{OutboundRouter, RouterSettings};
pub use stats::RouterStatistics;
pub use strategy::{FirstSuccessfulStrategy, MulticastStrategy, RoutingStrategy};
pub use transaction::{
    Transaction, TransactionAction, TransactionConfig, TransactionFactory, TransactionTemplate,
};

pub type Result<T> = std::result::Result<T, RouterError>;
