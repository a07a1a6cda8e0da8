//! Combining per-destination replies into one result event.

use relay_common::MessageEvent;
use serde_json::Value;

/// Combines the optional replies of one routing pass, given in dispatch
/// order, into a single result event. Fire-and-forget legs contribute
/// `None`.
pub trait ResultsAggregator: Send + Sync {
    fn aggregate(
        &self,
        replies: Vec<Option<MessageEvent>>,
        original: &MessageEvent,
    ) -> Option<MessageEvent>;
}

/// Default policy: the last non-absent reply wins.
#[derive(Debug, Default)]
pub struct LastResultAggregator;

impl ResultsAggregator for LastResultAggregator {
    fn aggregate(
        &self,
        replies: Vec<Option<MessageEvent>>,
        _original: &MessageEvent,
    ) -> Option<MessageEvent> {
        replies.into_iter().flatten().last()
    }
}

/// Collects every reply payload into a JSON array on an event derived from
/// the original, preserving dispatch order. Absent replies are skipped; no
/// replies at all yields no result.
#[derive(Debug, Default)]
pub struct CollectListAggregator;

impl ResultsAggregator for CollectListAggregator {
    fn aggregate(
        &self,
        replies: Vec<Option<MessageEvent>>,
        original: &MessageEvent,
    ) -> Option<MessageEvent> {
        let payloads: Vec<Value> = replies
            .into_iter()
            .flatten()
            .map(|reply| reply.into_envelope().payload)
            .collect();
        if payloads.is_empty() {
            return None;
        }
        let mut envelope = original.envelope().for_dispatch();
        envelope.payload = Value::Array(payloads);
        Some(original.for_dispatch(envelope, None))
    }
}
