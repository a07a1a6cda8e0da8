//! Per-dispatch message metadata: session property propagation and
//! reply-to/correlation stamping.

use serde_json::Value;
use tracing::debug;

use relay_common::{
    CorrelationMode, FlowContext, MessageEnvelope, PROPERTY_REPLY_TO_REQUESTER,
    SESSION_PROPERTIES,
};

use crate::route::Route;

/// Copy the well-known session properties from the inbound scope of `source`
/// to the outbound scope of `target`, in their fixed order, wherever the
/// inbound value is present. Missing keys are skipped; the target's outbound
/// scope is fresh per dispatch, so nothing caller-set is overwritten.
pub fn propagate_session_properties(source: &MessageEnvelope, target: &mut MessageEnvelope) {
    for key in SESSION_PROPERTIES {
        if let Some(value) = source.inbound.get(*key) {
            target.set_outbound_property(*key, value.clone());
        }
    }
}

/// Stamp per-dispatch properties on an outbound envelope: the configured
/// reply-to address (plus the requesting flow's name, so asynchronous replies
/// can be routed back) and a correlation id per the configured mode.
///
/// Correlation ids are derived through the flow's message-info mapping;
/// failures there do not occur in-band (the mapping is infallible by
/// contract), but any derived value is assigned verbatim.
pub fn apply_dispatch_properties(
    reply_to: Option<&str>,
    mode: CorrelationMode,
    flow: &FlowContext,
    envelope: &mut MessageEnvelope,
    route: &dyn Route,
) {
    if let Some(reply_to) = reply_to {
        envelope.set_reply_to(reply_to);
        envelope.set_outbound_property(
            PROPERTY_REPLY_TO_REQUESTER,
            Value::String(flow.name().to_string()),
        );
        if let Some(address) = route.address() {
            debug!(reply_to, route = %address, "Set reply-to for outbound route");
        }
    }

    if mode == CorrelationMode::Never {
        return;
    }

    match envelope.correlation_id() {
        Some(existing) if mode == CorrelationMode::IfNotSet => {
            debug!(correlation_id = %existing, "Correlation id already set, not setting it again");
            return;
        }
        Some(existing) => {
            debug!(
                correlation_id = %existing,
                "Correlation id already set, router is configured to overwrite it"
            );
        }
        None => {
            debug!("No correlation id set on the message, deriving a new one");
        }
    }

    let correlation = flow.info_mapping().correlation_id(envelope);
    debug!(
        correlation_id = %correlation,
        route = route.name(),
        "Stamping correlation id on outbound message"
    );
    envelope.set_correlation_id(correlation);
}
