//! Recompile policies when they change

use crate::compiler::PolicyCompiler;
use crate::events::{Dispatcher, EventPayload, EventType, Item, ItemChanged};
use crate::subscribers::SubscriberHandle;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Consume `PolicyChanged` events and recompile the affected policy
///
/// Compile failures are logged; the index stays as it was until the next
/// change event for that policy.
pub fn spawn_compile_subscriber(
    dispatcher: &Dispatcher,
    compiler: Arc<PolicyCompiler>,
) -> SubscriberHandle {
    let mut subscription = dispatcher.subscribe(EventType::PolicyChanged);
    let subscription_id = subscription.id();

    let task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match event.payload {
                EventPayload::ItemChanged(ItemChanged {
                    action,
                    item: Item::Policy(policy),
                }) => {
                    debug!("Policy {} changed ({:?}), compiling", policy.id, action);
                    if let Err(e) = compiler.compile_policy(&policy.id).await {
                        error!("Failed to compile policy {}: {}", policy.id, e);
                    }
                }
                EventPayload::ItemChanged(ItemChanged { item, .. }) => {
                    debug!("Ignoring non-policy item {} on {}", item.id(), event.event_type);
                }
                EventPayload::CheckPerformed(_) => {
                    debug!("Ignoring check event on {}", event.event_type);
                }
            }
        }
    });

    info!("compile subscriber started");
    SubscriberHandle::new("compile", EventType::PolicyChanged, subscription_id, task)
}
