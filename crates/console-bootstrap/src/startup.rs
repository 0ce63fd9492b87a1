//! Process startup hook.

use console_events::{DiscoveryListener, EventPublisher, ListenerGuard, ListenerHandle};
use tracing::{debug, warn};

/// Declare the event topology, then start the discovery listener.
///
/// Safe to call from several initialization paths: the topology declaration
/// is idempotent and `guard` lets only the first call start a listener.
/// A broker that is down at startup is not fatal; the listener keeps
/// reconnecting in the background.
pub async fn startup(
    publisher: &EventPublisher,
    listener: &DiscoveryListener,
    guard: &ListenerGuard,
) -> Option<ListenerHandle> {
    match publisher.declare_topology().await {
        Some(channel) => {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Failed to close topology connection");
            }
        }
        None => warn!("Starting without a declared event topology"),
    }

    listener.start(guard)
}
