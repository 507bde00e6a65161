//! # Pull-mode driver: one fetch loop per queued publisher.
//!
//! [`EventBus::setup_fetch`](crate::EventBus::setup_fetch) walks the
//! publisher registry and spawns a loop for every publisher that carries a
//! queue (`push`) or an async producer (`supply`). Each loop publishes
//! pulled values pinned to its owning publisher and exits on runtime
//! cancellation or when its source drains.

use crate::core::bus::EventBus;

/// Spawns the pull loop for every eligible publisher.
///
/// Idempotent per queue: the queue receiver is claimed by the first call,
/// so a second `setup_fetch` will not double-drive it.
pub(crate) fn spawn_fetch_loops(bus: &EventBus) {
    for publisher in bus.all_publishers() {
        if !publisher.is_pull() {
            continue;
        }
        let token = bus.cancellation_token();

        if let Some(mut rx) = publisher.take_queue() {
            let bus = bus.clone();
            let publisher = publisher.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        next = rx.recv() => match next {
                            Some(value) => {
                                bus.publish_pinned(publisher.clone(), value);
                            }
                            None => break,
                        },
                    }
                }
            });
        } else if let Some(fetcher) = publisher.fetcher() {
            let bus = bus.clone();
            let publisher = publisher.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        next = fetcher.fetch() => match next {
                            Some(value) => {
                                bus.publish_pinned(publisher.clone(), value);
                            }
                            None => break,
                        },
                    }
                }
            });
        }
    }
}
