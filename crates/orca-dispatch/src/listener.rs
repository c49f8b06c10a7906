//! Bus Listener - one subscription task per hosted domain
//!
//! Each task pulls events from its domain subscription and awaits the
//! dispatcher before taking the next one, so events of a domain are handled
//! in delivery order while domains run concurrently.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bus::EventBus;
use crate::dispatcher::ActionDispatcher;
use crate::router::DispatchRouter;
use crate::Result;

pub struct BusListener {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl BusListener {
    /// Subscribe every dispatcher of `router` to the taxonomy names of its
    /// domain and start the listener tasks.
    pub async fn start(bus: Arc<dyn EventBus>, router: &DispatchRouter) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::new();

        for dispatcher in router.dispatchers() {
            let types: Vec<String> = dispatcher
                .subscriptions()
                .await?
                .into_iter()
                .map(|name| name.to_string())
                .collect();

            if types.is_empty() {
                info!(domain = %dispatcher.domain(), "Domain has no registered event types, not subscribing");
                continue;
            }

            let subscription = bus.subscribe(&types, None).await?;
            let domain = dispatcher.domain().to_string();
            info!(domain = %domain, event_types = types.len(), "Bus listener started");

            let shutdown_rx = shutdown_tx.subscribe();
            let handle = tokio::spawn(listen(dispatcher, subscription, shutdown_rx));
            handles.push((domain, handle));
        }

        Ok(Self { shutdown_tx, handles })
    }

    pub fn domains(&self) -> Vec<&str> {
        self.handles.iter().map(|(d, _)| d.as_str()).collect()
    }

    /// Signal every listener task and wait for them to exit.
    pub async fn shutdown(self) {
        info!("Bus listeners shutting down...");
        let _ = self.shutdown_tx.send(());
        for (domain, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(domain = %domain, error = %e, "Bus listener task failed");
            }
        }
    }
}

async fn listen(
    dispatcher: Arc<ActionDispatcher>,
    mut subscription: Box<dyn crate::bus::Subscription>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!(domain = %dispatcher.domain(), "Bus listener shutting down");
                break;
            }
            next = subscription.next() => match next {
                Some(event) => {
                    dispatcher.dispatch(&event).await;
                }
                None => {
                    info!(domain = %dispatcher.domain(), "Event bus closed, listener exiting");
                    break;
                }
            }
        }
    }
}
