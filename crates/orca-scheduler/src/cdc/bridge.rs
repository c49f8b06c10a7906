use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::notify::{NotificationSource, NotificationStream};
use super::CdcTrigger;
use crate::{Result, SchedulerError};

/// Reconnection settings for a listener connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff,
            ..Self::default()
        }
    }

    fn next(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[async_trait]
pub trait CdcHandler: Send + Sync {
    /// Called with the raw notification payload.
    async fn handle(&self, payload: String) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CdcHandler for FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, payload: String) -> Result<()> {
        (self.0)(payload).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CdcHandler>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

pub struct CdcBridge {
    source: Arc<dyn NotificationSource>,
    policy: ReconnectPolicy,
}

impl CdcBridge {
    pub fn new(source: Arc<dyn NotificationSource>) -> Self {
        Self::with_policy(source, ReconnectPolicy::default())
    }

    pub fn with_policy(source: Arc<dyn NotificationSource>, policy: ReconnectPolicy) -> Self {
        Self { source, policy }
    }

    /// Open a dedicated listener on the trigger's channel and hand every
    /// notification payload to `handler`.
    ///
    /// Connection and LISTEN failures on the first attempt are returned to the
    /// caller; later connection loss is retried with backoff.
    pub async fn subscribe(&self, trigger: CdcTrigger, handler: Arc<dyn CdcHandler>) -> Result<CdcSubscription> {
        let channel = trigger.channel();

        let mut stream = self.source.connect().await?;
        stream.listen(&channel).await.map_err(|e| {
            SchedulerError::Listener(format!("failed to listen on channel {}: {}", channel, e))
        })?;

        info!(channel = %channel, source = %self.source.describe(), "CDC listener started");
        metrics::gauge!("orca_cdc_listeners").increment(1.0);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let listener = ChannelListener {
            source: self.source.clone(),
            channel: channel.clone(),
            handler,
            policy: self.policy,
        };
        let handle = tokio::spawn(listener.run(stream, cancel_rx));

        Ok(CdcSubscription {
            trigger,
            cancel_tx: Some(cancel_tx),
            handle,
        })
    }
}

/// A running channel listener. Dropping it also stops the listener, but only
/// `cancel` waits for the connection to be released.
pub struct CdcSubscription {
    trigger: CdcTrigger,
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CdcSubscription {
    pub fn trigger(&self) -> &CdcTrigger {
        &self.trigger
    }

    pub fn channel(&self) -> String {
        self.trigger.channel()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Unlisten, release the connection and wait for the listener task to exit.
    pub async fn cancel(self) {
        let Self { trigger, cancel_tx, handle } = self;
        if let Some(tx) = cancel_tx {
            let _ = tx.send(());
        }
        if let Err(e) = handle.await {
            error!(channel = %trigger.channel(), error = %e, "CDC listener task failed");
        }
    }
}

enum ListenerEvent {
    Cancelled,
    Received(Result<super::Notification>),
}

struct ChannelListener {
    source: Arc<dyn NotificationSource>,
    channel: String,
    handler: Arc<dyn CdcHandler>,
    policy: ReconnectPolicy,
}

impl ChannelListener {
    async fn run(self, mut stream: Box<dyn NotificationStream>, mut cancel: oneshot::Receiver<()>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut cancel => ListenerEvent::Cancelled,
                received = stream.recv() => ListenerEvent::Received(received),
            };

            match event {
                ListenerEvent::Cancelled => {
                    self.release(stream).await;
                    return;
                }
                ListenerEvent::Received(Ok(notification)) => {
                    debug!(channel = %self.channel, "CDC notification received");
                    self.invoke(notification.payload).await;
                }
                ListenerEvent::Received(Err(e)) => {
                    warn!(channel = %self.channel, error = %e, "CDC listener connection lost");
                    match self.reconnect(&mut cancel).await {
                        Some(fresh) => stream = fresh,
                        None => {
                            // Cancelled while reconnecting; the old connection is already gone.
                            drop(stream);
                            metrics::gauge!("orca_cdc_listeners").decrement(1.0);
                            info!(channel = %self.channel, "CDC listener stopped");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn invoke(&self, payload: String) {
        let outcome = AssertUnwindSafe(self.handler.handle(payload)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {
                metrics::counter!("orca_cdc_notifications_total", "outcome" => "handled").increment(1);
            }
            Ok(Err(e)) => {
                metrics::counter!("orca_cdc_notifications_total", "outcome" => "failed").increment(1);
                error!(channel = %self.channel, error = %e, "CDC handler error");
            }
            Err(_) => {
                metrics::counter!("orca_cdc_notifications_total", "outcome" => "panicked").increment(1);
                error!(channel = %self.channel, "CDC handler panicked");
            }
        }
    }

    /// Returns `None` if cancelled before a connection could be re-established.
    async fn reconnect(&self, cancel: &mut oneshot::Receiver<()>) -> Option<Box<dyn NotificationStream>> {
        let mut backoff = self.policy.min_backoff;
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = &mut *cancel => return None,
                _ = tokio::time::sleep(backoff) => {}
            }

            attempts += 1;
            let attempt = async {
                let mut stream = self.source.connect().await?;
                stream.listen(&self.channel).await?;
                Ok::<_, SchedulerError>(stream)
            };

            match attempt.await {
                Ok(stream) => {
                    info!(channel = %self.channel, attempts, "CDC listener reconnected");
                    return Some(stream);
                }
                Err(e) => {
                    backoff = self.policy.next(backoff);
                    warn!(
                        channel = %self.channel,
                        attempts,
                        retry_in_ms = backoff.as_millis() as u64,
                        error = %e,
                        "CDC listener reconnect failed"
                    );
                }
            }
        }
    }

    async fn release(&self, mut stream: Box<dyn NotificationStream>) {
        if let Err(e) = stream.unlisten_all().await {
            warn!(channel = %self.channel, error = %e, "CDC unlisten failed");
        }
        drop(stream);
        metrics::gauge!("orca_cdc_listeners").decrement(1.0);
        info!(channel = %self.channel, "CDC listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::ChannelNotificationSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next(Duration::from_secs(10)), Duration::from_secs(20));
        assert_eq!(policy.next(Duration::from_secs(40)), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_saturates_at_huge_bounds() {
        let policy = ReconnectPolicy::new(Duration::from_secs(10), Duration::MAX);
        assert_eq!(policy.next(Duration::MAX), Duration::MAX);
        assert_eq!(policy.next(Duration::from_secs(u64::MAX / 2 + 1)), Duration::MAX);

        let mut backoff = Duration::from_secs(10);
        for _ in 0..200 {
            backoff = policy.next(backoff);
        }
        assert_eq!(backoff, Duration::MAX);
    }

    #[tokio::test]
    async fn test_first_connect_failure_is_returned() {
        let source = ChannelNotificationSource::new();
        source.refuse_next_connects(1);
        let bridge = CdcBridge::new(Arc::new(source));

        let trigger = CdcTrigger::new("master", "insert").unwrap();
        let result = bridge.subscribe(trigger, handler_fn(|_| async { Ok(()) })).await;
        assert!(matches!(result, Err(SchedulerError::Listener(_))));
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_listener() {
        let source = ChannelNotificationSource::new();
        let bridge = CdcBridge::new(Arc::new(source.clone()));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let handler = handler_fn(move |payload: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if payload == "boom" {
                    panic!("handler blew up");
                }
                Ok(())
            }
        });

        let subscription = bridge
            .subscribe(CdcTrigger::new("master", "update").unwrap(), handler)
            .await
            .unwrap();

        source.notify("cdc_master_update", "boom");
        source.notify("cdc_master_update", "fine");

        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!subscription.is_finished());
        subscription.cancel().await;
    }
}
