use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;

use crate::{Result, SchedulerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Opens dedicated listener connections.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn NotificationStream>>;

    fn describe(&self) -> String;
}

/// One live listener connection.
#[async_trait]
pub trait NotificationStream: Send {
    async fn listen(&mut self, channel: &str) -> Result<()>;

    /// Next notification. An error means the connection is gone and the
    /// stream must be replaced.
    async fn recv(&mut self) -> Result<Notification>;

    async fn unlisten_all(&mut self) -> Result<()>;
}

// ============================================================================
// PostgreSQL LISTEN/NOTIFY
// ============================================================================

pub struct PgNotificationSource {
    dsn: String,
}

impl PgNotificationSource {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn connect(&self) -> Result<Box<dyn NotificationStream>> {
        let listener = PgListener::connect(&self.dsn).await?;
        Ok(Box::new(PgNotificationStream { listener }))
    }

    fn describe(&self) -> String {
        "postgres".to_string()
    }
}

struct PgNotificationStream {
    listener: PgListener,
}

#[async_trait]
impl NotificationStream for PgNotificationStream {
    async fn listen(&mut self, channel: &str) -> Result<()> {
        self.listener.listen(channel).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Notification> {
        // try_recv reports a dropped connection as None instead of silently
        // reconnecting, so the bridge can apply its own backoff.
        match self.listener.try_recv().await? {
            Some(n) => Ok(Notification {
                channel: n.channel().to_string(),
                payload: n.payload().to_string(),
            }),
            None => Err(SchedulerError::Listener("listener connection lost".to_string())),
        }
    }

    async fn unlisten_all(&mut self) -> Result<()> {
        self.listener.unlisten_all().await?;
        Ok(())
    }
}

// ============================================================================
// In-process notifications
// ============================================================================

struct Subscriber {
    id: u64,
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<Notification>,
}

#[derive(Default)]
struct Hub {
    subscribers: Vec<Subscriber>,
    connects: u64,
    refuse_connects: u32,
}

/// In-process stand-in for LISTEN/NOTIFY, used by tests and local runs.
#[derive(Clone, Default)]
pub struct ChannelNotificationSource {
    hub: Arc<Mutex<Hub>>,
    next_id: Arc<AtomicU64>,
}

impl ChannelNotificationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver to every connection listening on `channel`. Returns how many
    /// connections received it.
    pub fn notify(&self, channel: &str, payload: impl Into<String>) -> usize {
        let payload = payload.into();
        let hub = self.hub.lock();
        let mut delivered = 0;
        for sub in hub.subscribers.iter().filter(|s| s.channels.contains(channel)) {
            let sent = sub.tx.send(Notification {
                channel: channel.to_string(),
                payload: payload.clone(),
            });
            if sent.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every open connection, as a network blip would.
    pub fn disconnect_all(&self) {
        self.hub.lock().subscribers.clear();
    }

    /// Make the next `n` connection attempts fail.
    pub fn refuse_next_connects(&self, n: u32) {
        self.hub.lock().refuse_connects = n;
    }

    /// Successful connections opened so far.
    pub fn connect_count(&self) -> u64 {
        self.hub.lock().connects
    }

    /// Channels with at least one listener.
    pub fn listening_channels(&self) -> HashSet<String> {
        self.hub
            .lock()
            .subscribers
            .iter()
            .flat_map(|s| s.channels.iter().cloned())
            .collect()
    }

    pub fn open_connections(&self) -> usize {
        self.hub.lock().subscribers.len()
    }
}

#[async_trait]
impl NotificationSource for ChannelNotificationSource {
    async fn connect(&self) -> Result<Box<dyn NotificationStream>> {
        let mut hub = self.hub.lock();
        if hub.refuse_connects > 0 {
            hub.refuse_connects -= 1;
            return Err(SchedulerError::Listener("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        hub.subscribers.push(Subscriber {
            id,
            channels: HashSet::new(),
            tx,
        });
        hub.connects += 1;
        Ok(Box::new(ChannelNotificationStream {
            id,
            hub: self.hub.clone(),
            rx,
        }))
    }

    fn describe(&self) -> String {
        "in-process".to_string()
    }
}

struct ChannelNotificationStream {
    id: u64,
    hub: Arc<Mutex<Hub>>,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl ChannelNotificationStream {
    fn with_subscriber<T>(&self, f: impl FnOnce(&mut Subscriber) -> T) -> Result<T> {
        let mut hub = self.hub.lock();
        hub.subscribers
            .iter_mut()
            .find(|s| s.id == self.id)
            .map(f)
            .ok_or_else(|| SchedulerError::Listener("connection closed".to_string()))
    }
}

#[async_trait]
impl NotificationStream for ChannelNotificationStream {
    async fn listen(&mut self, channel: &str) -> Result<()> {
        self.with_subscriber(|s| {
            s.channels.insert(channel.to_string());
        })
    }

    async fn recv(&mut self) -> Result<Notification> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| SchedulerError::Listener("connection closed".to_string()))
    }

    async fn unlisten_all(&mut self) -> Result<()> {
        self.with_subscriber(|s| s.channels.clear())
    }
}

impl Drop for ChannelNotificationStream {
    fn drop(&mut self) {
        let id = self.id;
        self.hub.lock().subscribers.retain(|s| s.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_reaches_listeners_only() {
        let source = ChannelNotificationSource::new();
        let mut stream = source.connect().await.unwrap();
        stream.listen("cdc_master_insert").await.unwrap();

        assert_eq!(source.notify("cdc_master_update", "{}"), 0);
        assert_eq!(source.notify("cdc_master_insert", r#"{"id":"1"}"#), 1);

        let n = stream.recv().await.unwrap();
        assert_eq!(n.channel, "cdc_master_insert");
        assert_eq!(n.payload, r#"{"id":"1"}"#);
    }

    #[tokio::test]
    async fn test_disconnect_fails_recv() {
        let source = ChannelNotificationSource::new();
        let mut stream = source.connect().await.unwrap();
        stream.listen("cdc_master_insert").await.unwrap();

        source.disconnect_all();
        assert!(stream.recv().await.is_err());
        assert!(stream.unlisten_all().await.is_err());
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let source = ChannelNotificationSource::new();
        let stream = source.connect().await.unwrap();
        assert_eq!(source.open_connections(), 1);
        drop(stream);
        assert_eq!(source.open_connections(), 0);
    }
}
