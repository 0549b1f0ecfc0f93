//! Per-symbol fan-out of live trade ticks.
//!
//! A hub owns one upstream tick connection and a set of subscribers, each
//! with a small bounded queue. Publishing never waits: a subscriber whose
//! queue is full misses that tick, so a stalled consumer cannot hold up the
//! upstream read loop or the other subscribers.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ahash::AHashMap;
use px_core::PriceTick;
use px_core::ws::{ConnState, OnMessageCallback, WsConnConfig, WsConnection};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Decodes one upstream text frame into a tick.
pub type TickDecoder = Arc<dyn Fn(&str) -> Option<PriceTick> + Send + Sync>;

struct HubInner {
    symbol: String,
    capacity: usize,
    subscribers: Mutex<AHashMap<Uuid, mpsc::Sender<PriceTick>>>,
}

impl HubInner {
    fn subscribers(&self) -> MutexGuard<'_, AHashMap<Uuid, mpsc::Sender<PriceTick>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, tick: &PriceTick) -> usize {
        let mut subscribers = self.subscribers();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(tick.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("[hub:{}] {id} lagging, tick dropped", self.symbol);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            subscribers.remove(&id);
        }
        delivered
    }

    fn remove(&self, id: &Uuid) -> bool {
        self.subscribers().remove(id).is_some()
    }
}

/// Receiving end of one hub subscription.
///
/// Dropping it unsubscribes; the hub keeps no reference to it afterwards.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<PriceTick>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next tick. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<PriceTick> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PriceTick> {
        self.rx.try_recv().ok()
    }

    /// Deregister from the hub. Safe after the hub was torn down.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            if hub.remove(&self.id) {
                debug!("[hub:{}] {} unsubscribed", hub.symbol, self.id);
            }
        }
    }
}

pub struct BroadcastHub {
    inner: Arc<HubInner>,
    upstream: Mutex<Option<WsConnection>>,
}

impl BroadcastHub {
    /// A hub for `symbol` whose subscribers buffer up to `capacity` ticks.
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                symbol: symbol.into(),
                capacity: capacity.max(1),
                subscribers: Mutex::new(AHashMap::new()),
            }),
            upstream: Mutex::new(None),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.inner.symbol
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = Uuid::new_v4();
        self.inner.subscribers().insert(id, tx);
        debug!("[hub:{}] {id} subscribed", self.inner.symbol);
        Subscription { id, rx, hub: Arc::downgrade(&self.inner) }
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        drop(sub);
    }

    /// Offer `tick` to every subscriber without waiting. Returns how many
    /// queues accepted it.
    pub fn publish(&self, tick: &PriceTick) -> usize {
        self.inner.publish(tick)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Connect the upstream tick stream. Frames `decode` rejects are skipped.
    /// Does nothing if already connected.
    pub fn start_upstream(&self, config: WsConnConfig, decode: TickDecoder) {
        let mut upstream = self.upstream();
        if upstream.is_some() {
            return;
        }

        let inner = Arc::downgrade(&self.inner);
        let on_text: OnMessageCallback = Arc::new(move |text: &str| {
            let Some(hub) = inner.upgrade() else {
                return;
            };
            match decode(text) {
                Some(tick) => {
                    hub.publish(&tick);
                }
                None => trace!("[hub:{}] skipped frame: {text}", hub.symbol),
            }
        });

        info!("[hub:{}] upstream {}", self.inner.symbol, config.url);
        let mut conn = WsConnection::new(config);
        conn.start(on_text);
        *upstream = Some(conn);
    }

    /// Upstream connection state, if one was started.
    pub fn upstream_state(&self) -> Option<watch::Receiver<ConnState>> {
        self.upstream().as_ref().map(WsConnection::state)
    }

    /// Close the upstream connection. Subscribers stay registered.
    pub async fn stop(&self) {
        let conn = self.upstream().take();
        if let Some(mut conn) = conn {
            conn.stop().await;
            info!("[hub:{}] upstream stopped", self.inner.symbol);
        }
    }

    fn upstream(&self) -> MutexGuard<'_, Option<WsConnection>> {
        self.upstream.lock().unwrap_or_else(|e| e.into_inner())
    }
}
