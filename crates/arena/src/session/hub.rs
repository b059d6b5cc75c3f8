//! Per-session event fan-out to viewers.
//!
//! Every viewer owns a bounded channel. Publishing serializes an event once
//! and offers the same buffer to every channel with `try_send`, so a slow or
//! vanished viewer can never stall the session. A viewer whose channel is
//! full or closed is removed on the spot; the others are unaffected.
//!
//! Subscription, removal and publishing all go through one lock, so a
//! viewer either sees a given event or was not registered when it was
//! published. A live viewer never observes a gap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use protocol::SyntheticEvent;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::SessionId;

/// Identifier of a viewer within one session.
pub type ViewerId = u64;

/// A serialized event, shared by every viewer that receives it.
pub type EventPayload = Arc<str>;

/// Default channel capacity for a viewer.
pub const DEFAULT_VIEWER_BUFFER: usize = 256;

struct ViewerHandle {
    tx: mpsc::Sender<EventPayload>,
    delivered: u64,
}

/// Broadcasts one session's events to all of its viewers.
pub struct BroadcastHub {
    session_id: SessionId,
    viewers: RwLock<HashMap<ViewerId, ViewerHandle>>,
    next_viewer: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

impl BroadcastHub {
    /// Creates a hub for the given session.
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        Self {
            session_id,
            viewers: RwLock::new(HashMap::new()),
            next_viewer: AtomicU64::new(1),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Registers a new viewer.
    ///
    /// The viewer's first event is always `connected`, carrying the session
    /// id. Returns `None` once the hub has been closed.
    pub async fn subscribe(self: &Arc<Self>) -> Option<Viewer> {
        let connected = serialize(&SyntheticEvent::connected(self.session_id.clone()))?;
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut viewers = self.viewers.write().await;
        if self.is_closed() {
            return None;
        }

        let id = self.next_viewer.fetch_add(1, Ordering::Relaxed);
        // A fresh channel always has room for one message.
        if tx.try_send(connected).is_err() {
            return None;
        }
        viewers.insert(id, ViewerHandle { tx, delivered: 1 });

        tracing::debug!(
            session_id = %self.session_id,
            viewer_id = id,
            viewers = viewers.len(),
            "Viewer subscribed"
        );

        Some(Viewer {
            id,
            rx,
            guard: ViewerGuard {
                hub: Arc::clone(self),
                id,
            },
        })
    }

    /// Removes a viewer. Removing an unknown viewer is a no-op.
    ///
    /// Returns whether the viewer was registered.
    pub async fn unsubscribe(&self, id: ViewerId) -> bool {
        let removed = self.viewers.write().await.remove(&id);
        if let Some(handle) = &removed {
            tracing::debug!(
                session_id = %self.session_id,
                viewer_id = id,
                delivered = handle.delivered,
                "Viewer unsubscribed"
            );
        }
        removed.is_some()
    }

    /// Serializes an event once and delivers it to every viewer.
    ///
    /// Returns the number of viewers that received it.
    pub async fn publish<T: Serialize>(&self, event: &T) -> usize {
        match serialize(event) {
            Some(payload) => self.publish_payload(payload).await,
            None => 0,
        }
    }

    /// Delivers an already-serialized event to every viewer.
    pub async fn publish_payload(&self, payload: EventPayload) -> usize {
        let mut viewers = self.viewers.write().await;
        let session_id = &self.session_id;

        viewers.retain(|id, handle| match handle.tx.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                handle.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %session_id,
                    viewer_id = id,
                    delivered = handle.delivered,
                    "Viewer fell behind, disconnecting"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %session_id, viewer_id = id, "Viewer channel closed");
                false
            }
        });

        tracing::trace!(session_id = %session_id, recipients = viewers.len(), "Published event");
        viewers.len()
    }

    /// Disconnects every viewer and refuses new ones.
    pub async fn close(&self) {
        let mut viewers = self.viewers.write().await;
        self.closed.store(true, Ordering::SeqCst);
        let count = viewers.len();
        viewers.clear();
        tracing::debug!(session_id = %self.session_id, viewers = count, "Hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of registered viewers.
    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }
}

fn serialize<T: Serialize>(event: &T) -> Option<EventPayload> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize event");
            None
        }
    }
}

/// Unregisters a viewer when dropped.
struct ViewerGuard {
    hub: Arc<BroadcastHub>,
    id: ViewerId,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        // Without a runtime the closed channel is pruned on the next publish.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let hub = Arc::clone(&self.hub);
            let id = self.id;
            runtime.spawn(async move {
                hub.unsubscribe(id).await;
            });
        }
    }
}

/// A subscribed viewer's end of the stream.
///
/// Dropping the viewer unsubscribes it.
pub struct Viewer {
    id: ViewerId,
    rx: mpsc::Receiver<EventPayload>,
    guard: ViewerGuard,
}

impl Viewer {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Receives the next event. Returns `None` once the viewer has been
    /// removed or the session is gone.
    pub async fn recv(&mut self) -> Option<EventPayload> {
        self.rx.recv().await
    }

    /// Converts the viewer into a stream of serialized events.
    pub fn into_stream(self) -> impl Stream<Item = EventPayload> + Send + 'static {
        let Viewer { rx, guard, .. } = self;
        ReceiverStream::new(rx).map(move |payload| {
            let _guard = &guard;
            payload
        })
    }
}
