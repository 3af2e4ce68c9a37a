//! Channel registry and attachment-handle lookup.
//!
//! The registry is the process-wide cache mapping a [`ChannelKey`] to the one
//! live [`DeviceChannel`] handle for that hardware resource. All creation and
//! cache mutation runs on a single worker task, so the vendor driver never
//! sees concurrent constructions; callers enqueue a [`ChannelRequest`] and
//! wait on it with a fixed 4 second bound.
//!
//! A timed-out wait does not cancel the in-flight creation. Once the worker
//! finishes, the handle lands in the cache anyway and the next lookup for the
//! same key finds it there; a slow creation is never repeated.
//!
//! The registry is an explicitly owned instance passed to every consumer.
//! There is no global state; it is constructed once at startup and shut down
//! with the bridge.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

use crate::driver::{ChannelKind, DeviceChannel, PhidgetDriver};
use crate::error::{BridgeError, BridgeResult};

/// Bound on waiting for an asynchronously created handle.
pub const HANDLE_WAIT: Duration = Duration::from_secs(4);

/// Identity of one hardware channel resource.
///
/// Two requests with equal keys resolve to the identical handle instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Serial number of the owning device.
    pub serial_number: i32,
    /// Concrete channel kind.
    pub kind: ChannelKind,
    /// Explicit channel index, when the definition carries one.
    pub channel: Option<i32>,
}

impl ChannelKey {
    /// Build a key from its parts.
    pub fn new(serial_number: i32, kind: ChannelKind, channel: Option<i32>) -> Self {
        Self { serial_number, kind, channel }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Some(idx) => write!(f, "{}_{}_{}", self.serial_number, self.kind, idx),
            None => write!(f, "{}_{}", self.serial_number, self.kind),
        }
    }
}

/// One-shot handoff between the registry worker and a waiting caller.
///
/// Created per lookup; fulfilled exactly once by the worker, with `None`
/// signifying that no handle exists for the requested kind.
pub struct ChannelRequest {
    key: ChannelKey,
    reply: oneshot::Receiver<Option<Arc<dyn DeviceChannel>>>,
}

impl ChannelRequest {
    /// Key this request was enqueued for.
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

enum RegistryOp {
    Lookup {
        key: ChannelKey,
        reply: oneshot::Sender<Option<Arc<dyn DeviceChannel>>>,
    },
    Dispose {
        key: ChannelKey,
    },
}

/// Process-wide channel cache with a serialized creation worker.
pub struct ChannelRegistry {
    ops: mpsc::UnboundedSender<RegistryOp>,
    worker: JoinHandle<()>,
}

impl ChannelRegistry {
    /// Create the registry and spawn its worker.
    pub fn new(driver: Arc<dyn PhidgetDriver>) -> Self {
        let (ops, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker_loop(driver, rx));
        Self { ops, worker }
    }

    /// Enqueue a lookup for `key`. Non-blocking.
    pub fn request(&self, key: ChannelKey) -> ChannelRequest {
        let (tx, rx) = oneshot::channel();
        debug!(key = %key, "enqueueing channel lookup");
        if self.ops.send(RegistryOp::Lookup { key: key.clone(), reply: tx }).is_err() {
            // Worker gone (registry shutting down); the request will resolve
            // to None because the sender was dropped.
            warn!(key = %key, "channel registry worker is gone");
        }
        ChannelRequest { key, reply: rx }
    }

    /// Wait for a request to be fulfilled, up to [`HANDLE_WAIT`].
    ///
    /// Fails with [`BridgeError::Creation`] when no handle exists for the
    /// key and with [`BridgeError::HandleWaitTimeout`] when the bound
    /// elapses. A timeout leaves the in-flight creation running; its result
    /// still populates the cache for later lookups.
    pub async fn await_handle(
        &self,
        request: ChannelRequest,
    ) -> BridgeResult<Arc<dyn DeviceChannel>> {
        match timeout(HANDLE_WAIT, request.reply).await {
            Ok(Ok(Some(handle))) => Ok(handle),
            Ok(Ok(None)) | Ok(Err(_)) => Err(BridgeError::Creation(request.key.to_string())),
            Err(_) => {
                warn!(key = %request.key, "timed out waiting for channel handle");
                Err(BridgeError::HandleWaitTimeout(request.key.to_string()))
            }
        }
    }

    /// Request and wait in one step, discarding the failure reason.
    pub async fn lookup(&self, key: ChannelKey) -> Option<Arc<dyn DeviceChannel>> {
        let request = self.request(key);
        self.await_handle(request).await.ok()
    }

    /// Close and evict the handle for `key`, if cached. Idempotent.
    ///
    /// Runs on the worker after any pending lookups. Close failures are
    /// logged, not propagated; the caller cannot recover a hardware close
    /// failure.
    pub fn dispose(&self, key: ChannelKey) {
        let _ = self.ops.send(RegistryOp::Dispose { key });
    }

    /// Drain pending operations and stop the worker.
    pub async fn shutdown(self) {
        drop(self.ops);
        if let Err(err) = self.worker.await {
            warn!(error = %err, "channel registry worker ended abnormally");
        }
    }
}

async fn worker_loop(
    driver: Arc<dyn PhidgetDriver>,
    mut rx: mpsc::UnboundedReceiver<RegistryOp>,
) {
    let mut cache: HashMap<ChannelKey, Arc<dyn DeviceChannel>> = HashMap::new();

    while let Some(op) = rx.recv().await {
        match op {
            RegistryOp::Lookup { key, reply } => {
                let handle = match cache.get(&key) {
                    Some(handle) => {
                        debug!(key = %key, "existing channel handle found");
                        Some(handle.clone())
                    }
                    None => {
                        debug!(key = %key, "creating channel handle");
                        match driver.construct(key.kind, key.serial_number, key.channel).await {
                            Ok(handle) => {
                                cache.insert(key.clone(), handle.clone());
                                Some(handle)
                            }
                            Err(err) => {
                                error!(key = %key, error = %err, "unable to create channel handle");
                                None
                            }
                        }
                    }
                };
                // The caller may have timed out; the cache entry above is
                // kept either way.
                let _ = reply.send(handle);
            }
            RegistryOp::Dispose { key } => {
                if let Some(handle) = cache.remove(&key) {
                    debug!(key = %key, "disposing channel handle");
                    if let Err(err) = handle.close().await {
                        warn!(key = %key, error = %err, "could not close channel handle");
                    }
                }
            }
        }
    }
}
