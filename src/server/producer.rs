//! Background producer
//!
//! The single task that runs upstream client, decoder and hub publish in
//! sequence. It is spawned at most once, on the first viewer (or at boot
//! when eager start is configured).

use std::future::Future;
use std::sync::{Mutex, OnceLock};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::decode::StreamDecoder;
use crate::hub::FrameHub;
use crate::upstream::{ChunkSink, ConnectionState, Transport, UpstreamClient};

/// Feeds upstream chunks through the decoder into the hub
pub struct DecoderSink {
    decoder: StreamDecoder,
    hub: FrameHub,
}

impl DecoderSink {
    pub fn new(decoder: StreamDecoder, hub: FrameHub) -> Self {
        Self { decoder, hub }
    }
}

/// Run decode work without stalling the other tasks on this worker
///
/// `block_in_place` is only available on the multi-threaded runtime; on a
/// current-thread runtime the work runs inline.
fn decode_in_place<R>(work: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(work),
        _ => work(),
    }
}

impl ChunkSink for DecoderSink {
    fn on_chunk(&mut self, chunk: Bytes) {
        let frames = decode_in_place(|| self.decoder.feed(&chunk));
        for frame in frames {
            let seq = frame.seq;
            if self.hub.publish(frame) {
                tracing::trace!(seq = seq, "Frame published");
            }
        }
    }

    fn on_reconnect(&mut self) {
        // A new connection is a new bitstream
        decode_in_place(|| self.decoder.reset());
    }
}

/// Lazily started producer task
pub struct Producer {
    task: Mutex<Option<BoxFuture<'static, ()>>>,
    handle: OnceLock<Option<JoinHandle<()>>>,
    state: watch::Receiver<ConnectionState>,
}

impl Producer {
    /// Wire `client` to decode into `hub`
    pub fn new<T: Transport>(
        mut client: UpstreamClient<T>,
        decoder: StreamDecoder,
        hub: FrameHub,
    ) -> Self {
        let state = client.state_watch();
        client.on_chunk(DecoderSink::new(decoder, hub));

        Self::from_task(
            async move {
                client.run().await;
            },
            state,
        )
    }

    /// Wrap an arbitrary task
    pub fn from_task(
        task: impl Future<Output = ()> + Send + 'static,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            task: Mutex::new(Some(task.boxed())),
            handle: OnceLock::new(),
            state,
        }
    }

    /// A producer with nothing to run
    ///
    /// Used when frames are published into the hub by other means.
    pub fn detached() -> Self {
        let (_, state) = watch::channel(ConnectionState::Disconnected);
        Self {
            task: Mutex::new(None),
            handle: OnceLock::new(),
            state,
        }
    }

    /// Spawn the task unless it already runs
    ///
    /// Safe to call from many viewers at once; exactly one spawns. Returns
    /// `true` for the call that did. Must be called within a Tokio runtime.
    pub fn ensure_started(&self) -> bool {
        let mut spawned = false;

        self.handle.get_or_init(|| {
            let task = self
                .task
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();

            task.map(|task| {
                spawned = true;
                tracing::info!("Starting producer");
                tokio::spawn(task)
            })
        });

        spawned
    }

    pub fn is_started(&self) -> bool {
        matches!(self.handle.get(), Some(Some(_)))
    }

    /// Upstream connection state as last reported by the client
    pub fn upstream_state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Some(Some(handle)) = self.handle.get() {
            handle.abort();
        }
    }
}
