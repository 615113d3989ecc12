//! In-process transport: the backend side is a pair of channels.
//!
//! Useful for backends that run inside the same process and for driving a
//! session deterministically in tests.

use tokio::sync::mpsc;

use super::{BoxFuture, Transport};
use crate::protocol::{BackendEvent, BackendRequest};
use crate::{Error, Result};

/// Session side of the pair.
#[derive(Debug)]
pub struct ChannelTransport {
    requests: mpsc::UnboundedSender<BackendRequest>,
    events: mpsc::UnboundedReceiver<BackendEvent>,
}

/// Backend side of the pair. Dropping it closes the connection.
#[derive(Debug)]
pub struct BackendPeer {
    requests: mpsc::UnboundedReceiver<BackendRequest>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

#[must_use]
pub fn pair() -> (ChannelTransport, BackendPeer) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            requests: request_tx,
            events: event_rx,
        },
        BackendPeer {
            requests: request_rx,
            events: event_tx,
        },
    )
}

impl BackendPeer {
    /// Wait for the next request the session sent.
    pub async fn next_request(&mut self) -> Option<BackendRequest> {
        self.requests.recv().await
    }

    /// A request that is already queued, without waiting.
    pub fn try_next_request(&mut self) -> Option<BackendRequest> {
        self.requests.try_recv().ok()
    }

    /// # Errors
    /// Returns `Error::ConnectionClosed` if the session side is gone.
    pub fn emit(&self, event: BackendEvent) -> Result<()> {
        self.events.send(event).map_err(|_| Error::ConnectionClosed)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, request: BackendRequest) -> BoxFuture<'_, Result<()>> {
        let result = self.requests.send(request).map_err(|_| Error::ConnectionClosed);
        Box::pin(async move { result })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<BackendEvent>>> {
        Box::pin(async move { Ok(self.events.recv().await) })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.events.close();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_and_events_cross_the_pair() {
        let (mut transport, mut peer) = pair();
        transport.send(BackendRequest::CommitAudio).await.unwrap();
        assert!(matches!(peer.next_request().await, Some(BackendRequest::CommitAudio)));

        peer.emit(BackendEvent::Ack { request_id: "req_1".to_string() }).unwrap();
        let event = transport.next_event().await.unwrap();
        assert!(matches!(event, Some(BackendEvent::Ack { request_id }) if request_id == "req_1"));
    }

    #[tokio::test]
    async fn dropping_peer_ends_event_stream() {
        let (mut transport, peer) = pair();
        drop(peer);
        assert!(transport.next_event().await.unwrap().is_none());
        assert!(matches!(
            transport.send(BackendRequest::ClearAudio).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
