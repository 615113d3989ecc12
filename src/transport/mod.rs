//! Byte-level plumbing between a session and its backend.

pub mod channel;
pub mod ws;

use std::future::Future;
use std::pin::Pin;

use crate::Result;
use crate::protocol::{BackendEvent, BackendRequest};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One live connection to a backend.
///
/// `next_event` must be cancel-safe: the session polls it inside `select!`
/// alongside its command queue.
pub trait Transport: Send {
    fn send(&mut self, request: BackendRequest) -> BoxFuture<'_, Result<()>>;
    /// `Ok(None)` means the backend closed the connection.
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<BackendEvent>>>;
    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
