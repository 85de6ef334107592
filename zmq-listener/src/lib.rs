// zmq-listener/src/lib.rs

//! ZMQ Listener (C10): two SUB sockets over `rawtx` and `hashblock`,
//! each with its own dedicated receive loop that auto-reconnects on
//! socket error.
//!
//! `zmq`'s socket API is blocking, so each loop runs on its own
//! `spawn_blocking` thread; the async handler is driven with
//! [`tokio::runtime::Handle::block_on`] from that thread so the loop
//! genuinely awaits the handler before pulling the next frame. Handlers
//! drop frames they cannot process rather than buffer unbounded — there
//! is no queue between recv and handler at all.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ZmqListenerError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),
}

/// Run the `rawtx` receive loop forever, calling `handler` with each
/// frame's raw transaction bytes. Never returns; reconnects with
/// backoff on any socket error.
pub async fn run_rawtx_listener<F, Fut>(endpoint: String, handler: F)
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    run_loop("rawtx", endpoint, Arc::new(handler)).await
}

/// Run the `hashblock` receive loop forever, calling `handler` with
/// each frame's 32-byte block hash on every new tip.
pub async fn run_hashblock_listener<F, Fut>(endpoint: String, handler: F)
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    run_loop("hashblock", endpoint, Arc::new(handler)).await
}

async fn run_loop<F, Fut>(topic: &'static str, endpoint: String, handler: Arc<F>)
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let endpoint2 = endpoint.clone();
        let handler2 = handler.clone();
        let rt = tokio::runtime::Handle::current();

        let result =
            tokio::task::spawn_blocking(move || recv_loop(topic, &endpoint2, handler2, rt)).await;

        match result {
            Ok(Ok(())) => unreachable!("recv_loop only returns on error"),
            Ok(Err(e)) => tracing::warn!(topic, endpoint = %endpoint, error = %e, "zmq socket error"),
            Err(e) => tracing::error!(topic, endpoint = %endpoint, error = %e, "zmq receive task panicked"),
        }

        tracing::info!(topic, endpoint = %endpoint, backoff_secs = backoff.as_secs(), "reconnecting");
        tokio::time::sleep(backoff).await;
        backoff = MAX_BACKOFF.min(backoff * 2);
    }
}

fn recv_loop<F, Fut>(
    topic: &str,
    endpoint: &str,
    handler: Arc<F>,
    rt: tokio::runtime::Handle,
) -> Result<(), ZmqListenerError>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = ()>,
{
    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::SUB)?;
    socket.connect(endpoint)?;
    socket.set_subscribe(topic.as_bytes())?;
    tracing::info!(topic, endpoint, "zmq socket connected");

    loop {
        let parts = socket.recv_multipart(0)?;
        // Frame layout: [topic, payload, sequence]. The payload is the
        // raw transaction bytes or the 32-byte block hash.
        if let Some(payload) = parts.get(1) {
            rt.block_on((handler)(payload.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = INITIAL_BACKOFF;
        backoff = MAX_BACKOFF.min(backoff * 2);
        assert_eq!(backoff, MAX_BACKOFF);
        backoff = MAX_BACKOFF.min(backoff * 2);
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
