use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::ServerEvent,
    services::{public_service, sse_events},
    state::SharedState,
};

const FORWARD_BUFFER: usize = 8;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Subscribe to the shared public SSE stream.
pub fn subscribe_public(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    state.public_sse().subscribe()
}

/// Status event greeting a new subscriber, or `None` when the status cannot be read.
pub async fn connect_event(state: &SharedState) -> Option<ServerEvent> {
    match public_service::current_status(state).await {
        Ok(status) => sse_events::status_event(&status),
        Err(err) => {
            debug!(error = %err, "no status available for new SSE subscriber");
            None
        }
    }
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Copy events from the hub into `tx` until either side goes away.
async fn forward(
    mut receiver: broadcast::Receiver<ServerEvent>,
    tx: mpsc::Sender<Result<Event, Infallible>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            _ = tx.closed() => break,
            _ = shutdown.wait_for(|stopping| *stopping) => {
                debug!("server shutting down; closing public SSE stream");
                break;
            }
            received = receiver.recv() => match received {
                Ok(payload) => payload,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "public SSE subscriber lagging; events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        if tx.send(Ok(to_event(payload))).await.is_err() {
            break;
        }
    }
    info!("public SSE subscriber disconnected");
}

/// Turn a hub subscription into an SSE response. `initial` goes out first,
/// followed by every broadcast event until the client disconnects or
/// `shutdown` flips to `true`.
pub fn to_sse_stream(
    receiver: broadcast::Receiver<ServerEvent>,
    initial: Option<ServerEvent>,
    shutdown: watch::Receiver<bool>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(FORWARD_BUFFER);
    tokio::spawn(forward(receiver, tx, shutdown));

    let forwarded = ReceiverStream::new(rx);
    let stream = async_stream::stream! {
        if let Some(event) = initial {
            yield Ok(to_event(event));
        }
        for await item in forwarded {
            yield item;
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::fixture;

    fn event(name: &str) -> ServerEvent {
        ServerEvent::json(Some(name.to_string()), &()).unwrap()
    }

    #[tokio::test]
    async fn forwarder_relays_events() {
        let fx = fixture().await;
        let (tx, mut rx) = mpsc::channel(FORWARD_BUFFER);
        let task = tokio::spawn(forward(
            subscribe_public(&fx.state),
            tx,
            fx.state.shutdown_watcher(),
        ));

        fx.state.public_sse().broadcast(event("player.joined"));
        assert!(matches!(rx.recv().await, Some(Ok(_))));

        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_ends_the_stream() {
        let fx = fixture().await;
        let (tx, mut rx) = mpsc::channel(FORWARD_BUFFER);
        let task = tokio::spawn(forward(
            subscribe_public(&fx.state),
            tx,
            fx.state.shutdown_watcher(),
        ));

        fx.state.begin_shutdown();
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stream_opened_after_shutdown_closes_at_once() {
        let fx = fixture().await;
        fx.state.begin_shutdown();
        let (tx, mut rx) = mpsc::channel(FORWARD_BUFFER);

        forward(subscribe_public(&fx.state), tx, fx.state.shutdown_watcher()).await;
        assert!(rx.recv().await.is_none());
    }
}
