//! Keepalive pings over the session's send half.

use std::{sync::Arc, time::Duration};

use cable_core::OutputRecord;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::session::Shared;

pub(crate) async fn run(
    shared: Arc<Shared>,
    every: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        // The lock covers only the write; the pong is awaited without it.
        let sent = {
            let mut sink = shared.sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                return;
            };
            sink.ping(timeout).await
        };
        let result = match sent {
            Ok(pong) => tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                answered = pong => answered,
            },
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::error!("Session {} keepalive failed: {e}", shared.label);
            shared
                .feed
                .push(OutputRecord::fault(format!("keepalive failed: {e}")));
            shared.teardown().await;
            return;
        }
    }
}
