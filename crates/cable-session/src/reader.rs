//! Inbound loop: the sole consumer of a session's receive half.

use std::sync::Arc;

use cable_core::{
    Envelope, KernelState, OutputRecord,
    envelope::{StatusContent, kind},
};
use cable_transport::{EnvelopeSource, TransportError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::session::Shared;

#[derive(Debug, Error)]
enum ReaderError {
    #[error("read failed: {0}")]
    Read(#[from] TransportError),
    #[error("undecodable {kind} message: {source}")]
    Decode {
        kind: String,
        source: serde_json::Error,
    },
    #[error("kernel channel closed by peer")]
    PeerClosed,
}

/// Drive the receive half until cancelled, closed or failed.
///
/// Any exit other than cancellation publishes a fault and tears the session
/// down.
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut source: Box<dyn EnvelopeSource>,
    cancel: CancellationToken,
) {
    let err = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!("Reader for session {} cancelled", shared.label);
            return;
        }
        err = read_loop(&shared, source.as_mut()) => err,
    };

    if matches!(err, ReaderError::PeerClosed) {
        tracing::warn!("Session {}: {err}", shared.label);
    } else {
        tracing::error!("Session {} reader failed: {err}", shared.label);
    }
    shared.feed.push(OutputRecord::fault(err.to_string()));
    shared.teardown().await;
}

async fn read_loop(shared: &Shared, source: &mut dyn EnvelopeSource) -> ReaderError {
    loop {
        let envelope = match source.next().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return ReaderError::PeerClosed,
            Err(e) => return e.into(),
        };
        if let Err(e) = dispatch(shared, &envelope) {
            return e;
        }
    }
}

fn dispatch(shared: &Shared, envelope: &Envelope) -> Result<(), ReaderError> {
    let decode_error = |source| ReaderError::Decode {
        kind: envelope.kind().to_string(),
        source,
    };

    match envelope.kind() {
        kind::STATUS => {
            let status: StatusContent = envelope.decode().map_err(decode_error)?;
            let state = KernelState::from(status.execution_state);
            tracing::debug!("Kernel state -> {state}");
            shared.state.send_replace(state);
        }
        kind::STREAM | kind::DISPLAY_DATA | kind::EXECUTE_REPLY => {
            let record = OutputRecord::from_envelope(envelope).map_err(decode_error)?;
            if record.owner.is_none() {
                tracing::warn!("Unowned {} record on {}", envelope.kind(), envelope.channel);
            }
            shared.feed.push(record.clone());
            shared.routes.dispatch(record);
        }
        other => tracing::trace!("Ignoring {other} message"),
    }
    Ok(())
}
