//! Duplex channel read/write loop.
//!
//! One task per channel handle. It connects, reports the open, then
//! multiplexes outbound frames queued by the link with inbound frames from
//! the gateway until the handle is cancelled or the peer goes away.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connector::Frame;
use crate::service::link::LinkInner;

/// Close code sent when the link tears a channel down itself.
pub const NORMAL_CLOSE: u16 = 1000;

/// Runs the read/write loop for the channel identified by `generation`.
///
/// Every lifecycle callback carries the generation so that callbacks from a
/// superseded channel are ignored.
pub(crate) async fn run_channel(
    inner: Arc<LinkInner>,
    url: Url,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        () = cancel.cancelled() => {
            tracing::debug!(generation, "channel torn down before connecting");
            return;
        }
        result = inner.collaborators.connector.connect(&url) => result,
    };

    let (mut sink, mut stream) = match connected {
        Ok(pair) => pair,
        Err(err) => {
            inner.on_errored(generation, &err);
            inner.on_closed(generation, None);
            return;
        }
    };

    inner.on_opened(generation);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if let Err(err) = sink.send(Frame::Close(Some(NORMAL_CLOSE))).await {
                    tracing::debug!(generation, error = %err, "close frame not delivered");
                }
                break;
            }
            Some(frame) = outbound.recv() => {
                if let Err(err) = sink.send(frame).await {
                    inner.on_errored(generation, &err);
                    inner.on_closed(generation, None);
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Frame::Text(text))) => inner.handle_frame(&text),
                Some(Ok(Frame::Close(code))) => {
                    inner.on_closed(generation, code);
                    break;
                }
                Some(Err(err)) => {
                    inner.on_errored(generation, &err);
                    inner.on_closed(generation, None);
                    break;
                }
                None => {
                    inner.on_closed(generation, None);
                    break;
                }
            },
        }
    }

    tracing::debug!(generation, "duplex channel task finished");
}
