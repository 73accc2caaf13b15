//! Duplex channel establishment.
//!
//! A [`Connector`] turns a handshake URL into a pair of frame sink and
//! frame stream. [`TungsteniteConnector`] is the WebSocket implementation;
//! tests substitute in-memory connectors.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use reqwest::Url;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsFrame};

use crate::error::LinkError;

/// Close code marking an intentional, non-recoverable close.
pub const INTENTIONAL_CLOSE: u16 = 1007;

/// Frame exchanged with the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame carrying one JSON envelope.
    Text(String),
    /// Close frame with an optional close code.
    Close(Option<u16>),
}

/// Outgoing half of an open channel.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = LinkError> + Send>>;

/// Incoming half of an open channel.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, LinkError>> + Send>>;

/// Opens duplex channels.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Connects to `url` and returns the split channel.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Channel`] if the channel cannot be opened.
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), LinkError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
///
/// `wss://` endpoints require the crate's `tls` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), LinkError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (ws_tx, ws_rx) = socket.split();

        let sink = ws_tx
            .sink_map_err(LinkError::from)
            .with(|frame: Frame| future::ready(Ok::<_, LinkError>(to_ws_frame(frame))));

        let stream = ws_rx.filter_map(|item| future::ready(from_ws_frame(item)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

fn to_ws_frame(frame: Frame) -> WsFrame {
    match frame {
        Frame::Text(text) => WsFrame::text(text),
        Frame::Close(code) => WsFrame::Close(code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        })),
    }
}

fn from_ws_frame(
    item: Result<WsFrame, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Frame, LinkError>> {
    match item {
        Ok(WsFrame::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(WsFrame::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(Frame::Text(text))),
            Err(_) => {
                tracing::debug!(len = bytes.len(), "ignoring non-utf8 binary frame");
                None
            }
        },
        Ok(WsFrame::Close(close)) => Some(Ok(Frame::Close(close.map(|c| u16::from(c.code))))),
        Ok(_) => None,
        Err(err) => Some(Err(LinkError::from(err))),
    }
}
