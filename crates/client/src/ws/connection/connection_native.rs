//! WebSocket implementation using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{Connector, FrameSink, FrameStream};
use crate::error::TransportError;

/// Connects real WebSocket channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::text(text))));

        let stream = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Ping(data)) => {
                        // Pong is handled automatically by tungstenite
                        tracing::trace!(len = data.len(), "received ping");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Io(e.to_string()))),
                })
            });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
