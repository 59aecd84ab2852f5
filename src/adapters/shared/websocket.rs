//! Shared WebSocket connection helpers
//!
//! Provides TLS-enabled WebSocket connection utilities used by all clients.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::adapters::errors::ExchangeError;

/// Type alias for the WebSocket stream with TLS
pub type TlsWebSocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect to a WebSocket endpoint with TLS (TLSv1.2 minimum)
///
/// Plain `ws://` URLs connect without TLS.
///
/// # Returns
/// * `Ok(TlsWebSocketStream)` - Connected WebSocket stream
/// * `Err(ExchangeError)` - Connection or TLS error
pub async fn connect_tls(url: &str) -> Result<TlsWebSocketStream, ExchangeError> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| ExchangeError::ConnectionFailed(format!("TLS error: {}", e)))?;

    let (ws_stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls)))
            .await
            .map_err(|e| ExchangeError::WebSocket(Box::new(e)))?;

    Ok(ws_stream)
}

/// Turn a socket into a stream of text payloads
///
/// The stream ends on the first read error or Close frame, which the
/// stream listener treats as a disconnect. Binary and control frames
/// are skipped.
pub fn text_frames(ws: TlsWebSocketStream, label: String) -> BoxStream<'static, String> {
    ws.take_while(move |msg| {
        let keep = match msg {
            Ok(Message::Close(frame)) => {
                tracing::info!(stream = %label, frame = ?frame, "WebSocket closed by server");
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(stream = %label, error = %e, "WebSocket read error");
                false
            }
        };
        futures_util::future::ready(keep)
    })
    .filter_map(|msg| async move {
        match msg {
            Ok(Message::Text(text)) => Some(text),
            _ => None,
        }
    })
    .boxed()
}
