//! Shared helpers for exchange clients
//!
//! WebSocket connection setup, bounded reconnection, and the streaming
//! listener/dispatcher used by every push subscription.

pub mod reconnect;
pub mod stream;
pub mod websocket;

pub use reconnect::{backoff_delay_ms, reconnect_with_backoff, ReconnectConfig};
pub use stream::{run_stream_listener, StreamDispatcher, StreamState};
pub use websocket::{connect_tls, text_frames, TlsWebSocketStream};
