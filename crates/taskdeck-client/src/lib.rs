//! Client library for the task center.
//!
//! Provides the typed HTTP client for the REST endpoints and the push channel
//! manager that keeps a WebSocket to the stats stream alive.

pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod push;

pub use api::CenterApi;
pub use config::ClientConfig;
pub use error::{ChannelError, ClientError};
pub use http::{Ack, HttpClient};
pub use push::{
    ChannelEvent, ChannelState, CloseCause, Connection, Connector, Frame, FrameSink, FrameStream,
    PushChannel, PushConfig, PushHandle, WsConnector,
};
