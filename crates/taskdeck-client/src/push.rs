//! Push channel manager.
//!
//! Keeps a WebSocket to the center's stats stream open and reopens it after
//! every remote close or transport failure:
//!
//! ```text
//! Connecting -> Open -> Closed(cause) -> ReconnectWait -> Connecting -> ...
//! ```
//!
//! The loop has no attempt limit and no backoff: it waits the configured
//! delay and tries again until [`PushHandle::close`] is called. Closing
//! cancels the loop wherever it is, including a pending reconnect timer, and
//! sends a close frame on an open connection.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskdeck_core::PushMessage;

use crate::error::ChannelError;

/// Capacity of the event queue between the channel task and its consumer.
const EVENT_BUFFER: usize = 100;

/// How long a user-initiated close waits for the close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A frame read from or written to the underlying connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close handshake frame.
    Close,
    /// Binary, ping or pong; ignored.
    Other,
}

/// Stream of inbound frames for one connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ChannelError>> + Send>>;

/// Outbound half of one connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ChannelError> + Send>>;

/// An open connection, split into its two halves.
pub struct Connection {
    pub frames: FrameStream,
    pub sink: FrameSink,
}

impl Connection {
    pub fn new(frames: FrameStream, sink: FrameSink) -> Self {
        Self { frames, sink }
    }

    /// A connection whose outbound half discards every frame.
    pub fn read_only(frames: FrameStream) -> Self {
        let sink = futures_util::sink::drain::<Frame>()
            .sink_map_err(|never| -> ChannelError { match never {} });
        Self {
            frames,
            sink: Box::pin(sink),
        }
    }
}

/// Opens connections for the push channel.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection, ChannelError>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, ChannelError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let (write, read) = ws.split();

        let frames = read.map(|msg| match msg {
            Ok(Message::Text(text)) => Ok(Frame::Text(text)),
            Ok(Message::Close(_)) => Ok(Frame::Close),
            Ok(_) => Ok(Frame::Other),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        });

        let sink = write
            .sink_map_err(|e| ChannelError::Transport(e.to_string()))
            .with(|frame: Frame| {
                future::ready(Ok::<_, ChannelError>(match frame {
                    Frame::Text(text) => Message::Text(text),
                    Frame::Close => Message::Close(None),
                    Frame::Other => Message::Ping(Vec::new()),
                }))
            });

        Ok(Connection::new(Box::pin(frames), Box::pin(sink)))
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The caller closed the channel. No reconnect follows.
    UserInitiated,
    /// The center closed the connection.
    RemoteClosed,
    /// Connecting failed or the connection broke.
    TransportError(String),
}

impl CloseCause {
    /// Whether this cause is followed by a reconnect.
    pub fn schedules_reconnect(&self) -> bool {
        !matches!(self, Self::UserInitiated)
    }
}

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed(CloseCause),
    /// Waiting before the next connection attempt.
    ReconnectWait { retry_in: Duration },
}

/// Events delivered to the channel's consumer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged(ChannelState),

    /// A decoded message.
    Message(PushMessage),

    /// The transport failed. A `Closed` state change follows.
    Error(ChannelError),

    /// A frame could not be decoded. The channel stays open.
    DecodeFailed(String),
}

/// Push channel configuration.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL of the stats stream.
    pub url: String,

    /// Fixed delay between a close and the next attempt.
    pub reconnect_delay: Duration,

    /// Limit on a single connection attempt. An attempt that takes longer
    /// counts as a transport error.
    pub connect_timeout: Duration,
}

/// Entry point for opening the push channel.
pub struct PushChannel;

impl PushChannel {
    /// Spawn the channel task and return its handle and event stream.
    ///
    /// The first event is always `StateChanged(Connecting)`. The receiver
    /// yields `None` once the channel has been closed and the task has
    /// exited.
    pub fn connect<C: Connector>(
        config: PushConfig,
        connector: C,
    ) -> (PushHandle, mpsc::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_channel(config, connector, events_tx, cancel.clone()));

        (
            PushHandle {
                cancel,
                task: Some(task),
            },
            events_rx,
        )
    }
}

/// Handle to a running push channel.
///
/// Dropping the handle closes the channel.
#[derive(Debug)]
pub struct PushHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PushHandle {
    /// Close the channel. Suppresses any reconnect, including one whose
    /// timer is already running.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the channel and wait for its task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send an event; returns false when the consumer is gone.
async fn emit(events: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) -> bool {
    events.send(event).await.is_ok()
}

async fn run_channel<C: Connector>(
    config: PushConfig,
    connector: C,
    events: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        if !emit(&events, ChannelEvent::StateChanged(ChannelState::Connecting)).await {
            break;
        }
        debug!(url = %config.url, attempt = attempt, "Connecting push channel");

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(config.connect_timeout, connector.connect(&config.url)) => {
                Some(result.unwrap_or_else(|_| {
                    Err(ChannelError::Connect(format!(
                        "timed out after {}ms",
                        config.connect_timeout.as_millis()
                    )))
                }))
            }
        };

        let cause = match connected {
            None => CloseCause::UserInitiated,
            Some(Ok(connection)) => {
                info!(url = %config.url, attempt = attempt, "Push channel open");
                run_session(connection, &events, &cancel).await
            }
            Some(Err(e)) => {
                warn!(url = %config.url, error = %e, "Push channel connect failed");
                let _ = emit(&events, ChannelEvent::Error(e.clone())).await;
                CloseCause::TransportError(e.to_string())
            }
        };

        let reconnect = cause.schedules_reconnect();
        if !emit(&events, ChannelEvent::StateChanged(ChannelState::Closed(cause))).await
            || !reconnect
        {
            break;
        }

        let retry_in = config.reconnect_delay;
        info!(delay_ms = retry_in.as_millis() as u64, "Push channel closed, reconnecting");
        if !emit(
            &events,
            ChannelEvent::StateChanged(ChannelState::ReconnectWait { retry_in }),
        )
        .await
        {
            break;
        }

        let cancelled = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(retry_in) => false,
        };

        if cancelled {
            let _ = emit(
                &events,
                ChannelEvent::StateChanged(ChannelState::Closed(CloseCause::UserInitiated)),
            )
            .await;
            break;
        }
    }

    info!(url = %config.url, "Push channel stopped");
}

/// Drive one open connection until it ends. A user-initiated end sends a
/// close frame before the connection is dropped.
async fn run_session(
    connection: Connection,
    events: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) -> CloseCause {
    let Connection {
        mut frames,
        mut sink,
    } = connection;

    let cause = read_frames(&mut frames, events, cancel).await;
    if cause == CloseCause::UserInitiated {
        send_close(&mut sink).await;
    }
    cause
}

async fn read_frames(
    frames: &mut FrameStream,
    events: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) -> CloseCause {
    if !emit(events, ChannelEvent::StateChanged(ChannelState::Open)).await {
        return CloseCause::UserInitiated;
    }

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CloseCause::UserInitiated,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(Frame::Text(text))) => match PushMessage::parse(&text) {
                Ok(message) => {
                    debug!(kind = message.kind(), "Push message received");
                    if !emit(events, ChannelEvent::Message(message)).await {
                        return CloseCause::UserInitiated;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to decode push frame");
                    if !emit(events, ChannelEvent::DecodeFailed(e.to_string())).await {
                        return CloseCause::UserInitiated;
                    }
                }
            },
            Some(Ok(Frame::Other)) => {}
            Some(Ok(Frame::Close)) | None => return CloseCause::RemoteClosed,
            Some(Err(e)) => {
                warn!(error = %e, "Push channel transport error");
                let _ = emit(events, ChannelEvent::Error(e.clone())).await;
                return CloseCause::TransportError(e.to_string());
            }
        }
    }
}

async fn send_close(sink: &mut FrameSink) {
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Frame::Close)).await {
        Ok(Ok(())) => debug!("Sent close frame"),
        Ok(Err(e)) => debug!(error = %e, "Could not send close frame"),
        Err(_) => debug!("Timed out sending close frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use futures_util::stream;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_millis(3000);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    const STATS_FRAME: &str = r#"{"type":"stats","data":{"queue":{"pending":1,"running":0},"tasks":{"total":1,"completed":0,"failed":0},"instances":[]}}"#;

    fn config() -> PushConfig {
        PushConfig {
            url: "ws://center.test/api/stats/ws".to_string(),
            reconnect_delay: DELAY,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Accepts every connection and closes it immediately.
    #[derive(Clone, Default)]
    struct ClosingConnector {
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Connector for ClosingConnector {
        async fn connect(&self, _url: &str) -> Result<Connection, ChannelError> {
            self.attempts.lock().unwrap().push(Instant::now());
            Ok(Connection::read_only(Box::pin(stream::empty())))
        }
    }

    /// Refuses every connection.
    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _url: &str) -> Result<Connection, ChannelError> {
            Err(ChannelError::Connect("connection refused".to_string()))
        }
    }

    /// Never completes a connection attempt.
    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self, _url: &str) -> Result<Connection, ChannelError> {
            future::pending().await
        }
    }

    /// Serves the given frames, then stays open. Outbound frames are
    /// forwarded to `sent`.
    struct ScriptedConnector {
        frames: Vec<Result<Frame, ChannelError>>,
        sent: Option<mpsc::UnboundedSender<Frame>>,
    }

    impl ScriptedConnector {
        fn new(frames: Vec<Result<Frame, ChannelError>>) -> Self {
            Self { frames, sent: None }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> Result<Connection, ChannelError> {
            let frames: FrameStream =
                Box::pin(stream::iter(self.frames.clone()).chain(stream::pending()));
            let Some(sent) = self.sent.clone() else {
                return Ok(Connection::read_only(frames));
            };
            let sink = futures_util::sink::unfold(sent, |sent, frame: Frame| async move {
                let _ = sent.send(frame);
                Ok::<_, ChannelError>(sent)
            });
            Ok(Connection::new(frames, Box::pin(sink)))
        }
    }

    fn state(event: &ChannelEvent) -> Option<&ChannelState> {
        match event {
            ChannelEvent::StateChanged(state) => Some(state),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay_until_closed() {
        let connector = ClosingConnector::default();
        let attempts = connector.attempts.clone();
        let (handle, mut rx) = PushChannel::connect(config(), connector);

        let mut states = Vec::new();
        while attempts.lock().unwrap().len() < 4 {
            let event = rx.recv().await.unwrap();
            if let Some(state) = state(&event) {
                states.push(state.clone());
            }
        }

        assert_eq!(
            &states[..5],
            &[
                ChannelState::Connecting,
                ChannelState::Open,
                ChannelState::Closed(CloseCause::RemoteClosed),
                ChannelState::ReconnectWait { retry_in: DELAY },
                ChannelState::Connecting,
            ]
        );

        let attempts_at = attempts.lock().unwrap().clone();
        for pair in attempts_at.windows(2) {
            assert_eq!(pair[1] - pair[0], DELAY);
        }

        handle.close();
        let mut last = None;
        while let Some(event) = rx.recv().await {
            if let Some(state) = state(&event) {
                last = Some(state.clone());
            }
        }
        assert_eq!(last, Some(ChannelState::Closed(CloseCause::UserInitiated)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_wait_cancels_pending_reconnect() {
        let (handle, mut rx) = PushChannel::connect(config(), RefusingConnector);

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::Connecting)
        );
        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Error(ChannelError::Connect(_))));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::Closed(CloseCause::TransportError(_)))
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::ReconnectWait { retry_in: DELAY })
        );

        handle.close();
        assert!(handle.is_closed());

        let rest: Vec<ChannelEvent> = {
            let mut rest = Vec::new();
            while let Some(event) = rx.recv().await {
                rest.push(event);
            }
            rest
        };
        assert_eq!(
            rest,
            vec![ChannelEvent::StateChanged(ChannelState::Closed(CloseCause::UserInitiated))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_times_out_and_reconnects() {
        let (_handle, mut rx) = PushChannel::connect(config(), HangingConnector);
        let started = Instant::now();

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::Connecting)
        );
        match rx.recv().await.unwrap() {
            ChannelEvent::Error(ChannelError::Connect(reason)) => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("Expected connect error, got {other:?}"),
        }
        assert_eq!(started.elapsed(), CONNECT_TIMEOUT);

        assert!(matches!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::Closed(CloseCause::TransportError(_)))
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::ReconnectWait { retry_in: DELAY })
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::Connecting)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_keeps_channel_open() {
        let connector = ScriptedConnector::new(vec![
            Ok(Frame::Text("{not json".to_string())),
            Ok(Frame::Other),
            Ok(Frame::Text(STATS_FRAME.to_string())),
            Ok(Frame::Text(r#"{"type":"ping","data":{}}"#.to_string())),
        ]);
        let (handle, mut rx) = PushChannel::connect(config(), connector);

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::StateChanged(ChannelState::Connecting));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::StateChanged(ChannelState::Open));
        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::DecodeFailed(_)));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ChannelEvent::Message(PushMessage::Stats(_))
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::Message(PushMessage::Other { kind: "ping".to_string() })
        );

        handle.shutdown().await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ChannelState::Closed(CloseCause::UserInitiated))
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_close_sends_close_frame() {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let connector = ScriptedConnector {
            frames: vec![Ok(Frame::Text(STATS_FRAME.to_string()))],
            sent: Some(sent_tx),
        };
        let (handle, mut rx) = PushChannel::connect(config(), connector);

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::StateChanged(ChannelState::Connecting));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::StateChanged(ChannelState::Open));
        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Message(_)));
        assert!(sent_rx.try_recv().is_err());

        handle.shutdown().await;

        assert_eq!(sent_rx.try_recv(), Ok(Frame::Close));
        assert!(sent_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_sends_nothing() {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let connector = ScriptedConnector {
            frames: vec![Ok(Frame::Close)],
            sent: Some(sent_tx),
        };
        let (_handle, mut rx) = PushChannel::connect(config(), connector);

        loop {
            if let ChannelEvent::StateChanged(ChannelState::Closed(cause)) = rx.recv().await.unwrap() {
                assert_eq!(cause, CloseCause::RemoteClosed);
                break;
            }
        }
        assert!(sent_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_reports_then_reconnects() {
        let connector =
            ScriptedConnector::new(vec![Err(ChannelError::Transport("reset".to_string()))]);
        let (_handle, mut rx) = PushChannel::connect(config(), connector);

        let mut seen = Vec::new();
        while seen.len() < 6 {
            seen.push(rx.recv().await.unwrap());
        }

        assert_eq!(
            seen,
            vec![
                ChannelEvent::StateChanged(ChannelState::Connecting),
                ChannelEvent::StateChanged(ChannelState::Open),
                ChannelEvent::Error(ChannelError::Transport("reset".to_string())),
                ChannelEvent::StateChanged(ChannelState::Closed(CloseCause::TransportError(
                    "transport error: reset".to_string()
                ))),
                ChannelEvent::StateChanged(ChannelState::ReconnectWait { retry_in: DELAY }),
                ChannelEvent::StateChanged(ChannelState::Connecting),
            ]
        );
    }

    mod ws {
        use super::*;
        use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
        use axum::routing::get;
        use axum::Router;

        /// Serve a stats stream that sends one stats frame, then either hangs
        /// up or waits for the client. Close frames from the client are
        /// reported on `closes`.
        async fn serve(hang_up: bool, closes: mpsc::UnboundedSender<()>) -> String {
            let app = Router::new().route(
                "/api/stats/ws",
                get(move |ws: WebSocketUpgrade| {
                    let closes = closes.clone();
                    async move {
                        ws.on_upgrade(move |mut socket| async move {
                            let _ = socket.send(WsMessage::Text(STATS_FRAME.to_string())).await;
                            if hang_up {
                                let _ = socket.send(WsMessage::Close(None)).await;
                                return;
                            }
                            while let Some(Ok(msg)) = socket.recv().await {
                                if let WsMessage::Close(_) = msg {
                                    let _ = closes.send(());
                                    break;
                                }
                            }
                        })
                    }
                }),
            );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("ws://{}/api/stats/ws", addr)
        }

        fn ws_config(url: String) -> PushConfig {
            PushConfig {
                url,
                reconnect_delay: Duration::from_secs(60),
                connect_timeout: Duration::from_secs(5),
            }
        }

        async fn expect_open_with_stats(rx: &mut mpsc::Receiver<ChannelEvent>) {
            assert_eq!(rx.recv().await.unwrap(), ChannelEvent::StateChanged(ChannelState::Connecting));
            assert_eq!(rx.recv().await.unwrap(), ChannelEvent::StateChanged(ChannelState::Open));
            match rx.recv().await.unwrap() {
                ChannelEvent::Message(PushMessage::Stats(stats)) => assert_eq!(stats.queue.pending, 1),
                other => panic!("Expected stats message, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_ws_connector_reads_frames_from_server() {
            let (closes_tx, _closes_rx) = mpsc::unbounded_channel();
            let url = serve(true, closes_tx).await;
            let (handle, mut rx) = PushChannel::connect(ws_config(url), WsConnector);

            expect_open_with_stats(&mut rx).await;

            // The server hung up, so a reconnect is scheduled.
            loop {
                match rx.recv().await.unwrap() {
                    ChannelEvent::StateChanged(ChannelState::Closed(cause)) => {
                        assert!(cause.schedules_reconnect());
                        break;
                    }
                    ChannelEvent::Error(_) => {}
                    other => panic!("Unexpected event {other:?}"),
                }
            }

            handle.shutdown().await;
        }

        #[tokio::test]
        async fn test_ws_connector_sends_close_on_shutdown() {
            let (closes_tx, mut closes_rx) = mpsc::unbounded_channel();
            let url = serve(false, closes_tx).await;
            let (handle, mut rx) = PushChannel::connect(ws_config(url), WsConnector);

            expect_open_with_stats(&mut rx).await;
            handle.shutdown().await;

            tokio::time::timeout(Duration::from_secs(5), closes_rx.recv())
                .await
                .expect("server never saw a close frame")
                .unwrap();
        }
    }
}
