//! The connection driver and its handle.
//!
//! [`ConnectionManager`] owns everything mutable (lifecycle, history,
//! dispatcher, current link) and runs as a single task. Callers talk to
//! it through a cloneable [`ConnectionHandle`]; network activity reaches it
//! as epoch-tagged [`LinkEvent`]s. Because one task applies every change,
//! frames are decoded, recorded, and dispatched strictly in arrival order,
//! and a handler never runs concurrently with another.
//!
//! # Lifecycle
//!
//! 1. [`ConnectionManager::spawn`] starts the driver in `Disconnected`
//! 2. [`ConnectionHandle::start`] makes the first attempt
//! 3. Lost links are retried after the fixed delay until the attempt limit
//! 4. [`ConnectionHandle::stop`] (or exhausting retries) closes for good
//!
//! The driver exits when every handle has been dropped.

use std::sync::Arc;

use selfrep_types::{ChainConfig, Command, Envelope, Payload, StartChain, encode_frame};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, Handler, SubscriptionId};
use crate::error::ClientError;
use crate::history::{HistoryBuffer, HistoryEntry};
use crate::lifecycle::{Action, CloseReason, ConnectionState, Lifecycle};
use crate::transport::{Connector, Frame, Link};

/// Calls from a [`ConnectionHandle`] to the driver.
enum Request {
    Start,
    Stop,
    Send {
        frame: Frame,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    History {
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
    Subscribe {
        kind: String,
        handler: Handler,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        kind: String,
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
}

/// Network activity, tagged with the epoch of the attempt that caused it.
#[derive(Debug)]
enum LinkEvent {
    /// The attempt succeeded.
    Opened {
        epoch: u64,
        outbound: mpsc::UnboundedSender<Frame>,
    },
    /// The attempt failed before opening.
    Failed { epoch: u64, error: ClientError },
    /// A frame arrived on an open link.
    Frame { epoch: u64, frame: Frame },
    /// An open link ended, with the error if it broke.
    Lost {
        epoch: u64,
        error: Option<ClientError>,
    },
    /// The reconnect delay elapsed.
    ReconnectDue { epoch: u64 },
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Owns one logical session with the control plane.
pub struct ConnectionManager<C> {
    connector: Arc<C>,
    url: String,
    lifecycle: Lifecycle,
    history: HistoryBuffer,
    dispatcher: Dispatcher,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    link_task: Option<AbortHandle>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<C> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url)
            .field("lifecycle", &self.lifecycle)
            .field("history", &self.history.len())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Build a driver with a pre-populated dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `config` fails validation.
    pub fn new(
        connector: C,
        config: &ClientConfig,
        dispatcher: Dispatcher,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            connector: Arc::new(connector),
            url: config.url.clone(),
            lifecycle: Lifecycle::new(config.max_reconnect_attempts, config.reconnect_delay()),
            history: HistoryBuffer::new(config.history_capacity),
            dispatcher,
            outbound: None,
            link_task: None,
            events_tx,
            events_rx,
            state_tx,
        })
    }

    /// Run the driver on the current Tokio runtime.
    ///
    /// The session stays `Disconnected` until [`ConnectionHandle::start`].
    pub fn spawn(self) -> (ConnectionHandle, JoinHandle<()>) {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            requests,
            state: self.state_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(requests_rx));
        (handle, task)
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("all connection handles dropped, shutting down");
                        if let Some(action) = self.lifecycle.stop() {
                            self.perform(action);
                        }
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start => match self.lifecycle.start() {
                Some(action) => {
                    info!(url = %self.url, "starting event connection");
                    self.perform(action);
                }
                None => debug!(state = %self.lifecycle.state(), "start ignored"),
            },
            Request::Stop => {
                if let Some(action) = self.lifecycle.stop() {
                    self.perform(action);
                }
            }
            Request::Send { frame, reply } => {
                let _ = reply.send(self.send_frame(frame));
            }
            Request::History { reply } => {
                let _ = reply.send(self.history.snapshot());
            }
            Request::Subscribe {
                kind,
                handler,
                reply,
            } => {
                let _ = reply.send(self.dispatcher.subscribe_boxed(kind, handler));
            }
            Request::Unsubscribe { kind, id, reply } => {
                let _ = reply.send(self.dispatcher.unsubscribe(&kind, id));
            }
        }
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { epoch, outbound } => {
                if self.lifecycle.on_open(epoch) {
                    info!(url = %self.url, epoch, "event connection open");
                    self.outbound = Some(outbound);
                    self.publish_state();
                } else {
                    debug!(epoch, "dropping link from superseded attempt");
                }
            }
            LinkEvent::Failed { epoch, error } => {
                if let Some(action) = self.lifecycle.on_close(epoch) {
                    warn!(
                        url = %self.url,
                        error = %error,
                        attempts = self.lifecycle.attempts(),
                        "connection attempt failed"
                    );
                    self.perform(action);
                }
            }
            LinkEvent::Lost { epoch, error } => {
                if let Some(action) = self.lifecycle.on_close(epoch) {
                    match error {
                        Some(error) => warn!(error = %error, "event connection broke"),
                        None => info!("event connection closed by server"),
                    }
                    self.outbound = None;
                    self.link_task = None;
                    self.perform(action);
                }
            }
            LinkEvent::Frame { epoch, frame } => {
                if epoch == self.lifecycle.epoch()
                    && self.lifecycle.state() == ConnectionState::Connected
                {
                    self.receive(frame);
                } else {
                    trace!(epoch, "discarding frame from superseded link");
                }
            }
            LinkEvent::ReconnectDue { epoch } => {
                if let Some(action) = self.lifecycle.on_reconnect_due(epoch) {
                    self.perform(action);
                }
            }
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Connect { epoch } => self.open_link(epoch),
            Action::ScheduleReconnect { epoch, delay } => {
                info!(delay_secs = delay.as_secs(), "reconnecting after delay");
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(LinkEvent::ReconnectDue { epoch });
                });
            }
            Action::Closed(reason) => {
                self.outbound = None;
                if let Some(task) = self.link_task.take() {
                    task.abort();
                }
                match reason {
                    CloseReason::Stopped => info!("event connection stopped"),
                    CloseReason::ExhaustedRetries { attempts } => {
                        warn!(attempts, url = %self.url, "giving up on event connection");
                    }
                }
            }
        }
        self.publish_state();
    }

    /// Spawn the task that dials and then forwards the link's traffic.
    fn open_link(&mut self, epoch: u64) {
        debug!(url = %self.url, epoch, "connecting");
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let Link {
                outbound,
                mut inbound,
            } = match connector.connect(&url).await {
                Ok(link) => link,
                Err(error) => {
                    let _ = events.send(LinkEvent::Failed { epoch, error });
                    return;
                }
            };
            if events.send(LinkEvent::Opened { epoch, outbound }).is_err() {
                return;
            }
            let error = loop {
                match inbound.recv().await {
                    Some(Ok(frame)) => {
                        if events.send(LinkEvent::Frame { epoch, frame }).is_err() {
                            return;
                        }
                    }
                    Some(Err(error)) => break Some(error),
                    None => break None,
                }
            };
            let _ = events.send(LinkEvent::Lost { epoch, error });
        });
        if let Some(previous) = self.link_task.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Decode, record, then dispatch one inbound frame.
    fn receive(&mut self, frame: Frame) {
        let decoded = match frame {
            Frame::Text(text) => Envelope::from_json(&text),
            Frame::Binary(bytes) => Envelope::from_protobuf(&bytes),
        };
        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(e) => {
                let error = ClientError::from(e);
                warn!(error = %error, "dropping undecodable envelope");
                return;
            }
        };

        let sequence = self.history.append(envelope);
        let Some(entry) = self.history.latest() else {
            return;
        };
        let report = self.dispatcher.dispatch(&entry.envelope);
        trace!(
            sequence,
            kind = entry.envelope.kind(),
            delivered = report.delivered,
            failed = report.failures.len(),
            "envelope dispatched"
        );
    }

    fn send_frame(&self, frame: Frame) -> Result<(), ClientError> {
        let state = self.lifecycle.state();
        match (&self.outbound, state) {
            (Some(outbound), ConnectionState::Connected) => outbound
                .send(frame)
                .or(Err(ClientError::Transport("link closed while sending".to_owned()))),
            _ => {
                debug!(state = %state, "send dropped while not connected");
                Err(ClientError::NotConnected { state })
            }
        }
    }

    fn publish_state(&self) {
        let state = self.lifecycle.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable control surface for a running [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Send { .. } => "Send",
            Self::History { .. } => "History",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
        };
        f.write_str(name)
    }
}

impl ConnectionHandle {
    /// Begin connecting. Ignored unless the session is `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the driver is gone.
    pub fn start(&self) -> Result<(), ClientError> {
        self.submit(Request::Start)
    }

    /// Close the session. Any pending reconnect is cancelled and no further
    /// attempt will be made. Stopping a closed session does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the driver is gone.
    pub fn stop(&self) -> Result<(), ClientError> {
        self.submit(Request::Stop)
    }

    /// Send `{"type": kind, "payload": payload}` as a text frame.
    ///
    /// The payload goes out exactly as given.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] unless the session is `Connected`
    /// - [`ClientError::ProtocolViolation`] if `kind` is empty
    /// - [`ClientError::Shutdown`] if the driver is gone
    pub async fn send(&self, kind: &str, payload: Value) -> Result<(), ClientError> {
        let text = encode_frame(kind, payload)?;
        self.call(|reply| Request::Send {
            frame: Frame::Text(text),
            reply,
        })
        .await?
    }

    /// Send an outbound command.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::send`].
    pub async fn send_command(&self, command: Command) -> Result<(), ClientError> {
        self.send(command.kind(), command.payload()?).await
    }

    /// Ask the control plane to start a replication chain.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::send`].
    pub async fn start_chain(&self, max_depth: u32, config: ChainConfig) -> Result<(), ClientError> {
        self.send_command(Command::StartChain(StartChain { max_depth, config }))
            .await
    }

    /// Ask the control plane to stop the running chain.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::send`].
    pub async fn stop_chain(&self) -> Result<(), ClientError> {
        self.send_command(Command::StopChain).await
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the session is open.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ExhaustedRetries`] or
    /// [`ClientError::NotConnected`] if the session closes first.
    pub async fn wait_connected(&self) -> Result<(), ClientError> {
        let state = self
            .wait_for(|s| *s == ConnectionState::Connected || s.is_closed())
            .await?;
        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closed(CloseReason::ExhaustedRetries { attempts }) => {
                Err(ClientError::ExhaustedRetries { attempts })
            }
            state => Err(ClientError::NotConnected { state }),
        }
    }

    /// Wait until the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ExhaustedRetries`] when the session ended by
    /// giving up rather than by [`ConnectionHandle::stop`].
    pub async fn closed(&self) -> Result<(), ClientError> {
        match self.wait_for(|s| s.is_closed()).await? {
            ConnectionState::Closed(CloseReason::ExhaustedRetries { attempts }) => {
                Err(ClientError::ExhaustedRetries { attempts })
            }
            _ => Ok(()),
        }
    }

    /// A copy of the history buffer, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the driver is gone.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ClientError> {
        self.call(|reply| Request::History { reply }).await
    }

    /// Register a handler for envelopes of type `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the driver is gone.
    pub async fn subscribe<F>(
        &self,
        kind: impl Into<String>,
        handler: F,
    ) -> Result<SubscriptionId, ClientError>
    where
        F: FnMut(&Payload) -> anyhow::Result<()> + Send + 'static,
    {
        let kind = kind.into();
        self.call(|reply| Request::Subscribe {
            kind,
            handler: Box::new(handler),
            reply,
        })
        .await
    }

    /// Remove a handler. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the driver is gone.
    pub async fn unsubscribe(
        &self,
        kind: impl Into<String>,
        id: SubscriptionId,
    ) -> Result<bool, ClientError> {
        let kind = kind.into();
        self.call(|reply| Request::Unsubscribe { kind, id, reply })
            .await
    }

    fn submit(&self, request: Request) -> Result<(), ClientError> {
        self.requests.send(request).or(Err(ClientError::Shutdown))
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, ClientError> {
        let (reply, response) = oneshot::channel();
        self.submit(request(reply))?;
        response.await.or(Err(ClientError::Shutdown))
    }

    async fn wait_for(
        &self,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, ClientError> {
        let mut state = self.state.clone();
        let result = state.wait_for(predicate).await.map(|s| *s);
        result.or(Err(ClientError::Shutdown))
    }
}
