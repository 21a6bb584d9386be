//! The device session: owns a transport, frames its traffic and drives the
//! radio from connect to ready.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use meshlink_frame::{frame_bytes, AssemblerEvent, FrameAssembler};
use meshlink_transport::{ConnectParams, Link, LinkListener, Transport};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Level};

use crate::channel::channel_info;
use crate::codec::{Outbound, ProtobufCodec, RadioCodec};
use crate::config::SessionConfig;
use crate::diagnostics;
use crate::error::{Anomaly, Result, SessionError};
use crate::event::{EventSink, SessionEvent, SessionState};
use crate::handshake::InitReport;
use crate::radio::{
    ChannelInfo, ChannelRecord, ChannelRole, DeviceIdentity, LoraConfig, NodeNum, NodeRecord,
    BROADCAST, MAX_CHANNELS,
};
use crate::recovery::RecoveryMonitor;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sleep for `duration` unless the session is torn down first.
pub(crate) async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Everything learned from the radio during one connection.
#[derive(Debug, Default)]
pub(crate) struct SessionData {
    pub(crate) nodes: BTreeMap<NodeNum, NodeRecord>,
    pub(crate) channels: BTreeMap<u32, ChannelRecord>,
    pub(crate) lora: Option<LoraConfig>,
    pub(crate) own_num: Option<NodeNum>,
    pub(crate) identity: Option<DeviceIdentity>,
    /// Channel slots answered by an admin get-channel response.
    pub(crate) confirmed: BTreeSet<u32>,
    pub(crate) config_complete: bool,
    /// While set, dispatch only records; events are replayed later.
    pub(crate) initializing: bool,
    pub(crate) packet_count: u64,
}

impl SessionData {
    fn clear(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn channel_infos(&self) -> Vec<ChannelInfo> {
        self.channels
            .values()
            .filter(|c| c.role != ChannelRole::Disabled)
            .map(|c| channel_info(c, self.lora.as_ref()))
            .collect()
    }
}

/// Per-connection control handles.
struct Control {
    cancel: CancellationToken,
    runtime: Option<Handle>,
    init: Option<JoinHandle<Result<InitReport>>>,
    /// Transport shutdown started after a lost link.
    teardown: Option<JoinHandle<()>>,
}

pub(crate) struct Shared<T: Transport> {
    pub(crate) transport: T,
    pub(crate) codec: Box<dyn RadioCodec>,
    pub(crate) config: SessionConfig,
    pub(crate) data: Mutex<SessionData>,
    pub(crate) assembler: Mutex<FrameAssembler>,
    pub(crate) recovery: RecoveryMonitor,
    sink: Box<dyn EventSink>,
    state: watch::Sender<SessionState>,
    control: Mutex<Control>,
}

impl<T: Transport> Shared<T> {
    pub(crate) fn data(&self) -> MutexGuard<'_, SessionData> {
        lock(&self.data)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        lock(&self.control).cancel.clone()
    }

    fn runtime(&self) -> Option<Handle> {
        lock(&self.control).runtime.clone()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }

    /// Emit unless the session is being torn down.
    pub(crate) fn emit_all(&self, cancel: &CancellationToken, events: Vec<SessionEvent>) {
        for event in events {
            if cancel.is_cancelled() {
                return;
            }
            self.sink.emit(event);
        }
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        self.announce(prev, next);
    }

    fn announce(&self, prev: SessionState, next: SessionState) {
        if prev != next {
            info!(from = %prev, to = %next, "session state changed");
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    /// Move to `next` unless `cancel` fired. Disconnect and link loss cancel
    /// under the same lock, so a late transition never overwrites theirs.
    pub(crate) fn transition(&self, cancel: &CancellationToken, next: SessionState) -> bool {
        let prev = {
            let _control = lock(&self.control);
            if cancel.is_cancelled() {
                return false;
            }
            self.state.send_replace(next)
        };
        self.announce(prev, next);
        true
    }

    /// Encode, frame when the link needs it, and write one message.
    pub(crate) async fn send(&self, cancel: &CancellationToken, message: &Outbound) -> Result<()> {
        let payload = self.codec.encode(message);
        let bytes = if self.transport.needs_framing() {
            frame_bytes(&payload)?
        } else {
            Bytes::from(payload)
        };
        self.write_raw(cancel, &bytes).await
    }

    pub(crate) async fn write_raw(&self, cancel: &CancellationToken, bytes: &[u8]) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if tracing::enabled!(Level::TRACE) {
            trace!(len = bytes.len(), data = %hex(bytes), "tx");
        }
        self.transport.write(bytes).await?;
        Ok(())
    }

    fn on_data(self: &Arc<Self>, data: &[u8]) {
        let cancel = self.cancel_token();
        if cancel.is_cancelled() {
            return;
        }
        if tracing::enabled!(Level::TRACE) {
            trace!(len = data.len(), data = %hex(data), "rx");
        }

        if !self.transport.needs_framing() {
            self.dispatch(&cancel, data);
            return;
        }

        let now = tokio::time::Instant::now().into_std();
        let (events, last_frame_at, text_runs, text_arrived) = {
            let mut assembler = lock(&self.assembler);
            let before = assembler.text_runs();
            let events = assembler.push_at(data, now);
            let runs = assembler.text_runs();
            (events, assembler.last_frame_at(), runs, runs > before)
        };

        for event in events {
            match event {
                AssemblerEvent::Frame(payload) => self.dispatch(&cancel, &payload),
                AssemblerEvent::TextLine(line) => {
                    diagnostics::log_line(&line);
                    if !cancel.is_cancelled() {
                        self.emit(SessionEvent::DeviceLog(line));
                    }
                }
                AssemblerEvent::Discarded(reason) => debug!(%reason, "discarded stream bytes"),
            }
        }

        // Only fresh console text means the radio fell out of protobuf mode.
        if !text_arrived {
            return;
        }
        let initializing = self.data().initializing;
        if self
            .recovery
            .should_trigger(last_frame_at, text_runs, initializing, now)
        {
            self.start_recovery(cancel, last_frame_at.map(|at| now.saturating_duration_since(at)));
        }
    }

    fn start_recovery(self: &Arc<Self>, cancel: CancellationToken, silent_for: Option<Duration>) {
        let Some(runtime) = self.runtime() else {
            return;
        };
        if !self.recovery.try_begin() {
            return;
        }
        let anomaly = Anomaly::Desynchronized {
            silent_for: silent_for.unwrap_or_default(),
        };
        warn!(%anomaly, "attempting protocol recovery");
        let shared = Arc::clone(self);
        runtime.spawn(async move { shared.recover(&cancel).await });
    }

    fn on_link_changed(self: &Arc<Self>, connected: bool) {
        if connected {
            debug!(transport = %self.transport.display_name(), "link up");
            return;
        }
        {
            let mut control = lock(&self.control);
            if control.cancel.is_cancelled() {
                return;
            }
            control.cancel.cancel();
            // The task winds down on its own once cancelled.
            control.init.take();
            if let Some(runtime) = control.runtime.clone() {
                let shared = Arc::clone(self);
                control.teardown =
                    Some(runtime.spawn(async move { shared.transport.disconnect().await }));
            }
        }
        warn!(transport = %self.transport.display_name(), "link lost");
        self.data().initializing = false;
        self.set_state(SessionState::Error);
    }
}

struct SessionListener<T: Transport>(Weak<Shared<T>>);

impl<T: Transport> LinkListener for SessionListener<T> {
    fn on_data(&self, data: Bytes) {
        if let Some(shared) = self.0.upgrade() {
            shared.on_data(&data);
        }
    }

    fn on_connection_changed(&self, connected: bool) {
        if let Some(shared) = self.0.upgrade() {
            shared.on_link_changed(connected);
        }
    }
}

/// A client session with one mesh radio.
///
/// `connect` opens the transport and starts initialization in the background:
/// the radio's configuration dump is collected silently, then replayed to the
/// event sink in a fixed order (nodes, own identity, channels, radio config)
/// before the session turns [`Ready`](SessionState::Ready). Missing channel
/// slots are requested one by one afterwards.
///
/// Must be connected from within a tokio runtime.
pub struct DeviceSession<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl DeviceSession<Link> {
    /// Build a session over the link described by `params`.
    pub fn for_params(
        params: ConnectParams,
        config: SessionConfig,
        sink: impl EventSink,
    ) -> Result<Self> {
        Ok(Self::with_config(Link::new(params)?, config, sink))
    }
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(transport: T, sink: impl EventSink) -> Self {
        Self::with_config(transport, SessionConfig::default(), sink)
    }

    pub fn with_config(transport: T, config: SessionConfig, sink: impl EventSink) -> Self {
        Self::with_codec(transport, ProtobufCodec, config, sink)
    }

    /// Use a custom codec for the radio's message schema.
    pub fn with_codec(
        transport: T,
        codec: impl RadioCodec,
        config: SessionConfig,
        sink: impl EventSink,
    ) -> Self {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let assembler = FrameAssembler::with_config(config.assembler.clone());
        let recovery = RecoveryMonitor::new(config.recovery_silence);
        Self {
            shared: Arc::new(Shared {
                transport,
                codec: Box::new(codec),
                config,
                data: Mutex::new(SessionData::default()),
                assembler: Mutex::new(assembler),
                recovery,
                sink: Box::new(sink),
                state: watch::channel(SessionState::Disconnected).0,
                control: Mutex::new(Control {
                    cancel,
                    runtime: None,
                    init: None,
                    teardown: None,
                }),
            }),
        }
    }

    /// Open the transport and start initialization.
    ///
    /// Returns once the link is up; initialization continues in the
    /// background. Use [`wait_until_ready`](Self::wait_until_ready) or
    /// [`join_initialization`](Self::join_initialization) to follow it.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let (cancel, teardown, prev) = {
            let mut control = lock(&shared.control);
            let state = *shared.state.borrow();
            if state.is_active() || state == SessionState::Disconnecting {
                return Err(SessionError::AlreadyActive(state));
            }
            control.cancel = CancellationToken::new();
            control.runtime = Some(Handle::current());
            control.init = None;
            let prev = shared.state.send_replace(SessionState::Connecting);
            (control.cancel.clone(), control.teardown.take(), prev)
        };
        shared.announce(prev, SessionState::Connecting);
        if let Some(teardown) = teardown {
            let _ = teardown.await;
        }

        // Step 1 runs before the link opens so nothing early is lost.
        {
            let mut data = shared.data();
            data.clear();
            data.initializing = true;
        }
        lock(&shared.assembler).reset();

        info!(
            transport = %shared.transport.kind(),
            target = %shared.transport.display_name(),
            "connecting"
        );
        let listener: Arc<dyn LinkListener> = Arc::new(SessionListener(Arc::downgrade(shared)));
        if let Err(err) = shared.transport.connect(listener).await {
            warn!(error = %err, "connect failed");
            shared.data().initializing = false;
            shared.transition(&cancel, SessionState::Error);
            return Err(err.into());
        }

        if !shared.transition(&cancel, SessionState::Initializing) {
            return Err(SessionError::Cancelled);
        }

        let task = {
            let shared = Arc::clone(shared);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = shared.initialize(&cancel).await;
                match &result {
                    Ok(report) => info!(
                        nodes = report.nodes,
                        channels = report.channels,
                        elapsed = ?report.elapsed,
                        "initialization finished"
                    ),
                    Err(SessionError::Cancelled) => debug!("initialization cancelled"),
                    Err(err) => {
                        warn!(error = %err, "initialization failed");
                        shared.data().initializing = false;
                        shared.transition(&cancel, SessionState::Error);
                    }
                }
                result
            })
        };
        lock(&shared.control).init = Some(task);
        Ok(())
    }

    /// Tear the session down. Idempotent.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let (init, teardown, was) = {
            let mut control = lock(&shared.control);
            control.cancel.cancel();
            (
                control.init.take(),
                control.teardown.take(),
                *shared.state.borrow(),
            )
        };
        if let Some(teardown) = teardown {
            let _ = teardown.await;
        }

        if was == SessionState::Disconnected && init.is_none() {
            shared.transport.disconnect().await;
            return;
        }

        info!("disconnecting");
        shared.set_state(SessionState::Disconnecting);
        shared.data().initializing = false;
        shared.transport.disconnect().await;
        if let Some(init) = init {
            let _ = init.await;
        }

        shared.data().clear();
        lock(&shared.assembler).reset();
        shared.set_state(SessionState::Disconnected);
    }

    /// Send a text message; returns the packet id used.
    ///
    /// `destination` defaults to broadcast. `channel` is a slot index 0–7.
    pub async fn send_message(
        &self,
        text: &str,
        destination: Option<NodeNum>,
        channel: u32,
    ) -> Result<u32> {
        if channel >= MAX_CHANNELS {
            return Err(SessionError::InvalidChannel(channel));
        }
        let cancel = self.live_token()?;
        let from = self.shared.data().own_num.unwrap_or(0);
        let packet_id = rand::random();
        let to = destination.unwrap_or(BROADCAST);
        self.shared
            .send(
                &cancel,
                &Outbound::Text {
                    from,
                    to,
                    channel,
                    packet_id,
                    hop_limit: self.shared.config.hop_limit,
                    text: text.to_string(),
                },
            )
            .await?;
        debug!(to = format_args!("{to:08x}"), channel, packet_id, "text message sent");
        Ok(packet_id)
    }

    /// Ask the radio for one channel slot (0–7). The answer arrives as a
    /// [`ChannelUpdated`](SessionEvent::ChannelUpdated) event.
    pub async fn request_channel(&self, index: u32) -> Result<()> {
        if index >= MAX_CHANNELS {
            return Err(SessionError::InvalidChannel(index));
        }
        let cancel = self.live_token()?;
        let node = self
            .shared
            .data()
            .own_num
            .ok_or(SessionError::IdentityUnknown)?;
        self.shared.request_channel(&cancel, node, index).await
    }

    fn live_token(&self) -> Result<CancellationToken> {
        let cancel = self.shared.cancel_token();
        if cancel.is_cancelled() || !self.shared.transport.is_connected() {
            return Err(SessionError::NotConnected);
        }
        Ok(cancel)
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session is ready.
    ///
    /// Fails with `NotConnected` if the session ends up disconnected or in
    /// error instead, and with `Timeout` after `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe_state();
        let wait = async move {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    SessionState::Ready => return Ok(()),
                    SessionState::Disconnected | SessionState::Error => {
                        return Err(SessionError::NotConnected)
                    }
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(SessionError::NotConnected);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
    }

    /// Wait for the background initialization of the current connection.
    pub async fn join_initialization(&self) -> Result<InitReport> {
        let task = lock(&self.shared.control).init.take();
        match task {
            Some(task) => task.await.map_err(|_| SessionError::Cancelled)?,
            None => Err(SessionError::NotConnected),
        }
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.shared.data().nodes.values().cloned().collect()
    }

    /// Enabled channels with resolved names.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.shared.data().channel_infos()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.shared.data().identity.clone()
    }

    pub fn radio_config(&self) -> Option<LoraConfig> {
        self.shared.data().lora.clone()
    }

    pub fn packet_count(&self) -> u64 {
        self.shared.data().packet_count
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        lock(&self.shared.control).cancel.cancel();
    }
}

impl<T: Transport> std::fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("transport", &self.shared.transport.kind())
            .field("target", &self.shared.transport.display_name())
            .field("state", &self.state())
            .finish()
    }
}
