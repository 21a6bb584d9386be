use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{BoxError, Result, TransportError};
use crate::params::BleParams;
use crate::state::{lock, LinkState};
use crate::traits::{LinkListener, Transport, TransportKind};

/// Mesh radio GATT service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6ba1b218_15a8_461f_9fa8_5dcae273eafd);
/// Client → radio mailbox.
pub const TO_RADIO_UUID: Uuid = Uuid::from_u128(0xf75c76d2_129e_4dad_a1dd_7866124401e7);
/// Radio → client mailbox, one message per read, empty when drained.
pub const FROM_RADIO_UUID: Uuid = Uuid::from_u128(0x2c55e69e_4993_11ed_b878_0242ac120002);
/// Counter the radio bumps when FromRadio has new data.
pub const FROM_NUM_UUID: Uuid = Uuid::from_u128(0xed9da18c_a800_4f66_a670_aa7547e34453);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);
const MAX_POLL_FAILURES: u32 = 3;

/// Reads FromRadio and forwards each message in order.
///
/// The poll task, notification task and post-write drains all read through
/// the same gate so messages are never reordered.
#[derive(Clone)]
struct Mailbox {
    peripheral: Peripheral,
    from_radio: Characteristic,
    state: Arc<LinkState>,
    gate: Arc<tokio::sync::Mutex<()>>,
    max_drain_reads: usize,
}

impl Mailbox {
    async fn read_once(&self) -> std::result::Result<bool, btleplug::Error> {
        let _gate = self.gate.lock().await;
        let data = self.peripheral.read(&self.from_radio).await?;
        if data.is_empty() {
            return Ok(false);
        }
        trace!(len = data.len(), "ble read");
        self.state.deliver(Bytes::from(data));
        Ok(true)
    }

    async fn forward(&self, data: Vec<u8>) {
        let _gate = self.gate.lock().await;
        self.state.deliver(Bytes::from(data));
    }

    /// Read until the mailbox reports empty.
    async fn drain(&self) {
        for _ in 0..self.max_drain_reads {
            match self.read_once().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    debug!(error = %err, "drain read failed");
                    break;
                }
            }
        }
    }
}

struct Connection {
    peripheral: Peripheral,
    to_radio: Characteristic,
    write_type: WriteType,
    mailbox: Mailbox,
    name: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Bluetooth LE link.
///
/// The radio exposes mailbox characteristics rather than a stream: every
/// FromRadio read yields one whole message, so no framing is applied.
pub struct BleLink {
    params: BleParams,
    state: Arc<LinkState>,
    conn: Mutex<Option<Connection>>,
}

impl BleLink {
    pub fn new(params: BleParams) -> Self {
        Self {
            params,
            state: LinkState::new(),
            conn: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &BleParams {
        &self.params
    }

    async fn teardown(&self) {
        self.state.begin_stop();
        let conn = lock(&self.conn).take();
        let Some(conn) = conn else {
            return;
        };
        conn.cancel.cancel();
        for task in conn.tasks {
            if let Err(err) = task.await {
                debug!(error = %err, "ble task ended abnormally");
            }
        }
        if let Err(err) = conn.peripheral.disconnect().await {
            debug!(error = %err, "ble disconnect failed");
        }
        debug!(device = %conn.name, "ble link closed");
    }

    async fn open(&self) -> std::result::Result<Connection, BoxError> {
        let adapter = first_adapter().await?;
        let peripheral = find_peripheral(&adapter, &self.params).await?;
        let name = peripheral_name(&peripheral).await;

        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| characteristics.iter().find(|c| c.uuid == uuid).cloned();
        let to_radio = find(TO_RADIO_UUID).ok_or("device has no ToRadio characteristic")?;
        let from_radio = find(FROM_RADIO_UUID).ok_or("device has no FromRadio characteristic")?;
        let from_num = find(FROM_NUM_UUID);

        let write_type = if to_radio
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        for characteristic in from_num.iter().chain(std::iter::once(&from_radio)) {
            if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
                continue;
            }
            if let Err(err) = peripheral.subscribe(characteristic).await {
                debug!(uuid = %characteristic.uuid, error = %err, "notification subscribe failed");
            }
        }

        let mailbox = Mailbox {
            peripheral: peripheral.clone(),
            from_radio,
            state: self.state.clone(),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            max_drain_reads: self.params.max_drain_reads,
        };

        Ok(Connection {
            peripheral,
            to_radio,
            write_type,
            mailbox,
            name,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }
}

async fn first_adapter() -> std::result::Result<Adapter, BoxError> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or("no bluetooth adapter available")?;
    Ok(adapter)
}

async fn peripheral_name(peripheral: &Peripheral) -> String {
    match peripheral.properties().await {
        Ok(Some(props)) => props
            .local_name
            .unwrap_or_else(|| peripheral.address().to_string()),
        _ => peripheral.address().to_string(),
    }
}

async fn matches_target(peripheral: &Peripheral, target: &str) -> bool {
    if target.is_empty() {
        return true;
    }
    if peripheral.address().to_string().eq_ignore_ascii_case(target) {
        return true;
    }
    match peripheral.properties().await {
        Ok(Some(props)) => props
            .local_name
            .is_some_and(|name| name.eq_ignore_ascii_case(target)),
        _ => false,
    }
}

async fn find_peripheral(
    adapter: &Adapter,
    params: &BleParams,
) -> std::result::Result<Peripheral, BoxError> {
    adapter
        .start_scan(ScanFilter {
            services: vec![SERVICE_UUID],
        })
        .await?;

    let deadline = Instant::now() + params.scan_timeout;
    let found = loop {
        let mut hit = None;
        for peripheral in adapter.peripherals().await? {
            if matches_target(&peripheral, &params.target).await {
                hit = Some(peripheral);
                break;
            }
        }
        if hit.is_some() || Instant::now() >= deadline {
            break hit;
        }
        sleep(SCAN_POLL_INTERVAL).await;
    };

    if let Err(err) = adapter.stop_scan().await {
        debug!(error = %err, "stop scan failed");
    }
    found.ok_or_else(|| format!("no mesh device matching '{}' found", params.target).into())
}

fn spawn_poller(
    mailbox: Mailbox,
    cancel: CancellationToken,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = mailbox.read_once() => read,
            };
            match read {
                // More may be queued; read again without sleeping.
                Ok(true) => {
                    failures = 0;
                    continue;
                }
                Ok(false) => failures = 0,
                Err(err) => {
                    failures += 1;
                    debug!(error = %err, failures, "FromRadio poll failed");
                    if failures >= MAX_POLL_FAILURES {
                        warn!(error = %err, "bluetooth link lost");
                        mailbox.state.mark_lost();
                        break;
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(poll_interval) => {}
            }
        }
    })
}

async fn spawn_notifications(
    peripheral: &Peripheral,
    mailbox: Mailbox,
    cancel: CancellationToken,
) -> std::result::Result<JoinHandle<()>, btleplug::Error> {
    let mut notifications = peripheral.notifications().await?;
    Ok(tokio::spawn(async move {
        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                next = notifications.next() => match next {
                    Some(notification) => notification,
                    None => break,
                },
            };
            if notification.uuid == FROM_NUM_UUID {
                mailbox.drain().await;
            } else if notification.uuid == FROM_RADIO_UUID && !notification.value.is_empty() {
                mailbox.forward(notification.value).await;
            }
        }
    }))
}

impl Transport for BleLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn display_name(&self) -> String {
        match lock(&self.conn).as_ref() {
            Some(conn) => conn.name.clone(),
            None => self.params.target.clone(),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    async fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()> {
        if self.state.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }
        self.teardown().await;

        let target = if self.params.target.is_empty() {
            "first mesh device".to_string()
        } else {
            self.params.target.clone()
        };
        let mut conn = self
            .open()
            .await
            .map_err(|err| TransportError::connect_failed(&target, err))?;

        self.state.attach(listener);
        self.state.set_connected(true);

        match spawn_notifications(&conn.peripheral, conn.mailbox.clone(), conn.cancel.clone())
            .await
        {
            Ok(task) => conn.tasks.push(task),
            Err(err) => debug!(error = %err, "notifications unavailable, polling only"),
        }
        conn.tasks.push(spawn_poller(
            conn.mailbox.clone(),
            conn.cancel.clone(),
            self.params.poll_interval,
        ));

        info!(device = %conn.name, ?conn.write_type, "ble link open");
        *lock(&self.conn) = Some(conn);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let (peripheral, to_radio, write_type, mailbox) = {
            let guard = lock(&self.conn);
            let conn = guard.as_ref().ok_or(TransportError::NotConnected)?;
            (
                conn.peripheral.clone(),
                conn.to_radio.clone(),
                conn.write_type,
                conn.mailbox.clone(),
            )
        };
        if !self.state.is_connected() {
            return Err(TransportError::NotConnected);
        }

        peripheral
            .write(&to_radio, data, write_type)
            .await
            .map_err(TransportError::write_failed)?;
        trace!(len = data.len(), "ble write");

        mailbox.drain().await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.teardown().await;
        self.state.set_connected(false);
        self.state.detach();
    }
}

/// A nearby peripheral advertising the mesh service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDevice {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

/// Scan for mesh radios for `duration`.
pub async fn scan(duration: Duration) -> Result<Vec<BleDevice>> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Unsupported("bluetooth (no adapter)"))?;

    adapter
        .start_scan(ScanFilter {
            services: vec![SERVICE_UUID],
        })
        .await?;
    sleep(duration).await;
    let peripherals = adapter.peripherals().await?;
    if let Err(err) = adapter.stop_scan().await {
        debug!(error = %err, "stop scan failed");
    }

    let mut devices = Vec::with_capacity(peripherals.len());
    for peripheral in peripherals {
        let props = peripheral.properties().await?.unwrap_or_default();
        if !props.services.is_empty() && !props.services.contains(&SERVICE_UUID) {
            continue;
        }
        devices.push(BleDevice {
            name: props.local_name,
            address: peripheral.address().to_string(),
            rssi: props.rssi,
        });
    }
    devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    Ok(devices)
}
