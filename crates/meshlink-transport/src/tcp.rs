use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::params::TcpParams;
use crate::reader::{join_reader, spawn_stream_reader};
use crate::state::{lock, LinkState};
use crate::traits::{LinkListener, Transport, TransportKind};

/// TCP/Wi-Fi link to a radio's API port.
pub struct TcpLink {
    params: TcpParams,
    state: Arc<LinkState>,
    stream: Arc<Mutex<Option<TcpStream>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpLink {
    pub fn new(params: TcpParams) -> Self {
        Self {
            params,
            state: LinkState::new(),
            stream: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &TcpParams {
        &self.params
    }

    async fn teardown(&self) {
        self.state.begin_stop();
        if let Some(stream) = lock(&self.stream).as_ref() {
            // Unblocks the reader immediately instead of waiting for its timeout.
            let _ = stream.shutdown(Shutdown::Both);
        }
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            join_reader(reader).await;
        }
        if lock(&self.stream).take().is_some() {
            debug!(endpoint = %self.params.endpoint(), "tcp stream closed");
        }
    }
}

fn open_stream(params: &TcpParams) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (params.host.as_str(), params.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, params.connect_timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(params.read_timeout))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                debug!(%addr, error = %err, "tcp connect attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

impl Transport for TcpLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn display_name(&self) -> String {
        self.params.endpoint()
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    async fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()> {
        if self.state.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }
        self.teardown().await;

        let target = self.params.endpoint();
        let params = self.params.clone();
        let stream = tokio::task::spawn_blocking(move || open_stream(&params))
            .await
            .map_err(|err| TransportError::connect_failed(&target, err))?
            .map_err(|err| TransportError::connect_failed(&target, err))?;
        let reader_stream = stream
            .try_clone()
            .map_err(|err| TransportError::connect_failed(&target, err))?;

        *lock(&self.stream) = Some(stream);
        self.state.attach(listener);
        self.state.set_connected(true);

        match spawn_stream_reader("meshlink-tcp", reader_stream, self.state.clone(), true) {
            Ok(handle) => *lock(&self.reader) = Some(handle),
            Err(err) => {
                self.disconnect().await;
                return Err(TransportError::connect_failed(&target, err));
            }
        }

        info!(endpoint = %target, "tcp link open");
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if !self.state.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let stream = Arc::clone(&self.stream);
        let data = data.to_vec();
        let len = data.len();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = lock(&stream);
            let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
            stream.write_all(&data).map_err(TransportError::write_failed)?;
            stream.flush().map_err(TransportError::write_failed)
        })
        .await
        .map_err(TransportError::write_failed)??;

        trace!(len, "tcp write");
        tokio::time::sleep(self.params.write_pacing).await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.teardown().await;
        self.state.set_connected(false);
        self.state.detach();
    }
}
