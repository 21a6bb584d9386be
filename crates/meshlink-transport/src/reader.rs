use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::state::LinkState;

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Spawn the dedicated reader thread for a byte-stream link.
///
/// Read timeouts are idle ticks used to notice a stop request. Any other
/// error, or EOF when `eof_closes` is set, reports the link lost.
pub(crate) fn spawn_stream_reader<R>(
    name: &str,
    mut source: R,
    state: Arc<LinkState>,
    eof_closes: bool,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            loop {
                if state.is_stopping() {
                    debug!("reader stopping");
                    return;
                }
                match source.read(&mut chunk) {
                    Ok(0) if eof_closes => {
                        info!("remote closed the connection");
                        break;
                    }
                    Ok(0) => continue,
                    Ok(n) => state.deliver(Bytes::copy_from_slice(&chunk[..n])),
                    Err(err)
                        if matches!(
                            err.kind(),
                            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                        ) =>
                    {
                        continue
                    }
                    Err(err) => {
                        if !state.is_stopping() {
                            warn!(error = %err, "read failed");
                        }
                        break;
                    }
                }
            }
            if !state.is_stopping() {
                state.mark_lost();
            }
        })
}

/// Wait for a reader thread without blocking the async runtime.
pub(crate) async fn join_reader(handle: JoinHandle<()>) {
    if handle.thread().id() == std::thread::current().id() {
        return;
    }
    if tokio::task::spawn_blocking(move || handle.join())
        .await
        .is_err()
    {
        debug!("reader join task failed");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::traits::LinkListener;

    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<u8>>,
        transitions: Mutex<Vec<bool>>,
    }

    impl LinkListener for Recorder {
        fn on_data(&self, data: Bytes) {
            self.data.lock().unwrap().extend_from_slice(&data);
        }

        fn on_connection_changed(&self, connected: bool) {
            self.transitions.lock().unwrap().push(connected);
        }
    }

    #[test]
    fn eof_reports_link_lost() {
        let state = LinkState::new();
        let recorder = Arc::new(Recorder::default());
        state.attach(recorder.clone());
        state.set_connected(true);

        let handle = spawn_stream_reader(
            "test-reader",
            Cursor::new(b"\x94\xc3\x00\x01A".to_vec()),
            state.clone(),
            true,
        )
        .expect("spawn reader");
        handle.join().expect("reader thread");

        assert_eq!(*recorder.data.lock().unwrap(), b"\x94\xc3\x00\x01A".to_vec());
        assert_eq!(*recorder.transitions.lock().unwrap(), vec![true, false]);
        assert!(!state.is_connected());
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    #[test]
    fn read_error_reports_link_lost() {
        let state = LinkState::new();
        let recorder = Arc::new(Recorder::default());
        state.attach(recorder.clone());
        state.set_connected(true);

        spawn_stream_reader("test-reader", FailingReader, state.clone(), false)
            .expect("spawn reader")
            .join()
            .expect("reader thread");

        assert_eq!(*recorder.transitions.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn stop_request_is_silent() {
        let state = LinkState::new();
        let recorder = Arc::new(Recorder::default());
        state.attach(recorder.clone());
        state.set_connected(true);
        state.begin_stop();

        spawn_stream_reader("test-reader", FailingReader, state.clone(), false)
            .expect("spawn reader")
            .join()
            .expect("reader thread");

        assert_eq!(*recorder.transitions.lock().unwrap(), vec![true]);
    }
}
