#![cfg(feature = "cli")]

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use meshlink::session::proto::{self, port};
use prost::Message;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "meshlink-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// Session timings short enough for a local fake radio.
fn fast_config(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("session.json");
    std::fs::write(
        &path,
        r#"{
            "settle_delay_ms": 20,
            "wakeup_wait_ms": 20,
            "config_poll_interval_ms": 20,
            "backlog_poll_interval_ms": 20,
            "backlog_stable_polls": 2,
            "reconcile_rounds": 0
        }"#,
    )
    .expect("config should be writable");
    path
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x94, 0xC3];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn from_radio(variant: proto::from_radio::PayloadVariant) -> Vec<u8> {
    frame(
        &proto::FromRadio {
            id: 0,
            payload_variant: Some(variant),
        }
        .encode_to_vec(),
    )
}

/// Pull complete frames out of `buf`, dropping anything before a marker.
fn take_frames(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    loop {
        let Some(start) = buf.windows(2).position(|w| w == [0x94, 0xC3]) else {
            let keep = buf.last() == Some(&0x94);
            buf.clear();
            if keep {
                buf.push(0x94);
            }
            return frames;
        };
        buf.drain(..start);
        if buf.len() < 4 {
            return frames;
        }
        let len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
        if buf.len() < 4 + len {
            return frames;
        }
        frames.push(buf[4..4 + len].to_vec());
        buf.drain(..4 + len);
    }
}

/// Answers a config request like a radio with one node, and reports the
/// first text message it is asked to transmit.
fn serve_radio(mut stream: TcpStream, texts: mpsc::Sender<String>) {
    stream
        .set_read_timeout(Some(Duration::from_millis(200)))
        .expect("read timeout should apply");
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue
            }
            Err(_) => return,
        }

        for payload in take_frames(&mut buf) {
            let Ok(to_radio) = proto::ToRadio::decode(payload.as_slice()) else {
                continue;
            };
            match to_radio.payload_variant {
                Some(proto::to_radio::PayloadVariant::WantConfigId(nonce)) => {
                    let mut reply = from_radio(proto::from_radio::PayloadVariant::MyInfo(
                        proto::MyNodeInfo {
                            my_node_num: 0xAABBCCDD,
                        },
                    ));
                    reply.extend(from_radio(proto::from_radio::PayloadVariant::NodeInfo(
                        proto::NodeInfo {
                            num: 0xAABBCCDD,
                            user: Some(proto::User {
                                id: "!aabbccdd".into(),
                                long_name: "Home Base".into(),
                                short_name: "HB".into(),
                                hw_model: 43,
                            }),
                            ..Default::default()
                        },
                    )));
                    reply.extend(from_radio(
                        proto::from_radio::PayloadVariant::ConfigCompleteId(nonce),
                    ));
                    if stream.write_all(&reply).is_err() {
                        return;
                    }
                }
                Some(proto::to_radio::PayloadVariant::Packet(packet)) => {
                    if let Some(proto::mesh_packet::PayloadVariant::Decoded(data)) =
                        packet.payload_variant
                    {
                        if data.portnum == port::TEXT_MESSAGE {
                            let text = String::from_utf8_lossy(&data.payload).into_owned();
                            let _ = texts.send(text);
                        }
                    }
                }
                None => {}
            }
        }
    }
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_meshlink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("meshlink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn missing_link_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_meshlink"))
        .env_remove("MESHLINK_SERIAL")
        .env_remove("MESHLINK_TCP")
        .env_remove("MESHLINK_BLE")
        .args(["monitor", "--count", "1"])
        .output()
        .expect("monitor should run");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn refused_connection_exits_with_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let port = listener
        .local_addr()
        .expect("listener should have an address")
        .port();
    drop(listener);

    let output = Command::new(env!("CARGO_BIN_EXE_meshlink"))
        .args(["--log-level", "error", "monitor", "--tcp"])
        .arg(format!("127.0.0.1:{port}"))
        .output()
        .expect("monitor should run");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"));
}

#[test]
fn send_over_tcp_reaches_the_radio() {
    let dir = unique_temp_dir("send");
    let config = fast_config(&dir);

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let port = listener
        .local_addr()
        .expect("listener should have an address")
        .port();
    let (texts_tx, texts_rx) = mpsc::channel();
    let radio = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("client should connect");
        serve_radio(stream, texts_tx);
    });

    let output = Command::new(env!("CARGO_BIN_EXE_meshlink"))
        .args(["--log-level", "error", "--format", "json", "send", "--tcp"])
        .arg(format!("127.0.0.1:{port}"))
        .arg("--config")
        .arg(&config)
        .args(["--timeout", "20s", "--to", "!01020304", "hello mesh"])
        .output()
        .expect("send should run");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"packet_id\""));
    assert!(stdout.contains("\"to\":\"!01020304\""));

    let text = texts_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("radio should receive the text");
    assert_eq!(text, "hello mesh");

    let _ = radio.join();
    let _ = std::fs::remove_dir_all(&dir);
}
