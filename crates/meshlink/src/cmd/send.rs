use std::time::Duration;

use meshlink_session::{DeviceSession, NodeNum, BROADCAST};
use meshlink_transport::Link;
use serde::Serialize;

use crate::cmd::SendArgs;
use crate::exit::{session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct SentOutput {
    packet_id: u32,
    to: String,
    channel: u32,
}

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    if args.text.is_empty() {
        return Err(CliError::new(USAGE, "message text must not be empty"));
    }
    let timeout = args.connect.timeout()?;
    let to = args.to.as_deref().map(parse_node).transpose()?;

    let (session, _events) = args.connect.open().await?;
    let result = deliver(&session, &args, to, timeout).await;
    session.disconnect().await;
    let packet_id = result?;

    let out = SentOutput {
        packet_id,
        to: meshlink_session::node_id(to.unwrap_or(BROADCAST)),
        channel: args.channel,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "sent packet {:08x} to {} on channel {}",
            out.packet_id, out.to, out.channel
        ),
    }
    Ok(SUCCESS)
}

async fn deliver(
    session: &DeviceSession<Link>,
    args: &SendArgs,
    to: Option<NodeNum>,
    timeout: Duration,
) -> CliResult<u32> {
    session
        .wait_until_ready(timeout)
        .await
        .map_err(|err| session_error("radio did not become ready", err))?;
    session
        .send_message(&args.text, to, args.channel)
        .await
        .map_err(|err| session_error("send failed", err))
}

/// Accepts `!aabbccdd`, `0xaabbccdd`, decimal, or `broadcast`.
fn parse_node(input: &str) -> CliResult<NodeNum> {
    let input = input.trim();
    let parsed = if input.eq_ignore_ascii_case("broadcast") {
        Ok(BROADCAST)
    } else if let Some(hex) = input.strip_prefix('!') {
        NodeNum::from_str_radix(hex, 16)
    } else if let Some(hex) = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        NodeNum::from_str_radix(hex, 16)
    } else {
        input.parse()
    };
    parsed.map_err(|_| CliError::new(USAGE, format!("invalid node id: {input}")))
}
