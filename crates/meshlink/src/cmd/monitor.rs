use meshlink_session::{SessionEvent, SessionState};

use crate::cmd::MonitorArgs;
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub async fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let (session, mut events) = args.connect.open().await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0usize;
    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(SUCCESS),
            event = events.recv() => {
                let Some(event) = event else {
                    break Ok(SUCCESS);
                };
                if !wanted(&event, args.packets) {
                    continue;
                }

                print_event(&event, format);
                if matches!(event, SessionEvent::StateChanged(SessionState::Error)) {
                    break Err(CliError::new(FAILURE, "connection to the radio was lost"));
                }

                printed = printed.saturating_add(1);
                if let Some(count) = args.count {
                    if printed >= count {
                        break Ok(SUCCESS);
                    }
                }
            }
        }
    };

    session.disconnect().await;
    result
}

/// Packet counter updates are noisy; they only print on request.
fn wanted(event: &SessionEvent, packets: bool) -> bool {
    packets || !matches!(event, SessionEvent::PacketCountChanged(_))
}
