use meshlink_session::SessionError;

use crate::cmd::ChannelsArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_channels, OutputFormat};

pub async fn run(args: ChannelsArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.connect.timeout()?;
    let (session, _events) = args.connect.open().await?;

    // Includes reconciliation, so the table reflects every slot that answered.
    let report = match tokio::time::timeout(timeout, session.join_initialization()).await {
        Ok(report) => report,
        Err(_) => Err(SessionError::Timeout(timeout)),
    };
    let channels = session.channels();
    session.disconnect().await;

    let report = report.map_err(|err| session_error("channel discovery failed", err))?;
    tracing::debug!(
        nodes = report.nodes,
        elapsed = ?report.elapsed,
        config_complete = report.config_complete,
        "initialization finished"
    );
    print_channels(&channels, report.reconcile.as_ref(), format);
    Ok(SUCCESS)
}
