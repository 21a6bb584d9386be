use crate::cmd::PortsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[cfg(feature = "serial")]
#[derive(serde::Serialize)]
struct PortOutput {
    name: String,
    description: String,
}

#[cfg(feature = "serial")]
pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    use crate::exit::transport_error;
    use crate::output::print_rows;

    let ports: Vec<PortOutput> = meshlink_transport::available_ports()
        .map_err(|err| transport_error("listing serial ports failed", err))?
        .into_iter()
        .map(|port| PortOutput {
            name: port.name,
            description: port.description,
        })
        .collect();

    if ports.is_empty() {
        tracing::info!("no serial ports found");
    }
    print_rows(
        &["PORT", "DESCRIPTION"],
        &ports,
        |port| vec![port.name.clone(), port.description.clone()],
        format,
    );
    Ok(SUCCESS)
}

#[cfg(not(feature = "serial"))]
pub fn run(_args: PortsArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "serial support is not compiled into this build",
    ))
}
