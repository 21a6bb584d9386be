use crate::cmd::{parse_duration, ScanArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[cfg(feature = "ble")]
#[derive(serde::Serialize)]
struct DeviceOutput {
    address: String,
    name: Option<String>,
    rssi: Option<i16>,
}

#[cfg(feature = "ble")]
pub async fn run(args: ScanArgs, format: OutputFormat) -> CliResult<i32> {
    use crate::exit::transport_error;
    use crate::output::print_rows;

    let duration = parse_duration(&args.duration)?;
    tracing::info!(?duration, "scanning for mesh radios");
    let mut devices: Vec<DeviceOutput> = meshlink_transport::scan(duration)
        .await
        .map_err(|err| transport_error("bluetooth scan failed", err))?
        .into_iter()
        .map(|device| DeviceOutput {
            address: device.address,
            name: device.name,
            rssi: device.rssi,
        })
        .collect();
    // Strongest signal first.
    devices.sort_by_key(|device| std::cmp::Reverse(device.rssi));

    print_rows(
        &["ADDRESS", "NAME", "RSSI"],
        &devices,
        |device| {
            vec![
                device.address.clone(),
                device.name.clone().unwrap_or_default(),
                device.rssi.map(|rssi| rssi.to_string()).unwrap_or_default(),
            ]
        },
        format,
    );
    Ok(SUCCESS)
}

#[cfg(not(feature = "ble"))]
pub async fn run(args: ScanArgs, _format: OutputFormat) -> CliResult<i32> {
    parse_duration(&args.duration)?;
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "bluetooth support is not compiled into this build",
    ))
}
