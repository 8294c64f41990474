use prost::Message;
use tracing::{debug, warn};

use crate::config::PayloadFormat;
use crate::directory::TransitDirectory;
use crate::error::CoreError;
use crate::models::message::{BusPositionReport, PositionMessage};
use crate::models::NewPosition;
use crate::store::TransitStore;

fn decode(payload: &[u8], format: PayloadFormat) -> anyhow::Result<NewPosition> {
    match format {
        PayloadFormat::Json => serde_json::from_slice::<PositionMessage>(payload)?.into_new_position(),
        PayloadFormat::Protobuf => BusPositionReport::decode(payload)?.into_new_position(),
    }
}

/// Records one position report.
///
/// Malformed payloads and reports the directory rejects (unknown bus, bad
/// coordinates) are logged and dropped. Only store failures are returned.
pub async fn process_message<S: TransitStore>(
    directory: &TransitDirectory<S>,
    payload: &[u8],
    format: PayloadFormat,
) -> anyhow::Result<()> {
    let report = match decode(payload, format) {
        Ok(r) => r,
        Err(e) => {
            warn!("Failed to parse position message: {:#}", e);
            return Ok(());
        }
    };

    let bus_id = report.bus_id;
    match directory.record_position(report).await {
        Ok(position) => {
            debug!("Stored position for bus {} at {}", bus_id, position.recorded_at);
            Ok(())
        }
        Err(e @ (CoreError::NotFound(_) | CoreError::Validation(_))) => {
            warn!("Skipping position for bus {}: {}", bus_id, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
