use anyhow::{anyhow, Context};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use super::bus::NewPosition;
use crate::geo_index::GeoPoint;

pub const DEFAULT_POSITION_SOURCE: &str = "gps";

/// JSON position report as published by the on-board trackers.
///
/// Field names follow the feed; the device firmware spelling is accepted too.
#[derive(Debug, Deserialize)]
pub struct PositionMessage {
    #[serde(alias = "BUS_ID")]
    pub bus_id: Option<String>,
    #[serde(alias = "LATITUD", default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(alias = "LONGITUD", default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(alias = "SPEED", default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(alias = "COURSE", default, deserialize_with = "parse_f64_option")]
    pub heading: Option<f64>,
    #[serde(alias = "GPS_DATETIME")]
    pub recorded_at: Option<String>,
    pub source: Option<String>,
}

impl PositionMessage {
    pub fn into_new_position(self) -> anyhow::Result<NewPosition> {
        let bus_id = self
            .bus_id
            .as_deref()
            .ok_or_else(|| anyhow!("message missing bus_id"))?;
        let bus_id = Uuid::parse_str(bus_id.trim()).with_context(|| format!("invalid bus_id '{}'", bus_id))?;

        let latitude = self.latitude.ok_or_else(|| anyhow!("message missing latitude"))?;
        let longitude = self.longitude.ok_or_else(|| anyhow!("message missing longitude"))?;

        let recorded_at = match self.recorded_at.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_timestamp(raw)?),
        };

        Ok(NewPosition {
            bus_id,
            location: GeoPoint::new(latitude, longitude),
            speed: self.speed,
            heading: self.heading,
            source: self
                .source
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_POSITION_SOURCE.to_string()),
            recorded_at,
        })
    }
}

/// Protobuf flavour of the same report.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BusPositionReport {
    #[prost(string, tag = "1")]
    pub bus_id: String,
    #[prost(double, tag = "2")]
    pub latitude: f64,
    #[prost(double, tag = "3")]
    pub longitude: f64,
    #[prost(double, optional, tag = "4")]
    pub speed: Option<f64>,
    #[prost(double, optional, tag = "5")]
    pub heading: Option<f64>,
    /// Milliseconds since the Unix epoch; 0 means "use receive time".
    #[prost(int64, tag = "6")]
    pub recorded_at_ms: i64,
    #[prost(string, tag = "7")]
    pub source: String,
}

impl BusPositionReport {
    pub fn into_new_position(self) -> anyhow::Result<NewPosition> {
        let bus_id = Uuid::parse_str(self.bus_id.trim())
            .with_context(|| format!("invalid bus_id '{}'", self.bus_id))?;

        let recorded_at = match self.recorded_at_ms {
            0 => None,
            ms => Some(
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| anyhow!("invalid recorded_at_ms {}", ms))?,
            ),
        };

        let source = if self.source.trim().is_empty() {
            DEFAULT_POSITION_SOURCE.to_string()
        } else {
            self.source
        };

        Ok(NewPosition {
            bus_id,
            location: GeoPoint::new(self.latitude, self.longitude),
            speed: self.speed,
            heading: self.heading,
            source,
            recorded_at,
        })
    }
}

/// RFC 3339, or the trackers' naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|_| anyhow!("invalid timestamp '{}'", raw))
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}
