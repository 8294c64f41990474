use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::patch::{non_blank, present};
use crate::error::{CoreError, CoreResult};
use crate::geo_index::{GeoPoint, Located};

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Bus {
    pub bus_id: Uuid,
    pub bus_number: String, // unique
    pub line_id: Uuid,
    pub direction: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One immutable position sample. The newest sample is the bus's current position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusPosition {
    pub bus_id: Uuid,
    pub location: GeoPoint,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

/// A bus together with its current position, if it ever reported one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusSnapshot {
    pub bus: Bus,
    pub position: Option<BusPosition>,
}

/// A bus with a known current position; the candidate type for proximity queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocatedBus {
    pub bus: Bus,
    pub position: BusPosition,
}

impl Located for LocatedBus {
    type Id = Uuid;

    fn id(&self) -> Uuid {
        self.bus.bus_id
    }

    fn position(&self) -> GeoPoint {
        self.position.location
    }
}

impl BusSnapshot {
    pub fn located(self) -> Option<LocatedBus> {
        let BusSnapshot { bus, position } = self;
        position.map(|position| LocatedBus { bus, position })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBus {
    pub bus_number: String,
    pub line_id: Uuid,
    pub direction: Option<String>,
    pub is_active: Option<bool>,
}

impl NewBus {
    pub fn validate(&self) -> CoreResult<()> {
        if self.bus_number.trim().is_empty() {
            return Err(CoreError::validation("bus number is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusPatch {
    pub bus_number: Option<String>,
    pub line_id: Option<Uuid>,
    #[serde(default, deserialize_with = "present")]
    pub direction: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl BusPatch {
    pub fn is_empty(&self) -> bool {
        self.bus_number.is_none()
            && self.line_id.is_none()
            && self.direction.is_none()
            && self.is_active.is_none()
    }

    pub fn trimmed(mut self) -> Self {
        self.bus_number = self.bus_number.map(|v| v.trim().to_string());
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        non_blank("bus_number", &self.bus_number)
    }

    pub fn apply(&self, bus: &mut Bus) {
        if let Some(v) = &self.bus_number {
            bus.bus_number = v.clone();
        }
        if let Some(v) = self.line_id {
            bus.line_id = v;
        }
        if let Some(v) = &self.direction {
            bus.direction = v.clone();
        }
        if let Some(v) = self.is_active {
            bus.is_active = v;
        }
    }
}

/// A position report on its way into the time series.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub bus_id: Uuid,
    pub location: GeoPoint,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub source: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewPosition {
    pub fn validate(&self) -> CoreResult<()> {
        self.location.validate()?;
        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed < 0.0 {
                return Err(CoreError::validation(format!("invalid speed: {}", speed)));
            }
        }
        if let Some(heading) = self.heading {
            if !heading.is_finite() {
                return Err(CoreError::validation(format!("invalid heading: {}", heading)));
            }
        }
        Ok(())
    }
}
