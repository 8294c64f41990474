use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::line::Line;
use super::patch::{non_blank, present};
use crate::error::{CoreError, CoreResult};
use crate::geo_index::{GeoPoint, Located};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub stop_id: Uuid,
    pub code: Option<String>,
    pub name: String,
    pub location: GeoPoint,
    pub created_at: DateTime<Utc>,
}

impl Located for Stop {
    type Id = Uuid;

    fn id(&self) -> Uuid {
        self.stop_id
    }

    fn position(&self) -> GeoPoint {
        self.location
    }
}

#[derive(Debug, FromRow)]
pub struct StopRow {
    pub stop_id: Uuid,
    pub code: Option<String>,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
}

impl From<StopRow> for Stop {
    fn from(row: StopRow) -> Self {
        Self {
            stop_id: row.stop_id,
            code: row.code,
            name: row.name,
            location: GeoPoint::new(row.latitude, row.longitude),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopDetail {
    pub stop: Stop,
    /// Lines serving the stop, ordered by line number.
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStop {
    pub code: Option<String>,
    pub name: String,
    pub location: GeoPoint,
}

impl NewStop {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("stop name is required"));
        }
        non_blank("code", &self.code)?;
        self.location.validate()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopPatch {
    #[serde(default, deserialize_with = "present")]
    pub code: Option<Option<String>>,
    pub name: Option<String>,
    pub location: Option<GeoPoint>,
}

impl StopPatch {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.name.is_none() && self.location.is_none()
    }

    pub fn trimmed(mut self) -> Self {
        self.code = self.code.map(|code| code.map(|v| v.trim().to_string()));
        self.name = self.name.map(|v| v.trim().to_string());
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        non_blank("name", &self.name)?;
        if let Some(code) = &self.code {
            non_blank("code", code)?;
        }
        match &self.location {
            Some(location) => location.validate(),
            None => Ok(()),
        }
    }

    pub fn apply(&self, stop: &mut Stop) {
        if let Some(v) = &self.code {
            stop.code = v.clone();
        }
        if let Some(v) = &self.name {
            stop.name = v.clone();
        }
        if let Some(v) = self.location {
            stop.location = v;
        }
    }
}
