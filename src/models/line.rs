use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::patch::{non_blank, present};
use super::stop::Stop;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Line {
    pub line_id: Uuid,
    pub line_number: String, // unique
    pub name: String,
    pub color: Option<String>,
    pub start_point: Option<String>,
    pub end_point: Option<String>,
    pub fare: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineSummary {
    pub line: Line,
    pub stop_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineStop {
    pub stop: Stop,
    pub sequence_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineDetail {
    pub line: Line,
    /// Ordered by `sequence_order`.
    pub stops: Vec<LineStop>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLine {
    pub line_number: String,
    pub name: String,
    pub color: Option<String>,
    pub start_point: Option<String>,
    pub end_point: Option<String>,
    #[serde(default)]
    pub fare: f64,
    pub is_active: Option<bool>,
}

impl NewLine {
    pub fn validate(&self) -> CoreResult<()> {
        if self.line_number.trim().is_empty() || self.name.trim().is_empty() {
            return Err(CoreError::validation("line number and name are required"));
        }
        validate_fare(self.fare)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinePatch {
    pub line_number: Option<String>,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub color: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub start_point: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub end_point: Option<Option<String>>,
    pub fare: Option<f64>,
    pub is_active: Option<bool>,
}

impl LinePatch {
    pub fn is_empty(&self) -> bool {
        self.line_number.is_none()
            && self.name.is_none()
            && self.color.is_none()
            && self.start_point.is_none()
            && self.end_point.is_none()
            && self.fare.is_none()
            && self.is_active.is_none()
    }

    /// Trims text fields the way `create_line` does.
    pub fn trimmed(mut self) -> Self {
        self.line_number = self.line_number.map(|v| v.trim().to_string());
        self.name = self.name.map(|v| v.trim().to_string());
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        non_blank("line_number", &self.line_number)?;
        non_blank("name", &self.name)?;
        if let Some(fare) = self.fare {
            validate_fare(fare)?;
        }
        Ok(())
    }

    pub fn apply(&self, line: &mut Line) {
        if let Some(v) = &self.line_number {
            line.line_number = v.clone();
        }
        if let Some(v) = &self.name {
            line.name = v.clone();
        }
        if let Some(v) = &self.color {
            line.color = v.clone();
        }
        if let Some(v) = &self.start_point {
            line.start_point = v.clone();
        }
        if let Some(v) = &self.end_point {
            line.end_point = v.clone();
        }
        if let Some(v) = self.fare {
            line.fare = v;
        }
        if let Some(v) = self.is_active {
            line.is_active = v;
        }
    }
}

fn validate_fare(fare: f64) -> CoreResult<()> {
    if !fare.is_finite() || fare < 0.0 {
        return Err(CoreError::validation(format!("invalid fare: {}", fare)));
    }
    Ok(())
}
