use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::geo_index::{GeoPoint, Located};

pub const DEFAULT_VALIDITY_MINUTES: i64 = 120;
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    BusFull,
    Breakdown,
    Accident,
    StopMoved,
    RoadBlocked,
    Other,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 6] = [
        AlertCategory::BusFull,
        AlertCategory::Breakdown,
        AlertCategory::Accident,
        AlertCategory::StopMoved,
        AlertCategory::RoadBlocked,
        AlertCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::BusFull => "bus_full",
            AlertCategory::Breakdown => "breakdown",
            AlertCategory::Accident => "accident",
            AlertCategory::StopMoved => "stop_moved",
            AlertCategory::RoadBlocked => "road_blocked",
            AlertCategory::Other => "other",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| CoreError::validation(format!("invalid alert category: '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub category: AlertCategory,
    pub description: String,
    pub location: GeoPoint,
    pub line_id: Option<Uuid>,
    /// Signed sum of current votes.
    pub score: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Negative once the alert has expired.
    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> f64 {
        (self.expires_at - now).num_seconds() as f64 / 60.0
    }
}

impl Located for Alert {
    type Id = Uuid;

    fn id(&self) -> Uuid {
        self.alert_id
    }

    fn position(&self) -> GeoPoint {
        self.location
    }
}

#[derive(Debug, FromRow)]
pub struct AlertRow {
    pub alert_id: Uuid,
    pub category: AlertCategory,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub line_id: Option<Uuid>,
    pub score: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        Self {
            alert_id: row.alert_id,
            category: row.category,
            description: row.description,
            location: GeoPoint::new(row.latitude, row.longitude),
            line_id: row.line_id,
            score: row.score,
            created_by: row.created_by,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Creation request as handed over by the request layer, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAlert {
    pub category: String,
    pub description: String,
    pub location: Option<GeoPoint>,
    pub line_id: Option<Uuid>,
    pub validity_minutes: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AlertFilter {
    pub line_id: Option<Uuid>,
    pub category: Option<AlertCategory>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.line_id.map_or(true, |id| alert.line_id == Some(id))
            && self.category.map_or(true, |c| alert.category == c)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Active,
    Expired,
    All,
}

impl AlertStatus {
    pub fn matches(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        match self {
            AlertStatus::Active => alert.is_active(now),
            AlertStatus::Expired => !alert.is_active(now),
            AlertStatus::All => true,
        }
    }
}

impl FromStr for AlertStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(AlertStatus::Active),
            "expired" => Ok(AlertStatus::Expired),
            "all" => Ok(AlertStatus::All),
            other => Err(CoreError::validation(format!("invalid alert status: '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Page {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(CoreError::validation(format!(
                "page limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(())
    }
}

/// Position of an alert in listing order (`created_at DESC, alert_id DESC`).
///
/// Alerts listed after a cursor are exactly those whose `(created_at, alert_id)`
/// is smaller, so rows inserted or removed elsewhere never shift the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertCursor {
    pub created_at: DateTime<Utc>,
    pub alert_id: Uuid,
}

impl AlertCursor {
    pub fn of(alert: &Alert) -> Self {
        Self {
            created_at: alert.created_at,
            alert_id: alert.alert_id,
        }
    }

    pub fn precedes(&self, alert: &Alert) -> bool {
        (alert.created_at, alert.alert_id) < (self.created_at, self.alert_id)
    }
}
