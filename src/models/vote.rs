use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "vote_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// Contribution of one vote to the aggregate score.
    pub fn weight(&self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl FromStr for VoteDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "up" | "confirm" => Ok(VoteDirection::Up),
            "down" | "deny" => Ok(VoteDirection::Down),
            other => Err(CoreError::validation(format!(
                "invalid vote direction '{}' (expected up or down)",
                other
            ))),
        }
    }
}

/// One user's current vote on one alert. Re-voting overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Vote {
    pub alert_id: Uuid,
    pub user_id: Uuid,
    pub direction: VoteDirection,
    pub updated_at: DateTime<Utc>,
}

pub fn score_of<'a, I>(votes: I) -> i64
where
    I: IntoIterator<Item = &'a Vote>,
{
    votes.into_iter().map(|v| v.direction.weight()).sum()
}
