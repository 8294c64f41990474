//! Persistence ports.
//!
//! `PgStore` is the production implementation; `MemoryStore` keeps the same
//! guarantees in process and backs the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::geo_index::BoundingBox;
use crate::models::{
    Alert, AlertCursor, AlertFilter, AlertStatus, Bus, BusPatch, BusPosition, BusSnapshot, Line, LineDetail,
    LinePatch, LineSummary, LocatedBus, Page, Stop, StopDetail, StopPatch, Vote, VoteDirection,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> CoreResult<()>;

    async fn find_alert(&self, alert_id: Uuid) -> CoreResult<Option<Alert>>;

    /// Active alerts matching `filter`, newest first.
    async fn list_active_alerts(
        &self,
        filter: &AlertFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>>;

    /// Up to `limit` active alerts matching `filter` that list after `after`
    /// (from the newest when `None`).
    async fn active_alerts_after(
        &self,
        filter: &AlertFilter,
        after: Option<AlertCursor>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>>;

    /// Active alerts inside `bbox`, or all active alerts when `bbox` is `None`.
    async fn active_alerts_within(
        &self,
        bbox: Option<BoundingBox>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>>;

    async fn list_alerts_by_status(
        &self,
        status: AlertStatus,
        page: Page,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>>;

    /// Removes the alert and its votes.
    async fn delete_alert(&self, alert_id: Uuid) -> CoreResult<bool>;

    /// Removes every alert with `expires_at <= cutoff`, returning how many went.
    async fn purge_expired_alerts(&self, cutoff: DateTime<Utc>) -> CoreResult<u64>;
}

/// Owner of vote records and of the score derived from them.
#[async_trait]
pub trait VoteLedger: Send + Sync {
    /// Upserts the (alert, user) vote and rewrites the alert score from the full
    /// vote set, all under one per-alert serialization boundary.
    ///
    /// Fails with `NotFound` when the alert is missing or no longer active at
    /// `now`; the two cases are not told apart.
    async fn cast_vote(
        &self,
        alert_id: Uuid,
        user_id: Uuid,
        direction: VoteDirection,
        now: DateTime<Utc>,
    ) -> CoreResult<i64>;

    /// Recomputes and persists the score of one alert from its votes.
    async fn recompute_score(&self, alert_id: Uuid) -> CoreResult<i64>;

    async fn votes_for(&self, alert_id: Uuid) -> CoreResult<Vec<Vote>>;
}

#[async_trait]
pub trait TransitStore: Send + Sync {
    async fn line_exists(&self, line_id: Uuid) -> CoreResult<bool>;
    async fn list_lines(&self, active_only: bool) -> CoreResult<Vec<LineSummary>>;
    async fn find_line(&self, line_id: Uuid) -> CoreResult<Option<LineDetail>>;
    async fn insert_line(&self, line: &Line) -> CoreResult<()>;
    async fn update_line(&self, line_id: Uuid, patch: &LinePatch) -> CoreResult<Option<Line>>;
    /// Also drops the line's buses and stop links; alerts keep existing unlinked.
    async fn delete_line(&self, line_id: Uuid) -> CoreResult<bool>;
    async fn attach_stop(&self, line_id: Uuid, stop_id: Uuid, sequence_order: i32) -> CoreResult<()>;
    async fn detach_stop(&self, line_id: Uuid, stop_id: Uuid) -> CoreResult<bool>;

    async fn list_stops(&self) -> CoreResult<Vec<Stop>>;
    async fn stops_within(&self, bbox: Option<BoundingBox>) -> CoreResult<Vec<Stop>>;
    async fn find_stop(&self, stop_id: Uuid) -> CoreResult<Option<StopDetail>>;
    async fn insert_stop(&self, stop: &Stop) -> CoreResult<()>;
    async fn update_stop(&self, stop_id: Uuid, patch: &StopPatch) -> CoreResult<Option<Stop>>;
    async fn delete_stop(&self, stop_id: Uuid) -> CoreResult<bool>;

    /// Active buses, optionally restricted to one line, ordered by bus number.
    async fn list_buses(&self, line_id: Option<Uuid>) -> CoreResult<Vec<BusSnapshot>>;
    async fn find_bus(&self, bus_id: Uuid) -> CoreResult<Option<BusSnapshot>>;
    /// Active buses whose current position falls inside `bbox`.
    async fn located_buses_within(&self, bbox: Option<BoundingBox>) -> CoreResult<Vec<LocatedBus>>;
    async fn insert_bus(&self, bus: &Bus) -> CoreResult<()>;
    async fn update_bus(&self, bus_id: Uuid, patch: &BusPatch) -> CoreResult<Option<Bus>>;
    async fn delete_bus(&self, bus_id: Uuid) -> CoreResult<bool>;
    async fn insert_position(&self, position: &BusPosition) -> CoreResult<()>;
}

/// Everything the service needs from one backing store.
pub trait Store: AlertStore + VoteLedger + TransitStore {}

impl<T: AlertStore + VoteLedger + TransitStore> Store for T {}
