use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{AlertStore, TransitStore, VoteLedger};
use crate::db::{queries, DbPool};
use crate::error::{CoreError, CoreResult};
use crate::geo_index::{BoundingBox, GeoPoint};
use crate::models::alert::AlertRow;
use crate::models::stop::StopRow;
use crate::models::{
    Alert, AlertCursor, AlertFilter, AlertStatus, Bus, BusPatch, BusPosition, BusSnapshot, Line, LineDetail,
    LinePatch, LineStop, LineSummary, LocatedBus, Page, Stop, StopDetail, StopPatch, Vote,
    VoteDirection,
};

const LINE_COLUMNS: &str =
    "line_id, line_number, name, color, start_point, end_point, fare, is_active, created_at";
const STOP_COLUMNS: &str = "stop_id, code, name, latitude, longitude, created_at";
const BUS_COLUMNS: &str = "bus_id, bus_number, line_id, direction, is_active, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct LineSummaryRow {
    #[sqlx(flatten)]
    line: Line,
    stop_count: i64,
}

#[derive(FromRow)]
struct LineStopRow {
    #[sqlx(flatten)]
    stop: StopRow,
    sequence_order: i32,
}

#[derive(FromRow)]
struct BusSnapshotRow {
    #[sqlx(flatten)]
    bus: Bus,
    latitude: Option<f64>,
    longitude: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
    source: Option<String>,
    recorded_at: Option<DateTime<Utc>>,
}

impl From<BusSnapshotRow> for BusSnapshot {
    fn from(row: BusSnapshotRow) -> Self {
        let position = match (row.latitude, row.longitude, row.recorded_at) {
            (Some(latitude), Some(longitude), Some(recorded_at)) => Some(BusPosition {
                bus_id: row.bus.bus_id,
                location: GeoPoint::new(latitude, longitude),
                speed: row.speed,
                heading: row.heading,
                source: row.source.unwrap_or_default(),
                recorded_at,
            }),
            _ => None,
        };
        BusSnapshot {
            bus: row.bus,
            position,
        }
    }
}

/// Bind order for the `($n::float8 IS NULL OR ... BETWEEN ...)` box filters.
fn box_bounds(bbox: Option<BoundingBox>) -> [Option<f64>; 4] {
    match bbox {
        Some(b) => [Some(b.min_lat), Some(b.max_lat), Some(b.min_lon), Some(b.max_lon)],
        None => [None; 4],
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, alert: &Alert) -> CoreResult<()> {
        sqlx::query(queries::INSERT_ALERT)
            .bind(alert.alert_id)
            .bind(alert.category)
            .bind(&alert.description)
            .bind(alert.location.latitude)
            .bind(alert.location.longitude)
            .bind(alert.line_id)
            .bind(alert.score)
            .bind(alert.created_by)
            .bind(alert.created_at)
            .bind(alert.expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_alert(&self, alert_id: Uuid) -> CoreResult<Option<Alert>> {
        let row = sqlx::query_as::<_, AlertRow>(queries::SELECT_ALERT)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Alert::from))
    }

    async fn list_active_alerts(
        &self,
        filter: &AlertFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(queries::SELECT_ACTIVE_ALERTS)
            .bind(now)
            .bind(filter.line_id)
            .bind(filter.category)
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }

    async fn active_alerts_after(
        &self,
        filter: &AlertFilter,
        after: Option<AlertCursor>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(queries::SELECT_ACTIVE_ALERTS_AFTER)
            .bind(now)
            .bind(filter.line_id)
            .bind(filter.category)
            .bind(after.map(|c| c.created_at))
            .bind(after.map(|c| c.alert_id))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }

    async fn active_alerts_within(
        &self,
        bbox: Option<BoundingBox>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        let [min_lat, max_lat, min_lon, max_lon] = box_bounds(bbox);
        let rows = sqlx::query_as::<_, AlertRow>(queries::SELECT_ACTIVE_ALERTS_IN_BOX)
            .bind(now)
            .bind(min_lat)
            .bind(max_lat)
            .bind(min_lon)
            .bind(max_lon)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }

    async fn list_alerts_by_status(
        &self,
        status: AlertStatus,
        page: Page,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        let active_flag = match status {
            AlertStatus::Active => Some(true),
            AlertStatus::Expired => Some(false),
            AlertStatus::All => None,
        };
        let rows = sqlx::query_as::<_, AlertRow>(queries::SELECT_ALERTS_BY_STATUS)
            .bind(now)
            .bind(active_flag)
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }

    async fn delete_alert(&self, alert_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(queries::DELETE_ALERT)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired_alerts(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(queries::DELETE_EXPIRED_ALERTS)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VoteLedger for PgStore {
    async fn cast_vote(
        &self,
        alert_id: Uuid,
        user_id: Uuid,
        direction: VoteDirection,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        // Concurrent votes on this alert queue here until we commit.
        let locked = sqlx::query(queries::LOCK_ACTIVE_ALERT)
            .bind(alert_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(CoreError::not_found(format!(
                "alert {} not found or expired",
                alert_id
            )));
        }

        sqlx::query(queries::UPSERT_VOTE)
            .bind(alert_id)
            .bind(user_id)
            .bind(direction)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let score: i64 = sqlx::query_scalar(queries::SUM_VOTES)
            .bind(alert_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(queries::UPDATE_ALERT_SCORE)
            .bind(alert_id)
            .bind(score)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Vote committed on alert {}: score {}", alert_id, score);
        Ok(score)
    }

    async fn recompute_score(&self, alert_id: Uuid) -> CoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(queries::LOCK_ALERT)
            .bind(alert_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(CoreError::not_found(format!("alert {}", alert_id)));
        }

        let score: i64 = sqlx::query_scalar(queries::SUM_VOTES)
            .bind(alert_id)
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query(queries::UPDATE_ALERT_SCORE)
            .bind(alert_id)
            .bind(score)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(score)
    }

    async fn votes_for(&self, alert_id: Uuid) -> CoreResult<Vec<Vote>> {
        let votes = sqlx::query_as::<_, Vote>(queries::SELECT_VOTES)
            .bind(alert_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(votes)
    }
}

#[async_trait]
impl TransitStore for PgStore {
    async fn line_exists(&self, line_id: Uuid) -> CoreResult<bool> {
        let exists: bool = sqlx::query_scalar(queries::LINE_EXISTS)
            .bind(line_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_lines(&self, active_only: bool) -> CoreResult<Vec<LineSummary>> {
        let rows = sqlx::query_as::<_, LineSummaryRow>(queries::SELECT_LINES)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| LineSummary {
                line: r.line,
                stop_count: r.stop_count,
            })
            .collect())
    }

    async fn find_line(&self, line_id: Uuid) -> CoreResult<Option<LineDetail>> {
        let Some(line) = sqlx::query_as::<_, Line>(queries::SELECT_LINE)
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let stops = sqlx::query_as::<_, LineStopRow>(queries::SELECT_LINE_STOPS)
            .bind(line_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| LineStop {
                stop: r.stop.into(),
                sequence_order: r.sequence_order,
            })
            .collect();

        Ok(Some(LineDetail { line, stops }))
    }

    async fn insert_line(&self, line: &Line) -> CoreResult<()> {
        sqlx::query(queries::INSERT_LINE)
            .bind(line.line_id)
            .bind(&line.line_number)
            .bind(&line.name)
            .bind(&line.color)
            .bind(&line.start_point)
            .bind(&line.end_point)
            .bind(line.fare)
            .bind(line.is_active)
            .bind(line.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_line(&self, line_id: Uuid, patch: &LinePatch) -> CoreResult<Option<Line>> {
        if patch.is_empty() {
            let line = sqlx::query_as::<_, Line>(queries::SELECT_LINE)
                .bind(line_id)
                .fetch_optional(&self.pool)
                .await?;
            return Ok(line);
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE lines SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(v) = &patch.line_number {
                set.push("line_number = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.name {
                set.push("name = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.color {
                set.push("color = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.start_point {
                set.push("start_point = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.end_point {
                set.push("end_point = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = patch.fare {
                set.push("fare = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.is_active {
                set.push("is_active = ").push_bind_unseparated(v);
            }
        }
        qb.push(" WHERE line_id = ").push_bind(line_id);
        qb.push(" RETURNING ").push(LINE_COLUMNS);

        let line = qb
            .build_query_as::<Line>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(line)
    }

    async fn delete_line(&self, line_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(queries::DELETE_LINE)
            .bind(line_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn attach_stop(&self, line_id: Uuid, stop_id: Uuid, sequence_order: i32) -> CoreResult<()> {
        sqlx::query(queries::UPSERT_LINE_STOP)
            .bind(line_id)
            .bind(stop_id)
            .bind(sequence_order)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn detach_stop(&self, line_id: Uuid, stop_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(queries::DELETE_LINE_STOP)
            .bind(line_id)
            .bind(stop_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_stops(&self) -> CoreResult<Vec<Stop>> {
        let rows = sqlx::query_as::<_, StopRow>(queries::SELECT_STOPS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Stop::from).collect())
    }

    async fn stops_within(&self, bbox: Option<BoundingBox>) -> CoreResult<Vec<Stop>> {
        let [min_lat, max_lat, min_lon, max_lon] = box_bounds(bbox);
        let rows = sqlx::query_as::<_, StopRow>(queries::SELECT_STOPS_IN_BOX)
            .bind(min_lat)
            .bind(max_lat)
            .bind(min_lon)
            .bind(max_lon)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Stop::from).collect())
    }

    async fn find_stop(&self, stop_id: Uuid) -> CoreResult<Option<StopDetail>> {
        let Some(row) = sqlx::query_as::<_, StopRow>(queries::SELECT_STOP)
            .bind(stop_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, Line>(queries::SELECT_STOP_LINES)
            .bind(stop_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(StopDetail {
            stop: row.into(),
            lines,
        }))
    }

    async fn insert_stop(&self, stop: &Stop) -> CoreResult<()> {
        sqlx::query(queries::INSERT_STOP)
            .bind(stop.stop_id)
            .bind(&stop.code)
            .bind(&stop.name)
            .bind(stop.location.latitude)
            .bind(stop.location.longitude)
            .bind(stop.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_stop(&self, stop_id: Uuid, patch: &StopPatch) -> CoreResult<Option<Stop>> {
        if patch.is_empty() {
            let row = sqlx::query_as::<_, StopRow>(queries::SELECT_STOP)
                .bind(stop_id)
                .fetch_optional(&self.pool)
                .await?;
            return Ok(row.map(Stop::from));
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE stops SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(v) = &patch.code {
                set.push("code = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.name {
                set.push("name = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = patch.location {
                set.push("latitude = ").push_bind_unseparated(v.latitude);
                set.push("longitude = ").push_bind_unseparated(v.longitude);
            }
        }
        qb.push(" WHERE stop_id = ").push_bind(stop_id);
        qb.push(" RETURNING ").push(STOP_COLUMNS);

        let row = qb
            .build_query_as::<StopRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Stop::from))
    }

    async fn delete_stop(&self, stop_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(queries::DELETE_STOP)
            .bind(stop_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_buses(&self, line_id: Option<Uuid>) -> CoreResult<Vec<BusSnapshot>> {
        let rows = sqlx::query_as::<_, BusSnapshotRow>(&queries::select_active_buses())
            .bind(line_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(BusSnapshot::from).collect())
    }

    async fn find_bus(&self, bus_id: Uuid) -> CoreResult<Option<BusSnapshot>> {
        let row = sqlx::query_as::<_, BusSnapshotRow>(&queries::select_bus())
            .bind(bus_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(BusSnapshot::from))
    }

    async fn located_buses_within(&self, bbox: Option<BoundingBox>) -> CoreResult<Vec<LocatedBus>> {
        let [min_lat, max_lat, min_lon, max_lon] = box_bounds(bbox);
        let rows = sqlx::query_as::<_, BusSnapshotRow>(&queries::select_located_buses_in_box())
            .bind(min_lat)
            .bind(max_lat)
            .bind(min_lon)
            .bind(max_lon)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| BusSnapshot::from(r).located())
            .collect())
    }

    async fn insert_bus(&self, bus: &Bus) -> CoreResult<()> {
        sqlx::query(queries::INSERT_BUS)
            .bind(bus.bus_id)
            .bind(&bus.bus_number)
            .bind(bus.line_id)
            .bind(&bus.direction)
            .bind(bus.is_active)
            .bind(bus.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_bus(&self, bus_id: Uuid, patch: &BusPatch) -> CoreResult<Option<Bus>> {
        if patch.is_empty() {
            let bus = sqlx::query_as::<_, Bus>(queries::SELECT_BUS_ROW)
                .bind(bus_id)
                .fetch_optional(&self.pool)
                .await?;
            return Ok(bus);
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE buses SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(v) = &patch.bus_number {
                set.push("bus_number = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = patch.line_id {
                set.push("line_id = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.direction {
                set.push("direction = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = patch.is_active {
                set.push("is_active = ").push_bind_unseparated(v);
            }
        }
        qb.push(" WHERE bus_id = ").push_bind(bus_id);
        qb.push(" RETURNING ").push(BUS_COLUMNS);

        let bus = qb
            .build_query_as::<Bus>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(bus)
    }

    async fn delete_bus(&self, bus_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(queries::DELETE_BUS)
            .bind(bus_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_position(&self, position: &BusPosition) -> CoreResult<()> {
        sqlx::query(queries::INSERT_BUS_POSITION)
            .bind(position.bus_id)
            .bind(position.location.latitude)
            .bind(position.location.longitude)
            .bind(position.speed)
            .bind(position.heading)
            .bind(&position.source)
            .bind(position.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match CoreError::from(e) {
                CoreError::NotFound(_) => CoreError::not_found(format!("bus {}", position.bus_id)),
                other => other,
            })?;
        Ok(())
    }
}

/// These run against a real database and are skipped unless
/// `TEST_DATABASE_URL` points at one (migrations are applied on connect).
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::AlertCategory;
    use chrono::Duration;
    use std::sync::Arc;

    async fn connect() -> Option<PgStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = db::init_pool(&url, 10).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        Some(PgStore::new(pool))
    }

    fn alert(now: DateTime<Utc>, validity: Duration) -> Alert {
        Alert {
            alert_id: Uuid::new_v4(),
            category: AlertCategory::Breakdown,
            description: "engine failure".to_string(),
            location: GeoPoint::new(12.37, -1.52),
            line_id: None,
            score: 0,
            created_by: Uuid::new_v4(),
            created_at: now,
            expires_at: now + validity,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_on_one_alert() {
        let Some(store) = connect().await else {
            return;
        };
        let store = Arc::new(store);
        let now = Utc::now();
        let target = alert(now, Duration::minutes(60));
        store.insert_alert(&target).await.unwrap();

        let users: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
        let mut tasks = Vec::new();
        for (i, user) in users.iter().copied().enumerate() {
            // two racing submissions per user must still leave a single vote
            let second = if i % 2 == 0 { VoteDirection::Up } else { VoteDirection::Down };
            for direction in [VoteDirection::Down, second] {
                let store = store.clone();
                let id = target.alert_id;
                tasks.push(tokio::spawn(async move {
                    store.cast_vote(id, user, direction, now).await
                }));
            }
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let votes = store.votes_for(target.alert_id).await.unwrap();
        assert_eq!(votes.len(), 20);
        let expected: i64 = votes.iter().map(|v| v.direction.weight()).sum();
        let stored = store.find_alert(target.alert_id).await.unwrap().unwrap();
        assert_eq!(stored.score, expected);
        assert_eq!(store.recompute_score(target.alert_id).await.unwrap(), expected);

        assert!(store.delete_alert(target.alert_id).await.unwrap());
        assert!(store.votes_for(target.alert_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_on_expired_alert_is_not_found() {
        let Some(store) = connect().await else {
            return;
        };
        let now = Utc::now();
        let target = alert(now - Duration::minutes(90), Duration::minutes(60));
        store.insert_alert(&target).await.unwrap();

        let result = store
            .cast_vote(target.alert_id, Uuid::new_v4(), VoteDirection::Up, now)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
        assert!(store.votes_for(target.alert_id).await.unwrap().is_empty());

        store.delete_alert(target.alert_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_keyset_walk_skips_nothing() {
        let Some(store) = connect().await else {
            return;
        };
        // far future keeps these apart from rows other tests leave behind
        let base = Utc::now() + Duration::days(3650);
        let mut ids = Vec::new();
        for i in 0..3 {
            let a = alert(base + Duration::seconds(i), Duration::minutes(60));
            store.insert_alert(&a).await.unwrap();
            ids.push(a.alert_id);
        }
        let filter = AlertFilter::default();

        let first = store.active_alerts_after(&filter, None, 2, base).await.unwrap();
        assert_eq!(first.iter().map(|a| a.alert_id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
        let rest = store
            .active_alerts_after(&filter, Some(AlertCursor::of(&first[1])), 2, base)
            .await
            .unwrap();
        assert_eq!(rest[0].alert_id, ids[0]);

        for id in ids {
            store.delete_alert(id).await.unwrap();
        }
    }
}
