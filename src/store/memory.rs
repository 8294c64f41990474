use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{AlertStore, TransitStore, VoteLedger};
use crate::error::{CoreError, CoreResult};
use crate::geo_index::BoundingBox;
use crate::models::vote::score_of;
use crate::models::{
    Alert, AlertCursor, AlertFilter, AlertStatus, Bus, BusPatch, BusPosition, BusSnapshot, Line, LineDetail,
    LinePatch, LineStop, LineSummary, LocatedBus, Page, Stop, StopDetail, StopPatch, Vote,
    VoteDirection,
};

type Ballot = Arc<Mutex<HashMap<Uuid, Vote>>>;

/// Process-local store.
///
/// Each alert owns its own vote mutex, so concurrent votes on one alert are
/// serialized while votes on different alerts never wait on each other.
#[derive(Default)]
pub struct MemoryStore {
    alerts: DashMap<Uuid, Alert>,
    ballots: DashMap<Uuid, Ballot>,
    transit: RwLock<TransitState>,
}

#[derive(Default)]
struct TransitState {
    lines: HashMap<Uuid, Line>,
    stops: HashMap<Uuid, Stop>,
    /// (line, stop) -> sequence order
    line_stops: HashMap<(Uuid, Uuid), i32>,
    buses: HashMap<Uuid, Bus>,
    positions: HashMap<Uuid, Vec<BusPosition>>,
}

impl TransitState {
    fn current_position(&self, bus_id: Uuid) -> Option<BusPosition> {
        // max_by_key keeps the last maximum, i.e. the latest insert on equal timestamps
        self.positions
            .get(&bus_id)
            .and_then(|samples| samples.iter().max_by_key(|p| p.recorded_at))
            .cloned()
    }

    fn snapshot(&self, bus: &Bus) -> BusSnapshot {
        BusSnapshot {
            bus: bus.clone(),
            position: self.current_position(bus.bus_id),
        }
    }

    fn line_number_taken(&self, line_number: &str, except: Option<Uuid>) -> bool {
        self.lines
            .values()
            .any(|l| l.line_number == line_number && Some(l.line_id) != except)
    }

    fn stop_code_taken(&self, code: &str, except: Option<Uuid>) -> bool {
        self.stops
            .values()
            .any(|s| s.code.as_deref() == Some(code) && Some(s.stop_id) != except)
    }

    fn bus_number_taken(&self, bus_number: &str, except: Option<Uuid>) -> bool {
        self.buses
            .values()
            .any(|b| b.bus_number == bus_number && Some(b.bus_id) != except)
    }
}

fn conflict(what: &str, value: &str) -> CoreError {
    CoreError::Conflict(format!("{} '{}' already exists", what, value))
}

fn newest_first(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.alert_id.cmp(&a.alert_id))
    });
}

fn paginate(mut alerts: Vec<Alert>, page: Page) -> Vec<Alert> {
    newest_first(&mut alerts);
    alerts
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ballot(&self, alert_id: Uuid) -> Option<Ballot> {
        self.ballots.get(&alert_id).map(|b| b.value().clone())
    }

    fn collect_alerts(&self, keep: impl Fn(&Alert) -> bool) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| keep(a.value()))
            .map(|a| a.value().clone())
            .collect()
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> CoreResult<()> {
        // held across the insert; delete_line needs the write lock
        let transit = self.transit.read().await;
        if let Some(line_id) = alert.line_id {
            if !transit.lines.contains_key(&line_id) {
                return Err(CoreError::not_found(format!("line {}", line_id)));
            }
        }
        if self.alerts.contains_key(&alert.alert_id) {
            return Err(conflict("alert", &alert.alert_id.to_string()));
        }
        self.ballots
            .insert(alert.alert_id, Arc::new(Mutex::new(HashMap::new())));
        self.alerts.insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn find_alert(&self, alert_id: Uuid) -> CoreResult<Option<Alert>> {
        Ok(self.alerts.get(&alert_id).map(|a| a.value().clone()))
    }

    async fn list_active_alerts(
        &self,
        filter: &AlertFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        let alerts = self.collect_alerts(|a| a.is_active(now) && filter.matches(a));
        Ok(paginate(alerts, page))
    }

    async fn active_alerts_after(
        &self,
        filter: &AlertFilter,
        after: Option<AlertCursor>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        let mut alerts = self.collect_alerts(|a| {
            a.is_active(now) && filter.matches(a) && after.map_or(true, |c| c.precedes(a))
        });
        newest_first(&mut alerts);
        alerts.truncate(limit as usize);
        Ok(alerts)
    }

    async fn active_alerts_within(
        &self,
        bbox: Option<BoundingBox>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        Ok(self.collect_alerts(|a| {
            a.is_active(now) && bbox.map_or(true, |b| b.contains(&a.location))
        }))
    }

    async fn list_alerts_by_status(
        &self,
        status: AlertStatus,
        page: Page,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Alert>> {
        let alerts = self.collect_alerts(|a| status.matches(a, now));
        Ok(paginate(alerts, page))
    }

    async fn delete_alert(&self, alert_id: Uuid) -> CoreResult<bool> {
        self.ballots.remove(&alert_id);
        Ok(self.alerts.remove(&alert_id).is_some())
    }

    async fn purge_expired_alerts(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let expired: Vec<Uuid> = self
            .alerts
            .iter()
            .filter(|a| a.expires_at <= cutoff)
            .map(|a| a.alert_id)
            .collect();

        let mut removed = 0;
        for alert_id in expired {
            self.ballots.remove(&alert_id);
            if self.alerts.remove(&alert_id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl VoteLedger for MemoryStore {
    async fn cast_vote(
        &self,
        alert_id: Uuid,
        user_id: Uuid,
        direction: VoteDirection,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        let not_found = || CoreError::not_found(format!("alert {} not found or expired", alert_id));

        let ballot = self.ballot(alert_id).ok_or_else(not_found)?;
        let mut votes = ballot.lock().await;

        let active = self
            .alerts
            .get(&alert_id)
            .map_or(false, |a| a.is_active(now));
        if !active {
            return Err(not_found());
        }

        votes.insert(
            user_id,
            Vote {
                alert_id,
                user_id,
                direction,
                updated_at: now,
            },
        );
        let score = score_of(votes.values());

        match self.alerts.get_mut(&alert_id) {
            Some(mut alert) => alert.score = score,
            None => {
                // deleted while we held the ballot; the orphaned ballot goes with it
                return Err(not_found());
            }
        }
        Ok(score)
    }

    async fn recompute_score(&self, alert_id: Uuid) -> CoreResult<i64> {
        let ballot = self
            .ballot(alert_id)
            .ok_or_else(|| CoreError::not_found(format!("alert {}", alert_id)))?;
        let votes = ballot.lock().await;
        let score = score_of(votes.values());

        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| CoreError::not_found(format!("alert {}", alert_id)))?;
        alert.score = score;
        Ok(score)
    }

    async fn votes_for(&self, alert_id: Uuid) -> CoreResult<Vec<Vote>> {
        let Some(ballot) = self.ballot(alert_id) else {
            return Ok(Vec::new());
        };
        let mut votes: Vec<Vote> = ballot.lock().await.values().cloned().collect();
        votes.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(votes)
    }
}

#[async_trait]
impl TransitStore for MemoryStore {
    async fn line_exists(&self, line_id: Uuid) -> CoreResult<bool> {
        Ok(self.transit.read().await.lines.contains_key(&line_id))
    }

    async fn list_lines(&self, active_only: bool) -> CoreResult<Vec<LineSummary>> {
        let state = self.transit.read().await;
        let mut lines: Vec<LineSummary> = state
            .lines
            .values()
            .filter(|l| !active_only || l.is_active)
            .map(|l| LineSummary {
                line: l.clone(),
                stop_count: state
                    .line_stops
                    .keys()
                    .filter(|(line_id, _)| *line_id == l.line_id)
                    .count() as i64,
            })
            .collect();
        lines.sort_by(|a, b| a.line.line_number.cmp(&b.line.line_number));
        Ok(lines)
    }

    async fn find_line(&self, line_id: Uuid) -> CoreResult<Option<LineDetail>> {
        let state = self.transit.read().await;
        let Some(line) = state.lines.get(&line_id) else {
            return Ok(None);
        };

        let mut stops: Vec<LineStop> = state
            .line_stops
            .iter()
            .filter(|((l, _), _)| *l == line_id)
            .filter_map(|((_, stop_id), seq)| {
                state.stops.get(stop_id).map(|stop| LineStop {
                    stop: stop.clone(),
                    sequence_order: *seq,
                })
            })
            .collect();
        stops.sort_by_key(|s| (s.sequence_order, s.stop.stop_id));

        Ok(Some(LineDetail {
            line: line.clone(),
            stops,
        }))
    }

    async fn insert_line(&self, line: &Line) -> CoreResult<()> {
        let mut state = self.transit.write().await;
        if state.line_number_taken(&line.line_number, None) {
            return Err(conflict("line number", &line.line_number));
        }
        state.lines.insert(line.line_id, line.clone());
        Ok(())
    }

    async fn update_line(&self, line_id: Uuid, patch: &LinePatch) -> CoreResult<Option<Line>> {
        let mut state = self.transit.write().await;
        if let Some(number) = &patch.line_number {
            if state.line_number_taken(number, Some(line_id)) {
                return Err(conflict("line number", number));
            }
        }
        Ok(state.lines.get_mut(&line_id).map(|line| {
            patch.apply(line);
            line.clone()
        }))
    }

    async fn delete_line(&self, line_id: Uuid) -> CoreResult<bool> {
        let mut state = self.transit.write().await;
        if state.lines.remove(&line_id).is_none() {
            return Ok(false);
        }
        state.line_stops.retain(|(l, _), _| *l != line_id);

        let buses: Vec<Uuid> = state
            .buses
            .values()
            .filter(|b| b.line_id == line_id)
            .map(|b| b.bus_id)
            .collect();
        for bus_id in buses {
            state.buses.remove(&bus_id);
            state.positions.remove(&bus_id);
        }

        for mut alert in self.alerts.iter_mut() {
            if alert.line_id == Some(line_id) {
                alert.line_id = None;
            }
        }
        Ok(true)
    }

    async fn attach_stop(&self, line_id: Uuid, stop_id: Uuid, sequence_order: i32) -> CoreResult<()> {
        let mut state = self.transit.write().await;
        if !state.lines.contains_key(&line_id) {
            return Err(CoreError::not_found(format!("line {}", line_id)));
        }
        if !state.stops.contains_key(&stop_id) {
            return Err(CoreError::not_found(format!("stop {}", stop_id)));
        }
        state.line_stops.insert((line_id, stop_id), sequence_order);
        Ok(())
    }

    async fn detach_stop(&self, line_id: Uuid, stop_id: Uuid) -> CoreResult<bool> {
        let mut state = self.transit.write().await;
        Ok(state.line_stops.remove(&(line_id, stop_id)).is_some())
    }

    async fn list_stops(&self) -> CoreResult<Vec<Stop>> {
        let state = self.transit.read().await;
        let mut stops: Vec<Stop> = state.stops.values().cloned().collect();
        stops.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.stop_id.cmp(&b.stop_id)));
        Ok(stops)
    }

    async fn stops_within(&self, bbox: Option<BoundingBox>) -> CoreResult<Vec<Stop>> {
        let state = self.transit.read().await;
        Ok(state
            .stops
            .values()
            .filter(|s| bbox.map_or(true, |b| b.contains(&s.location)))
            .cloned()
            .collect())
    }

    async fn find_stop(&self, stop_id: Uuid) -> CoreResult<Option<StopDetail>> {
        let state = self.transit.read().await;
        let Some(stop) = state.stops.get(&stop_id) else {
            return Ok(None);
        };

        let mut lines: Vec<Line> = state
            .line_stops
            .keys()
            .filter(|(_, s)| *s == stop_id)
            .filter_map(|(line_id, _)| state.lines.get(line_id).cloned())
            .collect();
        lines.sort_by(|a, b| a.line_number.cmp(&b.line_number));

        Ok(Some(StopDetail {
            stop: stop.clone(),
            lines,
        }))
    }

    async fn insert_stop(&self, stop: &Stop) -> CoreResult<()> {
        let mut state = self.transit.write().await;
        if let Some(code) = &stop.code {
            if state.stop_code_taken(code, None) {
                return Err(conflict("stop code", code));
            }
        }
        state.stops.insert(stop.stop_id, stop.clone());
        Ok(())
    }

    async fn update_stop(&self, stop_id: Uuid, patch: &StopPatch) -> CoreResult<Option<Stop>> {
        let mut state = self.transit.write().await;
        if let Some(Some(code)) = &patch.code {
            if state.stop_code_taken(code, Some(stop_id)) {
                return Err(conflict("stop code", code));
            }
        }
        Ok(state.stops.get_mut(&stop_id).map(|stop| {
            patch.apply(stop);
            stop.clone()
        }))
    }

    async fn delete_stop(&self, stop_id: Uuid) -> CoreResult<bool> {
        let mut state = self.transit.write().await;
        if state.stops.remove(&stop_id).is_none() {
            return Ok(false);
        }
        state.line_stops.retain(|(_, s), _| *s != stop_id);
        Ok(true)
    }

    async fn list_buses(&self, line_id: Option<Uuid>) -> CoreResult<Vec<BusSnapshot>> {
        let state = self.transit.read().await;
        let mut buses: Vec<BusSnapshot> = state
            .buses
            .values()
            .filter(|b| b.is_active && line_id.map_or(true, |id| b.line_id == id))
            .map(|b| state.snapshot(b))
            .collect();
        buses.sort_by(|a, b| a.bus.bus_number.cmp(&b.bus.bus_number));
        Ok(buses)
    }

    async fn find_bus(&self, bus_id: Uuid) -> CoreResult<Option<BusSnapshot>> {
        let state = self.transit.read().await;
        Ok(state.buses.get(&bus_id).map(|b| state.snapshot(b)))
    }

    async fn located_buses_within(&self, bbox: Option<BoundingBox>) -> CoreResult<Vec<LocatedBus>> {
        let state = self.transit.read().await;
        Ok(state
            .buses
            .values()
            .filter(|b| b.is_active)
            .filter_map(|b| state.snapshot(b).located())
            .filter(|b| bbox.map_or(true, |bbox| bbox.contains(&b.position.location)))
            .collect())
    }

    async fn insert_bus(&self, bus: &Bus) -> CoreResult<()> {
        let mut state = self.transit.write().await;
        if !state.lines.contains_key(&bus.line_id) {
            return Err(CoreError::not_found(format!("line {}", bus.line_id)));
        }
        if state.bus_number_taken(&bus.bus_number, None) {
            return Err(conflict("bus number", &bus.bus_number));
        }
        state.buses.insert(bus.bus_id, bus.clone());
        Ok(())
    }

    async fn update_bus(&self, bus_id: Uuid, patch: &BusPatch) -> CoreResult<Option<Bus>> {
        let mut state = self.transit.write().await;
        if let Some(number) = &patch.bus_number {
            if state.bus_number_taken(number, Some(bus_id)) {
                return Err(conflict("bus number", number));
            }
        }
        if let Some(line_id) = patch.line_id {
            if !state.lines.contains_key(&line_id) {
                return Err(CoreError::not_found(format!("line {}", line_id)));
            }
        }
        Ok(state.buses.get_mut(&bus_id).map(|bus| {
            patch.apply(bus);
            bus.clone()
        }))
    }

    async fn delete_bus(&self, bus_id: Uuid) -> CoreResult<bool> {
        let mut state = self.transit.write().await;
        state.positions.remove(&bus_id);
        Ok(state.buses.remove(&bus_id).is_some())
    }

    async fn insert_position(&self, position: &BusPosition) -> CoreResult<()> {
        let mut state = self.transit.write().await;
        if !state.buses.contains_key(&position.bus_id) {
            return Err(CoreError::not_found(format!("bus {}", position.bus_id)));
        }
        state
            .positions
            .entry(position.bus_id)
            .or_default()
            .push(position.clone());
        Ok(())
    }
}
