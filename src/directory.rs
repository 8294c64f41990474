//! Lines, stops and buses: topology lookups, nearby queries and the bus
//! position time series.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{system_clock, Clock};
use crate::error::{CoreError, CoreResult};
use crate::geo_index::{
    self, BoundingBox, GeoPoint, Ranked, DEFAULT_BUS_RADIUS_KM, DEFAULT_STOP_RADIUS_KM,
};
use crate::models::{
    Bus, BusPatch, BusPosition, BusSnapshot, Line, LineDetail, LinePatch, LineSummary, LocatedBus,
    NewBus, NewLine, NewPosition, NewStop, Stop, StopDetail, StopPatch,
};
use crate::store::TransitStore;

pub struct TransitDirectory<S> {
    store: Arc<S>,
    clock: Clock,
}

impl<S: TransitStore> TransitDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    // ---- reads ----

    pub async fn list_lines(&self, active_only: bool) -> CoreResult<Vec<LineSummary>> {
        self.store.list_lines(active_only).await
    }

    pub async fn get_line(&self, line_id: Uuid) -> CoreResult<LineDetail> {
        self.store
            .find_line(line_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("line {}", line_id)))
    }

    pub async fn list_stops(&self) -> CoreResult<Vec<Stop>> {
        self.store.list_stops().await
    }

    pub async fn get_stop(&self, stop_id: Uuid) -> CoreResult<StopDetail> {
        self.store
            .find_stop(stop_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("stop {}", stop_id)))
    }

    pub async fn list_buses(&self, line_id: Option<Uuid>) -> CoreResult<Vec<BusSnapshot>> {
        self.store.list_buses(line_id).await
    }

    pub async fn get_bus(&self, bus_id: Uuid) -> CoreResult<BusSnapshot> {
        self.store
            .find_bus(bus_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("bus {}", bus_id)))
    }

    /// Stops within `radius_km` (1 km when omitted), nearest first.
    pub async fn nearby_stops(
        &self,
        point: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> CoreResult<Vec<Ranked<Stop>>> {
        let radius_km = radius_km.unwrap_or(DEFAULT_STOP_RADIUS_KM);
        let point = geo_index::validate_query(point, radius_km)?;
        let bbox = BoundingBox::around(point, geo_index::km_to_meters(radius_km));
        let candidates = self.store.stops_within(bbox).await?;
        Ok(geo_index::nearby(candidates, point, radius_km))
    }

    /// Active buses whose current position is within `radius_km` (5 km when
    /// omitted), nearest first.
    pub async fn nearby_buses(
        &self,
        point: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> CoreResult<Vec<Ranked<LocatedBus>>> {
        let radius_km = radius_km.unwrap_or(DEFAULT_BUS_RADIUS_KM);
        let point = geo_index::validate_query(point, radius_km)?;
        let bbox = BoundingBox::around(point, geo_index::km_to_meters(radius_km));
        let candidates = self.store.located_buses_within(bbox).await?;
        Ok(geo_index::nearby(candidates, point, radius_km))
    }

    // ---- position time series ----

    /// Appends one sample; samples are never edited afterwards.
    pub async fn record_position(&self, new: NewPosition) -> CoreResult<BusPosition> {
        new.validate()?;
        let position = BusPosition {
            bus_id: new.bus_id,
            location: new.location,
            speed: new.speed,
            heading: new.heading,
            source: new.source,
            recorded_at: new.recorded_at.unwrap_or_else(|| (self.clock)()),
        };
        self.store.insert_position(&position).await?;
        debug!(
            "Recorded position for bus {} at ({}, {})",
            position.bus_id, position.location.latitude, position.location.longitude
        );
        Ok(position)
    }

    // ---- administration ----

    pub async fn create_line(&self, new: NewLine) -> CoreResult<Line> {
        new.validate()?;
        let line = Line {
            line_id: Uuid::new_v4(),
            line_number: new.line_number.trim().to_string(),
            name: new.name.trim().to_string(),
            color: new.color,
            start_point: new.start_point,
            end_point: new.end_point,
            fare: new.fare,
            is_active: new.is_active.unwrap_or(true),
            created_at: (self.clock)(),
        };
        self.store.insert_line(&line).await?;
        info!("Created line {} ({})", line.line_number, line.line_id);
        Ok(line)
    }

    pub async fn update_line(&self, line_id: Uuid, patch: LinePatch) -> CoreResult<Line> {
        let patch = patch.trimmed();
        patch.validate()?;
        self.store
            .update_line(line_id, &patch)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("line {}", line_id)))
    }

    pub async fn delete_line(&self, line_id: Uuid) -> CoreResult<()> {
        if !self.store.delete_line(line_id).await? {
            return Err(CoreError::not_found(format!("line {}", line_id)));
        }
        info!("Deleted line {}", line_id);
        Ok(())
    }

    pub async fn attach_stop(&self, line_id: Uuid, stop_id: Uuid, sequence_order: i32) -> CoreResult<()> {
        if sequence_order < 0 {
            return Err(CoreError::validation("sequence order must not be negative"));
        }
        self.store.attach_stop(line_id, stop_id, sequence_order).await
    }

    pub async fn detach_stop(&self, line_id: Uuid, stop_id: Uuid) -> CoreResult<()> {
        if !self.store.detach_stop(line_id, stop_id).await? {
            return Err(CoreError::not_found(format!(
                "stop {} is not on line {}",
                stop_id, line_id
            )));
        }
        Ok(())
    }

    pub async fn create_stop(&self, new: NewStop) -> CoreResult<Stop> {
        new.validate()?;
        let stop = Stop {
            stop_id: Uuid::new_v4(),
            code: new.code.map(|c| c.trim().to_string()),
            name: new.name.trim().to_string(),
            location: new.location,
            created_at: (self.clock)(),
        };
        self.store.insert_stop(&stop).await?;
        info!("Created stop {} ({})", stop.name, stop.stop_id);
        Ok(stop)
    }

    pub async fn update_stop(&self, stop_id: Uuid, patch: StopPatch) -> CoreResult<Stop> {
        let patch = patch.trimmed();
        patch.validate()?;
        self.store
            .update_stop(stop_id, &patch)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("stop {}", stop_id)))
    }

    pub async fn delete_stop(&self, stop_id: Uuid) -> CoreResult<()> {
        if !self.store.delete_stop(stop_id).await? {
            return Err(CoreError::not_found(format!("stop {}", stop_id)));
        }
        Ok(())
    }

    pub async fn create_bus(&self, new: NewBus) -> CoreResult<Bus> {
        new.validate()?;
        let bus = Bus {
            bus_id: Uuid::new_v4(),
            bus_number: new.bus_number.trim().to_string(),
            line_id: new.line_id,
            direction: new.direction,
            is_active: new.is_active.unwrap_or(true),
            created_at: (self.clock)(),
        };
        self.store.insert_bus(&bus).await?;
        info!("Created bus {} on line {}", bus.bus_number, bus.line_id);
        Ok(bus)
    }

    pub async fn update_bus(&self, bus_id: Uuid, patch: BusPatch) -> CoreResult<Bus> {
        let patch = patch.trimmed();
        patch.validate()?;
        self.store
            .update_bus(bus_id, &patch)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("bus {}", bus_id)))
    }

    pub async fn delete_bus(&self, bus_id: Uuid) -> CoreResult<()> {
        if !self.store.delete_bus(bus_id).await? {
            return Err(CoreError::not_found(format!("bus {}", bus_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn directory() -> TransitDirectory<MemoryStore> {
        TransitDirectory::new(Arc::new(MemoryStore::new()))
    }

    fn line(number: &str) -> NewLine {
        NewLine {
            line_number: number.to_string(),
            name: format!("Ligne {}", number),
            fare: 150.0,
            ..Default::default()
        }
    }

    fn stop(name: &str, code: Option<&str>, at: GeoPoint) -> NewStop {
        NewStop {
            code: code.map(str::to_string),
            name: name.to_string(),
            location: at,
        }
    }

    fn bus(number: &str, line_id: Uuid) -> NewBus {
        NewBus {
            bus_number: number.to_string(),
            line_id,
            direction: None,
            is_active: None,
        }
    }

    fn report(bus_id: Uuid, at: GeoPoint) -> NewPosition {
        NewPosition {
            bus_id,
            location: at,
            speed: Some(25.0),
            heading: Some(90.0),
            source: "gps".to_string(),
            recorded_at: None,
        }
    }

    #[tokio::test]
    async fn test_line_topology() {
        let dir = directory();
        let l1 = dir.create_line(line("1")).await.unwrap();
        let l2 = dir.create_line(line("2")).await.unwrap();
        let gare = dir.create_stop(stop("Gare", Some("GAR"), GeoPoint::new(12.37, -1.52))).await.unwrap();
        let marche = dir.create_stop(stop("Marché", None, GeoPoint::new(12.36, -1.53))).await.unwrap();

        dir.attach_stop(l1.line_id, marche.stop_id, 2).await.unwrap();
        dir.attach_stop(l1.line_id, gare.stop_id, 1).await.unwrap();
        dir.attach_stop(l2.line_id, gare.stop_id, 5).await.unwrap();

        let detail = dir.get_line(l1.line_id).await.unwrap();
        let names: Vec<&str> = detail.stops.iter().map(|s| s.stop.name.as_str()).collect();
        assert_eq!(names, vec!["Gare", "Marché"]);

        let gare_detail = dir.get_stop(gare.stop_id).await.unwrap();
        let numbers: Vec<&str> = gare_detail.lines.iter().map(|l| l.line_number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "2"]);

        let lines = dir.list_lines(false).await.unwrap();
        assert_eq!(lines[0].stop_count, 2);
        assert_eq!(lines[1].stop_count, 1);

        dir.detach_stop(l2.line_id, gare.stop_id).await.unwrap();
        assert!(matches!(
            dir.detach_stop(l2.line_id, gare.stop_id).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            dir.attach_stop(Uuid::new_v4(), gare.stop_id, 1).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            dir.attach_stop(l1.line_id, gare.stop_id, -1).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_codes_conflict() {
        let dir = directory();
        let l1 = dir.create_line(line("1")).await.unwrap();
        let l2 = dir.create_line(line("2")).await.unwrap();
        assert!(matches!(dir.create_line(line("1")).await, Err(CoreError::Conflict(_))));

        let patch = LinePatch {
            line_number: Some("1".into()),
            ..Default::default()
        };
        assert!(matches!(dir.update_line(l2.line_id, patch).await, Err(CoreError::Conflict(_))));

        dir.create_stop(stop("A", Some("S1"), GeoPoint::new(0.0, 0.0))).await.unwrap();
        assert!(matches!(
            dir.create_stop(stop("B", Some("S1"), GeoPoint::new(0.0, 0.0))).await,
            Err(CoreError::Conflict(_))
        ));

        dir.create_bus(bus("B-01", l1.line_id)).await.unwrap();
        assert!(matches!(dir.create_bus(bus("B-01", l2.line_id)).await, Err(CoreError::Conflict(_))));
        assert!(matches!(dir.create_bus(bus("B-02", Uuid::new_v4())).await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_patches_leave_absent_fields_alone() {
        let dir = directory();
        let mut new = line("7");
        new.color = Some("#00aa00".into());
        let created = dir.create_line(new).await.unwrap();

        let unchanged = dir.update_line(created.line_id, LinePatch::default()).await.unwrap();
        assert_eq!(unchanged, created);

        let patch: LinePatch = serde_json::from_str(r#"{"name": "Express", "color": null}"#).unwrap();
        let updated = dir.update_line(created.line_id, patch).await.unwrap();
        assert_eq!(updated.name, "Express");
        assert_eq!(updated.color, None);
        assert_eq!(updated.fare, created.fare);
        assert_eq!(updated.line_number, "7");

        let s = dir.create_stop(stop("Old name", Some("X1"), GeoPoint::new(1.0, 1.0))).await.unwrap();
        let patched = dir
            .update_stop(s.stop_id, StopPatch { code: Some(None), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(patched.code, None);
        assert_eq!(patched.name, "Old name");

        let bad = StopPatch {
            location: Some(GeoPoint::new(0.0, 200.0)),
            ..Default::default()
        };
        assert!(matches!(dir.update_stop(s.stop_id, bad).await, Err(CoreError::Validation(_))));
        assert!(matches!(
            dir.update_line(Uuid::new_v4(), LinePatch::default()).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_patched_codes_are_trimmed_before_uniqueness() {
        let dir = directory();
        dir.create_line(line("7")).await.unwrap();
        let eight = dir.create_line(line("8")).await.unwrap();
        let renumber = LinePatch {
            line_number: Some(" 7 ".into()),
            ..Default::default()
        };
        assert!(matches!(dir.update_line(eight.line_id, renumber).await, Err(CoreError::Conflict(_))));
        let renamed = LinePatch {
            line_number: Some(" 9".into()),
            name: Some("  Ligne 9 ".into()),
            ..Default::default()
        };
        let nine = dir.update_line(eight.line_id, renamed).await.unwrap();
        assert_eq!((nine.line_number.as_str(), nine.name.as_str()), ("9", "Ligne 9"));

        dir.create_stop(stop("A", Some("S1"), GeoPoint::new(0.0, 0.0))).await.unwrap();
        let b = dir.create_stop(stop("B", Some("S2"), GeoPoint::new(0.0, 0.0))).await.unwrap();
        let recode = StopPatch {
            code: Some(Some("S1 ".into())),
            ..Default::default()
        };
        assert!(matches!(dir.update_stop(b.stop_id, recode).await, Err(CoreError::Conflict(_))));

        let l7 = dir.list_lines(false).await.unwrap()[0].line.line_id;
        dir.create_bus(bus("B-01", l7)).await.unwrap();
        let other = dir.create_bus(bus("B-02", l7)).await.unwrap();
        let renumber = BusPatch {
            bus_number: Some("\tB-01".into()),
            ..Default::default()
        };
        assert!(matches!(dir.update_bus(other.bus_id, renumber).await, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_current_position_is_latest_sample() {
        let dir = directory();
        let l = dir.create_line(line("3")).await.unwrap();
        let b = dir.create_bus(bus("B-03", l.line_id)).await.unwrap();

        assert_eq!(dir.get_bus(b.bus_id).await.unwrap().position, None);

        let t0 = Utc::now();
        let mut later = report(b.bus_id, GeoPoint::new(12.40, -1.50));
        later.recorded_at = Some(t0 + Duration::seconds(30));
        let mut earlier = report(b.bus_id, GeoPoint::new(12.30, -1.55));
        earlier.recorded_at = Some(t0);

        dir.record_position(later).await.unwrap();
        // arrives late but is older, so it must not become current
        dir.record_position(earlier).await.unwrap();

        let snapshot = dir.get_bus(b.bus_id).await.unwrap();
        assert_eq!(snapshot.position.unwrap().location, GeoPoint::new(12.40, -1.50));

        let missing = dir.record_position(report(Uuid::new_v4(), GeoPoint::new(0.0, 0.0))).await;
        assert!(matches!(missing, Err(CoreError::NotFound(_))));
        let invalid = dir.record_position(report(b.bus_id, GeoPoint::new(-91.0, 0.0))).await;
        assert!(matches!(invalid, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_nearby_stops_and_buses() {
        let dir = directory();
        let origin = GeoPoint::new(12.37, -1.52);
        let l = dir.create_line(line("4")).await.unwrap();

        let close = dir.create_stop(stop("Close", None, GeoPoint::new(12.3705, -1.52))).await.unwrap();
        let _far = dir.create_stop(stop("Far", None, GeoPoint::new(12.40, -1.52))).await.unwrap();
        let stops = dir.nearby_stops(Some(origin), None).await.unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].entity.stop_id, close.stop_id);
        assert!(stops[0].distance_meters < 100.0);

        let moving = dir.create_bus(bus("B-10", l.line_id)).await.unwrap();
        let parked = dir.create_bus(bus("B-11", l.line_id)).await.unwrap();
        let silent = dir.create_bus(bus("B-12", l.line_id)).await.unwrap();
        dir.record_position(report(moving.bus_id, GeoPoint::new(12.38, -1.52))).await.unwrap();
        dir.record_position(report(parked.bus_id, GeoPoint::new(12.371, -1.52))).await.unwrap();

        let buses = dir.nearby_buses(Some(origin), None).await.unwrap();
        let ids: Vec<Uuid> = buses.iter().map(|b| b.entity.bus.bus_id).collect();
        assert_eq!(ids, vec![parked.bus_id, moving.bus_id]);

        dir.update_bus(parked.bus_id, BusPatch { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        let buses = dir.nearby_buses(Some(origin), Some(5.0)).await.unwrap();
        assert_eq!(buses.len(), 1);

        let listed = dir.list_buses(Some(l.line_id)).await.unwrap();
        let numbers: Vec<&str> = listed.iter().map(|b| b.bus.bus_number.as_str()).collect();
        assert_eq!(numbers, vec!["B-10", "B-12"]);
        assert!(listed[1].position.is_none());
        assert_eq!(listed[1].bus.bus_id, silent.bus_id);

        assert_eq!(dir.nearby_stops(Some(origin), Some(5.0)).await.unwrap().len(), 2);
        assert!(matches!(dir.nearby_stops(None, None).await, Err(CoreError::Validation(_))));
        assert!(matches!(dir.nearby_buses(Some(origin), Some(0.0)).await, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_line_cascades() {
        let dir = directory();
        let l = dir.create_line(line("9")).await.unwrap();
        let s = dir.create_stop(stop("S", None, GeoPoint::new(0.0, 0.0))).await.unwrap();
        let b = dir.create_bus(bus("B-90", l.line_id)).await.unwrap();
        dir.attach_stop(l.line_id, s.stop_id, 1).await.unwrap();

        dir.delete_line(l.line_id).await.unwrap();
        assert!(matches!(dir.get_line(l.line_id).await, Err(CoreError::NotFound(_))));
        assert!(matches!(dir.get_bus(b.bus_id).await, Err(CoreError::NotFound(_))));
        assert!(dir.get_stop(s.stop_id).await.unwrap().lines.is_empty());
        assert!(matches!(dir.delete_line(l.line_id).await, Err(CoreError::NotFound(_))));

        dir.delete_stop(s.stop_id).await.unwrap();
        assert!(dir.list_stops().await.unwrap().is_empty());
    }
}
