//! Alert lifecycle: creation, listing, proximity search, voting and expiry.

use chrono::Duration;
use futures::stream::{self, Stream, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{system_clock, Clock};
use crate::error::{CoreError, CoreResult};
use crate::geo_index::{self, BoundingBox, GeoPoint, Ranked, DEFAULT_ALERT_RADIUS_KM};
use crate::models::alert::DEFAULT_VALIDITY_MINUTES;
use crate::models::{
    Alert, AlertCategory, AlertCursor, AlertFilter, AlertStatus, NewAlert, Page, Vote,
    VoteDirection,
};
use crate::store::Store;

pub struct AlertEngine<S> {
    store: Arc<S>,
    clock: Clock,
    default_validity_minutes: i64,
    purge_retention: Duration,
}

impl<S: Store> AlertEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: system_clock(),
            default_validity_minutes: DEFAULT_VALIDITY_MINUTES,
            purge_retention: Duration::zero(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_validity(mut self, minutes: i64) -> Self {
        self.default_validity_minutes = minutes;
        self
    }

    /// How long an expired alert is kept before `purge_expired` removes it.
    pub fn with_purge_retention(mut self, retention: Duration) -> Self {
        self.purge_retention = retention;
        self
    }

    pub async fn create(&self, creator_id: Uuid, new: NewAlert) -> CoreResult<Alert> {
        let category: AlertCategory = new.category.parse()?;

        let description = new.description.trim();
        if description.is_empty() {
            return Err(CoreError::validation("description is required"));
        }

        let location = new
            .location
            .ok_or_else(|| CoreError::validation("latitude and longitude are required"))?;
        location.validate()?;

        let validity_minutes = new.validity_minutes.unwrap_or(self.default_validity_minutes);
        if validity_minutes <= 0 {
            return Err(CoreError::validation(format!(
                "validity must be a positive number of minutes, got {}",
                validity_minutes
            )));
        }
        let now = (self.clock)();
        let expires_at = Duration::try_minutes(validity_minutes)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| {
                CoreError::validation(format!("validity of {} minutes is out of range", validity_minutes))
            })?;

        if let Some(line_id) = new.line_id {
            if !self.store.line_exists(line_id).await? {
                return Err(CoreError::not_found(format!("line {}", line_id)));
            }
        }

        let alert = Alert {
            alert_id: Uuid::new_v4(),
            category,
            description: description.to_string(),
            location,
            line_id: new.line_id,
            score: 0,
            created_by: creator_id,
            created_at: now,
            expires_at,
        };

        self.store.insert_alert(&alert).await?;
        info!(
            "Created alert {} ({}) by user {}, expires at {}",
            alert.alert_id, alert.category, creator_id, alert.expires_at
        );
        Ok(alert)
    }

    /// Fetches an alert whether or not it is still active.
    pub async fn get(&self, alert_id: Uuid) -> CoreResult<Alert> {
        self.store
            .find_alert(alert_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("alert {}", alert_id)))
    }

    /// One page of active alerts, most recent first.
    pub async fn list_active(&self, filter: &AlertFilter, page: Page) -> CoreResult<Vec<Alert>> {
        page.validate()?;
        let now = (self.clock)();
        self.store.list_active_alerts(filter, page, now).await
    }

    /// Every active alert matching `filter`, fetched lazily `page_size` at a
    /// time. Each call starts again from the newest alert.
    ///
    /// Pages continue from the last alert yielded rather than from an offset,
    /// so alerts created or removed mid-walk neither repeat nor hide others.
    pub fn stream_active(
        &self,
        filter: AlertFilter,
        page_size: u32,
    ) -> impl Stream<Item = CoreResult<Alert>> + '_ {
        let now = (self.clock)();
        let start: Option<Option<AlertCursor>> = Some(None);
        stream::try_unfold(start, move |next| async move {
            let Some(after) = next else {
                return Ok::<_, CoreError>(None);
            };
            Page::new(0, page_size).validate()?;
            let batch = self
                .store
                .active_alerts_after(&filter, after, page_size, now)
                .await?;
            let following = match batch.last() {
                Some(last) if batch.len() as u32 == page_size => Some(Some(AlertCursor::of(last))),
                _ => None,
            };
            Ok(Some((
                stream::iter(batch.into_iter().map(Ok::<Alert, CoreError>)),
                following,
            )))
        })
        .try_flatten()
    }

    /// Active alerts within `radius_km` (5 km when omitted), nearest first.
    pub async fn list_nearby(
        &self,
        point: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> CoreResult<Vec<Ranked<Alert>>> {
        let radius_km = radius_km.unwrap_or(DEFAULT_ALERT_RADIUS_KM);
        let point = geo_index::validate_query(point, radius_km)?;
        let now = (self.clock)();

        let bbox = BoundingBox::around(point, geo_index::km_to_meters(radius_km));
        let candidates = self.store.active_alerts_within(bbox, now).await?;
        Ok(geo_index::nearby(candidates, point, radius_km))
    }

    /// Records `user_id`'s vote, replacing any earlier one, and returns the
    /// freshly recomputed score.
    pub async fn vote(
        &self,
        alert_id: Uuid,
        user_id: Uuid,
        direction: VoteDirection,
    ) -> CoreResult<i64> {
        let now = (self.clock)();
        let score = self
            .store
            .cast_vote(alert_id, user_id, direction, now)
            .await?;
        debug!(
            "User {} voted {:?} on alert {}, score now {}",
            user_id, direction, alert_id, score
        );
        Ok(score)
    }

    pub async fn votes(&self, alert_id: Uuid) -> CoreResult<Vec<Vote>> {
        self.get(alert_id).await?;
        self.store.votes_for(alert_id).await
    }

    /// Rewrites an alert's stored score from its vote records.
    pub async fn recompute_score(&self, alert_id: Uuid) -> CoreResult<i64> {
        self.store.recompute_score(alert_id).await
    }

    pub async fn list_by_status(&self, status: AlertStatus, page: Page) -> CoreResult<Vec<Alert>> {
        page.validate()?;
        let now = (self.clock)();
        self.store.list_alerts_by_status(status, page, now).await
    }

    pub async fn delete(&self, alert_id: Uuid) -> CoreResult<()> {
        if !self.store.delete_alert(alert_id).await? {
            return Err(CoreError::not_found(format!("alert {}", alert_id)));
        }
        info!("Deleted alert {}", alert_id);
        Ok(())
    }

    /// Removes alerts that expired at least the retention period ago.
    pub async fn purge_expired(&self) -> CoreResult<u64> {
        let Some(cutoff) = (self.clock)().checked_sub_signed(self.purge_retention) else {
            debug!("Purge retention reaches past the earliest timestamp; nothing to purge");
            return Ok(0);
        };
        let removed = self.store.purge_expired_alerts(cutoff).await?;
        if removed > 0 {
            info!("Purged {} expired alerts (expired before {})", removed, cutoff);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Line;
    use crate::store::{MemoryStore, TransitStore, VoteLedger};
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    struct Harness {
        engine: AlertEngine<MemoryStore>,
        store: Arc<MemoryStore>,
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let now = Arc::new(Mutex::new(Utc::now()));
            let clock_now = now.clone();
            let engine = AlertEngine::new(store.clone())
                .with_clock(Arc::new(move || *clock_now.lock().unwrap()));
            Self { engine, store, now }
        }

        fn advance(&self, minutes: i64) {
            *self.now.lock().unwrap() += Duration::minutes(minutes);
        }

        async fn create(&self, description: &str, at: GeoPoint) -> Alert {
            self.engine
                .create(Uuid::new_v4(), breakdown(description, at))
                .await
                .unwrap()
        }
    }

    fn breakdown(description: &str, at: GeoPoint) -> NewAlert {
        NewAlert {
            category: "breakdown".to_string(),
            description: description.to_string(),
            location: Some(at),
            line_id: None,
            validity_minutes: Some(60),
        }
    }

    fn ouaga() -> GeoPoint {
        GeoPoint::new(12.37, -1.52)
    }

    /// Point `meters` due north of `origin`.
    fn north_of(origin: GeoPoint, meters: f64) -> GeoPoint {
        let dlat = (meters / geo_index::EARTH_RADIUS_METERS).to_degrees();
        GeoPoint::new(origin.latitude + dlat, origin.longitude)
    }

    #[tokio::test]
    async fn test_create_then_list_active() {
        let h = Harness::new();
        let alert = h.create("engine failure", ouaga()).await;

        assert_eq!(alert.score, 0);
        assert_eq!(alert.category, AlertCategory::Breakdown);
        assert!(alert.expires_at > alert.created_at);
        assert_eq!(alert.expires_at - alert.created_at, Duration::minutes(60));

        let active = h.engine.list_active(&AlertFilter::default(), Page::default()).await.unwrap();
        assert_eq!(active, vec![alert]);
    }

    #[tokio::test]
    async fn test_create_defaults_validity() {
        let h = Harness::new();
        let mut new = breakdown("flat tyre", ouaga());
        new.validity_minutes = None;

        let alert = h.engine.create(Uuid::new_v4(), new).await.unwrap();
        assert_eq!(alert.expires_at - alert.created_at, Duration::minutes(120));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let h = Harness::new();
        let user = Uuid::new_v4();

        let cases = vec![
            NewAlert { category: "flood".into(), ..breakdown("x", ouaga()) },
            NewAlert { description: "   ".into(), ..breakdown("x", ouaga()) },
            NewAlert { location: None, ..breakdown("x", ouaga()) },
            NewAlert { location: Some(GeoPoint::new(95.0, 0.0)), ..breakdown("x", ouaga()) },
            NewAlert { validity_minutes: Some(0), ..breakdown("x", ouaga()) },
            NewAlert { validity_minutes: Some(-30), ..breakdown("x", ouaga()) },
            NewAlert { validity_minutes: Some(i64::MAX), ..breakdown("x", ouaga()) },
        ];
        for new in cases {
            let err = h.engine.create(user, new.clone()).await.unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)), "{:?} gave {:?}", new, err);
        }
        assert!(h.engine.list_active(&AlertFilter::default(), Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_accepts_long_validity() {
        let h = Harness::new();
        let mut month = breakdown("road closed for works", ouaga());
        month.validity_minutes = Some(30 * 24 * 60);
        let alert = h.engine.create(Uuid::new_v4(), month).await.unwrap();
        assert_eq!(alert.expires_at - alert.created_at, Duration::days(30));

        let engine = AlertEngine::new(h.store.clone())
            .with_clock(h.engine.clock.clone())
            .with_default_validity(20_000);
        let mut new = breakdown("long default", ouaga());
        new.validity_minutes = None;
        let alert = engine.create(Uuid::new_v4(), new).await.unwrap();
        assert_eq!(alert.expires_at - alert.created_at, Duration::minutes(20_000));
    }

    #[tokio::test]
    async fn test_create_checks_line_reference() {
        let h = Harness::new();
        let mut new = breakdown("engine failure", ouaga());
        new.line_id = Some(Uuid::new_v4());
        let err = h.engine.create(Uuid::new_v4(), new.clone()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let line = Line {
            line_id: Uuid::new_v4(),
            line_number: "12".into(),
            name: "Gounghin - Centre".into(),
            color: None,
            start_point: None,
            end_point: None,
            fare: 150.0,
            is_active: true,
            created_at: Utc::now(),
        };
        h.store.insert_line(&line).await.unwrap();
        new.line_id = Some(line.line_id);
        let alert = h.engine.create(Uuid::new_v4(), new).await.unwrap();
        assert_eq!(alert.line_id, Some(line.line_id));
    }

    #[tokio::test]
    async fn test_list_active_hides_expired_and_orders_by_recency() {
        let h = Harness::new();
        let mut short = breakdown("short lived", ouaga());
        short.validity_minutes = Some(10);
        let short = h.engine.create(Uuid::new_v4(), short).await.unwrap();
        h.advance(1);
        let older = h.create("older", ouaga()).await;
        h.advance(1);
        let newer = h.create("newer", ouaga()).await;

        let active = h.engine.list_active(&AlertFilter::default(), Page::default()).await.unwrap();
        let ids: Vec<Uuid> = active.iter().map(|a| a.alert_id).collect();
        assert_eq!(ids, vec![newer.alert_id, older.alert_id, short.alert_id]);

        h.advance(10);
        let active = h.engine.list_active(&AlertFilter::default(), Page::default()).await.unwrap();
        assert!(active.iter().all(|a| a.alert_id != short.alert_id));
        assert_eq!(active.len(), 2);

        let expired = h.engine.list_by_status(AlertStatus::Expired, Page::default()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].alert_id, short.alert_id);
        assert_eq!(h.engine.get(short.alert_id).await.unwrap().alert_id, short.alert_id);
    }

    #[tokio::test]
    async fn test_list_active_filters_and_pages() {
        let h = Harness::new();
        for i in 0..5 {
            h.advance(1);
            let mut new = breakdown(&format!("breakdown {}", i), ouaga());
            if i % 2 == 0 {
                new.category = "accident".into();
            }
            h.engine.create(Uuid::new_v4(), new).await.unwrap();
        }

        let accidents = AlertFilter {
            line_id: None,
            category: Some(AlertCategory::Accident),
        };
        assert_eq!(h.engine.list_active(&accidents, Page::default()).await.unwrap().len(), 3);

        let first = h.engine.list_active(&AlertFilter::default(), Page::new(0, 2)).await.unwrap();
        let second = h.engine.list_active(&AlertFilter::default(), Page::new(2, 2)).await.unwrap();
        let third = h.engine.list_active(&AlertFilter::default(), Page::new(4, 2)).await.unwrap();
        assert_eq!((first.len(), second.len(), third.len()), (2, 2, 1));
        assert_eq!(first[0].description, "breakdown 4");
        assert_eq!(third[0].description, "breakdown 0");

        let err = h.engine.list_active(&AlertFilter::default(), Page::new(0, 0)).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stream_active_walks_every_page_and_restarts() {
        let h = Harness::new();
        for i in 0..7 {
            h.advance(1);
            h.create(&format!("alert {}", i), ouaga()).await;
        }

        let all: Vec<Alert> = h
            .engine
            .stream_active(AlertFilter::default(), 3)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[0].description, "alert 6");
        assert_eq!(all[6].description, "alert 0");

        let again: Vec<Alert> = h
            .engine
            .stream_active(AlertFilter::default(), 7)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(again, all);

        let bad: CoreResult<Vec<Alert>> = h
            .engine
            .stream_active(AlertFilter::default(), 0)
            .try_collect()
            .await;
        assert!(matches!(bad, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stream_active_ignores_changes_behind_the_cursor() {
        let h = Harness::new();
        let mut created = Vec::new();
        for i in 0..4 {
            h.advance(1);
            created.push(h.create(&format!("a{}", i), ouaga()).await);
        }

        let mut stream = Box::pin(h.engine.stream_active(AlertFilter::default(), 2));
        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(stream.try_next().await.unwrap().unwrap().description);
        }

        // a newer alert and the removal of one already yielded must not shift the rest
        h.advance(1);
        h.create("new", ouaga()).await;
        h.engine.delete(created[3].alert_id).await.unwrap();

        while let Some(alert) = stream.try_next().await.unwrap() {
            seen.push(alert.description);
        }
        assert_eq!(seen, vec!["a3", "a2", "a1", "a0"]);
    }

    #[tokio::test]
    async fn test_list_nearby_orders_by_distance() {
        let h = Harness::new();
        let origin = ouaga();
        let far = h.create("far", north_of(origin, 6000.0)).await;
        let mid = h.create("mid", north_of(origin, 4000.0)).await;
        h.advance(1);
        let near = h.create("near", north_of(origin, 100.0)).await;

        let found = h.engine.list_nearby(Some(origin), Some(5.0)).await.unwrap();
        let ids: Vec<Uuid> = found.iter().map(|r| r.entity.alert_id).collect();
        assert_eq!(ids, vec![near.alert_id, mid.alert_id]);
        assert!((found[0].distance_meters - 100.0).abs() < 0.5);
        assert!((found[1].distance_meters - 4000.0).abs() < 0.5);
        assert!(ids.iter().all(|id| *id != far.alert_id));

        h.advance(61);
        assert!(h.engine.list_nearby(Some(origin), Some(5.0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_nearby_defaults_to_five_km() {
        let h = Harness::new();
        let origin = ouaga();
        let inside = h.create("inside", north_of(origin, 4900.0)).await;
        h.create("outside", north_of(origin, 5100.0)).await;

        let found = h.engine.list_nearby(Some(origin), None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity.alert_id, inside.alert_id);
    }

    #[tokio::test]
    async fn test_list_nearby_validation() {
        let h = Harness::new();
        for (point, radius) in [(None, Some(5.0)), (Some(ouaga()), Some(0.0)), (Some(ouaga()), Some(-1.0))] {
            let err = h.engine.list_nearby(point, radius).await.unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_vote_replaces_previous_vote() {
        let h = Harness::new();
        let alert = h.create("engine failure", ouaga()).await;
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(h.engine.vote(alert.alert_id, x, VoteDirection::Up).await.unwrap(), 1);
        assert_eq!(h.engine.vote(alert.alert_id, y, VoteDirection::Up).await.unwrap(), 2);
        assert_eq!(h.engine.vote(alert.alert_id, x, VoteDirection::Down).await.unwrap(), 0);

        let votes = h.engine.votes(alert.alert_id).await.unwrap();
        assert_eq!(votes.len(), 2);
        let x_votes: Vec<&Vote> = votes.iter().filter(|v| v.user_id == x).collect();
        assert_eq!(x_votes.len(), 1);
        assert_eq!(x_votes[0].direction, VoteDirection::Down);

        assert_eq!(h.engine.get(alert.alert_id).await.unwrap().score, 0);
    }

    #[tokio::test]
    async fn test_repeated_identical_votes_are_idempotent() {
        let h = Harness::new();
        let alert = h.create("engine failure", ouaga()).await;
        let user = Uuid::new_v4();

        for _ in 0..5 {
            assert_eq!(h.engine.vote(alert.alert_id, user, VoteDirection::Down).await.unwrap(), -1);
        }
        assert_eq!(h.engine.votes(alert.alert_id).await.unwrap().len(), 1);
        assert_eq!(h.engine.recompute_score(alert.alert_id).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_vote_on_expired_or_missing_alert() {
        let h = Harness::new();
        let alert = h.create("engine failure", ouaga()).await;
        h.advance(60);

        let expired = h.engine.vote(alert.alert_id, Uuid::new_v4(), VoteDirection::Up).await;
        assert!(matches!(expired, Err(CoreError::NotFound(_))));

        let missing = h.engine.vote(Uuid::new_v4(), Uuid::new_v4(), VoteDirection::Up).await;
        assert!(matches!(missing, Err(CoreError::NotFound(_))));

        assert!(h.engine.votes(alert.alert_id).await.unwrap().is_empty());
        assert_eq!(h.engine.get(alert.alert_id).await.unwrap().score, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_are_all_counted() {
        let h = Harness::new();
        let engine = Arc::new(h.engine);
        let alert = engine
            .create(Uuid::new_v4(), breakdown("engine failure", ouaga()))
            .await
            .unwrap();
        let other = engine
            .create(Uuid::new_v4(), breakdown("accident", ouaga()))
            .await
            .unwrap();

        let users: Vec<Uuid> = (0..40).map(|_| Uuid::new_v4()).collect();
        let mut tasks = Vec::new();
        for (i, user) in users.iter().copied().enumerate() {
            for target in [alert.alert_id, other.alert_id] {
                let engine = engine.clone();
                let direction = if i % 4 == 0 { VoteDirection::Down } else { VoteDirection::Up };
                tasks.push(tokio::spawn(async move {
                    engine.vote(target, user, direction).await
                }));
            }
        }
        // the same users double-submit on the first alert
        for user in users.iter().copied() {
            let engine = engine.clone();
            let id = alert.alert_id;
            tasks.push(tokio::spawn(async move {
                engine.vote(id, user, VoteDirection::Up).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // every user ends up with exactly one vote; the last write per user decides its direction
        let votes = engine.votes(alert.alert_id).await.unwrap();
        assert_eq!(votes.len(), 40);
        let expected: i64 = votes.iter().map(|v| v.direction.weight()).sum();
        assert_eq!(engine.get(alert.alert_id).await.unwrap().score, expected);

        // 10 down, 30 up on the untouched alert
        assert_eq!(engine.get(other.alert_id).await.unwrap().score, 20);
        assert_eq!(engine.votes(other.alert_id).await.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_purge_and_delete() {
        let h = Harness::new();
        let mut short = breakdown("short", ouaga());
        short.validity_minutes = Some(5);
        let short = h.engine.create(Uuid::new_v4(), short).await.unwrap();
        let long = h.create("long", ouaga()).await;
        h.engine.vote(short.alert_id, Uuid::new_v4(), VoteDirection::Up).await.unwrap();

        assert_eq!(h.engine.purge_expired().await.unwrap(), 0);
        h.advance(5);
        assert_eq!(h.engine.purge_expired().await.unwrap(), 1);
        assert!(matches!(h.engine.get(short.alert_id).await, Err(CoreError::NotFound(_))));
        assert!(h.store.votes_for(short.alert_id).await.unwrap().is_empty());

        h.engine.delete(long.alert_id).await.unwrap();
        assert!(matches!(h.engine.delete(long.alert_id).await, Err(CoreError::NotFound(_))));
        assert!(h.engine.list_by_status(AlertStatus::All, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_alerts_within_retention() {
        let h = Harness::new();
        let engine = AlertEngine::new(h.store.clone())
            .with_clock(h.engine.clock.clone())
            .with_purge_retention(Duration::minutes(30));
        let alert = engine.create(Uuid::new_v4(), breakdown("x", ouaga())).await.unwrap();

        h.advance(80);
        assert_eq!(engine.purge_expired().await.unwrap(), 0);
        assert!(!engine.get(alert.alert_id).await.unwrap().is_active((h.engine.clock)()));
        h.advance(10);
        assert_eq!(engine.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_with_unreachable_retention_removes_nothing() {
        let h = Harness::new();
        let engine = AlertEngine::new(h.store.clone())
            .with_clock(h.engine.clock.clone())
            .with_purge_retention(Duration::try_days(100_000_000).unwrap());
        let alert = engine.create(Uuid::new_v4(), breakdown("x", ouaga())).await.unwrap();

        h.advance(120);
        assert_eq!(engine.purge_expired().await.unwrap(), 0);
        assert_eq!(engine.get(alert.alert_id).await.unwrap().alert_id, alert.alert_id);
    }
}
