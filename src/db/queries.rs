// ---- alerts ----

pub const INSERT_ALERT: &str = r#"
INSERT INTO alerts (
    alert_id, category, description, latitude, longitude, line_id, score, created_by, created_at, expires_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10);
"#;

pub const SELECT_ALERT: &str = r#"
SELECT alert_id, category, description, latitude, longitude, line_id, score, created_by, created_at, expires_at
FROM alerts
WHERE alert_id = $1;
"#;

pub const SELECT_ACTIVE_ALERTS: &str = r#"
SELECT alert_id, category, description, latitude, longitude, line_id, score, created_by, created_at, expires_at
FROM alerts
WHERE expires_at > $1
  AND ($2::uuid IS NULL OR line_id = $2)
  AND ($3::alert_category IS NULL OR category = $3)
ORDER BY created_at DESC, alert_id DESC
LIMIT $4 OFFSET $5;
"#;

// Keyset walk in listing order; $4/$5 is the last alert already seen, NULL to start.
pub const SELECT_ACTIVE_ALERTS_AFTER: &str = r#"
SELECT alert_id, category, description, latitude, longitude, line_id, score, created_by, created_at, expires_at
FROM alerts
WHERE expires_at > $1
  AND ($2::uuid IS NULL OR line_id = $2)
  AND ($3::alert_category IS NULL OR category = $3)
  AND ($4::timestamptz IS NULL OR (created_at, alert_id) < ($4, $5::uuid))
ORDER BY created_at DESC, alert_id DESC
LIMIT $6;
"#;

pub const SELECT_ACTIVE_ALERTS_IN_BOX: &str = r#"
SELECT alert_id, category, description, latitude, longitude, line_id, score, created_by, created_at, expires_at
FROM alerts
WHERE expires_at > $1
  AND ($2::float8 IS NULL OR latitude BETWEEN $2 AND $3)
  AND ($4::float8 IS NULL OR longitude BETWEEN $4 AND $5);
"#;

// $2: true = only active, false = only expired, NULL = all
pub const SELECT_ALERTS_BY_STATUS: &str = r#"
SELECT alert_id, category, description, latitude, longitude, line_id, score, created_by, created_at, expires_at
FROM alerts
WHERE ($2::boolean IS NULL OR (expires_at > $1) = $2)
ORDER BY created_at DESC, alert_id DESC
LIMIT $3 OFFSET $4;
"#;

pub const DELETE_ALERT: &str = r#"
DELETE FROM alerts WHERE alert_id = $1;
"#;

pub const DELETE_EXPIRED_ALERTS: &str = r#"
DELETE FROM alerts WHERE expires_at <= $1;
"#;

// ---- votes ----

// Row lock serializing every vote on one alert until commit.
pub const LOCK_ACTIVE_ALERT: &str = r#"
SELECT alert_id FROM alerts WHERE alert_id = $1 AND expires_at > $2 FOR UPDATE;
"#;

pub const LOCK_ALERT: &str = r#"
SELECT alert_id FROM alerts WHERE alert_id = $1 FOR UPDATE;
"#;

pub const UPSERT_VOTE: &str = r#"
INSERT INTO alert_votes (alert_id, user_id, direction, updated_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (alert_id, user_id) DO UPDATE
SET direction = EXCLUDED.direction,
    updated_at = EXCLUDED.updated_at;
"#;

pub const SUM_VOTES: &str = r#"
SELECT COALESCE(SUM(CASE WHEN direction = 'up' THEN 1 ELSE -1 END), 0)::BIGINT AS score
FROM alert_votes
WHERE alert_id = $1;
"#;

pub const UPDATE_ALERT_SCORE: &str = r#"
UPDATE alerts SET score = $2 WHERE alert_id = $1;
"#;

pub const SELECT_VOTES: &str = r#"
SELECT alert_id, user_id, direction, updated_at
FROM alert_votes
WHERE alert_id = $1
ORDER BY updated_at, user_id;
"#;

// ---- lines ----

pub const LINE_EXISTS: &str = r#"
SELECT EXISTS (SELECT 1 FROM lines WHERE line_id = $1);
"#;

pub const SELECT_LINES: &str = r#"
SELECT l.line_id, l.line_number, l.name, l.color, l.start_point, l.end_point, l.fare, l.is_active, l.created_at,
       (SELECT COUNT(*) FROM line_stops ls WHERE ls.line_id = l.line_id) AS stop_count
FROM lines l
WHERE (NOT $1 OR l.is_active)
ORDER BY l.line_number;
"#;

pub const SELECT_LINE: &str = r#"
SELECT line_id, line_number, name, color, start_point, end_point, fare, is_active, created_at
FROM lines
WHERE line_id = $1;
"#;

pub const SELECT_LINE_STOPS: &str = r#"
SELECT s.stop_id, s.code, s.name, s.latitude, s.longitude, s.created_at, ls.sequence_order
FROM stops s
JOIN line_stops ls ON s.stop_id = ls.stop_id
WHERE ls.line_id = $1
ORDER BY ls.sequence_order, s.stop_id;
"#;

pub const INSERT_LINE: &str = r#"
INSERT INTO lines (line_id, line_number, name, color, start_point, end_point, fare, is_active, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9);
"#;

pub const DELETE_LINE: &str = r#"
DELETE FROM lines WHERE line_id = $1;
"#;

pub const UPSERT_LINE_STOP: &str = r#"
INSERT INTO line_stops (line_id, stop_id, sequence_order)
VALUES ($1, $2, $3)
ON CONFLICT (line_id, stop_id) DO UPDATE
SET sequence_order = EXCLUDED.sequence_order;
"#;

pub const DELETE_LINE_STOP: &str = r#"
DELETE FROM line_stops WHERE line_id = $1 AND stop_id = $2;
"#;

// ---- stops ----

pub const SELECT_STOPS: &str = r#"
SELECT stop_id, code, name, latitude, longitude, created_at
FROM stops
ORDER BY name, stop_id;
"#;

pub const SELECT_STOPS_IN_BOX: &str = r#"
SELECT stop_id, code, name, latitude, longitude, created_at
FROM stops
WHERE ($1::float8 IS NULL OR latitude BETWEEN $1 AND $2)
  AND ($3::float8 IS NULL OR longitude BETWEEN $3 AND $4);
"#;

pub const SELECT_STOP: &str = r#"
SELECT stop_id, code, name, latitude, longitude, created_at
FROM stops
WHERE stop_id = $1;
"#;

pub const SELECT_STOP_LINES: &str = r#"
SELECT l.line_id, l.line_number, l.name, l.color, l.start_point, l.end_point, l.fare, l.is_active, l.created_at
FROM lines l
JOIN line_stops ls ON l.line_id = ls.line_id
WHERE ls.stop_id = $1
ORDER BY l.line_number;
"#;

pub const INSERT_STOP: &str = r#"
INSERT INTO stops (stop_id, code, name, latitude, longitude, created_at)
VALUES ($1, $2, $3, $4, $5, $6);
"#;

pub const DELETE_STOP: &str = r#"
DELETE FROM stops WHERE stop_id = $1;
"#;

// ---- buses ----

// Current position = newest sample; later inserts win timestamp ties.
const BUS_WITH_POSITION: &str = r#"
SELECT b.bus_id, b.bus_number, b.line_id, b.direction, b.is_active, b.created_at,
       p.latitude, p.longitude, p.speed, p.heading, p.source, p.recorded_at
FROM buses b
LEFT JOIN LATERAL (
    SELECT latitude, longitude, speed, heading, source, recorded_at
    FROM bus_positions
    WHERE bus_id = b.bus_id
    ORDER BY recorded_at DESC, position_id DESC
    LIMIT 1
) p ON TRUE
"#;

pub fn select_active_buses() -> String {
    format!(
        "{} WHERE b.is_active AND ($1::uuid IS NULL OR b.line_id = $1) ORDER BY b.bus_number;",
        BUS_WITH_POSITION
    )
}

pub fn select_bus() -> String {
    format!("{} WHERE b.bus_id = $1;", BUS_WITH_POSITION)
}

pub fn select_located_buses_in_box() -> String {
    format!(
        "{} WHERE b.is_active AND p.recorded_at IS NOT NULL \
         AND ($1::float8 IS NULL OR p.latitude BETWEEN $1 AND $2) \
         AND ($3::float8 IS NULL OR p.longitude BETWEEN $3 AND $4);",
        BUS_WITH_POSITION
    )
}

pub const INSERT_BUS: &str = r#"
INSERT INTO buses (bus_id, bus_number, line_id, direction, is_active, created_at)
VALUES ($1, $2, $3, $4, $5, $6);
"#;

pub const SELECT_BUS_ROW: &str = r#"
SELECT bus_id, bus_number, line_id, direction, is_active, created_at
FROM buses
WHERE bus_id = $1;
"#;

pub const DELETE_BUS: &str = r#"
DELETE FROM buses WHERE bus_id = $1;
"#;

pub const INSERT_BUS_POSITION: &str = r#"
INSERT INTO bus_positions (bus_id, latitude, longitude, speed, heading, source, recorded_at)
VALUES ($1, $2, $3, $4, $5, $6, $7);
"#;
