use std::path::Path;

use contracts::{BaselineRecord, Category, Finding, ZoneRecordState};
use kernel_core::PersistedState;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite store is not attached")]
    NotAttached,
    #[error("stored data does not match the schema: {0}")]
    Schema(String),
}

/// Row of the `zones` table without the full state payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedZoneSummary {
    pub zone_id: String,
    pub name: String,
    pub zone_type: String,
    pub room_count: u32,
    pub composite_score: f64,
    pub tier: String,
    pub last_computed_tick: Option<u64>,
    pub baseline_count: usize,
    pub active_findings: usize,
}

/// Everything one zone contributes to a flush.
#[derive(Debug, Clone, Copy)]
pub struct ZoneDelta<'a> {
    pub zone: &'a ZoneRecordState,
    pub baselines: &'a [BaselineRecord],
    pub findings: &'a [Finding],
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    /// Writes one zone's row, its baselines and its new findings in a single
    /// transaction, so a zone is never stored half-updated.
    pub fn persist_zone(&mut self, delta: ZoneDelta<'_>) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        upsert_zone(&tx, delta.zone)?;

        for baseline in delta.baselines {
            tx.execute(
                "INSERT INTO baselines (
                    zone_id,
                    category,
                    count,
                    mean,
                    m2,
                    last_observed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(zone_id, category) DO UPDATE SET
                    count = excluded.count,
                    mean = excluded.mean,
                    m2 = excluded.m2,
                    last_observed_at = excluded.last_observed_at
                 WHERE excluded.count >= baselines.count",
                params![
                    baseline.zone_id.as_str(),
                    baseline.category.as_str(),
                    to_sql_int(baseline.count),
                    baseline.mean,
                    baseline.m2,
                    to_sql_int(baseline.last_observed_at),
                ],
            )?;
        }

        for finding in delta.findings {
            let payload_json = serde_json::to_string(finding)?;
            tx.execute(
                "INSERT OR IGNORE INTO findings (
                    sequence,
                    zone_id,
                    category,
                    kind,
                    severity,
                    tick,
                    expiry,
                    payload_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    to_sql_int(finding.sequence),
                    finding.zone_id.as_str(),
                    finding.category.map(Category::as_str),
                    serde_json::to_string(&finding.kind)?.trim_matches('"'),
                    finding.severity.to_string(),
                    to_sql_int(finding.tick),
                    to_sql_int(finding.expiry),
                    payload_json,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_state(&self) -> Result<PersistedState, PersistenceError> {
        let mut zones = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT state_json FROM zones ORDER BY zone_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            zones.push(serde_json::from_str::<ZoneRecordState>(&row?)?);
        }

        let mut baselines = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT zone_id, category, count, mean, m2, last_observed_at
             FROM baselines
             ORDER BY zone_id ASC, category ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;
        for row in rows {
            let (zone_id, category, count, mean, m2, last_observed_at) = row?;
            let category = category
                .parse::<Category>()
                .map_err(|err| PersistenceError::Schema(err.to_string()))?;
            baselines.push(BaselineRecord {
                zone_id,
                category,
                count: from_sql_int(count, "baselines.count")?,
                mean,
                m2,
                last_observed_at: from_sql_int(last_observed_at, "baselines.last_observed_at")?,
            });
        }

        Ok(PersistedState {
            zones,
            baselines,
            findings: self.load_findings_after(0)?,
        })
    }

    pub fn load_findings_after(&self, sequence: u64) -> Result<Vec<Finding>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json
             FROM findings
             WHERE sequence > ?1
             ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![to_sql_int(sequence)], |row| row.get::<_, String>(0))?;

        let mut findings = Vec::new();
        for row in rows {
            findings.push(serde_json::from_str::<Finding>(&row?)?);
        }
        Ok(findings)
    }

    pub fn max_finding_sequence(&self) -> Result<u64, PersistenceError> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(sequence) FROM findings", [], |row| row.get(0))
            .optional()?
            .flatten();
        max.map_or(Ok(0), |value| from_sql_int(value, "findings.sequence"))
    }

    /// Deletes baselines with no observation at or after `cutoff`.
    pub fn delete_stale_baselines(&mut self, cutoff: u64) -> Result<usize, PersistenceError> {
        Ok(self.conn.execute(
            "DELETE FROM baselines WHERE last_observed_at < ?1",
            params![to_sql_int(cutoff)],
        )?)
    }

    pub fn delete_expired_findings(&mut self, now: u64) -> Result<usize, PersistenceError> {
        Ok(self.conn.execute(
            "DELETE FROM findings WHERE expiry <= ?1",
            params![to_sql_int(now)],
        )?)
    }

    pub fn list_zones(&self, now: u64) -> Result<Vec<PersistedZoneSummary>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT
                z.zone_id,
                z.name,
                z.zone_type,
                z.room_count,
                z.composite_score,
                z.tier,
                z.last_computed_tick,
                (SELECT COUNT(*) FROM baselines b WHERE b.zone_id = z.zone_id),
                (SELECT COUNT(*) FROM findings f WHERE f.zone_id = z.zone_id AND f.expiry > ?1)
             FROM zones z
             ORDER BY z.zone_id ASC",
        )?;
        let rows = stmt.query_map(params![to_sql_int(now)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut zones = Vec::new();
        for row in rows {
            let (zone_id, name, zone_type, rooms, composite, tier, tick, baselines, findings) = row?;
            zones.push(PersistedZoneSummary {
                zone_id,
                name,
                zone_type,
                room_count: u32::try_from(rooms)
                    .map_err(|_| PersistenceError::Schema(format!("room_count {rooms}")))?,
                composite_score: composite,
                tier,
                last_computed_tick: tick
                    .map(|tick| from_sql_int(tick, "zones.last_computed_tick"))
                    .transpose()?,
                baseline_count: usize::try_from(baselines).unwrap_or_default(),
                active_findings: usize::try_from(findings).unwrap_or_default(),
            });
        }
        Ok(zones)
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS zones (
                zone_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                zone_type TEXT NOT NULL,
                room_count INTEGER NOT NULL,
                composite_score REAL NOT NULL,
                tier TEXT NOT NULL,
                last_computed_tick INTEGER,
                state_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS baselines (
                zone_id TEXT NOT NULL REFERENCES zones(zone_id) ON DELETE CASCADE,
                category TEXT NOT NULL,
                count INTEGER NOT NULL,
                mean REAL NOT NULL,
                m2 REAL NOT NULL,
                last_observed_at INTEGER NOT NULL,
                PRIMARY KEY (zone_id, category)
            );

            CREATE TABLE IF NOT EXISTS findings (
                sequence INTEGER PRIMARY KEY,
                zone_id TEXT NOT NULL,
                category TEXT,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                tick INTEGER NOT NULL,
                expiry INTEGER NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_findings_zone_expiry ON findings(zone_id, expiry);
            CREATE INDEX IF NOT EXISTS idx_baselines_last_observed ON baselines(last_observed_at);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name) VALUES(1, 'initial_v1')",
            [],
        )?;

        Ok(())
    }
}

fn upsert_zone(tx: &rusqlite::Transaction<'_>, zone: &ZoneRecordState) -> Result<(), PersistenceError> {
    let state_json = serde_json::to_string(zone)?;
    let tier = contracts::Tier::for_score(zone.composite_score);
    let tier = serde_json::to_string(&tier)?.trim_matches('"').to_string();

    tx.execute(
        "INSERT INTO zones (
            zone_id,
            name,
            zone_type,
            room_count,
            composite_score,
            tier,
            last_computed_tick,
            state_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(zone_id) DO UPDATE SET
            name = excluded.name,
            zone_type = excluded.zone_type,
            room_count = excluded.room_count,
            composite_score = excluded.composite_score,
            tier = excluded.tier,
            last_computed_tick = excluded.last_computed_tick,
            state_json = excluded.state_json",
        params![
            zone.registration.zone_id.as_str(),
            zone.registration.name.as_str(),
            zone.registration.zone_type.as_str(),
            i64::from(zone.registration.room_count),
            zone.composite_score,
            tier,
            zone.last_computed_tick.map(to_sql_int),
            state_json,
        ],
    )?;

    Ok(())
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64, column: &str) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::Schema(format!("{column} is negative: {value}")))
}
