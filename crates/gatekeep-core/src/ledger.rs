use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{EvidenceIntegrityError, GatekeepError, Result};
use crate::models::{
    BlockKind, Blocker, Contract, ContractChange, GateStatus, PipelineHalt, PromotionDecision,
    RemediationSprint, Revocation,
};

/// One row of `gate_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRow {
    pub gate_id: String,
    pub attempt: u32,
    pub status: GateStatus,
    pub record_id: Option<String>,
    pub recorded_at: String,
}

/// Control-plane history: attempts, blockers, halts, contract versions and
/// the terminal sign-off. Rows are inserted, never rewritten, except for the
/// single resolution update allowed on blockers and halts.
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger").finish_non_exhaustive()
    }
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GatekeepError::Internal("sqlite mutex poisoned".to_string()))
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS gate_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gate_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                status TEXT NOT NULL,
                record_id TEXT,
                recorded_at TEXT NOT NULL,
                UNIQUE (gate_id, attempt)
            );

            CREATE TABLE IF NOT EXISTS blockers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gate_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                record_id TEXT,
                root_cause TEXT NOT NULL DEFAULT '',
                fix_description TEXT NOT NULL DEFAULT '',
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                resolved_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_blockers_gate ON blockers(gate_id, id DESC);

            CREATE TABLE IF NOT EXISTS halts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gate_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                remediation_summary TEXT,
                remediation_owner TEXT,
                remediated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS contract_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version TEXT NOT NULL UNIQUE,
                change_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sign_offs (
                release_id TEXT PRIMARY KEY,
                decision_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS revocations (
                release_id TEXT PRIMARY KEY,
                artifact TEXT NOT NULL,
                expected_hash TEXT NOT NULL,
                actual_hash TEXT NOT NULL,
                revoked_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Highest attempt number recorded for `gate_id`, or 0.
    pub fn last_attempt(&self, gate_id: &str) -> Result<u32> {
        let conn = self.lock()?;
        let last: Option<u32> = conn.query_row(
            "SELECT MAX(attempt) FROM gate_attempts WHERE gate_id = ?1",
            params![gate_id],
            |row| row.get(0),
        )?;
        Ok(last.unwrap_or(0))
    }

    /// Inserts attempt `attempt` of `gate_id`. Numbers are assigned by the
    /// caller; reusing one is a `Conflict`.
    pub fn record_attempt(
        &self,
        gate_id: &str,
        attempt: u32,
        status: GateStatus,
        record_id: Option<&str>,
    ) -> Result<AttemptRow> {
        let conn = self.lock()?;
        let recorded_at = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO gate_attempts(gate_id, attempt, status, record_id, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![gate_id, attempt, status.as_str(), record_id, recorded_at],
        )?;
        if inserted != 1 {
            return Err(GatekeepError::Conflict(format!(
                "attempt {attempt} of gate {gate_id} is already recorded"
            )));
        }
        Ok(AttemptRow {
            gate_id: gate_id.to_string(),
            attempt,
            status,
            record_id: record_id.map(ToString::to_string),
            recorded_at,
        })
    }

    pub fn list_attempts(&self, gate_id: &str) -> Result<Vec<AttemptRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT gate_id, attempt, status, record_id, recorded_at
            FROM gate_attempts
            WHERE gate_id = ?1
            ORDER BY attempt ASC
            "#,
        )?;
        let rows = stmt.query_map(params![gate_id], |row| {
            let status: String = row.get(2)?;
            Ok(AttemptRow {
                gate_id: row.get(0)?,
                attempt: row.get(1)?,
                status: GateStatus::from_passed(status == GateStatus::Passed.as_str()),
                record_id: row.get(3)?,
                recorded_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn open_blocker(
        &self,
        gate_id: &str,
        attempt: u32,
        kind: BlockKind,
        description: &str,
        record_id: Option<&str>,
    ) -> Result<Blocker> {
        let conn = self.lock()?;
        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO blockers(gate_id, attempt, kind, description, record_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![gate_id, attempt, kind.as_str(), description, record_id, created_at],
        )?;
        Ok(Blocker {
            id: conn.last_insert_rowid(),
            gate_id: gate_id.to_string(),
            attempt,
            kind,
            description: description.to_string(),
            record_id: record_id.map(ToString::to_string),
            root_cause: String::new(),
            fix_description: String::new(),
            resolved: false,
            created_at,
            resolved_at: None,
        })
    }

    pub fn latest_blocker(&self, gate_id: &str) -> Result<Option<Blocker>> {
        let conn = self.lock()?;
        let blocker = conn
            .query_row(
                r#"
                SELECT id, gate_id, attempt, kind, description, record_id,
                       root_cause, fix_description, resolved, created_at, resolved_at
                FROM blockers
                WHERE gate_id = ?1
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![gate_id],
                blocker_from_row,
            )
            .optional()?;
        Ok(blocker)
    }

    /// Resolves the latest open blocker of a gate. Already resolved blockers
    /// stay untouched: a resolution is recorded once.
    pub fn resolve_blocker(
        &self,
        gate_id: &str,
        root_cause: &str,
        fix_description: &str,
    ) -> Result<Blocker> {
        let latest = self
            .latest_blocker(gate_id)?
            .ok_or_else(|| GatekeepError::NotFound(format!("no blocker recorded for gate {gate_id}")))?;
        if latest.resolved {
            return Err(GatekeepError::Conflict(format!(
                "latest blocker of gate {gate_id} is already resolved"
            )));
        }
        let resolved_at = Utc::now().to_rfc3339();
        {
            let conn = self.lock()?;
            let updated = conn.execute(
                r#"
                UPDATE blockers
                SET root_cause = ?1, fix_description = ?2, resolved = 1, resolved_at = ?3
                WHERE id = ?4 AND resolved = 0
                "#,
                params![root_cause, fix_description, resolved_at, latest.id],
            )?;
            if updated != 1 {
                return Err(GatekeepError::Conflict(format!(
                    "blocker {} of gate {gate_id} changed concurrently",
                    latest.id
                )));
            }
        }
        Ok(Blocker {
            root_cause: root_cause.to_string(),
            fix_description: fix_description.to_string(),
            resolved: true,
            resolved_at: Some(resolved_at),
            ..latest
        })
    }

    pub fn open_halt(&self, gate_id: &str, attempt: u32) -> Result<PipelineHalt> {
        let conn = self.lock()?;
        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO halts(gate_id, attempt, created_at) VALUES (?1, ?2, ?3)",
            params![gate_id, attempt, created_at],
        )?;
        Ok(PipelineHalt {
            id: conn.last_insert_rowid(),
            gate_id: gate_id.to_string(),
            attempt,
            created_at,
            remediation: None,
        })
    }

    pub fn active_halt(&self) -> Result<Option<PipelineHalt>> {
        let conn = self.lock()?;
        let halt = conn
            .query_row(
                r#"
                SELECT id, gate_id, attempt, created_at,
                       remediation_summary, remediation_owner, remediated_at
                FROM halts
                WHERE remediated_at IS NULL
                ORDER BY id DESC
                LIMIT 1
                "#,
                [],
                halt_from_row,
            )
            .optional()?;
        Ok(halt)
    }

    /// Highest attempt number of `gate_id` covered by a remediation sprint.
    pub fn last_remediated_attempt(&self, gate_id: &str) -> Result<Option<u32>> {
        let conn = self.lock()?;
        let attempt = conn.query_row(
            r#"
            SELECT MAX(attempt) FROM halts
            WHERE gate_id = ?1 AND remediated_at IS NOT NULL
            "#,
            params![gate_id],
            |row| row.get::<_, Option<u32>>(0),
        )?;
        Ok(attempt)
    }

    pub fn record_remediation(
        &self,
        halt_id: i64,
        summary: &str,
        owner: &str,
    ) -> Result<PipelineHalt> {
        let conn = self.lock()?;
        let remediated_at = Utc::now().to_rfc3339();
        let updated = conn.execute(
            r#"
            UPDATE halts
            SET remediation_summary = ?1, remediation_owner = ?2, remediated_at = ?3
            WHERE id = ?4 AND remediated_at IS NULL
            "#,
            params![summary, owner, remediated_at, halt_id],
        )?;
        if updated != 1 {
            return Err(GatekeepError::Conflict(format!(
                "halt {halt_id} is not open"
            )));
        }
        conn.query_row(
            r#"
            SELECT id, gate_id, attempt, created_at,
                   remediation_summary, remediation_owner, remediated_at
            FROM halts WHERE id = ?1
            "#,
            params![halt_id],
            halt_from_row,
        )
        .map_err(Into::into)
    }

    pub fn record_contract_change(&self, change: &ContractChange) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO contract_versions(version, change_json, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                change.contract.version.to_string(),
                serde_json::to_string(change)?,
                change.recorded_at
            ],
        )?;
        Ok(())
    }

    pub fn latest_contract(&self) -> Result<Option<Contract>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT change_json FROM contract_versions ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|value| serde_json::from_str::<ContractChange>(&value).map(|change| change.contract))
            .transpose()
            .map_err(Into::into)
    }

    pub fn contract_history(&self) -> Result<Vec<ContractChange>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT change_json FROM contract_versions ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub fn record_sign_off(&self, decision: &PromotionDecision) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO sign_offs(release_id, decision_json, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                decision.release_id,
                serde_json::to_string(decision)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn sign_off(&self, release_id: &str) -> Result<Option<PromotionDecision>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT decision_json FROM sign_offs WHERE release_id = ?1",
                params![release_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(Into::into)
    }

    /// Records the first integrity failure seen after sign-off. Later
    /// failures leave the stored revocation untouched.
    pub fn record_revocation(
        &self,
        release_id: &str,
        integrity: &EvidenceIntegrityError,
    ) -> Result<Revocation> {
        {
            let conn = self.lock()?;
            conn.execute(
                r#"
                INSERT OR IGNORE INTO revocations(
                    release_id, artifact, expected_hash, actual_hash, revoked_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    release_id,
                    integrity.artifact,
                    integrity.expected_hash,
                    integrity.actual_hash,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        self.revocation(release_id)?.ok_or_else(|| {
            GatekeepError::Internal(format!("revocation of release {release_id} was not stored"))
        })
    }

    pub fn revocation(&self, release_id: &str) -> Result<Option<Revocation>> {
        let conn = self.lock()?;
        let revocation = conn
            .query_row(
                r#"
                SELECT release_id, artifact, expected_hash, actual_hash, revoked_at
                FROM revocations WHERE release_id = ?1
                "#,
                params![release_id],
                |row| {
                    Ok(Revocation {
                        release_id: row.get(0)?,
                        artifact: row.get(1)?,
                        expected_hash: row.get(2)?,
                        actual_hash: row.get(3)?,
                        revoked_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(revocation)
    }
}

fn blocker_from_row(row: &Row<'_>) -> rusqlite::Result<Blocker> {
    let kind: String = row.get(3)?;
    let resolved: i64 = row.get(8)?;
    Ok(Blocker {
        id: row.get(0)?,
        gate_id: row.get(1)?,
        attempt: row.get(2)?,
        kind: BlockKind::parse(&kind).unwrap_or(BlockKind::GateFailure),
        description: row.get(4)?,
        record_id: row.get(5)?,
        root_cause: row.get(6)?,
        fix_description: row.get(7)?,
        resolved: resolved != 0,
        created_at: row.get(9)?,
        resolved_at: row.get(10)?,
    })
}

fn halt_from_row(row: &Row<'_>) -> rusqlite::Result<PipelineHalt> {
    let summary: Option<String> = row.get(4)?;
    let owner: Option<String> = row.get(5)?;
    let remediated_at: Option<String> = row.get(6)?;
    let remediation = match (summary, owner, remediated_at) {
        (Some(summary), Some(owner), Some(recorded_at)) => Some(RemediationSprint {
            summary,
            owner,
            recorded_at,
        }),
        _ => None,
    };
    Ok(PipelineHalt {
        id: row.get(0)?,
        gate_id: row.get(1)?,
        attempt: row.get(2)?,
        created_at: row.get(3)?,
        remediation,
    })
}
