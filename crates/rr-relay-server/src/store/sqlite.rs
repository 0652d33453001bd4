// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use super::{apply_status, RunStore, StatusDetail};
use crate::error::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rr_domain_types::{Automation, Principal, RunRecord, RunStatus, Step, StepAction};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agent_runs (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    run_objective TEXT NOT NULL,
    status        TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT,
    is_completed  INTEGER NOT NULL DEFAULT 0,
    final_answer  TEXT,
    error         TEXT
);
CREATE INDEX IF NOT EXISTS agent_runs_user ON agent_runs(user_id);

CREATE TABLE IF NOT EXISTS agent_run_steps (
    run_id      TEXT NOT NULL REFERENCES agent_runs(id) ON DELETE CASCADE,
    step_number INTEGER NOT NULL,
    action      TEXT NOT NULL,
    explanation TEXT NOT NULL,
    screenshot  TEXT,
    PRIMARY KEY (run_id, step_number)
);

CREATE TABLE IF NOT EXISTS automations (
    id        TEXT PRIMARY KEY,
    user_id   TEXT NOT NULL,
    name      TEXT NOT NULL,
    objective TEXT NOT NULL
);
"#;

/// SQLite-backed run store
///
/// A single connection behind a mutex; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PersistenceError::Backend("connection mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await?
    }

    /// Seed a run, replacing any run with the same id
    pub async fn insert_run(&self, run: RunRecord) -> Result<(), PersistenceError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM agent_runs WHERE id = ?1", params![run.id])?;
            write_run(&tx, &run)?;
            for step in &run.steps {
                write_step(&tx, &run.id, step)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn insert_automation(&self, automation: Automation) -> Result<(), PersistenceError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO automations (id, user_id, name, objective)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    automation.id,
                    automation.owner.as_str(),
                    automation.name,
                    automation.objective
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn format_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|ts| ts.to_rfc3339())
}

fn parse_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, PersistenceError> {
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| PersistenceError::Backend(format!("bad timestamp {raw}: {err}")))
    })
    .transpose()
}

fn write_run(conn: &Connection, run: &RunRecord) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO agent_runs
            (id, user_id, run_objective, status, started_at, completed_at, is_completed, final_answer, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run.id,
            run.owner.as_str(),
            run.objective,
            run.status.to_string(),
            format_ts(run.started_at),
            format_ts(run.completed_at),
            run.status == RunStatus::Completed,
            run.final_answer,
            run.error,
        ],
    )?;
    Ok(())
}

fn write_step(conn: &Connection, run_id: &str, step: &Step) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT OR REPLACE INTO agent_run_steps (run_id, step_number, action, explanation, screenshot)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            run_id,
            step.step_number,
            serde_json::to_string(&step.action)?,
            step.explanation,
            step.screenshot,
        ],
    )?;
    Ok(())
}

struct RunRow {
    id: String,
    owner: String,
    objective: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    final_answer: Option<String>,
    error: Option<String>,
}

fn load_run(
    conn: &Connection,
    run_id: &str,
    principal: &str,
) -> Result<RunRecord, PersistenceError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, run_objective, status, started_at, completed_at, final_answer, error
             FROM agent_runs WHERE id = ?1 AND user_id = ?2",
            params![run_id, principal],
            |row| {
                Ok(RunRow {
                    id: row.get(0)?,
                    owner: row.get(1)?,
                    objective: row.get(2)?,
                    status: row.get(3)?,
                    started_at: row.get(4)?,
                    completed_at: row.get(5)?,
                    final_answer: row.get(6)?,
                    error: row.get(7)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| PersistenceError::run_not_found(run_id))?;

    let status = RunStatus::from_str(&row.status)
        .map_err(|_| PersistenceError::Backend(format!("unknown run status {}", row.status)))?;

    let mut stmt = conn.prepare(
        "SELECT step_number, action, explanation, screenshot
         FROM agent_run_steps WHERE run_id = ?1 ORDER BY step_number",
    )?;
    let raw_steps = stmt
        .query_map(params![run_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let steps = raw_steps
        .into_iter()
        .map(|(step_number, action, explanation, screenshot)| {
            let action: StepAction = serde_json::from_str(&action)?;
            Ok::<_, PersistenceError>(Step {
                step_number,
                action,
                explanation,
                screenshot,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RunRecord {
        id: row.id,
        owner: Principal::new(row.owner),
        objective: row.objective,
        status,
        started_at: parse_ts(row.started_at)?,
        completed_at: parse_ts(row.completed_at)?,
        steps,
        final_answer: row.final_answer,
        error: row.error,
    })
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn fetch_run(
        &self,
        run_id: &str,
        principal: &Principal,
    ) -> Result<RunRecord, PersistenceError> {
        let run_id = run_id.to_string();
        let principal = principal.clone();
        self.with_conn(move |conn| load_run(conn, &run_id, principal.as_str()))
            .await
    }

    async fn update_status(
        &self,
        run_id: &str,
        principal: &Principal,
        status: RunStatus,
        detail: StatusDetail,
    ) -> Result<(), PersistenceError> {
        let run_id = run_id.to_string();
        let principal = principal.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut run = load_run(&tx, &run_id, principal.as_str())?;
            apply_status(&mut run, status, detail)?;

            tx.execute(
                "UPDATE agent_runs
                 SET status = ?1, started_at = ?2, completed_at = ?3, is_completed = ?4,
                     final_answer = ?5, error = ?6
                 WHERE id = ?7 AND user_id = ?8",
                params![
                    run.status.to_string(),
                    format_ts(run.started_at),
                    format_ts(run.completed_at),
                    run.status == RunStatus::Completed,
                    run.final_answer,
                    run.error,
                    run_id,
                    principal.as_str(),
                ],
            )?;
            if status == RunStatus::InProgress {
                tx.execute(
                    "DELETE FROM agent_run_steps WHERE run_id = ?1",
                    params![run_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn append_step(
        &self,
        run_id: &str,
        principal: &Principal,
        step: &Step,
    ) -> Result<(), PersistenceError> {
        let run_id = run_id.to_string();
        let principal = principal.clone();
        let step = step.clone();
        self.with_conn(move |conn| {
            let owned: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM agent_runs WHERE id = ?1 AND user_id = ?2",
                    params![run_id, principal.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if owned.is_none() {
                return Err(PersistenceError::run_not_found(run_id));
            }
            write_step(conn, &run_id, &step)
        })
        .await
    }

    async fn fetch_automation(
        &self,
        automation_id: &str,
        principal: &Principal,
    ) -> Result<Automation, PersistenceError> {
        let automation_id = automation_id.to_string();
        let principal = principal.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, objective FROM automations WHERE id = ?1 AND user_id = ?2",
                params![automation_id, principal.as_str()],
                |row| {
                    Ok(Automation {
                        id: row.get(0)?,
                        owner: principal.clone(),
                        name: row.get(1)?,
                        objective: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| PersistenceError::automation_not_found(automation_id))
        })
        .await
    }

    async fn create_run(
        &self,
        principal: &Principal,
        objective: &str,
    ) -> Result<RunRecord, PersistenceError> {
        let run = RunRecord::pending(
            uuid::Uuid::new_v4().to_string(),
            principal.clone(),
            objective,
        );
        let stored = run.clone();
        self.with_conn(move |conn| write_run(conn, &stored)).await?;
        Ok(run)
    }
}
