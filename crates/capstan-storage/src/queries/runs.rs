// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Skill run history.

use capstan_core::{CapstanError, RunRecord, RunStatus};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use crate::database::{
    Database, enum_column, json_column, json_column_opt, map_tr_err, to_json_text,
};

const RUN_COLUMNS: &str =
    "id, installation_id, status, trigger, input, output, error, events, started_at, completed_at";

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        installation_id: row.get(1)?,
        status: enum_column(row, 2)?,
        trigger: row.get(3)?,
        input: json_column(row, 4)?,
        output: json_column_opt(row, 5)?,
        error: row.get(6)?,
        events: json_column(row, 7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

pub async fn create_run(db: &Database, run: &RunRecord) -> Result<(), CapstanError> {
    let run = run.clone();
    let input = to_json_text(&run.input)?;
    let output = run.output.as_ref().map(to_json_text).transpose()?;
    let events = to_json_text(&run.events)?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO skill_runs
                 (id, installation_id, status, trigger, input, output, error, events,
                  started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run.id,
                    run.installation_id,
                    run.status.to_string(),
                    run.trigger,
                    input,
                    output,
                    run.error,
                    events,
                    run.started_at,
                    run.completed_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Records a status change. Terminal statuses stamp `completed_at`.
pub async fn update_run_status(
    db: &Database,
    id: &str,
    status: RunStatus,
    output: Option<&Value>,
    error: Option<&str>,
) -> Result<bool, CapstanError> {
    let id = id.to_string();
    let output = output.map(to_json_text).transpose()?;
    let error = error.map(str::to_string);
    let completed_at = status
        .is_terminal()
        .then(|| chrono::Utc::now().to_rfc3339());
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE skill_runs
                 SET status = ?2,
                     output = COALESCE(?3, output),
                     error = COALESCE(?4, error),
                     completed_at = COALESCE(?5, completed_at)
                 WHERE id = ?1",
                params![id, status.to_string(), output, error, completed_at],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Appends one progress event to the run's mirrored event list.
pub async fn append_run_event(db: &Database, id: &str, event: &Value) -> Result<(), CapstanError> {
    let id = id.to_string();
    let event = to_json_text(event)?;
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE skill_runs SET events = json_insert(events, '$[#]', json(?2))
                 WHERE id = ?1",
                params![id, event],
            )?;
            if n == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_run(db: &Database, id: &str) -> Result<Option<RunRecord>, CapstanError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM skill_runs WHERE id = ?1"),
                params![id],
                read_run,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Runs of one installation, newest first.
pub async fn list_runs(
    db: &Database,
    installation_id: &str,
    limit: usize,
) -> Result<Vec<RunRecord>, CapstanError> {
    let installation_id = installation_id.to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM skill_runs
                 WHERE installation_id = ?1 ORDER BY rowid DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![installation_id, limit], read_run)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::installations::tests::seeded;
    use capstan_core::JsonMap;
    use serde_json::json;

    fn new_run(installation_id: &str) -> RunRecord {
        RunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            installation_id: installation_id.to_string(),
            status: RunStatus::Running,
            trigger: "manual".into(),
            input: JsonMap::new(),
            output: None,
            error: None,
            events: vec![],
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn events_append_in_order() {
        let db = Database::open_in_memory().await.unwrap();
        let inst = seeded(&db).await;
        let run = new_run(&inst.id);
        create_run(&db, &run).await.unwrap();

        append_run_event(&db, &run.id, &json!({"type": "start"})).await.unwrap();
        append_run_event(&db, &run.id, &json!({"type": "complete"})).await.unwrap();

        let loaded = get_run(&db, &run.id).await.unwrap().unwrap();
        assert_eq!(loaded.events, vec![json!({"type": "start"}), json!({"type": "complete"})]);
    }

    #[tokio::test]
    async fn appending_to_missing_run_fails() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(append_run_event(&db, "nope", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn terminal_status_stamps_completion() {
        let db = Database::open_in_memory().await.unwrap();
        let inst = seeded(&db).await;
        let run = new_run(&inst.id);
        create_run(&db, &run).await.unwrap();

        update_run_status(&db, &run.id, RunStatus::Failed, None, Some("boom"))
            .await
            .unwrap();
        let loaded = get_run(&db, &run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let inst = seeded(&db).await;
        let first = new_run(&inst.id);
        let second = new_run(&inst.id);
        create_run(&db, &first).await.unwrap();
        create_run(&db, &second).await.unwrap();

        let runs = list_runs(&db, &inst.id, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(list_runs(&db, &inst.id, 1).await.unwrap().len(), 1);
    }
}
