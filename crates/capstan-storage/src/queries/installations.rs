// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Installation rows and their onboarding answers.

use capstan_core::{CapstanError, Environment, Installation, InstallationStatus, JsonMap};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use crate::database::{Database, enum_column, json_column, map_tr_err, to_json_text};

const INSTALLATION_COLUMNS: &str = "id, tenant_id, skill_id, status, status_message, \
     permissions_granted, config, environment, created_at, updated_at";

fn read_installation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Installation> {
    Ok(Installation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        skill_id: row.get(2)?,
        status: enum_column(row, 3)?,
        status_message: row.get(4)?,
        permissions_granted: json_column(row, 5)?,
        config: json_column(row, 6)?,
        environment: json_column(row, 7)?,
        onboarding: JsonMap::new(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn load_onboarding(
    conn: &rusqlite::Connection,
    installation: &mut Installation,
) -> rusqlite::Result<()> {
    let id = installation.id.clone();
    let mut stmt = conn.prepare(
        "SELECT field_key, value FROM installation_onboarding
         WHERE installation_id = ?1 ORDER BY field_key",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((row.get::<_, String>(0)?, json_column::<Value>(row, 1)?))
    })?;
    for row in rows {
        let (key, value) = row?;
        installation.onboarding.insert(key, value);
    }
    Ok(())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Inserts an installation and its onboarding answers in one transaction.
pub async fn create_installation(
    db: &Database,
    installation: &Installation,
) -> Result<(), CapstanError> {
    let inst = installation.clone();
    let permissions = to_json_text(&inst.permissions_granted)?;
    let config = to_json_text(&inst.config)?;
    let environment = to_json_text(&inst.environment)?;
    let onboarding: Vec<(String, String)> = inst
        .onboarding
        .iter()
        .map(|(k, v)| to_json_text(v).map(|text| (k.clone(), text)))
        .collect::<Result<_, CapstanError>>()?;

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO installations
                 (id, tenant_id, skill_id, status, status_message, permissions_granted,
                  config, environment, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    inst.id,
                    inst.tenant_id,
                    inst.skill_id,
                    inst.status.to_string(),
                    inst.status_message,
                    permissions,
                    config,
                    environment,
                    inst.created_at,
                    inst.updated_at,
                ],
            )?;
            for (key, value) in &onboarding {
                tx.execute(
                    "INSERT INTO installation_onboarding (installation_id, field_key, value, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![inst.id, key, value, inst.created_at],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Loads an installation with its onboarding answers.
pub async fn get_installation(
    db: &Database,
    id: &str,
) -> Result<Option<Installation>, CapstanError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let found = conn
                .query_row(
                    &format!("SELECT {INSTALLATION_COLUMNS} FROM installations WHERE id = ?1"),
                    params![id],
                    read_installation,
                )
                .optional()?;
            match found {
                Some(mut installation) => {
                    load_onboarding(conn, &mut installation)?;
                    Ok(Some(installation))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// The installation of `skill_id` for `tenant_id`, if any.
pub async fn find_installation(
    db: &Database,
    tenant_id: &str,
    skill_id: &str,
) -> Result<Option<Installation>, CapstanError> {
    let tenant_id = tenant_id.to_string();
    let skill_id = skill_id.to_string();
    db.connection()
        .call(move |conn| {
            let found = conn
                .query_row(
                    &format!(
                        "SELECT {INSTALLATION_COLUMNS} FROM installations
                         WHERE tenant_id = ?1 AND skill_id = ?2"
                    ),
                    params![tenant_id, skill_id],
                    read_installation,
                )
                .optional()?;
            match found {
                Some(mut installation) => {
                    load_onboarding(conn, &mut installation)?;
                    Ok(Some(installation))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Lists installations, optionally for one tenant, oldest first.
pub async fn list_installations(
    db: &Database,
    tenant_id: Option<&str>,
) -> Result<Vec<Installation>, CapstanError> {
    let tenant_id = tenant_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSTALLATION_COLUMNS} FROM installations
                 WHERE (?1 IS NULL OR tenant_id = ?1) ORDER BY created_at, id"
            ))?;
            let mut installations = stmt
                .query_map(params![tenant_id], read_installation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for installation in &mut installations {
                load_onboarding(conn, installation)?;
            }
            Ok(installations)
        })
        .await
        .map_err(map_tr_err)
}

/// Sets status and message. Returns false when the installation does not exist.
pub async fn update_status(
    db: &Database,
    id: &str,
    status: InstallationStatus,
    message: Option<&str>,
) -> Result<bool, CapstanError> {
    let id = id.to_string();
    let message = message.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE installations SET status = ?2, status_message = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id, status.to_string(), message, now()],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Moves to `to` only if the current status is one of `from`.
///
/// Returns false when the installation was not in an allowed state.
pub async fn transition_status(
    db: &Database,
    id: &str,
    from: &[InstallationStatus],
    to: InstallationStatus,
) -> Result<bool, CapstanError> {
    let id = id.to_string();
    let from: Vec<String> = from.iter().map(ToString::to_string).collect();
    let from = to_json_text(&from)?;
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE installations SET status = ?2, status_message = NULL, updated_at = ?3
                 WHERE id = ?1 AND status IN (SELECT value FROM json_each(?4))",
                params![id, to.to_string(), now(), from],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_config(db: &Database, id: &str, config: &JsonMap) -> Result<bool, CapstanError> {
    let id = id.to_string();
    let config = to_json_text(config)?;
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE installations SET config = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, config, now()],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_environment(
    db: &Database,
    id: &str,
    environment: &Environment,
) -> Result<bool, CapstanError> {
    let id = id.to_string();
    let environment = to_json_text(environment)?;
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE installations SET environment = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, environment, now()],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes an installation. Onboarding, runs and audit rows cascade.
pub async fn delete_installation(db: &Database, id: &str) -> Result<bool, CapstanError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute("DELETE FROM installations WHERE id = ?1", params![id])?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::queries::skills::{tests::sample_skill, upsert_skill};
    use serde_json::json;

    pub(crate) async fn seeded(db: &Database) -> Installation {
        let skill = upsert_skill(db, &sample_skill("crm", "1.0.0")).await.unwrap();
        let now = now();
        let mut environment = Environment::default();
        environment.insert("API_TOKEN", "tok-123");
        let installation = Installation {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: "tenant-1".into(),
            skill_id: skill.id,
            status: InstallationStatus::Installed,
            status_message: None,
            permissions_granted: vec!["database:leads".into()],
            config: json!({"flag": true}).as_object().cloned().unwrap(),
            environment,
            onboarding: json!({"company": "Acme"}).as_object().cloned().unwrap(),
            created_at: now.clone(),
            updated_at: now,
        };
        create_installation(db, &installation).await.unwrap();
        installation
    }

    #[tokio::test]
    async fn create_and_load_round_trips_onboarding() {
        let db = Database::open_in_memory().await.unwrap();
        let created = seeded(&db).await;

        let loaded = get_installation(&db, &created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        let found = find_installation(&db, "tenant-1", &created.skill_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.onboarding["company"], "Acme");
    }

    #[tokio::test]
    async fn one_installation_per_tenant_and_skill() {
        let db = Database::open_in_memory().await.unwrap();
        let created = seeded(&db).await;
        let mut dup = created.clone();
        dup.id = "other".into();
        dup.onboarding.clear();
        assert!(create_installation(&db, &dup).await.is_err());
    }

    #[tokio::test]
    async fn transition_respects_allowed_states() {
        let db = Database::open_in_memory().await.unwrap();
        let created = seeded(&db).await;

        let moved = transition_status(
            &db,
            &created.id,
            &[InstallationStatus::Paused],
            InstallationStatus::Installed,
        )
        .await
        .unwrap();
        assert!(!moved);

        let moved = transition_status(
            &db,
            &created.id,
            &[InstallationStatus::Installed, InstallationStatus::Error],
            InstallationStatus::Paused,
        )
        .await
        .unwrap();
        assert!(moved);
        let loaded = get_installation(&db, &created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InstallationStatus::Paused);
    }

    #[tokio::test]
    async fn status_config_and_environment_updates() {
        let db = Database::open_in_memory().await.unwrap();
        let created = seeded(&db).await;

        update_status(&db, &created.id, InstallationStatus::Error, Some("boom"))
            .await
            .unwrap();
        let mut config = JsonMap::new();
        config.insert("flag".into(), json!(false));
        update_config(&db, &created.id, &config).await.unwrap();
        let mut env = created.environment.clone();
        env.insert("OTHER", "x");
        update_environment(&db, &created.id, &env).await.unwrap();

        let loaded = get_installation(&db, &created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InstallationStatus::Error);
        assert_eq!(loaded.status_message.as_deref(), Some("boom"));
        assert_eq!(loaded.config["flag"], false);
        assert_eq!(loaded.environment.get("OTHER"), Some("x"));
        assert!(!update_status(&db, "missing", InstallationStatus::Paused, None).await.unwrap());
    }

    #[tokio::test]
    async fn delete_cascades_onboarding() {
        let db = Database::open_in_memory().await.unwrap();
        let created = seeded(&db).await;
        assert!(delete_installation(&db, &created.id).await.unwrap());

        let remaining: i64 = db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT COUNT(*) FROM installation_onboarding", [], |r| r.get(0))
            })
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(list_installations(&db, None).await.unwrap().is_empty());
    }
}
