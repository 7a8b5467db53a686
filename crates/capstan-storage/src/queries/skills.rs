// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Skill registry rows.

use capstan_core::{CapstanError, SkillRecord};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, json_column, map_tr_err, to_json_text};

const SKILL_COLUMNS: &str = "id, slug, name, version, manifest, created_at, updated_at";

fn read_skill(row: &rusqlite::Row<'_>) -> rusqlite::Result<SkillRecord> {
    Ok(SkillRecord {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        manifest: json_column(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Inserts a skill, or replaces the manifest of the skill with the same slug.
///
/// Returns the stored record; an existing skill keeps its id.
pub async fn upsert_skill(db: &Database, skill: &SkillRecord) -> Result<SkillRecord, CapstanError> {
    let skill = skill.clone();
    let manifest = to_json_text(&skill.manifest)?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO skills (id, slug, name, version, manifest, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(slug) DO UPDATE SET
                    name = excluded.name,
                    version = excluded.version,
                    manifest = excluded.manifest,
                    updated_at = excluded.updated_at",
                params![
                    skill.id,
                    skill.slug,
                    skill.name,
                    skill.version,
                    manifest,
                    skill.created_at,
                    skill.updated_at,
                ],
            )?;
            conn.query_row(
                &format!("SELECT {SKILL_COLUMNS} FROM skills WHERE slug = ?1"),
                params![skill.slug],
                read_skill,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_skill(db: &Database, id: &str) -> Result<Option<SkillRecord>, CapstanError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {SKILL_COLUMNS} FROM skills WHERE id = ?1"),
                params![id],
                read_skill,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_skill_by_slug(
    db: &Database,
    slug: &str,
) -> Result<Option<SkillRecord>, CapstanError> {
    let slug = slug.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {SKILL_COLUMNS} FROM skills WHERE slug = ?1"),
                params![slug],
                read_skill,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_skills(db: &Database) -> Result<Vec<SkillRecord>, CapstanError> {
    db.connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SKILL_COLUMNS} FROM skills ORDER BY slug"))?;
            let rows = stmt.query_map([], read_skill)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
