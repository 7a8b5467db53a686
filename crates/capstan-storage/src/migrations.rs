// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded refinery migrations, applied on every open.

use capstan_core::CapstanError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Runs all pending migrations. Refinery tracks applied versions itself.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), CapstanError> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(CapstanError::storage)?;
    Ok(())
}
