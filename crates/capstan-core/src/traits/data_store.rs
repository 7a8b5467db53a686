// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relational store contract used by the `db:*` actions.

use async_trait::async_trait;

use crate::error::CapstanError;
use crate::filter::{Filter, OrderBy, Row};

/// A table-oriented record store.
///
/// Every mutating call returns the affected rows as they are after the call
/// (`delete` returns the removed rows).
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, CapstanError>;

    /// Inserts a row, returning it with any generated `id`.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, CapstanError>;

    async fn update(&self, table: &str, patch: Row, filter: &Filter)
    -> Result<Vec<Row>, CapstanError>;

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, CapstanError>;

    /// Inserts or replaces the row keyed by its `id`.
    async fn upsert(&self, table: &str, row: Row) -> Result<Row, CapstanError>;
}
