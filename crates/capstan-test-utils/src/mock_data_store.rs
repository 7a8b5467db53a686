// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory relational store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use capstan_core::{CapstanError, DataStore, Filter, OrderBy, Row};
use serde_json::Value;

/// A [`DataStore`] keeping tables in memory, keyed by the `id` column.
///
/// Every call is counted, and [`MockDataStore::fail_with`] makes all
/// subsequent calls return a handler error.
#[derive(Debug, Default)]
pub struct MockDataStore {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents of `table`.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        lock(&self.tables).insert(table.to_string(), rows);
    }

    /// Current contents of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// The row of `table` whose `id` equals `id`.
    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        self.rows(table)
            .into_iter()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
    }

    /// Number of store calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes every later call fail with `message`; `None` heals the store.
    pub fn fail_with(&self, message: Option<&str>) {
        *lock(&self.failure) = message.map(str::to_string);
    }

    fn enter(&self) -> Result<(), CapstanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.failure).as_ref() {
            Some(message) => Err(CapstanError::handler(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataStore for MockDataStore {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, CapstanError> {
        self.enter()?;
        let mut rows: Vec<Row> = self
            .rows(table)
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        if let Some(order) = order_by {
            rows.sort_by(|a, b| order.compare(a, b));
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, CapstanError> {
        self.enter()?;
        let id = row
            .entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()))
            .clone();
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| r.get("id") == Some(&id)) {
            return Err(CapstanError::handler(format!(
                "duplicate key {id} in table {table}"
            )));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        patch: Row,
        filter: &Filter,
    ) -> Result<Vec<Row>, CapstanError> {
        self.enter()?;
        let mut tables = lock(&self.tables);
        let mut updated = Vec::new();
        for row in tables.entry(table.to_string()).or_default() {
            if filter.matches(row) {
                for (k, v) in &patch {
                    if k != "id" {
                        row.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, CapstanError> {
        self.enter()?;
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        let (removed, kept): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|r| filter.matches(r));
        *rows = kept;
        Ok(removed)
    }

    async fn upsert(&self, table: &str, mut row: Row) -> Result<Row, CapstanError> {
        self.enter()?;
        let id = row
            .entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()))
            .clone();
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        match rows.iter_mut().find(|r| r.get("id") == Some(&id)) {
            Some(existing) => *existing = row.clone(),
            None => rows.push(row.clone()),
        }
        Ok(row)
    }
}
