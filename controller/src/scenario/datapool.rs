//! Datapools supply per-iteration data rows to a scenario's journeys

use crate::protocol::DataId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// A row handed to a single journey execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub id: DataId,
    pub data: serde_json::Value,
}

/// The datapool will never produce another row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Datapool is exhausted")]
pub struct DatapoolExhausted;

/// Source of data rows for a scenario
pub trait Datapool: Send + Sync {
    /// Next row; `Ok(None)` while every row is checked out
    fn checkout(&mut self) -> Result<Option<DataItem>, DatapoolExhausted>;

    /// Return a row that a journey has finished with
    fn checkin(&mut self, id: DataId);
}

/// Hands out each row once
#[derive(Debug, Default)]
pub struct IterableDatapool {
    rows: VecDeque<DataItem>,
}

impl IterableDatapool {
    pub fn new(rows: impl IntoIterator<Item = serde_json::Value>) -> Self {
        Self {
            rows: number_rows(rows),
        }
    }
}

impl Datapool for IterableDatapool {
    fn checkout(&mut self) -> Result<Option<DataItem>, DatapoolExhausted> {
        self.rows.pop_front().map(Some).ok_or(DatapoolExhausted)
    }

    fn checkin(&mut self, _id: DataId) {}
}

/// Hands out rows in a loop, a row becomes available again once checked in
#[derive(Debug, Default)]
pub struct RecyclableDatapool {
    available: VecDeque<DataId>,
    rows: Vec<DataItem>,
}

impl RecyclableDatapool {
    pub fn new(rows: impl IntoIterator<Item = serde_json::Value>) -> Self {
        let rows: Vec<DataItem> = number_rows(rows).into();
        Self {
            available: rows.iter().map(|row| row.id).collect(),
            rows,
        }
    }
}

impl Datapool for RecyclableDatapool {
    fn checkout(&mut self) -> Result<Option<DataItem>, DatapoolExhausted> {
        if self.rows.is_empty() {
            return Err(DatapoolExhausted);
        }
        Ok(self
            .available
            .pop_front()
            .and_then(|id| self.rows.get(id as usize - 1).cloned()))
    }

    fn checkin(&mut self, id: DataId) {
        let known = id >= 1 && (id as usize) <= self.rows.len();
        if known && !self.available.contains(&id) {
            self.available.push_back(id);
        }
    }
}

/// Row ids start at 1, 0 is reserved for "no data"
fn number_rows(rows: impl IntoIterator<Item = serde_json::Value>) -> VecDeque<DataItem> {
    rows.into_iter()
        .enumerate()
        .map(|(i, data)| DataItem {
            id: i as DataId + 1,
            data,
        })
        .collect()
}
