//! Dashboard page and table views.

use serde::Serialize;
use std::time::Duration;

use crate::error::Result;
use crate::observation::{Observation, ObservationLog};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_PAGE_SIZE: usize = 10;

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub id: String,
}

/// The table as the page consumes it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableView {
    pub columns: Vec<Column>,
    pub data: Vec<Observation>,
}

impl TableView {
    /// CSV export: a header row, then one line per row in table order.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| csv_field(&c.name)).collect();
        out.push_str(&header.join(","));
        out.push_str("\r\n");
        for row in &self.data {
            let fields: Vec<String> = self
                .columns
                .iter()
                .map(|c| csv_field(row.field(&c.id).unwrap_or("")))
                .collect();
            out.push_str(&fields.join(","));
            out.push_str("\r\n");
        }
        out
    }
}

#[derive(Clone, Debug)]
pub struct DashboardView {
    pub poll_interval: Duration,
    pub page_size: usize,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl DashboardView {
    pub fn new(poll_interval: Duration, page_size: usize) -> Self {
        Self {
            poll_interval,
            page_size: page_size.max(1),
        }
    }

    /// Current table, newest timestamp first. Rows sharing a timestamp are
    /// ordered most recently inserted first.
    pub fn render(&self, log: &ObservationLog) -> Result<TableView> {
        let mut rows: Vec<(usize, Observation)> = log.snapshot()?.into_iter().enumerate().collect();
        rows.sort_by(|(ia, a), (ib, b)| b.seconds().cmp(&a.seconds()).then(ib.cmp(ia)));
        Ok(TableView {
            columns: columns(),
            data: rows.into_iter().map(|(_, row)| row).collect(),
        })
    }

    /// HTML page with the poll interval and page size filled in.
    pub fn page(&self) -> String {
        INDEX_TEMPLATE
            .replace(
                "{{poll_interval_ms}}",
                &self.poll_interval.as_millis().to_string(),
            )
            .replace("{{page_size}}", &self.page_size.to_string())
    }
}

fn columns() -> Vec<Column> {
    Observation::COLUMNS
        .iter()
        .map(|name| Column {
            name: name.to_string(),
            id: name.to_string(),
        })
        .collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
