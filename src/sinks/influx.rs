//! InfluxDB 1.x HTTP backend.
//!
//! Serves both as the [`TimeSeriesStore`] behind the metrics sink and as the
//! [`AlertLedger`] the alert state machine reads from, since the trailing
//! category window is simply a query over the points the metrics sink wrote.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::TimeSeriesStore;
use crate::alert::AlertLedger;
use crate::aqi::AqiCategory;
use crate::error::{AlertError, SinkError};
use crate::models::{FieldValue, Record};

const NOTIFICATIONS_MEASUREMENT: &str = "notifications";

// ---

#[derive(Debug, Clone)]
pub struct InfluxClient {
    // ---
    http: reqwest::Client,
    base_url: String,
    database: String,
    measurement: String,
    credentials: Option<(String, String)>,
}

impl InfluxClient {
    // ---
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        database: impl Into<String>,
        measurement: impl Into<String>,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            measurement: measurement.into(),
            credentials,
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, password)) => req.basic_auth(user, Some(password)),
            None => req,
        }
    }

    async fn write_line(&self, line: String) -> Result<(), SinkError> {
        // ---
        let url = format!("{}/write", self.base_url);
        let req = self
            .http
            .post(&url)
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(line);

        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn query(&self, q: &str) -> Result<QueryResponse, AlertError> {
        // ---
        tracing::debug!(query = q, "influx query");

        let url = format!("{}/query", self.base_url);
        let req = self
            .http
            .get(&url)
            .query(&[("db", self.database.as_str()), ("q", q)]);

        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AlertError::LedgerUnavailable(format!(
                "query returned status {status}"
            )));
        }

        Ok(resp.json::<QueryResponse>().await?)
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxClient {
    async fn write_point(
        &self,
        measurement: &str,
        tags: &BTreeMap<String, String>,
        fields: &Record,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        // ---
        match line_protocol(measurement, tags, fields, Some(timestamp)) {
            Some(line) => self.write_line(line).await,
            None => {
                tracing::debug!(measurement, "no fields to write, skipping point");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl AlertLedger for InfluxClient {
    // ---
    async fn recent_categories(&self, window: Duration) -> Result<Vec<AqiCategory>, AlertError> {
        // ---
        let q = format!(
            r#"SELECT "AQI_category" FROM "{}" WHERE time > now() - {}s"#,
            self.measurement,
            window.as_secs()
        );
        let resp = self.query(&q).await?;

        string_column(&resp, "AQI_category")?
            .iter()
            .map(|label| {
                label
                    .parse::<AqiCategory>()
                    .map_err(|e| AlertError::LedgerUnavailable(e.to_string()))
            })
            .collect()
    }

    async fn last_announced(&self) -> Result<Option<AqiCategory>, AlertError> {
        // ---
        let q = format!(r#"SELECT last("alert") FROM "{NOTIFICATIONS_MEASUREMENT}""#);
        let resp = self.query(&q).await?;

        match string_column(&resp, "last")?.into_iter().next() {
            Some(label) => label
                .parse::<AqiCategory>()
                .map(Some)
                .map_err(|e| AlertError::LedgerUnavailable(e.to_string())),
            None => Ok(None),
        }
    }

    async fn record_announcement(&self, category: AqiCategory) -> Result<(), AlertError> {
        // ---
        let mut fields = Record::new();
        fields.insert("alert".to_string(), category.into());

        let line = line_protocol(NOTIFICATIONS_MEASUREMENT, &BTreeMap::new(), &fields, None)
            .ok_or_else(|| AlertError::LedgerUnavailable("empty announcement".into()))?;

        self.write_line(line)
            .await
            .map_err(|e| AlertError::LedgerUnavailable(e.to_string()))
    }
}

// ---

/// Encode one point in InfluxDB line protocol; `None` when there are no fields.
pub fn line_protocol(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    fields: &Record,
    timestamp: Option<DateTime<Utc>>,
) -> Option<String> {
    // ---
    if fields.is_empty() {
        return None;
    }

    let mut line = escape(measurement, &[',', ' ']);

    for (key, value) in tags {
        let _ = write!(
            line,
            ",{}={}",
            escape(key, &[',', '=', ' ']),
            escape(value, &[',', '=', ' '])
        );
    }

    let encoded: Vec<String> = fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                FieldValue::Number(v) => v.to_string(),
                FieldValue::Text(s) => format!("\"{}\"", escape(s, &['"', '\\'])),
            };
            format!("{}={}", escape(key, &[',', '=', ' ']), value)
        })
        .collect();

    line.push(' ');
    line.push_str(&encoded.join(","));

    if let Some(ns) = timestamp.and_then(|t| t.timestamp_nanos_opt()) {
        let _ = write!(line, " {ns}");
    }

    Some(line)
}

fn escape(raw: &str, special: &[char]) -> String {
    // ---
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

// ---

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// All non-null string values of `column` across every returned series.
fn string_column(resp: &QueryResponse, column: &str) -> Result<Vec<String>, AlertError> {
    // ---
    if let Some(err) = &resp.error {
        return Err(AlertError::LedgerUnavailable(err.clone()));
    }

    let mut out = Vec::new();
    for result in &resp.results {
        if let Some(err) = &result.error {
            return Err(AlertError::LedgerUnavailable(err.clone()));
        }
        for series in &result.series {
            let Some(idx) = series.columns.iter().position(|c| c == column) else {
                continue;
            };
            out.extend(
                series
                    .values
                    .iter()
                    .filter_map(|row| row.get(idx)?.as_str().map(str::to_string)),
            );
        }
    }

    Ok(out)
}
