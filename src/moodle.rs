//! Outbound client for the Moodle REST web-service endpoint.
//!
//! Every call is a single form-encoded POST carrying `wstoken`, `wsfunction`
//! and `moodlewsrestformat=json` plus the function's own parameters. Calls
//! are attempted once; failures are classified into [`MoodleError`].

use serde_json::Value;
use std::{fmt::Display, sync::Arc};
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Error, Debug)]
pub enum MoodleError {
    #[error("MOODLE_TOKEN is not configured")]
    MissingToken,
    #[error("could not reach Moodle: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("Moodle returned HTTP {status}")]
    Http { status: u16 },
    #[error("{message}")]
    Application {
        errorcode: Option<String>,
        message: String,
    },
    #[error("Moodle returned a body that is not JSON: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Flat parameter set in Moodle's bracketed encoding
/// (`users[0][email]`, `values[0]`, ...).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Display) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    /// `key[i]=value` for each value.
    pub fn list<I>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        for (i, v) in values.into_iter().enumerate() {
            self.0.push((format!("{key}[{i}]"), v.to_string()));
        }
        self
    }

    /// `key[i][field]=value` for each record.
    pub fn records<I, R, V>(mut self, key: &str, records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (&'static str, V)>,
        V: Display,
    {
        for (i, record) in records.into_iter().enumerate() {
            for (field, v) in record {
                self.0.push((format!("{key}[{i}][{field}]"), v.to_string()));
            }
        }
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

#[derive(Clone)]
pub struct MoodleClient {
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

impl MoodleClient {
    pub fn new(http: reqwest::Client, config: Arc<AppConfig>) -> Self {
        Self { http, config }
    }

    #[tracing::instrument(name = "moodle.call", skip(self, params), fields(wsfunction = function))]
    pub async fn call(&self, function: &str, params: Params) -> Result<Value, MoodleError> {
        let token = self
            .config
            .moodle_token
            .as_deref()
            .ok_or(MoodleError::MissingToken)?;

        let mut form: Vec<(String, String)> = vec![
            ("wstoken".into(), token.to_string()),
            ("wsfunction".into(), function.to_string()),
            ("moodlewsrestformat".into(), "json".into()),
        ];
        tracing::debug!(params = params.pairs().len(), "calling Moodle");
        form.extend(params.0);

        let res = self
            .http
            .post(&self.config.moodle_url)
            .timeout(self.config.moodle_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Moodle unreachable");
                MoodleError::Unreachable(e)
            })?;

        let status = res.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Moodle HTTP error");
            return Err(MoodleError::Http {
                status: status.as_u16(),
            });
        }

        let body: Value = res.json().await.map_err(MoodleError::Decode)?;
        if let Some(err) = application_error(&body) {
            tracing::warn!(error = %err, "Moodle exception");
            return Err(err);
        }
        Ok(body)
    }
}

/// Moodle reports failures with HTTP 200 and an
/// `{"exception": ..., "errorcode": ..., "message": ...}` envelope.
fn application_error(body: &Value) -> Option<MoodleError> {
    let obj = body.as_object()?;
    let marked = match obj.get("exception")? {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    };
    if !marked {
        return None;
    }
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or("Moodle reported an error")
        .to_string();
    let errorcode = obj
        .get("errorcode")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(MoodleError::Application { errorcode, message })
}
