//! Structured request logging.
//!
//! Each request produces a handful of records, all keyed by the request id:
//!
//! ```json
//! {
//!   "@fields": {"level": "INFO"},
//!   "@message": {"request_id": "...", "time": "2024-08-05 15:30:45.123", "...": "..."},
//!   "data": {"...": "..."}
//! }
//! ```
//!
//! # Sinks
//!
//! The sink is chosen once from the [`Environment`] when the [`LoggerConfig`]
//! is built:
//!
//! | Environment | INFO | WARN | ERROR | AI LOG / SSE LOG |
//! |---|---|---|---|---|
//! | DEVELOPMENT | console | console | console | console |
//! | STAGING | info | warn | console + error | debug |
//! | PRODUCTION | info | warn | error | debug |
//!
//! Non-console sinks are `tracing` events on the [`RECORD_TARGET`] target.
//! Info records from the automated agent go to `debug` instead of `info`, and
//! print as `AI REQ` on the development console.
//!
//! Emitting a record never fails: serialization or console write errors fall
//! back to plain output and are otherwise ignored.

use std::io::Write;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Environment};
use crate::error::Diagnostics;
use crate::utils::{current_datetime, seconds_between};

/// `tracing` target of every structured record.
pub const RECORD_TARGET: &str = "gateway::record";

/// Initialise the global `tracing` subscriber.
///
/// Development gets human-readable ANSI output, every other environment
/// JSON lines.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.environment.is_development() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init();
    }
}

/// Severity of a structured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "AI LOG")]
    AiLog,
    #[serde(rename = "SSE LOG")]
    SseLog,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::AiLog => "AI LOG",
            LogLevel::SseLog => "SSE LOG",
        }
    }
}

/// Which general-purpose stream a `general_log` record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralLogKind {
    Ai,
    Sse,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFields {
    pub level: LogLevel,
}

/// One structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    #[serde(rename = "@fields")]
    pub fields: LogFields,
    #[serde(rename = "@message")]
    pub message: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl LogRecord {
    pub fn new(request_id: &str, level: LogLevel) -> Self {
        let mut message = Map::new();
        message.insert("request_id".to_string(), json!(request_id));
        message.insert("time".to_string(), json!(current_datetime()));
        Self {
            fields: LogFields { level },
            message,
            data: None,
            response: None,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.fields.level
    }

    pub fn request_id(&self) -> Option<&str> {
        self.message.get("request_id").and_then(Value::as_str)
    }

    fn user_agent(&self) -> Option<&str> {
        self.message.get("user-agent").and_then(Value::as_str)
    }

    fn insert(&mut self, key: &str, value: Value) {
        self.message.insert(key.to_string(), value);
    }

    fn extend(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.message.insert(key.clone(), value.clone());
        }
    }

    fn to_json(&self, pretty: bool) -> String {
        let rendered = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        rendered.unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Everything about an inbound request that goes into the request record.
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub headers: Map<String, Value>,
    /// URL-encoded or multipart form fields, empty when the body is not a form.
    pub form: Map<String, Value>,
    /// Body as JSON, UTF-8 text or base64, only consulted when `form` is empty.
    pub body: Option<Value>,
    pub params: Map<String, Value>,
    pub url: String,
    pub method: String,
}

/// Final status, headers and body of a response, as logged.
#[derive(Debug, Clone)]
pub struct ResponseSummary {
    pub status: u16,
    pub headers: Map<String, Value>,
    pub body: Value,
}

/// Where a record ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// Pretty, colored console output under the given label.
    Console(&'static str),
    /// A `tracing` event at the given level.
    Tracing(Level),
    /// Both, used for errors in staging.
    ConsoleAndTracing(&'static str, Level),
}

/// Logger configuration, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    environment: Environment,
    automated_agent: String,
}

impl LoggerConfig {
    pub fn new(environment: Environment, automated_agent: impl Into<String>) -> Self {
        Self {
            environment,
            automated_agent: automated_agent.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.environment, config.automated_agent.clone())
    }

    /// Logger bound to one request id.
    pub fn for_request<'a>(&'a self, request_id: &'a str) -> RequestLogger<'a> {
        RequestLogger {
            config: self,
            request_id,
        }
    }

    /// Pick the sink for a record.
    pub fn route(&self, record: &LogRecord) -> Sink {
        let automated = record.user_agent() == Some(self.automated_agent.as_str());
        let level = record.level();

        match self.environment {
            Environment::Development => {
                if automated && level == LogLevel::Info {
                    Sink::Console("AI REQ")
                } else {
                    Sink::Console(level.label())
                }
            }
            env => match level {
                LogLevel::Info if automated => Sink::Tracing(Level::DEBUG),
                LogLevel::Info => Sink::Tracing(Level::INFO),
                LogLevel::Warn => Sink::Tracing(Level::WARN),
                LogLevel::Error if env == Environment::Staging => {
                    Sink::ConsoleAndTracing(level.label(), Level::ERROR)
                }
                LogLevel::Error => Sink::Tracing(Level::ERROR),
                LogLevel::AiLog | LogLevel::SseLog => Sink::Tracing(Level::DEBUG),
            },
        }
    }

    /// Write a record to its sink.
    pub fn emit(&self, record: &LogRecord) {
        match self.route(record) {
            Sink::Console(label) => print_console(label, record),
            Sink::Tracing(level) => emit_tracing(level, record),
            Sink::ConsoleAndTracing(label, level) => {
                print_console(label, record);
                emit_tracing(level, record);
            }
        }
    }
}

/// Render a record for the console, colored by label.
pub fn render_console(label: &str, record: &LogRecord) -> String {
    let formatted = record.to_json(true);
    let painted = match label {
        "WARN" => formatted.yellow(),
        "ERROR" => formatted.red(),
        "AI REQ" => formatted.blue(),
        "AI LOG" | "SSE LOG" => formatted.green(),
        _ => formatted.normal(),
    };
    painted.to_string()
}

fn print_console(label: &str, record: &LogRecord) {
    let mut stdout = std::io::stdout().lock();
    if writeln!(stdout, "\n{}", render_console(label, record)).is_err() {
        let _ = writeln!(stdout, "\n{}", record.to_json(true));
    }
}

fn emit_tracing(level: Level, record: &LogRecord) {
    let request_id = record.request_id().unwrap_or("unknown");
    let record = record.to_json(false);
    match level {
        Level::ERROR => error!(target: RECORD_TARGET, request_id, record = %record),
        Level::WARN => warn!(target: RECORD_TARGET, request_id, record = %record),
        Level::INFO => info!(target: RECORD_TARGET, request_id, record = %record),
        _ => debug!(target: RECORD_TARGET, request_id, record = %record),
    }
}

/// Logger bound to a single request id.
#[derive(Debug, Clone, Copy)]
pub struct RequestLogger<'a> {
    config: &'a LoggerConfig,
    request_id: &'a str,
}

impl RequestLogger<'_> {
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    /// Build the record for an inbound request without emitting it.
    pub fn request_record(&self, snapshot: &RequestSnapshot) -> LogRecord {
        let mut record = LogRecord::new(self.request_id, LogLevel::Info);
        record.extend(&snapshot.headers);
        record.insert("formData", Value::Object(snapshot.form.clone()));
        if snapshot.form.is_empty() {
            record.insert(
                "jsonData",
                snapshot.body.clone().unwrap_or_else(|| json!({})),
            );
        }
        record.insert("params", Value::Object(snapshot.params.clone()));
        record.insert("url", json!(snapshot.url));
        record.insert("method", json!(snapshot.method));
        record
    }

    /// Log an inbound request.
    pub fn request_log(&self, snapshot: &RequestSnapshot) {
        self.config.emit(&self.request_record(snapshot));
    }

    /// Build the record for a successful response.
    pub fn response_record(
        &self,
        started_at: DateTime<Utc>,
        summary: &ResponseSummary,
    ) -> LogRecord {
        let mut record = LogRecord::new(self.request_id, LogLevel::Info);
        record.insert("duration", json!(seconds_between(started_at, Utc::now())));
        record.extend(&summary.headers);
        record.insert("body", summary.body.clone());
        record.insert("response_status_code", json!(summary.status));
        record
    }

    /// Log a successful response with its duration since `started_at`.
    pub fn response_log(&self, started_at: DateTime<Utc>, summary: &ResponseSummary) {
        self.config.emit(&self.response_record(started_at, summary));
    }

    /// Build the record for an error response.
    pub fn warn_record(&self, summary: &ResponseSummary) -> LogRecord {
        let mut record = LogRecord::new(self.request_id, LogLevel::Warn);
        record.extend(&summary.headers);
        record.insert("body", summary.body.clone());
        record.insert("response_status_code", json!(summary.status));
        record
    }

    /// Log an error response.
    pub fn warn_log(&self, summary: &ResponseSummary) {
        self.config.emit(&self.warn_record(summary));
    }

    /// Build an AI or SSE record.
    pub fn general_record(
        &self,
        kind: GeneralLogKind,
        data: Value,
        response: Option<Value>,
        is_error: bool,
    ) -> LogRecord {
        let level = match kind {
            GeneralLogKind::Ai => LogLevel::AiLog,
            GeneralLogKind::Sse => LogLevel::SseLog,
        };
        let mut record = LogRecord::new(self.request_id, level);
        if is_error {
            record.insert("error", json!(true));
        }
        record.data = Some(data);
        record.response = response;
        record
    }

    /// Log AI or SSE traffic.
    pub fn general_log(
        &self,
        kind: GeneralLogKind,
        data: Value,
        response: Option<Value>,
        is_error: bool,
    ) {
        self.config
            .emit(&self.general_record(kind, data, response, is_error));
    }

    /// Build the record for an internal failure.
    pub fn exception_record(&self, diagnostics: &Diagnostics) -> LogRecord {
        let mut record = LogRecord::new(self.request_id, LogLevel::Error);
        if let Ok(Value::Object(fields)) = serde_json::to_value(diagnostics) {
            record.extend(&fields);
        }
        record
    }

    /// Log an internal failure with its full diagnostics.
    pub fn exception_log(&self, diagnostics: &Diagnostics) {
        self.config.emit(&self.exception_record(diagnostics));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn snapshot() -> RequestSnapshot {
        let mut headers = Map::new();
        headers.insert("user-agent".to_string(), json!("curl/8.0"));
        headers.insert("content-type".to_string(), json!("application/json"));
        RequestSnapshot {
            headers,
            form: Map::new(),
            body: Some(json!({"name": "demo"})),
            params: Map::new(),
            url: "http://localhost/backend/demo".to_string(),
            method: "POST".to_string(),
        }
    }

    fn record_with_agent(agent: &str, level: LogLevel) -> LogRecord {
        let mut record = LogRecord::new("req-1", level);
        record.insert("user-agent", json!(agent));
        record
    }

    #[test]
    fn test_request_record_shape() {
        let config = LoggerConfig::new(Environment::Production, "AI");
        let record = config.for_request("req-1").request_record(&snapshot());
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["@fields"]["level"], "INFO");
        assert_eq!(value["@message"]["request_id"], "req-1");
        assert_eq!(value["@message"]["user-agent"], "curl/8.0");
        assert_eq!(value["@message"]["formData"], json!({}));
        assert_eq!(value["@message"]["jsonData"], json!({"name": "demo"}));
        assert_eq!(value["@message"]["method"], "POST");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_request_record_prefers_form_data() {
        let mut snap = snapshot();
        snap.form.insert("field".to_string(), json!("value"));

        let config = LoggerConfig::new(Environment::Production, "AI");
        let record = config.for_request("req-1").request_record(&snap);

        assert_eq!(record.message["formData"], json!({"field": "value"}));
        assert!(record.message.get("jsonData").is_none());
    }

    #[test]
    fn test_response_record_has_duration_and_status() {
        let config = LoggerConfig::new(Environment::Production, "AI");
        let summary = ResponseSummary {
            status: 200,
            headers: Map::new(),
            body: json!({"code": "HTTP_200_SUCCESS"}),
        };
        let record = config
            .for_request("req-1")
            .response_record(Utc::now() - chrono::TimeDelta::milliseconds(250), &summary);

        assert_eq!(record.message["response_status_code"], json!(200));
        assert!(record.message["duration"].as_f64().unwrap() >= 0.25);
        assert_eq!(record.message["body"]["code"], "HTTP_200_SUCCESS");
    }

    #[test]
    fn test_exception_record_includes_diagnostics() {
        let config = LoggerConfig::new(Environment::Production, "AI");
        let diagnostics = Diagnostics::capture("ValueError", "bad value");
        let record = config.for_request("req-9").exception_record(&diagnostics);

        assert_eq!(record.level(), LogLevel::Error);
        assert_eq!(record.message["exception_type"], "ValueError");
        assert_eq!(record.message["exception_message"], "bad value");
        assert_eq!(record.request_id(), Some("req-9"));
    }

    #[test]
    fn test_general_record_levels() {
        let config = LoggerConfig::new(Environment::Production, "AI");
        let logger = config.for_request("req-1");

        let ai = logger.general_record(GeneralLogKind::Ai, json!({"x": 1}), None, true);
        assert_eq!(ai.level(), LogLevel::AiLog);
        assert_eq!(ai.message["error"], json!(true));
        assert_eq!(ai.data, Some(json!({"x": 1})));

        let sse = logger.general_record(GeneralLogKind::Sse, json!("tick"), None, false);
        assert_eq!(sse.level(), LogLevel::SseLog);
        assert!(sse.message.get("error").is_none());

        let value = serde_json::to_value(&sse).unwrap();
        assert_eq!(value["@fields"]["level"], "SSE LOG");
    }

    #[test]
    fn test_development_routes_everything_to_console() {
        let config = LoggerConfig::new(Environment::Development, "AI");

        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::Info)),
            Sink::Console("INFO")
        );
        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::Error)),
            Sink::Console("ERROR")
        );
        assert_eq!(
            config.route(&record_with_agent("AI", LogLevel::Info)),
            Sink::Console("AI REQ")
        );
        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::SseLog)),
            Sink::Console("SSE LOG")
        );
    }

    #[test]
    fn test_production_routes_to_leveled_tracing() {
        let config = LoggerConfig::new(Environment::Production, "AI");

        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::Info)),
            Sink::Tracing(Level::INFO)
        );
        assert_eq!(
            config.route(&record_with_agent("AI", LogLevel::Info)),
            Sink::Tracing(Level::DEBUG)
        );
        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::Warn)),
            Sink::Tracing(Level::WARN)
        );
        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::Error)),
            Sink::Tracing(Level::ERROR)
        );
        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::AiLog)),
            Sink::Tracing(Level::DEBUG)
        );
    }

    #[test]
    fn test_staging_errors_are_also_printed() {
        let config = LoggerConfig::new(Environment::Staging, "AI");

        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::Error)),
            Sink::ConsoleAndTracing("ERROR", Level::ERROR)
        );
        assert_eq!(
            config.route(&LogRecord::new("r", LogLevel::Warn)),
            Sink::Tracing(Level::WARN)
        );
    }

    #[test]
    fn test_render_console_contains_record() {
        colored::control::set_override(false);
        let rendered = render_console("WARN", &LogRecord::new("req-7", LogLevel::Warn));

        assert!(rendered.contains("\"request_id\": \"req-7\""));
        assert!(rendered.contains("\"level\": \"WARN\""));
    }

    #[test]
    fn test_emit_never_panics() {
        for env in [
            Environment::Development,
            Environment::Staging,
            Environment::Production,
        ] {
            let config = LoggerConfig::new(env, "AI");
            config.emit(&LogRecord::new("r", LogLevel::Error));
            config.emit(&record_with_agent("AI", LogLevel::Info));
        }
    }
}
