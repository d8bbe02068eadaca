use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use prime_bench_core::deployment::{EXPERIMENT_TYPE_KEY, PARAMETER_NAME};
use prime_bench_core::primes::{count_primes_below, parse_limit, LimitParseError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::adapters::log_sink::LogSink;
use crate::adapters::parameter_store::ParameterStore;

pub const COMPONENT: &str = "prime_counter";
pub const FUNCTION_NAME_ENV: &str = "AWS_LAMBDA_FUNCTION_NAME";

/// Process-wide settings, read once at cold start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    pub parameter_name: String,
    pub experiment_type: Option<String>,
    pub function_name: Option<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            parameter_name: PARAMETER_NAME.to_string(),
            experiment_type: None,
            function_name: None,
        }
    }
}

impl HandlerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            parameter_name: PARAMETER_NAME.to_string(),
            experiment_type: non_empty(EXPERIMENT_TYPE_KEY),
            function_name: non_empty(FUNCTION_NAME_ENV),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    pub cold_start: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Counted { limit: i64, prime_count: u64 },
    InvalidLimit { raw_value: String, message: String },
    FetchFailed { message: String },
    ComputeFailed { limit: i64, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    ConfigFetch(String),
    ConfigParse(LimitParseError),
    Compute { limit: i64, message: String },
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigFetch(message) => write!(f, "error retrieving parameter: {message}"),
            Self::ConfigParse(error) => write!(f, "{error}"),
            Self::Compute { limit, message } => {
                write!(f, "error counting primes below {limit}: {message}")
            }
        }
    }
}

impl std::error::Error for HandlerError {}

pub fn handle_invocation(
    config: &HandlerConfig,
    context: &InvocationContext,
    store: &impl ParameterStore,
    sink: &impl LogSink,
) -> InvocationOutcome {
    handle_invocation_with_counter(config, context, store, sink, count_primes_below)
}

/// Runs one invocation to completion.
///
/// Fetch, parse and counting failures are logged and folded into the
/// returned outcome; none of them fail the invocation.
pub fn handle_invocation_with_counter(
    config: &HandlerConfig,
    context: &InvocationContext,
    store: &impl ParameterStore,
    sink: &impl LogSink,
    counter: impl Fn(i64) -> u64,
) -> InvocationOutcome {
    let logger = InvocationLogger {
        config,
        context,
        sink,
    };

    match run_invocation(config, store, &logger, &counter) {
        Ok(outcome) => outcome,
        Err(HandlerError::ConfigFetch(message)) => {
            logger.error(
                "parameter_fetch_failed",
                json!({
                    "parameter": config.parameter_name.clone(),
                    "error": message.clone(),
                }),
            );
            InvocationOutcome::FetchFailed { message }
        }
        Err(HandlerError::ConfigParse(error)) => {
            logger.error(
                "invalid_limit",
                json!({
                    "parameter": config.parameter_name.clone(),
                    "raw_value": error.raw(),
                    "error": error.to_string(),
                }),
            );
            InvocationOutcome::InvalidLimit {
                raw_value: error.raw().to_string(),
                message: error.to_string(),
            }
        }
        Err(HandlerError::Compute { limit, message }) => {
            logger.error(
                "counting_failed",
                json!({
                    "limit": limit,
                    "error": message.clone(),
                }),
            );
            InvocationOutcome::ComputeFailed { limit, message }
        }
    }
}

fn run_invocation(
    config: &HandlerConfig,
    store: &impl ParameterStore,
    logger: &InvocationLogger<'_, impl LogSink>,
    counter: &impl Fn(i64) -> u64,
) -> Result<InvocationOutcome, HandlerError> {
    let raw_value = store
        .get_parameter(&config.parameter_name)
        .map_err(HandlerError::ConfigFetch)?;
    let limit = parse_limit(&raw_value).map_err(HandlerError::ConfigParse)?;

    logger.info("counting_started", json!({ "limit": limit }));
    let started_at = Instant::now();
    let prime_count = guarded_count(limit, counter)?;
    logger.info(
        "counting_completed",
        json!({
            "limit": limit,
            "prime_count": prime_count,
            "duration_ms": started_at.elapsed().as_millis(),
        }),
    );

    Ok(InvocationOutcome::Counted { limit, prime_count })
}

fn guarded_count(limit: i64, counter: &impl Fn(i64) -> u64) -> Result<u64, HandlerError> {
    panic::catch_unwind(AssertUnwindSafe(|| counter(limit))).map_err(|payload| {
        HandlerError::Compute {
            limit,
            message: panic_message(payload.as_ref()),
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "counting panicked".to_string()
    }
}

struct InvocationLogger<'a, S> {
    config: &'a HandlerConfig,
    context: &'a InvocationContext,
    sink: &'a S,
}

impl<S: LogSink> InvocationLogger<'_, S> {
    fn info(&self, event: &str, details: Value) {
        self.sink.emit(&self.line("info", event, details));
    }

    fn error(&self, event: &str, details: Value) {
        self.sink.emit(&self.line("error", event, details));
    }

    fn line(&self, level: &str, event: &str, details: Value) -> Value {
        json!({
            "component": COMPONENT,
            "level": level,
            "event": event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "function_name": self.config.function_name.clone(),
            "experiment_type": self.config.experiment_type.clone(),
            "request_id": self.context.request_id.clone(),
            "cold_start": self.context.cold_start,
            "details": details,
        })
    }
}
