use serde_json::Value;

/// Destination for structured log lines.
pub trait LogSink {
    fn emit(&self, line: &Value);
}

/// Writes one JSON object per line to stderr, where the Lambda runtime
/// forwards it to the function's log group.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrLogSink;

impl LogSink for StderrLogSink {
    fn emit(&self, line: &Value) {
        eprintln!("{line}");
    }
}
