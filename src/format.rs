use crate::value::Value;

/// Turns values into the text shown for results and printed output
pub trait DisplayFormatter: Send + Sync {
    fn format(&self, value: &Value) -> String;
}

/// REPL rendering: top-level strings raw, nested strings single-quoted
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplFormatter;

impl DisplayFormatter for ReplFormatter {
    fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}

/// Compact JSON rendering, for hosts that parse the output
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl DisplayFormatter for JsonFormatter {
    fn format(&self, value: &Value) -> String {
        value.to_json().to_string()
    }
}
