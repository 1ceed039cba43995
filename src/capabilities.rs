//! Host capabilities callable from scripts
//!
//! A capability is either synchronous, run inline by the interpreter, or
//! asynchronous, in which case the interpreter suspends and the driver awaits
//! the call before resuming.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{FetchConfig, QueryConfig};
use crate::error::CapabilityError;
use crate::format::DisplayFormatter;
use crate::value::Value;

/// Receives printed lines for the chunk being evaluated
pub trait OutputSink: Send + Sync {
    fn write_line(&self, chunk: usize, line: String);
}

/// What a synchronous capability may see of the evaluation calling it
pub struct CallContext<'a> {
    /// Index of the evaluating chunk
    pub chunk: usize,
    pub output: &'a dyn OutputSink,
    pub formatter: &'a dyn DisplayFormatter,
}

pub trait SyncCapability: Send + Sync {
    fn call(&self, ctx: &CallContext<'_>, args: Vec<Value>) -> Result<Value, CapabilityError>;
}

#[async_trait]
pub trait AsyncCapability: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Value, CapabilityError>;
}

#[derive(Clone)]
pub enum Capability {
    Sync(Arc<dyn SyncCapability>),
    Async(Arc<dyn AsyncCapability>),
}

/// Runs query strings for the `run` capability
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn run_query(&self, query: &str) -> Result<Value, String>;
}

/// Capabilities by script-visible name
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `print`, `sleep` and `fetch`, plus `run` when a query engine is given
    pub fn standard(
        fetch: &FetchConfig,
        query_engine: Option<Arc<dyn QueryEngine>>,
    ) -> Result<Self, CapabilityError> {
        let mut registry = Self::new();
        registry.register_sync("print", PrintCapability);
        registry.register_async("sleep", SleepCapability);
        registry.register_async("fetch", FetchCapability::new(fetch)?);
        if let Some(engine) = query_engine {
            registry.register_async("run", RunQueryCapability::new(engine));
        }
        Ok(registry)
    }

    pub fn register_sync(&mut self, name: impl Into<String>, capability: impl SyncCapability + 'static) {
        self.capabilities
            .insert(name.into(), Capability::Sync(Arc::new(capability)));
    }

    pub fn register_async(&mut self, name: impl Into<String>, capability: impl AsyncCapability + 'static) {
        self.capabilities
            .insert(name.into(), Capability::Async(Arc::new(capability)));
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn is_async(&self, name: &str) -> bool {
        matches!(self.capabilities.get(name), Some(Capability::Async(_)))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Host-provided values resolved by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Globals {
    values: BTreeMap<String, Value>,
}

impl Globals {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Globals { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }
}

/// `print(a, b, ...)`: one line per call, arguments separated by a space
pub struct PrintCapability;

impl SyncCapability for PrintCapability {
    fn call(&self, ctx: &CallContext<'_>, args: Vec<Value>) -> Result<Value, CapabilityError> {
        let line = args
            .iter()
            .map(|arg| ctx.formatter.format(arg))
            .collect::<Vec<_>>()
            .join(" ");
        ctx.output.write_line(ctx.chunk, line);
        Ok(Value::Null)
    }
}

/// `sleep(seconds)`
pub struct SleepCapability;

#[async_trait]
impl AsyncCapability for SleepCapability {
    async fn call(&self, args: Vec<Value>) -> Result<Value, CapabilityError> {
        let seconds = match args.as_slice() {
            [value] => value
                .as_float()
                .map_err(|e| CapabilityError::invalid("sleep", e))?,
            _ => {
                return Err(CapabilityError::invalid(
                    "sleep",
                    format!("takes 1 argument, got {}", args.len()),
                ));
            }
        };
        let duration = Duration::try_from_secs_f64(seconds).map_err(|_| {
            CapabilityError::invalid(
                "sleep",
                format!("duration must be a non-negative number of seconds, got {}", seconds),
            )
        })?;

        tokio::time::sleep(duration).await;
        Ok(Value::Null)
    }
}

/// `fetch(url, {method, headers, body})` returning `{status, body}`
pub struct FetchCapability {
    client: reqwest::Client,
}

impl FetchCapability {
    pub fn new(config: &FetchConfig) -> Result<Self, CapabilityError> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CapabilityError::failed("fetch", e))?;
        Ok(FetchCapability { client })
    }

    fn build_request(&self, url: &str, options: Option<&Value>) -> Result<reqwest::RequestBuilder, CapabilityError> {
        let options = match options {
            None | Some(Value::Null) => return Ok(self.client.get(url)),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(CapabilityError::invalid(
                    "fetch",
                    format!("options must be an object, got {}", other.type_name()),
                ));
            }
        };

        let method = match options.get("method") {
            None | Some(Value::Null) => reqwest::Method::GET,
            Some(Value::String(method)) => reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|_| CapabilityError::invalid("fetch", format!("invalid method '{}'", method)))?,
            Some(other) => {
                return Err(CapabilityError::invalid(
                    "fetch",
                    format!("method must be a string, got {}", other.type_name()),
                ));
            }
        };

        let mut request = self.client.request(method, url);

        if let Some(Value::Object(headers)) = options.get("headers") {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }

        match options.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(body)) => request = request.body(body.clone()),
            Some(other) => {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(other.to_json().to_string());
            }
        }

        Ok(request)
    }
}

#[async_trait]
impl AsyncCapability for FetchCapability {
    async fn call(&self, args: Vec<Value>) -> Result<Value, CapabilityError> {
        let (url, options) = match args.as_slice() {
            [Value::String(url)] => (url.as_str(), None),
            [Value::String(url), options] => (url.as_str(), Some(options)),
            _ => {
                return Err(CapabilityError::invalid(
                    "fetch",
                    "expects a url string and an optional options object",
                ));
            }
        };

        let request = self.build_request(url, options)?;
        debug!(url, "Fetching");

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::failed("fetch", format!("Request to URL {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(|e| {
            CapabilityError::failed("fetch", format!("Failed to read response body from {}: {}", url, e))
        })?;

        let mut result = BTreeMap::new();
        result.insert("status".to_string(), Value::Int(i64::from(status)));
        result.insert("body".to_string(), decode_body(content_type.as_deref(), text));
        Ok(Value::Object(result))
    }
}

/// JSON bodies become structured values; anything else, or JSON that fails
/// to parse, stays text.
pub fn decode_body(content_type: Option<&str>, text: String) -> Value {
    let is_json = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));
    if is_json {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
            return Value::from_json(json);
        }
    }
    Value::String(text)
}

/// Query engine behind an HTTP endpoint
///
/// Each query is POSTed as `{"query": ...}`. A successful response body is
/// the result, decoded like a `fetch` body.
pub struct HttpQueryEngine {
    client: reqwest::Client,
    url: String,
}

impl HttpQueryEngine {
    pub fn new(query: &QueryConfig, fetch: &FetchConfig) -> Result<Self, CapabilityError> {
        let mut builder = reqwest::Client::builder().user_agent(fetch.user_agent.clone());
        if let Some(timeout) = fetch.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| CapabilityError::failed("run", e))?;
        Ok(HttpQueryEngine {
            client,
            url: query.url.clone(),
        })
    }
}

#[async_trait]
impl QueryEngine for HttpQueryEngine {
    async fn run_query(&self, query: &str) -> Result<Value, String> {
        debug!(url = %self.url, "Running query");
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", self.url, e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read query response: {}", e))?;

        if !status.is_success() {
            return Err(format!("Query endpoint returned {}: {}", status.as_u16(), text));
        }
        Ok(decode_body(content_type.as_deref(), text))
    }
}

/// `run(query)`, answered by the host's query engine
pub struct RunQueryCapability {
    engine: Arc<dyn QueryEngine>,
}

impl RunQueryCapability {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        RunQueryCapability { engine }
    }
}

#[async_trait]
impl AsyncCapability for RunQueryCapability {
    async fn call(&self, args: Vec<Value>) -> Result<Value, CapabilityError> {
        let query = match args.as_slice() {
            [Value::String(query)] => query,
            _ => return Err(CapabilityError::invalid("run", "expects a single query string")),
        };
        self.engine
            .run_query(query)
            .await
            .map_err(|e| CapabilityError::failed("run", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ReplFormatter;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Lines(Mutex<Vec<(usize, String)>>);

    impl OutputSink for Lines {
        fn write_line(&self, chunk: usize, line: String) {
            self.0.lock().unwrap().push((chunk, line));
        }
    }

    struct EchoEngine;

    #[async_trait]
    impl QueryEngine for EchoEngine {
        async fn run_query(&self, query: &str) -> Result<Value, String> {
            if query.is_empty() {
                return Err("empty query".to_string());
            }
            Ok(Value::from(vec![Value::from(query)]))
        }
    }

    #[test]
    fn test_print_joins_arguments() {
        let lines = Lines::default();
        let ctx = CallContext {
            chunk: 3,
            output: &lines,
            formatter: &ReplFormatter,
        };

        let result = PrintCapability
            .call(&ctx, vec![Value::from("total:"), Value::from(vec![Value::from("a")])])
            .unwrap();

        assert_eq!(result, Value::Null);
        assert_eq!(*lines.0.lock().unwrap(), vec![(3, "total: ['a']".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep() {
        let started = tokio::time::Instant::now();
        assert_eq!(SleepCapability.call(vec![Value::Float(1.5)]).await, Ok(Value::Null));
        assert!(started.elapsed() >= Duration::from_millis(1500));

        assert!(SleepCapability.call(vec![Value::Int(-1)]).await.is_err());
        assert!(SleepCapability.call(vec![Value::Float(1e30)]).await.is_err());
        assert!(SleepCapability.call(vec![Value::Float(f64::NAN)]).await.is_err());
        assert!(SleepCapability.call(vec![Value::from("1")]).await.is_err());
        assert!(SleepCapability.call(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_run_query() {
        let capability = RunQueryCapability::new(Arc::new(EchoEngine));
        assert_eq!(
            capability.call(vec![Value::from("select 1")]).await,
            Ok(Value::from(vec![Value::from("select 1")]))
        );
        assert!(matches!(
            capability.call(vec![Value::from("")]).await,
            Err(CapabilityError::Failed { .. })
        ));
        assert!(matches!(
            capability.call(vec![Value::Int(1)]).await,
            Err(CapabilityError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_query_engine_reports_unreachable_endpoint() {
        let query = QueryConfig {
            url: "http://127.0.0.1:1/query".to_string(),
        };
        let engine = HttpQueryEngine::new(&query, &FetchConfig::default()).unwrap();
        let err = engine.run_query("select 1").await.unwrap_err();
        assert!(err.starts_with("Request to http://127.0.0.1:1/query failed"));
    }

    #[test]
    fn test_decode_body() {
        let decoded = decode_body(Some("application/json; charset=utf-8"), "{\"ok\": true}".to_string());
        let mut expected = BTreeMap::new();
        expected.insert("ok".to_string(), Value::Bool(true));
        assert_eq!(decoded, Value::Object(expected));

        assert_eq!(
            decode_body(Some("text/html"), "{\"ok\": true}".to_string()),
            Value::from("{\"ok\": true}")
        );
        assert_eq!(decode_body(Some("application/json"), "not json".to_string()), Value::from("not json"));
        assert_eq!(decode_body(None, "plain".to_string()), Value::from("plain"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_arguments() {
        let fetch = FetchCapability::new(&FetchConfig::default()).unwrap();
        assert!(matches!(
            fetch.call(vec![Value::Int(1)]).await,
            Err(CapabilityError::InvalidArguments { .. })
        ));
        assert!(matches!(
            fetch
                .call(vec![Value::from("http://localhost"), Value::Int(1)])
                .await,
            Err(CapabilityError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_standard_registry() {
        let registry = CapabilityRegistry::standard(&FetchConfig::default(), None).unwrap();
        assert_eq!(registry.names(), vec!["fetch", "print", "sleep"]);
        assert!(registry.is_async("sleep"));
        assert!(!registry.is_async("print"));

        let registry =
            CapabilityRegistry::standard(&FetchConfig::default(), Some(Arc::new(EchoEngine))).unwrap();
        assert!(registry.is_async("run"));
    }
}
