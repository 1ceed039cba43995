use std::collections::BTreeMap;
use std::fmt;

/// Runtime value in the REPL VM
///
/// Everything that lives on the operand stack, in a declared local, or crosses
/// the host capability boundary is one of these variants.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// null, also the "empty" result of a chunk that leaves nothing on the stack
    #[default]
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point number
    Float(f64),

    /// UTF-8 string
    String(String),

    /// Ordered list of values
    Array(Vec<Value>),

    /// String-keyed mapping
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Check if this value is truthy (for conditions and logical operators)
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Try to extract an integer from this value
    pub fn as_int(&self) -> Result<i64, String> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Float(f) => Ok(*f as i64),
            Value::Bool(b) => Ok(i64::from(*b)),
            _ => Err(format!("Cannot convert {} to int", self.type_name())),
        }
    }

    /// Try to extract a float from this value
    pub fn as_float(&self) -> Result<f64, String> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            _ => Err(format!("Cannot convert {} to float", self.type_name())),
        }
    }

    /// Try to extract a string from this value
    pub fn as_string(&self) -> Result<&str, String> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(format!("Cannot convert {} to string", self.type_name())),
        }
    }

    /// Get the type name of this value for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Rough number of bytes this value occupies, used for the peak memory counter
    pub fn approx_size(&self) -> usize {
        let own = std::mem::size_of::<Value>();
        match self {
            Value::String(s) => own + s.len(),
            Value::Array(items) => own + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Object(map) => {
                own + map
                    .iter()
                    .map(|(k, v)| k.len() + v.approx_size())
                    .sum::<usize>()
            }
            _ => own,
        }
    }

    /// Build an error object as pushed onto the stack when an exception is caught
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::String(kind.to_string()));
        map.insert("message".to_string(), Value::String(message.into()));
        Value::Object(map)
    }

    /// Convert a decoded JSON document into a value
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert this value into a JSON document. Non-finite floats become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => write!(f, "{}", other),
        }
    }
}

/// Top-level strings print raw, strings nested in containers are quoted.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': ", key)?;
                    value.fmt_nested(f)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Implement From for easy construction
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Float(1.5).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(Value::String("hello".to_string()).is_truthy());
        assert!(!Value::String("".to_string()).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn test_conversions() {
        let v = Value::Int(42);
        assert_eq!(v.as_int().unwrap(), 42);
        assert_eq!(v.as_float().unwrap(), 42.0);

        let v = Value::String("hello".to_string());
        assert_eq!(v.as_string().unwrap(), "hello");
        assert!(Value::Null.as_int().is_err());
    }

    #[test]
    fn test_display_nests_quotes() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from("hog"));
        map.insert("tags".to_string(), Value::from(vec![Value::Int(1), Value::from("a")]));

        assert_eq!(Value::from("plain").to_string(), "plain");
        assert_eq!(Value::Object(map).to_string(), "{'name': 'hog', 'tags': [1, 'a']}");
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"status": 200, "ok": true, "ratio": 0.5, "items": [null, "x"]});
        let value = Value::from_json(json.clone());

        match &value {
            Value::Object(map) => {
                assert_eq!(map.get("status"), Some(&Value::Int(200)));
                assert_eq!(map.get("ratio"), Some(&Value::Float(0.5)));
            }
            other => panic!("Expected object, got {:?}", other),
        }
        assert_eq!(value.to_json(), json);
    }
}
