//! Built-in functions and container access shared by every session

use crate::value::Value;

/// Call a built-in by name. Returns None when `name` is not a built-in.
pub fn call(name: &str, args: &[Value]) -> Option<Result<Value, String>> {
    let result = match name {
        "length" => one_arg(name, args).and_then(length),
        "toString" => one_arg(name, args).map(|v| Value::String(v.to_string())),
        "typeof" => one_arg(name, args).map(|v| Value::from(v.type_name())),
        "jsonParse" => one_arg(name, args).and_then(json_parse),
        "jsonStringify" => one_arg(name, args).map(|v| Value::String(v.to_json().to_string())),
        "keys" => one_arg(name, args).and_then(keys),
        _ => return None,
    };
    Some(result)
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, String> {
    match args {
        [value] => Ok(value),
        _ => Err(format!("{}() takes 1 argument, got {}", name, args.len())),
    }
}

fn length(value: &Value) -> Result<Value, String> {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("Cannot take length of {}", other.type_name())),
    };
    Ok(Value::Int(len as i64))
}

fn json_parse(value: &Value) -> Result<Value, String> {
    let text = value.as_string()?;
    serde_json::from_str::<serde_json::Value>(text)
        .map(Value::from_json)
        .map_err(|e| format!("Invalid JSON: {}", e))
}

fn keys(value: &Value) -> Result<Value, String> {
    match value {
        Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
        other => Err(format!("Cannot list keys of {}", other.type_name())),
    }
}

/// Resolve a possibly negative index against a length
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

/// obj[key]. Missing keys and out-of-range indices read as null.
pub fn get_item(obj: &Value, key: &Value) -> Result<Value, String> {
    match (obj, key) {
        (Value::Array(items), Value::Int(i)) => Ok(resolve_index(*i, items.len())
            .map(|idx| items[idx].clone())
            .unwrap_or(Value::Null)),
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::String(s), Value::Int(i)) => {
            let len = s.chars().count();
            Ok(resolve_index(*i, len)
                .and_then(|idx| s.chars().nth(idx))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        _ => Err(format!(
            "Cannot index {} with {}",
            obj.type_name(),
            key.type_name()
        )),
    }
}

/// obj[key] := value, returning the updated container
pub fn set_item(obj: Value, key: &Value, value: Value) -> Result<Value, String> {
    match (obj, key) {
        (Value::Array(mut items), Value::Int(i)) => {
            let idx = resolve_index(*i, items.len())
                .ok_or_else(|| format!("Index {} out of range for array of length {}", i, items.len()))?;
            items[idx] = value;
            Ok(Value::Array(items))
        }
        (Value::Object(mut map), Value::String(k)) => {
            map.insert(k.clone(), value);
            Ok(Value::Object(map))
        }
        (obj, key) => Err(format!(
            "Cannot assign into {} with {} key",
            obj.type_name(),
            key.type_name()
        )),
    }
}
