use crate::value::Value;

/// Dispatcher trait for host-specific operations
///
/// This trait abstracts everything the interpreter cannot answer on its own,
/// allowing the VM core to remain generic. Implementations handle:
/// - Global lookups (host-provided values)
/// - Calls to host capabilities, synchronous or asynchronous
///
/// The executor takes a mutable reference to a Dispatcher and delegates to it
/// after declared functions and built-ins have been ruled out.
pub trait Dispatcher {
    /// Load a host global by name
    ///
    /// Returns Err if the global doesn't exist.
    fn load_global(&mut self, name: &str) -> Result<Value, String>;

    /// Whether `name` must be awaited outside the interpreter
    ///
    /// When true the executor suspends with the call's arguments instead of
    /// invoking `call_function`.
    fn is_async(&self, name: &str) -> bool;

    /// Call a synchronous host function with arguments in order: [arg0, arg1, ...]
    fn call_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String>;

    /// Perform a binary arithmetic operation
    ///
    /// This is provided as a hook to allow host-specific numeric coercion.
    fn binary_op(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
        binary_op_default(op, left, right)
    }

    /// Perform a comparison operation
    fn comparison_op(
        &mut self,
        op: ComparisonOp,
        left: &Value,
        right: &Value,
    ) -> Result<Value, String> {
        comparison_op_default(op, left, right)
    }
}

/// Binary arithmetic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

fn numeric_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    match (left, right) {
        (Value::Float(l), Value::Float(r)) => Some((*l, *r)),
        (Value::Float(l), Value::Int(r)) => Some((*l, *r as f64)),
        (Value::Int(l), Value::Float(r)) => Some((*l as f64, *r)),
        _ => None,
    }
}

/// Default implementation for binary operations (used by default in trait)
pub fn binary_op_default(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    if let (Value::Int(l), Value::Int(r)) = (left, right) {
        let result = match op {
            BinaryOp::Add => l.checked_add(*r),
            BinaryOp::Sub => l.checked_sub(*r),
            BinaryOp::Mul => l.checked_mul(*r),
            BinaryOp::Div => {
                if *r == 0 {
                    return Err("Division by zero".to_string());
                }
                l.checked_div(*r)
            }
            BinaryOp::Mod => {
                if *r == 0 {
                    return Err("Modulo by zero".to_string());
                }
                l.checked_rem(*r)
            }
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| format!("Integer overflow in {:?}", op));
    }

    // Float operations (promote int to float if needed)
    if let Some((lf, rf)) = numeric_pair(left, right) {
        return match op {
            BinaryOp::Add => Ok(Value::Float(lf + rf)),
            BinaryOp::Sub => Ok(Value::Float(lf - rf)),
            BinaryOp::Mul => Ok(Value::Float(lf * rf)),
            BinaryOp::Div => {
                if rf == 0.0 {
                    Err("Division by zero".to_string())
                } else {
                    Ok(Value::Float(lf / rf))
                }
            }
            BinaryOp::Mod => Ok(Value::Float(lf % rf)),
        };
    }

    match (left, right) {
        // String concatenation for Add
        (Value::String(l), Value::String(r)) if matches!(op, BinaryOp::Add) => {
            Ok(Value::String(format!("{}{}", l, r)))
        }

        // Array concatenation for Add
        (Value::Array(l), Value::Array(r)) if matches!(op, BinaryOp::Add) => {
            Ok(Value::Array(l.iter().chain(r.iter()).cloned().collect()))
        }

        _ => Err(format!(
            "Cannot perform {:?} on {} and {}",
            op,
            left.type_name(),
            right.type_name()
        )),
    }
}

/// Default implementation for comparison operations
///
/// Equality is structural for every type, with integers and floats compared
/// numerically. Ordering is defined for numbers and strings only.
pub fn comparison_op_default(
    op: ComparisonOp,
    left: &Value,
    right: &Value,
) -> Result<Value, String> {
    if matches!(op, ComparisonOp::Eq | ComparisonOp::Ne) {
        let equal = match numeric_pair(left, right) {
            Some((lf, rf)) => lf == rf,
            None => left == right,
        };
        return Ok(Value::Bool(if op == ComparisonOp::Eq { equal } else { !equal }));
    }

    let ordering = match (left, right) {
        (Value::Int(l), Value::Int(r)) => l.partial_cmp(r),
        (Value::String(l), Value::String(r)) => l.partial_cmp(r),
        _ => match numeric_pair(left, right) {
            Some((lf, rf)) => lf.partial_cmp(&rf),
            None => {
                return Err(format!(
                    "Cannot compare {} and {} with {:?}",
                    left.type_name(),
                    right.type_name(),
                    op
                ));
            }
        },
    };

    // NaN compares false against everything
    let result = match ordering {
        None => false,
        Some(ordering) => match op {
            ComparisonOp::Lt => ordering.is_lt(),
            ComparisonOp::Gt => ordering.is_gt(),
            ComparisonOp::Le => ordering.is_le(),
            ComparisonOp::Ge => ordering.is_ge(),
            ComparisonOp::Eq | ComparisonOp::Ne => unreachable!("handled above"),
        },
    };

    Ok(Value::Bool(result))
}
