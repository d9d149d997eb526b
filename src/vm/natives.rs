use std::time::{SystemTime, UNIX_EPOCH};

use super::value::{Native, Value};

/// Built-ins installed as globals before a script runs.
pub fn builtins() -> Vec<Native> {
    vec![Native { name: "clock", arity: 0, function: clock }]
}

/// Seconds since the Unix epoch.
fn clock(_args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|e| e.to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}
