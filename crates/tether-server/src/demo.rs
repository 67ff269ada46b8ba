//! Built-in handlers served by `tether server`.

use std::time::Duration;

use serde_json::{json, Value};

use tether_common::protocol::responses::VOID_TYPE;
use tether_common::Param;

use crate::invoker::HandlerRegistry;

/// Registry with `demo.Echo.echo`, `demo.Echo.sleep`, static `demo.Math.add`
/// and `demo.Math.fail`.
pub fn demo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("demo.Echo", "echo", "string", echo)
        .register("demo.Echo", "sleep", VOID_TYPE, sleep)
        .register_static("demo.Math", "add", "long", add)
        .register("demo.Math", "fail", "string", |params| {
            let reason = params
                .first()
                .and_then(|p| p.value.as_str())
                .unwrap_or("requested failure");
            Err(format!("IllegalStateException: {reason}"))
        });
    registry
}

fn echo(params: &[Param]) -> Result<Value, String> {
    Ok(params.first().map(|p| p.value.clone()).unwrap_or(Value::Null))
}

// Runs on a blocking worker, so a plain sleep is fine here.
fn sleep(params: &[Param]) -> Result<Value, String> {
    let ms = params
        .first()
        .and_then(|p| p.value.as_u64())
        .ok_or("sleep expects a millisecond count")?;
    std::thread::sleep(Duration::from_millis(ms));
    Ok(Value::Null)
}

fn add(params: &[Param]) -> Result<Value, String> {
    let mut sum: i64 = 0;
    for (idx, param) in params.iter().enumerate() {
        let n = param
            .value
            .as_i64()
            .ok_or_else(|| format!("parameter {idx} is not an integer: {}", param.value))?;
        sum = sum
            .checked_add(n)
            .ok_or_else(|| "ArithmeticException: long overflow".to_string())?;
    }
    Ok(json!(sum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::Invoker;
    use tether_common::Command;

    #[test]
    fn test_demo_methods() {
        let registry = demo_registry();

        let echoed = registry.execute(
            &Command::new("demo.Echo", "echo").with_param(Param::new(json!("ping"), "string")),
        );
        assert_eq!(echoed.return_value, json!("ping"));

        let sum = registry.execute(
            &Command::new("demo.Math", "add")
                .with_static(true)
                .with_params(vec![Param::new(json!(40), "long"), Param::new(json!(2), "long")]),
        );
        assert_eq!(sum.return_value, json!(42));
        assert_eq!(sum.return_type, "long");

        let failed = registry.execute(&Command::new("demo.Math", "fail"));
        assert!(failed.exceptional);
    }

    #[test]
    fn test_add_rejects_non_integers_and_overflow() {
        let registry = demo_registry();
        let bad = Command::new("demo.Math", "add")
            .with_static(true)
            .with_param(Param::new(json!("x"), "string"));
        assert!(registry.execute(&bad).exceptional);

        let overflow = Command::new("demo.Math", "add")
            .with_static(true)
            .with_params(vec![Param::new(json!(i64::MAX), "long"), Param::new(json!(1), "long")]);
        let result = registry.execute(&overflow);
        assert!(result.error_message().unwrap().contains("overflow"));
    }
}
