//! Command-line call parameters.

use anyhow::{anyhow, Context, Result};
use tether_common::Param;

/// Parses `<json>:<type>`, e.g. `42:long`, `"hi":string` or `[1,2]:list`.
///
/// The declared type is everything after the last colon, so JSON values
/// containing colons work as long as a type is given.
pub fn parse_param(raw: &str) -> Result<Param> {
    let (json, declared_type) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("parameter '{}' must look like <json>:<type>", raw))?;

    let declared_type = declared_type.trim();
    if declared_type.is_empty() {
        return Err(anyhow!("parameter '{}' has an empty type", raw));
    }

    let value = serde_json::from_str(json)
        .with_context(|| format!("parameter '{}' is not valid JSON", json))?;
    Ok(Param::new(value, declared_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_scalars() {
        let p = parse_param("42:long").unwrap();
        assert_eq!(p.value, json!(42));
        assert_eq!(p.declared_type, "long");

        let p = parse_param(r#""hello":string"#).unwrap();
        assert_eq!(p.value, json!("hello"));
    }

    #[test]
    fn test_parse_value_with_colons() {
        let p = parse_param(r#"{"a":1,"b":"x:y"}:map"#).unwrap();
        assert_eq!(p.value, json!({"a": 1, "b": "x:y"}));
        assert_eq!(p.declared_type, "map");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_param("42").is_err());
        assert!(parse_param("42:").is_err());
        assert!(parse_param("hello:string").is_err());
    }
}
