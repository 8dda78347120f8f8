//! `${name}` interpolation over a parsed YAML tree, resolving each
//! reference through a caller-supplied lookup (normally
//! `DataManager::get_data_for_agent`). Grounded in
//! `examples/original_source/src/manager/redpepper/manager/data.py`'s
//! string templating for state definitions.
//!
//! - A string that is *exactly* `${name}` (nothing before or after)
//!   substitutes the raw resolved value, preserving its type.
//! - A string containing `${name}` alongside other text stringifies the
//!   resolved value and splices it in.
//! - `${{` is an escape for a literal `${` and is not treated as the
//!   start of a reference.
//! - Interpolation recurses into sequences and mappings; non-string
//!   scalars pass through unchanged.

use gw_common::error::Result;
use serde_yaml::Value;

pub trait Lookup {
    fn resolve(&self, name: &str) -> Result<Option<Value>>;
}

pub fn interpolate(value: &Value, lookup: &dyn Lookup) -> Result<Value> {
    match value {
        Value::String(s) => interpolate_string(s, lookup),
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate(item, lookup)?);
            }
            Ok(Value::Sequence(out))
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), interpolate(v, lookup)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

fn interpolate_string(s: &str, lookup: &dyn Lookup) -> Result<Value> {
    // Whole-string reference: `${name}` with nothing else, preserves type.
    if let Some(name) = whole_reference(s) {
        return Ok(lookup.resolve(name)?.unwrap_or(Value::Null));
    }

    let mut out = String::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            if chars.get(i + 2) == Some(&'{') {
                // `${{` escapes a literal `${`.
                out.push_str("${");
                i += 3;
                continue;
            }
            if let Some(end) = find_close(&chars, i + 2) {
                let name: String = chars[i + 2..end].iter().collect();
                let resolved = lookup.resolve(&name)?.unwrap_or(Value::Null);
                out.push_str(&stringify(&resolved));
                i = end + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    Ok(Value::String(out))
}

fn whole_reference(s: &str) -> Option<&str> {
    let body = s.strip_prefix("${")?.strip_suffix('}')?;
    if body.starts_with('{') {
        return None;
    }
    if body.contains("${") || body.contains('}') {
        return None;
    }
    Some(body)
}

fn find_close(chars: &[char], from: usize) -> Option<usize> {
    chars[from..].iter().position(|&c| c == '}').map(|p| from + p)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapLookup(HashMap<String, Value>);

    impl Lookup for MapLookup {
        fn resolve(&self, name: &str) -> Result<Option<Value>> {
            Ok(self.0.get(name).cloned())
        }
    }

    #[test]
    fn whole_string_match_preserves_type() {
        let mut m = HashMap::new();
        m.insert("port".to_string(), Value::from(8080));
        let lookup = MapLookup(m);
        let result = interpolate(&Value::String("${port}".into()), &lookup).unwrap();
        assert_eq!(result.as_i64(), Some(8080));
    }

    #[test]
    fn partial_match_stringifies() {
        let mut m = HashMap::new();
        m.insert("port".to_string(), Value::from(8080));
        let lookup = MapLookup(m);
        let result = interpolate(&Value::String("listen on ${port} now".into()), &lookup).unwrap();
        assert_eq!(result.as_str(), Some("listen on 8080 now"));
    }

    #[test]
    fn escaped_dollar_brace_is_literal() {
        let lookup = MapLookup(HashMap::new());
        let result = interpolate(&Value::String("${{literal}".into()), &lookup).unwrap();
        assert_eq!(result.as_str(), Some("${literal}"));
    }

    #[test]
    fn missing_reference_resolves_to_null() {
        let lookup = MapLookup(HashMap::new());
        let result = interpolate(&Value::String("${missing}".into()), &lookup).unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn recurses_into_sequences_and_mappings() {
        let mut m = HashMap::new();
        m.insert("x".to_string(), Value::from(1));
        let lookup = MapLookup(m);
        let input = Value::Sequence(vec![Value::String("${x}".into())]);
        let result = interpolate(&input, &lookup).unwrap();
        assert_eq!(result[0].as_i64(), Some(1));
    }
}
