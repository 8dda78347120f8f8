//! Deep-merge for data and state-definition YAML trees. List values
//! append, mapping values recurse key-by-key, scalar values let the
//! later (higher-priority) operand win. This is more elaborate than
//! `examples/original_source/src/manager/redpepper/manager/data.py`'s
//! plain `dict.update`, per the data-merge semantics the distilled spec
//! requires explicitly.

use serde_yaml::Value;

/// Merge `overlay` on top of `base`, consuming both. `overlay` wins for
/// scalars, mappings recurse key-wise, and sequences are concatenated
/// `base ++ overlay`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (Value::Sequence(mut base_seq), Value::Sequence(overlay_seq)) => {
            base_seq.extend(overlay_seq);
            Value::Sequence(base_seq)
        }
        (_, overlay) => overlay,
    }
}

/// Fold `values` left to right with `deep_merge`, earliest entries lowest
/// priority. An empty iterator yields `Value::Null`.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values
        .into_iter()
        .fold(Value::Null, |acc, v| match acc {
            Value::Null => v,
            acc => deep_merge(acc, v),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Mapping;

    fn map(pairs: &[(&str, Value)]) -> Value {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::String((*k).to_string()), v.clone());
        }
        Value::Mapping(m)
    }

    #[test]
    fn scalar_overlay_wins() {
        let base = map(&[("x", Value::from(1))]);
        let overlay = map(&[("x", Value::from(2))]);
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["x"].as_i64(), Some(2));
    }

    #[test]
    fn mappings_recurse() {
        let base = map(&[("a", map(&[("x", Value::from(1)), ("y", Value::from(1))]))]);
        let overlay = map(&[("a", map(&[("x", Value::from(2))]))]);
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["a"]["x"].as_i64(), Some(2));
        assert_eq!(merged["a"]["y"].as_i64(), Some(1));
    }

    #[test]
    fn sequences_concatenate() {
        let base = map(&[("list", Value::Sequence(vec![Value::from(1)]))]);
        let overlay = map(&[("list", Value::Sequence(vec![Value::from(2)]))]);
        let merged = deep_merge(base, overlay);
        let seq = merged["list"].as_sequence().unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn deep_merge_all_folds_in_order() {
        let a = map(&[("x", Value::from(1))]);
        let b = map(&[("x", Value::from(2))]);
        let c = map(&[("x", Value::from(3))]);
        let merged = deep_merge_all([a, b, c]);
        assert_eq!(merged["x"].as_i64(), Some(3));
    }
}
