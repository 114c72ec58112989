use serde_json::{Map, Value};

/// Recursively merges `source` into `target`: nested objects are merged key by key,
/// every other value (arrays included) replaces what was there.
pub fn deep_merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Shallow merge: top-level keys of `source` overwrite those of `target`.
pub fn assign_fields(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// Removes a dot-separated field path (`"a.b.c"`). Returns whether a value was removed.
pub fn remove_field_path(target: &mut Map<String, Value>, path: &str) -> bool {
    match path.split_once('.') {
        None => target.remove(path).is_some(),
        Some((head, rest)) => match target.get_mut(head) {
            Some(Value::Object(child)) => remove_field_path(child, rest),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn deep_merge_merges_nested_objects() {
        let mut target = object(json!({"a": {"b": 1}, "c": 2}));
        deep_merge(&mut target, &object(json!({"a": {"d": 3}})));
        assert_eq!(Value::Object(target), json!({"a": {"b": 1, "d": 3}, "c": 2}));
    }

    #[test]
    fn deep_merge_overwrites_arrays() {
        let mut target = object(json!({"list": [1, 2, 3]}));
        deep_merge(&mut target, &object(json!({"list": [4]})));
        assert_eq!(target["list"], json!([4]));
    }

    #[test]
    fn assign_replaces_nested_objects() {
        let mut target = object(json!({"a": {"b": 1}}));
        assign_fields(&mut target, &object(json!({"a": {"d": 3}})));
        assert_eq!(target["a"], json!({"d": 3}));
    }

    #[test]
    fn removes_nested_field_paths() {
        let mut target = object(json!({"a": {"b": 1, "c": 2}}));
        assert!(remove_field_path(&mut target, "a.b"));
        assert!(!remove_field_path(&mut target, "a.x.y"));
        assert_eq!(Value::Object(target), json!({"a": {"c": 2}}));
    }
}
