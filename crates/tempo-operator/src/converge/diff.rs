use serde_json::Value;

/// Structural comparison of a desired value against a live one.
///
/// Objects only need to contain the desired keys, so fields defaulted or added by the
/// platform do not count as drift. Arrays are compared element by element and must
/// have the same length. Scalars must be equal. `null` in the desired value matches
/// an absent key.
pub trait Controlled {
    /// path of the first controlled field which differs, `None` when in sync
    fn drift(&self, live: &Self) -> Option<String>;

    fn is_subset_of(&self, live: &Self) -> bool {
        self.drift(live).is_none()
    }
}

impl Controlled for Value {
    fn drift(&self, live: &Self) -> Option<String> {
        drift_at(self, live, String::new())
    }
}

fn drift_at(desired: &Value, live: &Value, path: String) -> Option<String> {
    match (desired, live) {
        (Value::Object(desired), Value::Object(live)) => {
            for (key, desired_value) in desired {
                let child = format!("{path}.{key}");
                match live.get(key) {
                    Some(live_value) => {
                        if let Some(drift) = drift_at(desired_value, live_value, child) {
                            return Some(drift);
                        }
                    }
                    None if desired_value.is_null() => {}
                    None => return Some(child),
                }
            }
            None
        }
        (Value::Array(desired), Value::Array(live)) => {
            if desired.len() != live.len() {
                return Some(path);
            }
            desired
                .iter()
                .zip(live)
                .enumerate()
                .find_map(|(i, (d, l))| drift_at(d, l, format!("{path}[{i}]")))
        }
        _ if desired == live => None,
        _ => Some(path),
    }
}

#[cfg(test)]
mod test {

    use serde_json::json;

    use super::Controlled;

    #[test]
    fn test_extra_live_fields_are_ignored() {
        let desired = json!({
            "metadata": { "name": "tempo-simplest", "labels": { "a": "b" } },
            "spec": { "replicas": 1 }
        });
        let live = json!({
            "metadata": {
                "name": "tempo-simplest",
                "uid": "1234",
                "resourceVersion": "7",
                "labels": { "a": "b", "added-by": "someone" }
            },
            "spec": { "replicas": 1, "revisionHistoryLimit": 10 },
            "status": { "readyReplicas": 1 }
        });

        assert!(desired.is_subset_of(&live));
    }

    #[test]
    fn test_changed_scalar() {
        let desired = json!({ "spec": { "replicas": 2 } });
        let live = json!({ "spec": { "replicas": 1 } });

        assert_eq!(desired.drift(&live).as_deref(), Some(".spec.replicas"));
    }

    #[test]
    fn test_arrays_compare_by_position() {
        let desired = json!({ "ports": [ { "name": "http" }, { "name": "grpc" } ] });
        let reordered = json!({ "ports": [ { "name": "grpc" }, { "name": "http" } ] });
        let longer = json!({ "ports": [ { "name": "http" }, { "name": "grpc" }, { "name": "x" } ] });
        let defaulted = json!({ "ports": [ { "name": "http", "protocol": "TCP" }, { "name": "grpc", "protocol": "TCP" } ] });

        assert_eq!(desired.drift(&reordered).as_deref(), Some(".ports[0].name"));
        assert_eq!(desired.drift(&longer).as_deref(), Some(".ports"));
        assert!(desired.is_subset_of(&defaulted));
    }

    #[test]
    fn test_missing_key() {
        let desired = json!({ "data": { "tempo.yaml": "x" }, "binaryData": null });
        let live = json!({ "data": {} });

        assert_eq!(desired.drift(&live).as_deref(), Some(".data.tempo.yaml"));
        assert!(json!({ "binaryData": null }).is_subset_of(&live));
    }
}
