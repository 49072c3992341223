use std::collections::BTreeMap;

/// Label carrying the name of the LocustTest a pod belongs to.
pub const TEST_NAME_LABEL: &str = "performance-test-name";
/// Label carrying the node name of a pod, used as the service selector.
pub const POD_NAME_LABEL: &str = "performance-test-pod-name";
/// Label marking resources managed by this operator.
pub const MANAGED_BY_LABEL: &str = "managed-by";
/// Value of the managed by label.
pub const MANAGED_BY_VALUE: &str = "locust-k8s-operator";

/// Manage by label
pub const MANAGED_BY_LABEL_SELECTOR: &str = "managed-by=locust-k8s-operator";

/// Labels that a user may not override on the pods.
pub const PROTECTED_LABELS: [&str; 2] = [POD_NAME_LABEL, MANAGED_BY_LABEL];

/// Create a label selector matching every pod of a given test.
pub fn test_name_selector(test_name: &str) -> String {
    format!("{TEST_NAME_LABEL}={test_name}")
}

/// Create labels that select the pods of a single node.
pub fn selector_labels(node_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![(POD_NAME_LABEL.to_owned(), node_name.to_owned())])
}

/// Labels that indicate the resource is managed by the locust operator.
pub fn managed_labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        MANAGED_BY_LABEL.to_owned(),
        MANAGED_BY_VALUE.to_owned(),
    )]))
}

/// Labels for all pods of a node.
///
/// User labels are merged on top of the operator labels, except for the protected ones.
pub fn pod_labels(
    test_name: &str,
    node_name: &str,
    user_labels: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from_iter(vec![
        ("app".to_owned(), test_name.to_owned()),
        (POD_NAME_LABEL.to_owned(), node_name.to_owned()),
        (MANAGED_BY_LABEL.to_owned(), MANAGED_BY_VALUE.to_owned()),
        (TEST_NAME_LABEL.to_owned(), test_name.to_owned()),
    ]);
    if let Some(user_labels) = user_labels {
        for (key, value) in user_labels {
            if PROTECTED_LABELS.contains(&key.as_str()) {
                continue;
            }
            labels.insert(key.to_owned(), value.to_owned());
        }
    }
    labels
}
