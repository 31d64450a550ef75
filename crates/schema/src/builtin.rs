use crate::{FieldSchema, SchemaSource};

/// Fixture schemas for the core workload kinds, carrying the upstream patch merge keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinSchemas;

impl SchemaSource for BuiltinSchemas {
    fn lookup(&self, api_version: &str, kind: &str) -> Option<FieldSchema> {
        let spec = match (api_version, kind) {
            ("v1", "Pod") => pod_spec(),
            ("v1", "PodTemplate") => return Some(root().with_field("template", pod_template())),
            ("apps/v1", "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet") => workload_spec(),
            ("batch/v1", "Job") => workload_spec(),
            ("batch/v1", "CronJob") => {
                FieldSchema::object().with_field("jobTemplate", FieldSchema::object().with_field("spec", workload_spec()))
            }
            ("v1", "Service") => {
                FieldSchema::object().with_field("ports", FieldSchema::keyed_list(&["port", "protocol"], FieldSchema::object()))
            }
            _ => return None,
        };
        Some(root().with_field("spec", spec))
    }
}

fn root() -> FieldSchema { FieldSchema::object().with_field("metadata", metadata()) }

fn metadata() -> FieldSchema {
    FieldSchema::object().with_field("ownerReferences", FieldSchema::keyed_list(&["uid"], FieldSchema::object()))
}

fn workload_spec() -> FieldSchema { FieldSchema::object().with_field("template", pod_template()) }

fn pod_template() -> FieldSchema { FieldSchema::object().with_field("metadata", metadata()).with_field("spec", pod_spec()) }

fn pod_spec() -> FieldSchema {
    let keyed = |key: &str, items: FieldSchema| FieldSchema::keyed_list(&[key], items);
    FieldSchema::object()
        .with_field("containers", keyed("name", container()))
        .with_field("initContainers", keyed("name", container()))
        .with_field("ephemeralContainers", keyed("name", container()))
        .with_field("volumes", keyed("name", FieldSchema::object()))
        .with_field("imagePullSecrets", keyed("name", FieldSchema::object()))
        .with_field("hostAliases", keyed("ip", FieldSchema::object()))
        .with_field("readinessGates", keyed("conditionType", FieldSchema::object()))
        .with_field(
            "topologySpreadConstraints",
            FieldSchema::keyed_list(&["topologyKey", "whenUnsatisfiable"], FieldSchema::object()),
        )
        .with_field("tolerations", FieldSchema::list(FieldSchema::object()))
}

fn container() -> FieldSchema {
    FieldSchema::object()
        .with_field("env", FieldSchema::keyed_list(&["name"], FieldSchema::object()))
        .with_field("envFrom", FieldSchema::list(FieldSchema::object()))
        .with_field("ports", FieldSchema::keyed_list(&["containerPort", "protocol"], FieldSchema::object()))
        .with_field("volumeMounts", FieldSchema::keyed_list(&["mountPath"], FieldSchema::object()))
        .with_field("volumeDevices", FieldSchema::keyed_list(&["devicePath"], FieldSchema::object()))
        .with_field("args", FieldSchema::list(FieldSchema::object()))
        .with_field("command", FieldSchema::list(FieldSchema::object()))
}
