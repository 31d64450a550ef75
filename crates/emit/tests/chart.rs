use std::collections::BTreeMap;

use kfold_core::{ClusterDocs, ClusterIndex, GroupSelector, Node, Patterns, ResourceId, Scalar};
use kfold_emit::{Chart, ChartMeta, EmitError};
use kfold_schema::SchemaRegistry;

const REPLICAS: &str = "myapp/Deployment/myapp.spec.replicas";
const IMAGE: &str = "myapp/Deployment/myapp.spec.template.spec.containers.[name=app].image";
const STRATEGY: &str = "myapp/Deployment/myapp.spec.strategy";
const EXTRA: &str = "myapp/ConfigMap/extra";

fn index() -> ClusterIndex {
    let selector = |pattern: &str, tag: &str| GroupSelector { names: Patterns::parse([pattern]).unwrap(), tags: vec![tag.to_string()] };
    ClusterIndex::build(
        ["test-b", "prod-a", "dev-a", "test-a", "prod-b"],
        &[selector("dev-*", "dev"), selector("prod-*", "prod"), selector("test-*", "test")],
    )
}

fn deployment(replicas: u32, image: &str, strategy: bool) -> Node {
    let mut doc = format!(
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: myapp\n  namespace: myapp\nspec:\n  replicas: {replicas}\n  template:\n    spec:\n      containers:\n      - name: app\n        image: {image}\n"
    );
    if strategy {
        doc.push_str("  strategy:\n    type: RollingUpdate\n");
    }
    Node::parse(&doc).unwrap()
}

fn scenario(index: &ClusterIndex) -> Vec<(ResourceId, ClusterDocs)> {
    let id = |name: &str| index.id(name).unwrap();
    let deploy = ResourceId::new("apps/v1", "Deployment", Some("myapp"), "myapp");
    let deploy_docs: ClusterDocs = [
        (id("dev-a"), deployment(1, "app:dev", false)),
        (id("test-a"), deployment(2, "app:v1", false)),
        (id("test-b"), deployment(2, "app:v1", false)),
        (id("prod-a"), deployment(3, "app:v1", true)),
        (id("prod-b"), deployment(5, "app:v1", true)),
    ]
    .into();
    let extra = ResourceId::new("v1", "ConfigMap", Some("myapp"), "extra");
    let cm = Node::parse("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: extra\n  namespace: myapp\ndata:\n  tier: prod\n").unwrap();
    let extra_docs: ClusterDocs = [(id("prod-a"), cm.clone()), (id("prod-b"), cm)].into();
    vec![(deploy, deploy_docs), (extra, extra_docs)]
}

fn chart<'c>(index: &'c ClusterIndex, schemas: &'c SchemaRegistry) -> Chart<'c> {
    let mut chart = Chart::new(ChartMeta { name: "myapp".into(), version: "v0.1".into() }, index, schemas);
    for (id, docs) in scenario(index) {
        chart.add(&id, &docs).unwrap();
    }
    chart
}

fn vars(pairs: &[(&str, Node)]) -> BTreeMap<String, Node> { pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect() }

fn int(i: i64) -> Node { Node::Scalar(Scalar::int(i)) }

fn flag() -> Node { Node::Scalar(Scalar::bool(true)) }

#[test]
fn values_split_into_presets_and_inline() {
    let index = index();
    let schemas = SchemaRegistry::with_builtin();
    let chart = chart(&index, &schemas);

    let presets = chart.preset_values();
    assert_eq!(presets.keys().collect::<Vec<_>>(), vec!["prod", "prod_test", "test"]);
    assert_eq!(presets["prod"], vars(&[(EXTRA, flag()), (STRATEGY, flag())]));
    assert_eq!(presets["prod_test"], vars(&[(IMAGE, Node::str("app:v1"))]));
    assert_eq!(presets["test"], vars(&[(REPLICAS, int(2))]));

    let instance = |name: &str| chart.instance(index.id(name).unwrap());
    let dev = instance("dev-a");
    assert!(dev.presets.is_empty());
    assert_eq!(dev.global, vars(&[(IMAGE, Node::str("app:dev")), (REPLICAS, int(1))]));

    let prod_b = instance("prod-b");
    assert_eq!(prod_b.presets, vec!["prod", "prod_test"]);
    assert_eq!(prod_b.global, vars(&[(REPLICAS, int(5))]));

    let test_a = instance("test-a");
    assert_eq!(test_a.presets, vec!["prod_test", "test"]);
    assert!(test_a.global.is_empty());

    let values = chart.values();
    assert_eq!(values.get("global"), Some(&Node::default()));
    assert_eq!(values.get("preset_values").and_then(Node::as_mapping).map(|m| m.len()), Some(3));
}

#[test]
fn deployment_template() {
    let index = index();
    let schemas = SchemaRegistry::with_builtin();
    let chart = chart(&index, &schemas);
    let id = ResourceId::new("apps/v1", "Deployment", Some("myapp"), "myapp");
    let want = format!(
        concat!(
            "{{{{- include \"merge_presets\" . -}}}}\n",
            "apiVersion: apps/v1\n",
            "kind: Deployment\n",
            "metadata:\n",
            "  name: myapp\n",
            "  namespace: myapp\n",
            "spec:\n",
            "  replicas: {{{{ index .Values.global \"{replicas}\" | toJson }}}}\n",
            "  template:\n",
            "    spec:\n",
            "      containers:\n",
            "      - name: app\n",
            "        image: {{{{ index .Values.global \"{image}\" | toJson }}}}\n",
            "  {{{{- if hasKey .Values.global \"{strategy}\" }}}}\n",
            "  strategy:\n",
            "    type: RollingUpdate\n",
            "  {{{{- end }}}}\n",
        ),
        replicas = REPLICAS,
        image = IMAGE,
        strategy = STRATEGY,
    );
    assert_eq!(chart.templates()[&id].render(), want);
}

#[test]
fn partial_resources_are_guarded_at_the_root() {
    let index = index();
    let schemas = SchemaRegistry::with_builtin();
    let chart = chart(&index, &schemas);
    let id = ResourceId::new("v1", "ConfigMap", Some("myapp"), "extra");
    let template = &chart.templates()[&id];
    assert_eq!(template.flags(), vec![EXTRA]);
    assert!(template.variables().is_empty());
    assert!(template.render().starts_with(&format!(
        "{{{{- include \"merge_presets\" . -}}}}\n{{{{- if hasKey .Values.global \"{EXTRA}\" }}}}\napiVersion: v1\n"
    )));
}

#[test]
fn duplicate_resources_fail() {
    let index = index();
    let schemas = SchemaRegistry::with_builtin();
    let mut chart = chart(&index, &schemas);
    let (id, docs) = scenario(&index).remove(0);
    assert!(matches!(chart.add(&id, &docs), Err(EmitError::DuplicateResource(_))));
}
