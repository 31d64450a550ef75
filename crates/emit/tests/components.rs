use kfold_align::{leaves, strategic_merge};
use kfold_core::{Cluster, ClusterDocs, ClusterId, ClusterIndex, Node, ResourceId};
use kfold_emit::Components;
use kfold_schema::SchemaRegistry;

fn deployment(image: &str, sidecar: Option<(&str, &str)>, replicas: u32) -> String {
    let mut doc = format!(
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  namespace: shop\nspec:\n  replicas: {replicas}\n  template:\n    spec:\n      containers:\n      - name: app\n        image: {image}\n        args: [--port, '8080']\n"
    );
    if let Some((name, image)) = sidecar {
        doc.push_str(&format!("      - name: {name}\n        image: {image}\n"));
    }
    doc
}

fn fixture() -> (ClusterIndex, ResourceId, ClusterDocs) {
    let mut index = ClusterIndex::new();
    for name in ["c1", "c2", "c3", "c4"] {
        index.add(Cluster::new(name));
    }
    let id = ResourceId::new("apps/v1", "Deployment", Some("shop"), "web");
    let docs: ClusterDocs = [
        (ClusterId(0), deployment("web:1", Some(("proxy", "envoy:1")), 2)),
        (ClusterId(1), deployment("web:2", Some(("metrics", "exporter:3")), 2)),
        (ClusterId(2), deployment("web:1", Some(("proxy", "envoy:1")), 3)),
        (ClusterId(3), deployment("web:1", None, 2)),
    ]
    .into_iter()
    .map(|(c, s)| (c, Node::parse(&s).unwrap()))
    .collect();
    (index, id, docs)
}

fn reconstruct(comps: &Components<'_>, cluster: ClusterId, id: &ResourceId, schemas: &SchemaRegistry) -> Node {
    let names = comps.cluster_components(cluster);
    let mut doc = names
        .iter()
        .find_map(|n| comps.get(n).unwrap().resources.get(id))
        .cloned()
        .expect("base document");
    let schema = schemas.resolve(id);
    for name in names {
        if let Some(patch) = comps.get(name).unwrap().patches.get(id) {
            strategic_merge(&mut doc, patch, schema.as_deref());
        }
    }
    doc
}

#[test]
fn base_and_patches_reproduce_every_cluster() {
    let (index, id, docs) = fixture();
    let schemas = SchemaRegistry::with_builtin();
    let mut comps = Components::new(&index, &schemas);
    comps.add(&id, &docs).unwrap();

    let schema = schemas.resolve(&id);
    for (cluster, original) in &docs {
        let rebuilt = reconstruct(&comps, *cluster, &id, &schemas);
        assert_eq!(
            leaves(&rebuilt, schema.as_deref()).unwrap(),
            leaves(original, schema.as_deref()).unwrap(),
            "cluster {cluster}"
        );
    }
}

#[test]
fn every_cluster_has_exactly_one_base() {
    let (index, id, docs) = fixture();
    let schemas = SchemaRegistry::with_builtin();
    let mut comps = Components::new(&index, &schemas);
    comps.add(&id, &docs).unwrap();

    for cluster in index.ids() {
        let bases = comps
            .cluster_components(cluster)
            .into_iter()
            .filter(|n| comps.get(n).unwrap().resources.contains_key(&id))
            .count();
        assert_eq!(bases, 1, "cluster {cluster}");
    }
}

#[test]
fn components_named_for_their_clusters() {
    let (index, id, docs) = fixture();
    let schemas = SchemaRegistry::with_builtin();
    let mut comps = Components::new(&index, &schemas);
    comps.add(&id, &docs).unwrap();

    let names: Vec<&str> = comps.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["all-clusters", "c1_c2_c4", "c1_c3", "c1_c3_c4", "c2", "c3"]);
    for comp in comps.iter() {
        assert_eq!(index.group(comp.clusters.iter().copied()), comp.name);
    }
    assert_eq!(comps.cluster_components(ClusterId(2)), vec!["all-clusters", "c1_c3_c4", "c1_c3", "c3"]);

    let proxy = &comps.get("c1_c3").unwrap().patches[&id];
    let containers = proxy.lookup(&"spec.template.spec.containers".parse().unwrap()).unwrap();
    let items = containers.as_sequence().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!((items[0].get_str("name"), items[0].get_str("image")), (Some("proxy"), Some("envoy:1")));
}

fn kube_dns(cluster_ip: &str) -> Node {
    Node::parse(&format!(
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: kube-dns\n  namespace: kube-system\nspec:\n  clusterIP: {cluster_ip}\n  ports:\n  - name: dns\n    port: 53\n    protocol: UDP\n    targetPort: 53\n  - name: dns-tcp\n    port: 53\n    protocol: TCP\n    targetPort: 53\n  - name: metrics\n    port: 9153\n    targetPort: 9153\n"
    ))
    .unwrap()
}

#[test]
fn same_port_on_two_protocols() {
    let mut index = ClusterIndex::new();
    for name in ["c1", "c2"] {
        index.add(Cluster::new(name));
    }
    let id = ResourceId::new("v1", "Service", Some("kube-system"), "kube-dns");
    let docs: ClusterDocs = [(ClusterId(0), kube_dns("10.0.0.10")), (ClusterId(1), kube_dns("10.96.0.10"))].into();
    let schemas = SchemaRegistry::with_builtin();
    let mut comps = Components::new(&index, &schemas);
    comps.add(&id, &docs).unwrap();

    let base = &comps.get("all-clusters").unwrap().resources[&id];
    let ports = base.lookup(&"spec.ports".parse().unwrap()).and_then(Node::as_sequence).unwrap();
    assert_eq!(ports.len(), 3);

    let schema = schemas.resolve(&id);
    for (cluster, original) in &docs {
        let rebuilt = reconstruct(&comps, *cluster, &id, &schemas);
        assert_eq!(leaves(&rebuilt, schema.as_deref()).unwrap(), leaves(original, schema.as_deref()).unwrap(), "cluster {cluster}");
    }
}

#[test]
fn output_is_deterministic() {
    let (index, id, docs) = fixture();
    let schemas = SchemaRegistry::with_builtin();
    let render = || {
        let mut comps = Components::new(&index, &schemas);
        comps.add(&id, &docs).unwrap();
        comps
            .iter()
            .map(|c| {
                let docs: Vec<String> = c.resources.values().chain(c.patches.values()).map(Node::to_flow).collect();
                format!("{}={}", c.name, docs.join("|"))
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(render(), render());
}
