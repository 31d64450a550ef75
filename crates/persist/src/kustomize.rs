use kfold_core::Node;
use serde::{Deserialize, Serialize};

pub const KUSTOMIZATION_API: &str = "kustomize.config.k8s.io/v1beta1";
pub const COMPONENT_API: &str = "kustomize.config.k8s.io/v1alpha1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmGlobals {
    pub chart_home: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChart {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_inline: Option<Node>,
}

/// The subset of `kustomization.yaml` kfold writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_globals: Option<HelmGlobals>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helm_charts: Vec<HelmChart>,
}

impl Kustomization {
    pub fn kustomization() -> Self { Self::with_kind(KUSTOMIZATION_API, "Kustomization") }

    pub fn component() -> Self { Self::with_kind(COMPONENT_API, "Component") }

    fn with_kind(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            resources: Vec::new(),
            components: Vec::new(),
            patches: Vec::new(),
            helm_globals: None,
            helm_charts: Vec::new(),
        }
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> { Ok(serde_yaml::to_string(self)?) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_are_omitted() {
        let mut k = Kustomization::component();
        k.resources.push("a.yaml".into());
        k.patches.push(Patch { path: "b.yaml".into() });
        assert_eq!(
            k.to_yaml().unwrap(),
            "apiVersion: kustomize.config.k8s.io/v1alpha1\nkind: Component\nresources:\n- a.yaml\npatches:\n- path: b.yaml\n"
        );
        let back: Kustomization = serde_yaml::from_str(&k.to_yaml().unwrap()).unwrap();
        assert_eq!(back, k);
    }
}
