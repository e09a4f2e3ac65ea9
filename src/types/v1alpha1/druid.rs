// Copyright 2025 The Druid Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod claims;
mod configs;
mod network;
mod services;
mod workloads;

pub use services::service_name;
pub use workloads::CONFIG_MAP_SHA_ENV;

use crate::types;
use crate::types::error::NoNamespaceSnafu;
use crate::types::v1alpha1::deps::{DeepStorageSpec, MetadataStoreSpec, ZookeeperSpec};
use crate::types::v1alpha1::node::{
    AdditionalContainer, DruidNodeSpec, PodManagementPolicy,
};
use crate::util::first_non_empty;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const IGNORED_ANNOTATION: &str = "druid.apache.org/ignored";

const NODE_KEY_PATTERN: &str =
    r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";

static NODE_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NODE_KEY_PATTERN).expect("node key pattern is valid"));

fn default_rolling_deploy() -> bool {
    true
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, KubeSchema)]
#[kube(
    group = "druid.apache.org",
    version = "v1alpha1",
    kind = "Druid",
    namespaced,
    status = "crate::types::v1alpha1::status::DruidClusterStatus",
    shortname = "druid",
    plural = "druids",
    singular = "druid",
    printcolumn = r#"{"name":"Condition", "type":"string", "jsonPath":".status.druidNodeStatus.druidNodeConditionType"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct DruidSpec {
    /// When true the operator leaves the cluster alone entirely.
    #[serde(default)]
    pub ignored: bool,

    #[serde(rename = "common.runtime.properties")]
    pub common_runtime_properties: String,

    pub common_config_mount_path: String,

    pub start_script: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub druid_script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_arg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<corev1::LocalObjectReference>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<corev1::EnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_from: Option<Vec<corev1::EnvFromSource>>,

    #[serde(default, rename = "jvm.options", skip_serializing_if = "Option::is_none")]
    pub jvm_options: Option<String>,

    #[serde(default, rename = "log4j.config", skip_serializing_if = "Option::is_none")]
    pub log4j_config: Option<String>,

    #[serde(
        default,
        rename = "securityContext",
        skip_serializing_if = "Option::is_none"
    )]
    pub pod_security_context: Option<corev1::PodSecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_security_context: Option<corev1::SecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<corev1::Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<corev1::Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_up_probe: Option<corev1::Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<corev1::Toleration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<corev1::Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<appsv1::StatefulSetUpdateStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_management_policy: Option<PodManagementPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<corev1::Volume>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<corev1::VolumeMount>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_templates: Option<Vec<corev1::PersistentVolumeClaim>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_labels: Option<BTreeMap<String, String>>,

    /// Default service templates a node spec inherits when it declares none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<corev1::Service>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_container: Option<Vec<AdditionalContainer>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<ZookeeperSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_store: Option<MetadataStoreSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_storage: Option<DeepStorageSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions_map_path: Option<String>,

    /// Gate each rollout step on convergence of the previous one.
    #[serde(default = "default_rolling_deploy")]
    pub rolling_deploy: bool,

    /// Delete pods stuck crashlooping under OrderedReady pod management.
    #[serde(default)]
    pub force_delete_sts_pod_on_error: bool,

    /// Opt into in-place volume expansion of statefulset claims.
    #[serde(default)]
    pub scale_pvc_sts: bool,

    #[serde(default)]
    pub disable_pvc_deletion_finalizer: bool,

    /// Garbage-collect claims no running pod references.
    #[serde(default)]
    pub delete_orphan_pvc: bool,

    pub nodes: BTreeMap<String, DruidNodeSpec>,
}

impl Druid {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn generation(&self) -> i64 {
        self.meta().generation.unwrap_or_default()
    }

    /// a new owner reference for the Druid CR
    pub fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Labels selecting every child object of this cluster.
    pub fn cluster_labels(&self) -> BTreeMap<String, String> {
        [
            ("app".to_string(), "druid".to_string()),
            ("druid_cr".to_string(), self.name()),
        ]
        .into_iter()
        .collect()
    }

    /// Labels for the children of one node spec. User pod labels from the
    /// cluster and the node are merged first (node wins on conflict), the
    /// operator-managed keys always win over both.
    pub fn node_labels(
        &self,
        node_spec: &DruidNodeSpec,
        unique_str: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = self.spec.pod_labels.clone().unwrap_or_default();

        if let Some(node_labels) = &node_spec.pod_labels {
            labels.extend(node_labels.clone());
        }

        labels.insert("app".to_string(), "druid".to_string());
        labels.insert("druid_cr".to_string(), self.name());
        labels.insert("nodeSpecUniqueStr".to_string(), unique_str.to_string());
        labels.insert("component".to_string(), node_spec.node_type.to_string());
        labels
    }

    /// `druid-<cr-name>-<node-key>`, the base every per-node child name
    /// derives from. Must itself remain a valid k8s resource name.
    pub fn node_unique_name(&self, key: &str) -> String {
        format!("druid-{}-{}", self.name(), key)
    }

    pub fn common_config_name(&self) -> String {
        format!("{}-druid-common-config", self.name())
    }

    pub fn node_config_name(&self, unique_str: &str) -> String {
        format!("{unique_str}-config")
    }

    pub fn is_marked_ignored(&self) -> bool {
        self.annotations()
            .get(IGNORED_ANNOTATION)
            .is_some_and(|v| v == "true")
    }

    /// Static validation of the spec. Collects every problem into one
    /// message so the user can fix them in a single edit.
    pub fn validate(&self) -> Result<(), types::error::Error> {
        let mut msg = String::new();

        if self.spec.common_runtime_properties.is_empty() {
            msg.push_str("CommonRuntimeProperties missing from Druid Cluster Spec\n");
        }

        if self.spec.common_config_mount_path.is_empty() {
            msg.push_str("CommonConfigMountPath missing from Druid Cluster Spec\n");
        }

        if self.spec.start_script.is_empty() {
            msg.push_str("StartScript missing from Druid Cluster Spec\n");
        }

        for (key, node) in &self.spec.nodes {
            if self.spec.image.as_deref().unwrap_or_default().is_empty()
                && node.image.as_deref().unwrap_or_default().is_empty()
            {
                msg.push_str(&format!("Node[{key}] missing Image\n"));
            }

            if node.runtime_properties.is_empty() {
                msg.push_str(&format!("Node[{key}] missing RuntimeProperties\n"));
            }

            if node.node_config_mount_path.is_empty() {
                msg.push_str(&format!("Node[{key}] missing NodeConfigMountPath\n"));
            }

            if node.replicas < 0 {
                msg.push_str(&format!("Node[{key}] replicas must not be negative\n"));
            }

            if !NODE_KEY_REGEX.is_match(key) {
                msg.push_str(&format!(
                    "Node[{key}] key must match k8s resource name regex '{NODE_KEY_PATTERN}'\n"
                ));
            }
        }

        if msg.is_empty() {
            Ok(())
        } else {
            Err(types::error::Error::InvalidSpec { msg })
        }
    }
}

/// Resolve the container image for a node, node over cluster.
pub fn resolve_image<'a>(spec: &'a DruidSpec, node_spec: &'a DruidNodeSpec) -> &'a str {
    first_non_empty(
        node_spec.image.as_deref().unwrap_or_default(),
        spec.image.as_deref().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::create_test_druid;

    #[test]
    fn test_valid_spec_passes() {
        let druid = create_test_druid();
        assert!(druid.validate().is_ok());
    }

    #[test]
    fn test_missing_scalars_reported_together() {
        let mut druid = create_test_druid();
        druid.spec.common_runtime_properties = String::new();
        druid.spec.start_script = String::new();

        let err = druid.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CommonRuntimeProperties missing"));
        assert!(msg.contains("StartScript missing"));
    }

    #[test]
    fn test_node_key_regex_is_anchored() {
        let mut druid = create_test_druid();
        let node = druid.spec.nodes.get("brokers").unwrap().clone();
        druid.spec.nodes.insert("Bad.Key!".to_string(), node);

        let err = druid.validate().unwrap_err();
        assert!(err.to_string().contains("Bad.Key!"));
    }

    #[test]
    fn test_dns_subdomain_keys_accepted() {
        let mut druid = create_test_druid();
        let node = druid.spec.nodes.get("brokers").unwrap().clone();
        druid
            .spec
            .nodes
            .insert("cold-tier.zone-a".to_string(), node);

        assert!(druid.validate().is_ok());
    }

    #[test]
    fn test_node_without_image_rejected_when_cluster_image_missing() {
        let mut druid = create_test_druid();
        druid.spec.image = None;

        let err = druid.validate().unwrap_err();
        assert!(err.to_string().contains("missing Image"));
    }

    #[test]
    fn test_node_labels_merge_and_operator_keys_win() {
        let mut druid = create_test_druid();
        druid.spec.pod_labels = Some(
            [
                ("team".to_string(), "data".to_string()),
                ("env".to_string(), "prod".to_string()),
                ("app".to_string(), "not-druid".to_string()),
            ]
            .into_iter()
            .collect(),
        );

        let mut node = druid.spec.nodes.get("brokers").unwrap().clone();
        node.pod_labels = Some(
            [
                ("team".to_string(), "node-team".to_string()),
                ("tier".to_string(), "hot".to_string()),
            ]
            .into_iter()
            .collect(),
        );

        let labels = druid.node_labels(&node, "druid-test-cluster-brokers");

        // Node overrides cluster, cluster-only keys survive, and the
        // operator-managed keys beat both.
        assert_eq!(labels.get("team").map(String::as_str), Some("node-team"));
        assert_eq!(labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(labels.get("tier").map(String::as_str), Some("hot"));
        assert_eq!(labels.get("app").map(String::as_str), Some("druid"));
        assert_eq!(labels.get("component").map(String::as_str), Some("broker"));
        assert_eq!(
            labels.get("nodeSpecUniqueStr").map(String::as_str),
            Some("druid-test-cluster-brokers")
        );
    }

    #[test]
    fn test_ignored_annotation() {
        let mut druid = create_test_druid();
        assert!(!druid.is_marked_ignored());

        druid.metadata.annotations = Some(
            [(IGNORED_ANNOTATION.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(druid.is_marked_ignored());
    }
}
