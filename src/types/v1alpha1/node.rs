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

use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::autoscaling::v2 as autoscalingv2;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as networkingv1;
use k8s_openapi::api::policy::v1 as policyv1;
use kube::KubeSchema;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use strum::Display;

/// The Druid process a node spec runs. Rolling updates walk these in the
/// order prescribed by https://druid.apache.org/docs/latest/operations/rolling-updates.html
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    #[strum(serialize = "historical")]
    Historical,

    #[strum(serialize = "overlord")]
    Overlord,

    #[strum(serialize = "middleManager")]
    MiddleManager,

    #[strum(serialize = "indexer")]
    Indexer,

    #[strum(serialize = "broker")]
    Broker,

    #[strum(serialize = "coordinator")]
    Coordinator,

    #[strum(serialize = "router")]
    Router,
}

impl NodeType {
    pub const PRESCRIBED_ORDER: [NodeType; 7] = [
        NodeType::Historical,
        NodeType::Overlord,
        NodeType::MiddleManager,
        NodeType::Indexer,
        NodeType::Broker,
        NodeType::Coordinator,
        NodeType::Router,
    ];
}

impl JsonSchema for NodeType {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("NodeType")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "NodeType"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema! {
            {
                "type": "string",
                "enum": [
                    "historical",
                    "overlord",
                    "middleManager",
                    "indexer",
                    "broker",
                    "coordinator",
                    "router"
                ]
            }
        }
    }
}

/// Workload flavor backing a node spec.
#[derive(Default, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum WorkloadKind {
    #[default]
    #[strum(serialize = "StatefulSet")]
    StatefulSet,

    #[strum(serialize = "Deployment")]
    Deployment,
}

impl JsonSchema for WorkloadKind {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("WorkloadKind")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "WorkloadKind"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema! {
            {"type": "string", "enum": ["StatefulSet", "Deployment"]}
        }
    }
}

/// Pod management policy for StatefulSets.
#[derive(Default, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum PodManagementPolicy {
    #[strum(serialize = "OrderedReady")]
    OrderedReady,

    #[default]
    #[strum(serialize = "Parallel")]
    Parallel,
}

impl JsonSchema for PodManagementPolicy {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("PodManagementPolicy")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "PodManagementPolicy"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema! {
            {"type": "string", "enum": ["OrderedReady", "Parallel"]}
        }
    }
}

/// How historical pods are replaced when a `deploymentConfig` is present.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentMode {
    #[strum(serialize = "rollingDeploy")]
    RollingDeploy,

    #[strum(serialize = "parallel")]
    Parallel,
}

impl JsonSchema for DeploymentMode {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("DeploymentMode")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "DeploymentMode"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema! {
            {"type": "string", "enum": ["rollingDeploy", "parallel"]}
        }
    }
}

/// Opt-in decommission-aware replacement protocol for historicals.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub deployment_mode: DeploymentMode,

    #[x_kube(validation = Rule::new("self > 0").message("batchSize must be greater than 0"))]
    pub batch_size: i32,
}

/// Sidecar container attached after the Druid container in every pod of a
/// node spec (or of the whole cluster when set at the top level).
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalContainer {
    pub container_name: String,
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<corev1::VolumeMount>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<corev1::EnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_from: Option<Vec<corev1::EnvFromSource>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_security_context: Option<corev1::SecurityContext>,
}

/// One entry of `spec.nodes`: a homogeneous group of Druid processes.
///
/// Node-level fields override the cluster-level field of the same name;
/// `env` and `envFrom` replace the cluster list wholesale when set, while
/// volumes, mounts and claim templates are concatenated after the cluster
/// ones.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct DruidNodeSpec {
    pub node_type: NodeType,

    #[serde(rename = "druid.port")]
    pub druid_port: i32,

    #[x_kube(validation = Rule::new("self >= 0").message("replicas must not be negative"))]
    pub replicas: i32,

    #[serde(rename = "runtime.properties")]
    pub runtime_properties: String,

    pub node_config_mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<WorkloadKind>,

    #[serde(default, rename = "jvm.options", skip_serializing_if = "Option::is_none")]
    pub jvm_options: Option<String>,

    #[serde(
        default,
        rename = "extra.jvm.options",
        skip_serializing_if = "Option::is_none"
    )]
    pub extra_jvm_options: Option<String>,

    #[serde(default, rename = "log4j.config", skip_serializing_if = "Option::is_none")]
    pub log4j_config: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<corev1::Service>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<corev1::ContainerPort>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<corev1::LocalObjectReference>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<corev1::EnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_from: Option<Vec<corev1::EnvFromSource>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

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
    pub lifecycle: Option<corev1::Lifecycle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<corev1::Toleration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<corev1::Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_spread_constraints: Option<Vec<corev1::TopologySpreadConstraint>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget_spec: Option<policyv1::PodDisruptionBudgetSpec>,

    #[serde(
        default,
        rename = "hpAutoscaler",
        skip_serializing_if = "Option::is_none"
    )]
    pub hpa_autoscaler: Option<autoscalingv2::HorizontalPodAutoscalerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<networkingv1::IngressSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<Vec<corev1::PersistentVolumeClaim>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_templates: Option<Vec<corev1::PersistentVolumeClaim>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<corev1::VolumeMount>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<corev1::Volume>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<appsv1::StatefulSetUpdateStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_management_policy: Option<PodManagementPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_container: Option<Vec<AdditionalContainer>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_config: Option<DeploymentConfig>,
}

impl DruidNodeSpec {
    pub fn workload_kind(&self) -> WorkloadKind {
        self.kind.unwrap_or_default()
    }
}
