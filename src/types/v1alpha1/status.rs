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

use kube::KubeSchema;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::Display;

/// Aggregate condition of all Druid nodes of the cluster.
#[derive(Default, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum DruidNodeConditionType {
    #[default]
    #[strum(serialize = "DruidClusterReady")]
    DruidClusterReady,

    #[strum(serialize = "DruidNodeRollingUpdate")]
    DruidNodeRollingUpdate,

    #[strum(serialize = "DruidNodeErrorState")]
    DruidNodeErrorState,
}

impl JsonSchema for DruidNodeConditionType {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("DruidNodeConditionType")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "DruidNodeConditionType"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema! {
            {"type": "string"}
        }
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct DruidNodeTypeStatus {
    /// Name of the pod the condition refers to, set for error states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub druid_node: Option<String>,

    pub druid_node_condition_type: DruidNodeConditionType,

    pub druid_node_condition_status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DruidNodeTypeStatus {
    pub fn new(
        condition_type: DruidNodeConditionType,
        node: Option<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            druid_node: node,
            druid_node_condition_type: condition_type,
            druid_node_condition_status: "True".to_string(),
            reason,
        }
    }
}

/// Drain progress of the historical tier, persisted so that a batch survives
/// operator restarts. `currentBatch == 0` with no decommissioned pods and a
/// zero replica snapshot means no drain session is active.
#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalStatus {
    #[serde(default)]
    pub replica: i32,

    #[serde(default)]
    pub current_batch: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decommissioned_pods: Option<Vec<String>>,
}

impl HistoricalStatus {
    /// A drain session is in flight once the replica snapshot has been taken.
    pub fn session_active(&self) -> bool {
        self.replica != 0 || self.current_batch != 0 || self.decommissioned_pods.is_some()
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, KubeSchema)]
#[serde(rename_all = "camelCase")]
pub struct DruidClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stateful_sets: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_disruption_budgets: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hpa_autoscalers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persistent_volume_claims: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods: Vec<String>,

    #[serde(default)]
    pub druid_node_status: DruidNodeTypeStatus,

    #[serde(default)]
    pub historical: HistoricalStatus,
}
