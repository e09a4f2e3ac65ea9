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

use super::Druid;
use crate::types::v1alpha1::node::DruidNodeSpec;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;

impl Druid {
    /// Volume claim templates for a node's statefulset: cluster-level
    /// templates first, node-level templates appended.
    pub fn claim_templates(&self, node_spec: &DruidNodeSpec) -> Vec<corev1::PersistentVolumeClaim> {
        let mut templates = self.spec.volume_claim_templates.clone().unwrap_or_default();
        templates.extend(node_spec.volume_claim_templates.clone().unwrap_or_default());
        templates
    }

    /// A standalone claim declared under `nodeSpec.persistentVolumeClaim`.
    /// Unlike templates these are materialized directly by the operator.
    pub fn new_persistent_volume_claim(
        &self,
        template: &corev1::PersistentVolumeClaim,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
    ) -> corev1::PersistentVolumeClaim {
        let mut pvc = template.clone();

        pvc.metadata.namespace = self.namespace().ok();

        if pvc.metadata.name.as_deref().unwrap_or_default().is_empty() {
            pvc.metadata.name = Some(unique_str.to_string());
        }

        let mut pvc_labels = pvc.metadata.labels.take().unwrap_or_default();
        pvc_labels.extend(labels.clone());
        pvc.metadata.labels = Some(pvc_labels);

        pvc
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::{claim_template, create_test_druid, historical_node};

    #[test]
    fn test_claim_templates_concatenate_cluster_then_node() {
        let mut druid = create_test_druid();
        druid.spec.volume_claim_templates = Some(vec![claim_template("cluster-data", "10Gi")]);

        let mut node = historical_node(2);
        node.volume_claim_templates = Some(vec![claim_template("segment-cache", "100Gi")]);

        let templates = druid.claim_templates(&node);
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].metadata.name.as_deref(), Some("cluster-data"));
        assert_eq!(templates[1].metadata.name.as_deref(), Some("segment-cache"));
    }

    #[test]
    fn test_standalone_claim_defaults_name_and_labels() {
        let druid = create_test_druid();
        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let mut template = claim_template("", "20Gi");
        template.metadata.name = None;

        let pvc = druid.new_persistent_volume_claim(&template, &labels, &unique);
        assert_eq!(pvc.metadata.name.as_deref(), Some(unique.as_str()));
        assert_eq!(pvc.metadata.labels.unwrap(), labels);
    }
}
