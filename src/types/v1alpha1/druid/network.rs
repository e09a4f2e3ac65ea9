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
use k8s_openapi::api::autoscaling::v2 as autoscalingv2;
use k8s_openapi::api::networking::v1 as networkingv1;
use k8s_openapi::api::policy::v1 as policyv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

impl Druid {
    pub fn new_ingress(
        &self,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
    ) -> Option<networkingv1::Ingress> {
        node_spec.ingress.as_ref().map(|spec| networkingv1::Ingress {
            metadata: metav1::ObjectMeta {
                name: Some(unique_str.to_string()),
                namespace: self.namespace().ok(),
                labels: Some(labels.clone()),
                annotations: node_spec.ingress_annotations.clone(),
                ..Default::default()
            },
            spec: Some(spec.clone()),
            ..Default::default()
        })
    }

    /// The budget's selector is forced to the node's label set so that a
    /// user-provided spec cannot cover pods of another node type.
    pub fn new_pod_disruption_budget(
        &self,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
    ) -> Option<policyv1::PodDisruptionBudget> {
        node_spec.pod_disruption_budget_spec.as_ref().map(|spec| {
            let mut pdb_spec = spec.clone();
            pdb_spec.selector = Some(metav1::LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            });

            policyv1::PodDisruptionBudget {
                metadata: metav1::ObjectMeta {
                    name: Some(unique_str.to_string()),
                    namespace: self.namespace().ok(),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                spec: Some(pdb_spec),
                ..Default::default()
            }
        })
    }

    pub fn new_horizontal_pod_autoscaler(
        &self,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
    ) -> Option<autoscalingv2::HorizontalPodAutoscaler> {
        node_spec
            .hpa_autoscaler
            .as_ref()
            .map(|spec| autoscalingv2::HorizontalPodAutoscaler {
                metadata: metav1::ObjectMeta {
                    name: Some(unique_str.to_string()),
                    namespace: self.namespace().ok(),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                spec: spec.clone(),
                ..Default::default()
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::{create_test_druid, historical_node};
    use k8s_openapi::api::policy::v1 as policyv1;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    #[test]
    fn test_absent_specs_build_nothing() {
        let druid = create_test_druid();
        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        assert!(druid.new_ingress(&node, &labels, &unique).is_none());
        assert!(druid.new_pod_disruption_budget(&node, &labels, &unique).is_none());
        assert!(
            druid
                .new_horizontal_pod_autoscaler(&node, &labels, &unique)
                .is_none()
        );
    }

    #[test]
    fn test_pdb_selector_forced_to_node_labels() {
        let druid = create_test_druid();
        let mut node = historical_node(3);
        node.pod_disruption_budget_spec = Some(policyv1::PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(metav1::LabelSelector {
                match_labels: Some(
                    [("stolen".to_string(), "selector".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        });

        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);
        let pdb = druid
            .new_pod_disruption_budget(&node, &labels, &unique)
            .unwrap();

        let spec = pdb.spec.unwrap();
        assert_eq!(spec.max_unavailable, Some(IntOrString::Int(1)));
        assert_eq!(spec.selector.unwrap().match_labels.unwrap(), labels);
    }
}
