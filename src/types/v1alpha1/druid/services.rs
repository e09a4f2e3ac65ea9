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
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Services are declared in the CR as templates. A template name containing
/// `%s` has the node's unique string substituted in; an empty name resolves
/// to the unique string itself.
pub fn service_name(name_template: &str, unique_str: &str) -> String {
    if name_template.is_empty() {
        unique_str.to_string()
    } else {
        name_template.replace("%s", unique_str)
    }
}

impl Druid {
    /// Materialize one service template for a node spec. The operator label
    /// set is merged into both labels and selector so that user-supplied
    /// entries survive but cannot detach the service from the node's pods.
    pub fn new_service(
        &self,
        template: &corev1::Service,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
    ) -> corev1::Service {
        let mut svc = template.clone();

        svc.metadata.name = Some(service_name(
            template.metadata.name.as_deref().unwrap_or_default(),
            unique_str,
        ));
        svc.metadata.namespace = self.namespace().ok();

        let mut svc_labels = svc.metadata.labels.take().unwrap_or_default();
        svc_labels.extend(labels.clone());
        svc.metadata.labels = Some(svc_labels);

        let spec = svc.spec.get_or_insert_default();

        let mut selector = spec.selector.take().unwrap_or_default();
        selector.extend(labels.clone());
        spec.selector = Some(selector);

        if spec.ports.is_none() {
            spec.ports = Some(vec![corev1::ServicePort {
                name: Some("service-port".to_string()),
                port: node_spec.druid_port,
                target_port: Some(IntOrString::Int(node_spec.druid_port)),
                ..Default::default()
            }]);
        }

        svc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::create_test_druid;

    #[test]
    fn test_service_name_template() {
        assert_eq!(service_name("", "druid-x-brokers"), "druid-x-brokers");
        assert_eq!(
            service_name("%s-headless", "druid-x-brokers"),
            "druid-x-brokers-headless"
        );
    }

    #[test]
    fn test_service_defaults_port_and_selector() {
        let druid = create_test_druid();
        let node = druid.spec.nodes.get("brokers").unwrap().clone();
        let labels = druid.node_labels(&node, "druid-test-cluster-brokers");

        let svc = druid.new_service(
            &corev1::Service::default(),
            &node,
            &labels,
            "druid-test-cluster-brokers",
        );

        assert_eq!(svc.metadata.name.as_deref(), Some("druid-test-cluster-brokers"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector.unwrap(), labels);

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 8088);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8088)));
    }

    #[test]
    fn test_service_keeps_user_ports() {
        let druid = create_test_druid();
        let node = druid.spec.nodes.get("brokers").unwrap().clone();
        let labels = druid.node_labels(&node, "druid-test-cluster-brokers");

        let template = corev1::Service {
            spec: Some(corev1::ServiceSpec {
                cluster_ip: Some("None".to_string()),
                ports: Some(vec![corev1::ServicePort {
                    name: Some("tcp-service".to_string()),
                    port: 9000,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let svc = druid.new_service(&template, &node, &labels, "druid-test-cluster-brokers");
        let spec = svc.spec.unwrap();

        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap()[0].port, 9000);
    }
}
