//  Copyright 2025 The Druid Operator Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

use crate::types::v1alpha1::druid::{Druid, DruidSpec};
use crate::types::v1alpha1::node::{DruidNodeSpec, NodeType, WorkloadKind};

// Helper functions building test fixtures (available to submodule tests via
// crate::tests).

pub fn node_of_type(node_type: NodeType) -> DruidNodeSpec {
    DruidNodeSpec {
        node_type,
        druid_port: 8081,
        replicas: 1,
        runtime_properties: "druid.service=test".to_string(),
        node_config_mount_path: String::new(),
        kind: None,
        jvm_options: None,
        extra_jvm_options: None,
        log4j_config: None,
        services: None,
        ports: None,
        image: None,
        image_pull_policy: None,
        image_pull_secrets: None,
        env: None,
        env_from: None,
        resources: None,
        pod_security_context: None,
        container_security_context: None,
        liveness_probe: None,
        readiness_probe: None,
        start_up_probe: None,
        lifecycle: None,
        termination_grace_period_seconds: None,
        tolerations: None,
        affinity: None,
        node_selector: None,
        topology_spread_constraints: None,
        pod_disruption_budget_spec: None,
        hpa_autoscaler: None,
        ingress: None,
        ingress_annotations: None,
        persistent_volume_claim: None,
        volume_claim_templates: None,
        volume_mounts: None,
        volumes: None,
        pod_annotations: None,
        pod_labels: None,
        update_strategy: None,
        pod_management_policy: None,
        max_surge: None,
        max_unavailable: None,
        additional_container: None,
        deployment_config: None,
    }
}

pub fn historical_node(replicas: i32) -> DruidNodeSpec {
    let mut node = node_of_type(NodeType::Historical);
    node.druid_port = 8083;
    node.replicas = replicas;
    node
}

pub fn broker_node(replicas: i32) -> DruidNodeSpec {
    let mut node = node_of_type(NodeType::Broker);
    node.druid_port = 8088;
    node.replicas = replicas;
    node.kind = Some(WorkloadKind::Deployment);
    node.node_config_mount_path = "/druid/conf/druid/broker".to_string();
    node
}

pub fn claim_template(name: &str, size: &str) -> corev1::PersistentVolumeClaim {
    corev1::PersistentVolumeClaim {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(corev1::PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(corev1::VolumeResourceRequirements {
                requests: Some(
                    [("storage".to_string(), Quantity(size.to_string()))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn create_test_druid() -> Druid {
    Druid {
        metadata: metav1::ObjectMeta {
            name: Some("test-cluster".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("test-uid-123".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: DruidSpec {
            common_runtime_properties: "druid.zk.service.host=zk".to_string(),
            common_config_mount_path: "/druid/conf/druid/_common".to_string(),
            start_script: "bin/run-druid.sh".to_string(),
            image: Some("apache/druid:28.0.0".to_string()),
            rolling_deploy: true,
            nodes: [("brokers".to_string(), broker_node(1))].into_iter().collect(),
            ..Default::default()
        },
        status: None,
    }
}
