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

use super::{Druid, resolve_image};
use crate::types::v1alpha1::node::DruidNodeSpec;
use crate::util::{first_non_empty, first_some};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

const COMMON_CONFIG_VOLUME: &str = "common-config-volume";
const NODE_CONFIG_VOLUME: &str = "nodetype-config-volume";
const DEFAULT_COMMON_CONFIG_MOUNT_PATH: &str = "/druid/conf/druid/_common";
const DEFAULT_START_SCRIPT: &str = "bin/run-druid.sh";

/// The env var whose value changes whenever either ConfigMap changes,
/// forcing the workload controller to roll pods on config edits.
pub const CONFIG_MAP_SHA_ENV: &str = "configMapSHA";

fn node_config_mount_path(node_spec: &DruidNodeSpec) -> String {
    format!("/druid/conf/druid/{}", node_spec.node_type)
}

/// An http probe without an explicit port targets the node's Druid port.
fn default_probe_port(probe: Option<corev1::Probe>, druid_port: i32) -> Option<corev1::Probe> {
    probe.map(|mut p| {
        if let Some(http_get) = &mut p.http_get {
            let unset = match &http_get.port {
                IntOrString::Int(port) => *port == 0,
                IntOrString::String(port) => port.is_empty(),
            };
            if unset {
                http_get.port = IntOrString::Int(druid_port);
            }
        }
        p
    })
}

impl Druid {
    fn get_command(&self, node_spec: &DruidNodeSpec) -> Vec<String> {
        if !self.spec.start_script.is_empty() && self.spec.entry_arg.is_some() {
            return vec![self.spec.start_script.clone()];
        }
        vec![
            first_non_empty(&self.spec.start_script, DEFAULT_START_SCRIPT).to_string(),
            node_spec.node_type.to_string(),
        ]
    }

    fn get_args(&self, node_spec: &DruidNodeSpec) -> Option<Vec<String>> {
        self.spec.entry_arg.as_ref().map(|entry_arg| {
            let druid_script =
                first_non_empty(self.spec.druid_script.as_deref().unwrap_or_default(), DEFAULT_START_SCRIPT);
            vec![
                "-c".to_string(),
                format!("{entry_arg} && {druid_script} {}", node_spec.node_type),
            ]
        })
    }

    fn get_env(&self, node_spec: &DruidNodeSpec, config_map_sha: &str) -> Vec<corev1::EnvVar> {
        // Node env replaces cluster env wholesale, no merging.
        let mut env = first_some(node_spec.env.as_ref(), self.spec.env.as_ref()).unwrap_or_default();
        env.push(corev1::EnvVar {
            name: CONFIG_MAP_SHA_ENV.to_string(),
            value: Some(config_map_sha.to_string()),
            ..Default::default()
        });
        env
    }

    fn get_volume_mounts(&self, node_spec: &DruidNodeSpec) -> Vec<corev1::VolumeMount> {
        let mut mounts = vec![
            corev1::VolumeMount {
                name: COMMON_CONFIG_VOLUME.to_string(),
                mount_path: first_non_empty(
                    &self.spec.common_config_mount_path,
                    DEFAULT_COMMON_CONFIG_MOUNT_PATH,
                )
                .to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            corev1::VolumeMount {
                name: NODE_CONFIG_VOLUME.to_string(),
                mount_path: first_non_empty(
                    &node_spec.node_config_mount_path,
                    &node_config_mount_path(node_spec),
                )
                .to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ];

        mounts.extend(self.spec.volume_mounts.clone().unwrap_or_default());
        mounts.extend(node_spec.volume_mounts.clone().unwrap_or_default());
        mounts
    }

    fn get_volumes(&self, node_spec: &DruidNodeSpec, unique_str: &str) -> Vec<corev1::Volume> {
        let mut volumes = vec![
            corev1::Volume {
                name: COMMON_CONFIG_VOLUME.to_string(),
                config_map: Some(corev1::ConfigMapVolumeSource {
                    name: self.common_config_name(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            corev1::Volume {
                name: NODE_CONFIG_VOLUME.to_string(),
                config_map: Some(corev1::ConfigMapVolumeSource {
                    name: self.node_config_name(unique_str),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];

        volumes.extend(self.spec.volumes.clone().unwrap_or_default());
        volumes.extend(node_spec.volumes.clone().unwrap_or_default());
        volumes
    }

    fn get_tolerations(&self, node_spec: &DruidNodeSpec) -> Vec<corev1::Toleration> {
        let mut tolerations = self.spec.tolerations.clone().unwrap_or_default();
        tolerations.extend(node_spec.tolerations.clone().unwrap_or_default());
        tolerations
    }

    fn get_containers(
        &self,
        node_spec: &DruidNodeSpec,
        unique_str: &str,
        config_map_sha: &str,
    ) -> Vec<corev1::Container> {
        let mut ports = node_spec.ports.clone().unwrap_or_default();
        ports.push(corev1::ContainerPort {
            container_port: node_spec.druid_port,
            name: Some("druid-port".to_string()),
            ..Default::default()
        });

        let mut containers = vec![corev1::Container {
            name: unique_str.to_string(),
            image: Some(resolve_image(&self.spec, node_spec).to_string()),
            command: Some(self.get_command(node_spec)),
            args: self.get_args(node_spec),
            image_pull_policy: first_some(
                node_spec.image_pull_policy.as_ref(),
                self.spec.image_pull_policy.as_ref(),
            ),
            ports: Some(ports),
            resources: node_spec.resources.clone(),
            env: Some(self.get_env(node_spec, config_map_sha)),
            env_from: first_some(node_spec.env_from.as_ref(), self.spec.env_from.as_ref()),
            volume_mounts: Some(self.get_volume_mounts(node_spec)),
            liveness_probe: default_probe_port(
                first_some(
                    node_spec.liveness_probe.as_ref(),
                    self.spec.liveness_probe.as_ref(),
                ),
                node_spec.druid_port,
            ),
            readiness_probe: default_probe_port(
                first_some(
                    node_spec.readiness_probe.as_ref(),
                    self.spec.readiness_probe.as_ref(),
                ),
                node_spec.druid_port,
            ),
            startup_probe: default_probe_port(
                first_some(
                    node_spec.start_up_probe.as_ref(),
                    self.spec.start_up_probe.as_ref(),
                ),
                node_spec.druid_port,
            ),
            lifecycle: node_spec.lifecycle.clone(),
            security_context: first_some(
                node_spec.container_security_context.as_ref(),
                self.spec.container_security_context.as_ref(),
            ),
            ..Default::default()
        }];

        let sidecars = first_some(
            node_spec.additional_container.as_ref(),
            self.spec.additional_container.as_ref(),
        )
        .unwrap_or_default();

        for sidecar in sidecars {
            containers.push(corev1::Container {
                name: sidecar.container_name,
                image: Some(sidecar.image),
                command: sidecar.command,
                args: sidecar.args,
                image_pull_policy: sidecar.image_pull_policy,
                resources: sidecar.resources,
                volume_mounts: sidecar.volume_mounts,
                env: sidecar.env,
                env_from: sidecar.env_from,
                security_context: sidecar.container_security_context,
                ..Default::default()
            });
        }

        containers
    }

    fn make_pod_template(
        &self,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
        config_map_sha: &str,
    ) -> corev1::PodTemplateSpec {
        corev1::PodTemplateSpec {
            metadata: Some(metav1::ObjectMeta {
                labels: Some(labels.clone()),
                annotations: first_some(
                    node_spec.pod_annotations.as_ref(),
                    self.spec.pod_annotations.as_ref(),
                ),
                ..Default::default()
            }),
            spec: Some(corev1::PodSpec {
                containers: self.get_containers(node_spec, unique_str, config_map_sha),
                volumes: Some(self.get_volumes(node_spec, unique_str)),
                node_selector: first_some(
                    node_spec.node_selector.as_ref(),
                    self.spec.node_selector.as_ref(),
                ),
                topology_spread_constraints: node_spec.topology_spread_constraints.clone(),
                tolerations: Some(self.get_tolerations(node_spec)),
                affinity: first_some(node_spec.affinity.as_ref(), self.spec.affinity.as_ref()),
                image_pull_secrets: first_some(
                    node_spec.image_pull_secrets.as_ref(),
                    self.spec.image_pull_secrets.as_ref(),
                ),
                termination_grace_period_seconds: node_spec.termination_grace_period_seconds,
                security_context: first_some(
                    node_spec.pod_security_context.as_ref(),
                    self.spec.pod_security_context.as_ref(),
                ),
                service_account_name: self.spec.service_account.clone(),
                ..Default::default()
            }),
        }
    }

    pub fn new_stateful_set(
        &self,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
        config_map_sha: &str,
        service_name: &str,
    ) -> appsv1::StatefulSet {
        let pod_management_policy = node_spec
            .pod_management_policy
            .or(self.spec.pod_management_policy)
            .unwrap_or_default();

        appsv1::StatefulSet {
            metadata: metav1::ObjectMeta {
                name: Some(unique_str.to_string()),
                namespace: self.namespace().ok(),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(appsv1::StatefulSetSpec {
                service_name: Some(service_name.to_string()),
                selector: metav1::LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                replicas: Some(node_spec.replicas),
                pod_management_policy: Some(pod_management_policy.to_string()),
                update_strategy: first_some(
                    node_spec.update_strategy.as_ref(),
                    self.spec.update_strategy.as_ref(),
                ),
                template: self.make_pod_template(node_spec, labels, unique_str, config_map_sha),
                volume_claim_templates: Some(self.claim_templates(node_spec)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn new_deployment(
        &self,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
        config_map_sha: &str,
    ) -> appsv1::Deployment {
        appsv1::Deployment {
            metadata: metav1::ObjectMeta {
                name: Some(unique_str.to_string()),
                namespace: self.namespace().ok(),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(appsv1::DeploymentSpec {
                selector: metav1::LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                replicas: Some(node_spec.replicas),
                template: self.make_pod_template(node_spec, labels, unique_str, config_map_sha),
                strategy: Some(appsv1::DeploymentStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    rolling_update: Some(rolling_update_strategy(node_spec)),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn rolling_update_strategy(node_spec: &DruidNodeSpec) -> appsv1::RollingUpdateDeployment {
    if node_spec.max_surge.is_some() || node_spec.max_unavailable.is_some() {
        return appsv1::RollingUpdateDeployment {
            max_surge: node_spec.max_surge.map(IntOrString::Int),
            max_unavailable: node_spec.max_unavailable.map(IntOrString::Int),
        };
    }
    appsv1::RollingUpdateDeployment {
        max_surge: Some(IntOrString::String("25%".to_string())),
        max_unavailable: Some(IntOrString::String("25%".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{create_test_druid, historical_node};

    #[test]
    fn test_statefulset_shape() {
        let druid = create_test_druid();
        let node = historical_node(2);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let sts = druid.new_stateful_set(&node, &labels, &unique, "abc-def", &unique);

        assert_eq!(
            sts.metadata.name.as_deref(),
            Some("druid-test-cluster-historicals")
        );
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.selector.match_labels.unwrap(), labels);
        assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));
        assert_eq!(
            spec.service_name.as_deref(),
            Some("druid-test-cluster-historicals")
        );
    }

    #[test]
    fn test_default_command_carries_node_type() {
        let druid = create_test_druid();
        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let sts = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let container = &sts.spec.unwrap().template.spec.unwrap().containers[0];

        assert_eq!(
            container.command.as_ref().unwrap(),
            &vec!["bin/run-druid.sh".to_string(), "historical".to_string()]
        );
        assert!(container.args.is_none());
    }

    #[test]
    fn test_entry_arg_switches_to_shell_invocation() {
        let mut druid = create_test_druid();
        druid.spec.start_script = "/bin/sh".to_string();
        druid.spec.entry_arg = Some("export FOO=1".to_string());
        druid.spec.druid_script = Some("bin/run-druid.sh".to_string());

        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let sts = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let container = &sts.spec.unwrap().template.spec.unwrap().containers[0];

        assert_eq!(container.command.as_ref().unwrap(), &vec!["/bin/sh".to_string()]);
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec![
                "-c".to_string(),
                "export FOO=1 && bin/run-druid.sh historical".to_string()
            ]
        );
    }

    #[test]
    fn test_config_map_sha_env_appended() {
        let druid = create_test_druid();
        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let sts = druid.new_stateful_set(&node, &labels, &unique, "common-node", &unique);
        let env = sts.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();

        let sha_var = env.iter().find(|e| e.name == CONFIG_MAP_SHA_ENV).unwrap();
        assert_eq!(sha_var.value.as_deref(), Some("common-node"));
    }

    #[test]
    fn test_node_env_replaces_cluster_env() {
        let mut druid = create_test_druid();
        druid.spec.env = Some(vec![corev1::EnvVar {
            name: "CLUSTER_VAR".to_string(),
            value: Some("1".to_string()),
            ..Default::default()
        }]);

        let mut node = historical_node(1);
        node.env = Some(vec![corev1::EnvVar {
            name: "NODE_VAR".to_string(),
            value: Some("2".to_string()),
            ..Default::default()
        }]);

        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);
        let sts = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let env = sts.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();

        assert!(env.iter().any(|e| e.name == "NODE_VAR"));
        assert!(!env.iter().any(|e| e.name == "CLUSTER_VAR"));
    }

    #[test]
    fn test_config_mounts_prepended() {
        let mut druid = create_test_druid();
        druid.spec.volume_mounts = Some(vec![corev1::VolumeMount {
            name: "segment-cache".to_string(),
            mount_path: "/segment-cache".to_string(),
            ..Default::default()
        }]);

        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let sts = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let mounts = sts.spec.unwrap().template.spec.unwrap().containers[0]
            .volume_mounts
            .clone()
            .unwrap();

        assert_eq!(mounts[0].name, COMMON_CONFIG_VOLUME);
        assert_eq!(mounts[0].mount_path, "/druid/conf/druid/_common");
        assert_eq!(mounts[1].name, NODE_CONFIG_VOLUME);
        assert_eq!(mounts[1].mount_path, "/druid/conf/druid/historical");
        assert_eq!(mounts[2].name, "segment-cache");
    }

    #[test]
    fn test_probe_port_defaults_to_druid_port() {
        let mut druid = create_test_druid();
        druid.spec.readiness_probe = Some(corev1::Probe {
            http_get: Some(corev1::HTTPGetAction {
                path: Some("/status/health".to_string()),
                port: IntOrString::Int(0),
                ..Default::default()
            }),
            ..Default::default()
        });

        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let sts = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let probe = sts.spec.unwrap().template.spec.unwrap().containers[0]
            .readiness_probe
            .clone()
            .unwrap();

        assert_eq!(probe.http_get.unwrap().port, IntOrString::Int(8083));
    }

    #[test]
    fn test_deployment_defaults_rolling_update_percentages() {
        let druid = create_test_druid();
        let node = druid.spec.nodes.get("brokers").unwrap().clone();
        let unique = druid.node_unique_name("brokers");
        let labels = druid.node_labels(&node, &unique);

        let deployment = druid.new_deployment(&node, &labels, &unique, "sha");
        let strategy = deployment.spec.unwrap().strategy.unwrap();
        let rolling = strategy.rolling_update.unwrap();

        assert_eq!(rolling.max_surge, Some(IntOrString::String("25%".to_string())));
        assert_eq!(
            rolling.max_unavailable,
            Some(IntOrString::String("25%".to_string()))
        );
    }

    #[test]
    fn test_builders_are_deterministic() {
        let druid = create_test_druid();
        let node = historical_node(2);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let a = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let b = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_sidecar_containers_appended() {
        let mut druid = create_test_druid();
        druid.spec.additional_container =
            Some(vec![crate::types::v1alpha1::node::AdditionalContainer {
                container_name: "log-shipper".to_string(),
                image: "fluentbit:2".to_string(),
                command: None,
                args: None,
                image_pull_policy: None,
                resources: None,
                volume_mounts: None,
                env: None,
                env_from: None,
                container_security_context: None,
            }]);

        let node = historical_node(1);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let sts = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let containers = sts.spec.unwrap().template.spec.unwrap().containers;

        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1].name, "log-shipper");
    }
}
