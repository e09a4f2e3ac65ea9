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
use crate::types;
use crate::types::v1alpha1::node::DruidNodeSpec;
use crate::util::first_non_empty;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

impl Druid {
    /// The common ConfigMap shared by all node types. Pluggable dependency
    /// snippets (zookeeper, metadata store, deep storage) are appended to
    /// `common.runtime.properties` in that order.
    pub fn new_common_config_map(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<corev1::ConfigMap, types::error::Error> {
        let mut prop = self.spec.common_runtime_properties.clone();

        if let Some(zk) = &self.spec.zookeeper {
            prop = format!("{prop}\n{}\n", zk.configuration()?);
        }

        if let Some(ms) = &self.spec.metadata_store {
            prop = format!("{prop}\n{}\n", ms.configuration()?);
        }

        if let Some(ds) = &self.spec.deep_storage {
            prop = format!("{prop}\n{}\n", ds.configuration()?);
        }

        let mut data = BTreeMap::new();
        data.insert("common.runtime.properties".to_string(), prop);

        if let Some(dimensions) = &self.spec.dimensions_map_path {
            data.insert("metricDimensions.json".to_string(), dimensions.clone());
        }

        Ok(self.new_config_map(self.common_config_name(), labels.clone(), data))
    }

    /// The per-node-type ConfigMap: runtime properties with the listen port
    /// prepended, the resolved jvm config plus per-node extras, and an
    /// optional log4j2 configuration.
    pub fn new_node_config_map(
        &self,
        node_spec: &DruidNodeSpec,
        labels: &BTreeMap<String, String>,
        unique_str: &str,
    ) -> Result<corev1::ConfigMap, types::error::Error> {
        let mut data = BTreeMap::new();

        data.insert(
            "runtime.properties".to_string(),
            format!(
                "druid.port={}\n{}",
                node_spec.druid_port, node_spec.runtime_properties
            ),
        );

        let jvm_options = first_non_empty(
            node_spec.jvm_options.as_deref().unwrap_or_default(),
            self.spec.jvm_options.as_deref().unwrap_or_default(),
        );
        data.insert(
            "jvm.config".to_string(),
            format!(
                "{jvm_options}\n{}",
                node_spec.extra_jvm_options.as_deref().unwrap_or_default()
            ),
        );

        let log4j_config = first_non_empty(
            node_spec.log4j_config.as_deref().unwrap_or_default(),
            self.spec.log4j_config.as_deref().unwrap_or_default(),
        );
        if !log4j_config.is_empty() {
            data.insert("log4j2.xml".to_string(), log4j_config.to_string());
        }

        Ok(self.new_config_map(self.node_config_name(unique_str), labels.clone(), data))
    }

    fn new_config_map(
        &self,
        name: String,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> corev1::ConfigMap {
        corev1::ConfigMap {
            metadata: metav1::ObjectMeta {
                name: Some(name),
                namespace: self.namespace().ok(),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::create_test_druid;
    use crate::types::v1alpha1::deps::ZookeeperSpec;

    #[test]
    fn test_common_config_appends_dependency_snippets() {
        let mut druid = create_test_druid();
        druid.spec.common_runtime_properties = "druid.common=1".to_string();
        druid.spec.zookeeper = Some(ZookeeperSpec {
            type_: "default".to_string(),
            spec: serde_json::json!({ "properties": "druid.zk.service.host=zk" }),
        });

        let labels = druid.cluster_labels();
        let cm = druid.new_common_config_map(&labels).unwrap();
        let data = cm.data.unwrap();

        let prop = data.get("common.runtime.properties").unwrap();
        assert!(prop.starts_with("druid.common=1"));
        assert!(prop.contains("druid.zk.service.host=zk"));
        assert_eq!(
            cm.metadata.name.as_deref(),
            Some("test-cluster-druid-common-config")
        );
    }

    #[test]
    fn test_common_config_carries_metric_dimensions() {
        let mut druid = create_test_druid();
        druid.spec.dimensions_map_path = Some(r#"{"query/time":{}}"#.to_string());

        let labels = druid.cluster_labels();
        let cm = druid.new_common_config_map(&labels).unwrap();
        assert!(cm.data.unwrap().contains_key("metricDimensions.json"));
    }

    #[test]
    fn test_node_config_prepends_port_and_resolves_jvm() {
        let mut druid = create_test_druid();
        druid.spec.jvm_options = Some("-Xmx4g".to_string());

        let mut node = druid.spec.nodes.get("brokers").unwrap().clone();
        node.extra_jvm_options = Some("-XX:+UseG1GC".to_string());

        let labels = druid.node_labels(&node, "druid-test-cluster-brokers");
        let cm = druid
            .new_node_config_map(&node, &labels, "druid-test-cluster-brokers")
            .unwrap();
        let data = cm.data.unwrap();

        assert!(
            data.get("runtime.properties")
                .unwrap()
                .starts_with("druid.port=8088\n")
        );
        assert_eq!(data.get("jvm.config").unwrap(), "-Xmx4g\n-XX:+UseG1GC");
        assert!(!data.contains_key("log4j2.xml"));
    }

    #[test]
    fn test_node_jvm_options_override_cluster() {
        let mut druid = create_test_druid();
        druid.spec.jvm_options = Some("-Xmx4g".to_string());

        let mut node = druid.spec.nodes.get("brokers").unwrap().clone();
        node.jvm_options = Some("-Xmx12g".to_string());

        let labels = druid.node_labels(&node, "druid-test-cluster-brokers");
        let cm = druid
            .new_node_config_map(&node, &labels, "druid-test-cluster-brokers")
            .unwrap();

        assert!(
            cm.data
                .unwrap()
                .get("jvm.config")
                .unwrap()
                .starts_with("-Xmx12g")
        );
    }
}
