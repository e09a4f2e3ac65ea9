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

//! Pluggable configuration snippets for Druid's external dependencies.
//!
//! ZooKeeper, the metadata store and deep storage are not managed by the
//! operator; each spec only contributes a block of runtime properties that is
//! appended to `common.runtime.properties`. The `default` type expects the
//! raw spec to carry a `properties` string.

use crate::types::error::{DependencyPropertiesMissingSnafu, Error, UnknownDependencyTypeSnafu};
use kube::KubeSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema)]
pub struct ZookeeperSpec {
    #[serde(rename = "type")]
    pub type_: String,

    pub spec: serde_json::Value,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema)]
pub struct MetadataStoreSpec {
    #[serde(rename = "type")]
    pub type_: String,

    pub spec: serde_json::Value,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema)]
pub struct DeepStorageSpec {
    #[serde(rename = "type")]
    pub type_: String,

    pub spec: serde_json::Value,
}

impl ZookeeperSpec {
    pub fn configuration(&self) -> Result<String, Error> {
        properties_configuration("zookeeper", &self.type_, &self.spec)
    }
}

impl MetadataStoreSpec {
    pub fn configuration(&self) -> Result<String, Error> {
        properties_configuration("metadataStore", &self.type_, &self.spec)
    }
}

impl DeepStorageSpec {
    pub fn configuration(&self) -> Result<String, Error> {
        properties_configuration("deepStorage", &self.type_, &self.spec)
    }
}

fn properties_configuration(
    dependency: &str,
    type_name: &str,
    spec: &serde_json::Value,
) -> Result<String, Error> {
    if type_name != "default" {
        return UnknownDependencyTypeSnafu {
            dependency,
            type_name,
        }
        .fail();
    }

    spec.get("properties")
        .and_then(|p| p.as_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            DependencyPropertiesMissingSnafu {
                dependency,
                type_name,
            }
            .build()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_type_reads_properties() {
        let zk = ZookeeperSpec {
            type_: "default".to_string(),
            spec: serde_json::json!({ "properties": "my-zookeeper-config" }),
        };

        assert_eq!(zk.configuration().unwrap(), "my-zookeeper-config");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let ds = DeepStorageSpec {
            type_: "s3-managed".to_string(),
            spec: serde_json::json!({}),
        };

        let err = ds.configuration().unwrap_err();
        assert!(matches!(err, Error::UnknownDependencyType { .. }));
    }

    #[test]
    fn test_missing_properties_rejected() {
        let ms = MetadataStoreSpec {
            type_: "default".to_string(),
            spec: serde_json::json!({ "connectURI": "jdbc:postgresql://db" }),
        };

        let err = ms.configuration().unwrap_err();
        assert!(matches!(err, Error::DependencyPropertiesMissing { .. }));
    }
}
