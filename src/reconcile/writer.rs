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

//! Hash-gated writes. The desired object's canonical JSON is digested into
//! the `druidOpResourceHash` annotation; a write only happens when the stored
//! hash differs or a kind-specific equality predicate dissents.

use crate::context::{Context, Error};
use crate::types::v1alpha1::druid::Druid;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use tracing::{info, warn};

pub const RESOURCE_HASH_ANNOTATION: &str = "druidOpResourceHash";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyResult {
    Created,
    Updated,
    Unchanged,
}

/// base64(SHA-1(canonical JSON)). k8s-openapi objects serialize maps as
/// BTreeMaps, so the canonical form is stable under key-insertion order.
pub fn object_hash<T: Serialize>(obj: &T) -> Result<String, Error> {
    let bytes = serde_json::to_vec(obj)?;
    Ok(BASE64.encode(Sha1::digest(&bytes)))
}

fn stored_hash<T: Resource>(obj: &T) -> String {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(RESOURCE_HASH_ANNOTATION))
        .cloned()
        .unwrap_or_default()
}

pub fn always_equal<T>(_prev: &T, _desired: &T) -> bool {
    // Replica counts deliberately do not participate in equality; an HPA may
    // legitimately scale the workload and the operator must not undo it.
    true
}

pub fn noop_preserve<T>(_prev: &T, _desired: &mut T) {}

pub fn preserve_cluster_ip(prev: &corev1::Service, desired: &mut corev1::Service) {
    if let (Some(prev_spec), Some(desired_spec)) = (&prev.spec, desired.spec.as_mut()) {
        desired_spec.cluster_ip = prev_spec.cluster_ip.clone();
    }
}

pub fn preserve_sts_replicas(prev: &appsv1::StatefulSet, desired: &mut appsv1::StatefulSet) {
    if let (Some(prev_spec), Some(desired_spec)) = (&prev.spec, desired.spec.as_mut())
        && prev_spec.replicas.is_some()
    {
        desired_spec.replicas = prev_spec.replicas;
    }
}

pub fn preserve_deployment_replicas(prev: &appsv1::Deployment, desired: &mut appsv1::Deployment) {
    if let (Some(prev_spec), Some(desired_spec)) = (&prev.spec, desired.spec.as_mut())
        && prev_spec.replicas.is_some()
    {
        desired_spec.replicas = prev_spec.replicas;
    }
}

/// Apply one desired child object with minimum-work semantics.
pub async fn create_or_update<T>(
    ctx: &Context,
    drd: &Druid,
    mut desired: T,
    names: &mut BTreeSet<String>,
    is_equal: fn(&T, &T) -> bool,
    preserve: fn(&T, &mut T),
) -> Result<ApplyResult, Error>
where
    T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    let ns = drd.namespace()?;
    let kind = T::kind(&Default::default()).to_string();

    desired.meta_mut().owner_references = Some(vec![drd.new_owner_ref()]);

    let hash = object_hash(&desired)?;
    desired
        .meta_mut()
        .annotations
        .get_or_insert_default()
        .insert(RESOURCE_HASH_ANNOTATION.to_string(), hash.clone());

    let name = desired.name_any();
    names.insert(name.clone());

    let prev = match ctx.get::<T>(&name, &ns).await {
        Ok(prev) => prev,
        Err(e) if e.is_not_found() => {
            return match ctx.create(&desired, &ns).await {
                Ok(_) => {
                    info!(%kind, %name, namespace = %ns, "created resource");
                    ctx.record(
                        drd,
                        EventType::Normal,
                        "DruidOperatorCreateSuccess",
                        &format!("Created [{kind}:{name}]"),
                    )
                    .await
                    .ok();
                    Ok(ApplyResult::Created)
                }
                Err(e) => {
                    ctx.record(
                        drd,
                        EventType::Warning,
                        "DruidOperatorCreateFail",
                        &format!("Failed to create [{kind}:{name}]: {e}"),
                    )
                    .await
                    .ok();
                    Err(e)
                }
            };
        }
        Err(e) => {
            ctx.record(
                drd,
                EventType::Warning,
                "DruidOperatorGetFail",
                &format!("Failed to get [{kind}:{name}]: {e}"),
            )
            .await
            .ok();
            return Err(e);
        }
    };

    if stored_hash(&prev) == hash && is_equal(&prev, &desired) {
        return Ok(ApplyResult::Unchanged);
    }

    desired.meta_mut().resource_version = prev.meta().resource_version.clone();
    preserve(&prev, &mut desired);

    match ctx.update(&desired, &ns).await {
        Ok(_) => {
            info!(%kind, %name, namespace = %ns, "updated resource");
            ctx.record(
                drd,
                EventType::Normal,
                "DruidOperatorUpdateSuccess",
                &format!("Updated [{kind}:{name}]"),
            )
            .await
            .ok();
            Ok(ApplyResult::Updated)
        }
        Err(e) => {
            ctx.record(
                drd,
                EventType::Warning,
                "DruidOperatorUpdateFail",
                &format!("Failed to update [{kind}:{name}]: {e}"),
            )
            .await
            .ok();
            Err(e)
        }
    }
}

/// Delete every object of kind `T` labeled for this cluster that the current
/// tick did not materialize, and return the sorted surviving names for
/// status. Objects that fail to delete survive until the next tick.
pub async fn delete_unused<T>(
    ctx: &Context,
    drd: &Druid,
    names: &BTreeSet<String>,
    selector: &BTreeMap<String, String>,
) -> Vec<String>
where
    T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    let kind = T::kind(&Default::default()).to_string();
    let Ok(ns) = drd.namespace() else {
        return Vec::new();
    };

    let list = match ctx.list_labeled::<T>(&ns, selector).await {
        Ok(list) => list,
        Err(e) => {
            warn!(%kind, namespace = %ns, error = %e, "failed to list resources");
            ctx.record(
                drd,
                EventType::Warning,
                "DruidOperatorListFail",
                &format!("Failed to list [{kind}]: {e}"),
            )
            .await
            .ok();
            return Vec::new();
        }
    };

    let mut survivors = Vec::with_capacity(names.len());
    for item in list {
        let item_name = item.name_any();
        if names.contains(&item_name) {
            survivors.push(item_name);
            continue;
        }

        match ctx.delete::<T>(&item_name, &ns).await {
            Ok(()) => {
                info!(%kind, name = %item_name, namespace = %ns, "deleted unused resource");
                ctx.record(
                    drd,
                    EventType::Normal,
                    "DruidOperatorDeleteSuccess",
                    &format!("Deleted unused [{kind}:{item_name}]"),
                )
                .await
                .ok();
            }
            Err(e) => {
                ctx.record(
                    drd,
                    EventType::Warning,
                    "DruidOperatorDeleteFail",
                    &format!("Failed to delete [{kind}:{item_name}]: {e}"),
                )
                .await
                .ok();
                survivors.push(item_name);
            }
        }
    }

    survivors.sort();
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{create_test_druid, historical_node};

    #[test]
    fn test_hash_is_stable_across_runs() {
        let druid = create_test_druid();
        let node = historical_node(2);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let a = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);
        let b = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);

        assert_eq!(object_hash(&a).unwrap(), object_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_changes_on_semantic_edit() {
        let druid = create_test_druid();
        let node = historical_node(2);
        let unique = druid.node_unique_name("historicals");
        let labels = druid.node_labels(&node, &unique);

        let base = druid.new_stateful_set(&node, &labels, &unique, "sha", &unique);

        let mut bumped = historical_node(2);
        bumped.jvm_options = Some("-Xmx16g".to_string());
        let changed = druid.new_stateful_set(&bumped, &labels, &unique, "sha-2", &unique);

        assert_ne!(object_hash(&base).unwrap(), object_hash(&changed).unwrap());
    }

    #[test]
    fn test_hash_ignores_map_insertion_order() {
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), "1".to_string());
        forward.insert("b".to_string(), "2".to_string());

        let mut reverse = BTreeMap::new();
        reverse.insert("b".to_string(), "2".to_string());
        reverse.insert("a".to_string(), "1".to_string());

        assert_eq!(
            object_hash(&forward).unwrap(),
            object_hash(&reverse).unwrap()
        );
    }

    #[test]
    fn test_hash_matches_sha1_base64_form() {
        // base64(SHA-1("{}")) for an empty JSON object.
        let empty: BTreeMap<String, String> = BTreeMap::new();
        let hash = object_hash(&empty).unwrap();
        assert_eq!(hash, BASE64.encode(Sha1::digest(b"{}")));
    }

    #[test]
    fn test_preserve_cluster_ip() {
        let prev = corev1::Service {
            spec: Some(corev1::ServiceSpec {
                cluster_ip: Some("10.0.0.42".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut desired = corev1::Service {
            spec: Some(corev1::ServiceSpec::default()),
            ..Default::default()
        };

        preserve_cluster_ip(&prev, &mut desired);
        assert_eq!(
            desired.spec.unwrap().cluster_ip.as_deref(),
            Some("10.0.0.42")
        );
    }

    #[test]
    fn test_preserve_sts_replicas_honors_external_scaling() {
        let prev = appsv1::StatefulSet {
            spec: Some(appsv1::StatefulSetSpec {
                replicas: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut desired = appsv1::StatefulSet {
            spec: Some(appsv1::StatefulSetSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };

        preserve_sts_replicas(&prev, &mut desired);
        assert_eq!(desired.spec.unwrap().replicas, Some(7));
    }
}
