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

//! Rollout sequencing: node specs are walked in Druid's prescribed process
//! order, and each step only proceeds once the previous one converged.

use crate::context::Context;
use crate::reconcile::{Error, ReplicaFailureSnafu};
use crate::types::v1alpha1::druid::{Druid, DruidSpec};
use crate::types::v1alpha1::node::{DruidNodeSpec, NodeType, PodManagementPolicy};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use tracing::info;

/// All node specs grouped by process type in the prescribed rollout order:
/// historical, overlord, middleManager, indexer, broker, coordinator,
/// router. Within one type, keys enumerate in map order.
pub fn nodes_in_prescribed_order(spec: &DruidSpec) -> Vec<(&String, &DruidNodeSpec)> {
    let mut ordered = Vec::with_capacity(spec.nodes.len());
    for node_type in NodeType::PRESCRIBED_ORDER {
        ordered.extend(
            spec.nodes
                .iter()
                .filter(|(_, node)| node.node_type == node_type),
        );
    }
    ordered
}

/// A statefulset is fully deployed once every pod runs the update revision
/// and reports ready.
pub async fn is_sts_fully_deployed(
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<bool, Error> {
    let sts: appsv1::StatefulSet = ctx.get(name, namespace).await?;
    let Some(status) = sts.status else {
        return Ok(false);
    };

    Ok(status.current_revision.is_some()
        && status.current_revision == status.update_revision
        && status.current_replicas.unwrap_or(0) == status.ready_replicas.unwrap_or(0))
}

/// A deployment is fully deployed when it is progressing without replica
/// failures and all replicas are ready. A `ReplicaFailure` condition is
/// surfaced as an error for the user to remediate.
pub async fn is_deployment_fully_deployed(
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<bool, Error> {
    let deployment: appsv1::Deployment = ctx.get(name, namespace).await?;
    let Some(status) = deployment.status else {
        return Ok(false);
    };

    let conditions = status.conditions.unwrap_or_default();

    if let Some(failure) = conditions
        .iter()
        .find(|c| c.type_ == "ReplicaFailure" && c.status == "True")
    {
        return ReplicaFailureSnafu {
            name,
            reason: failure.reason.clone().unwrap_or_default(),
        }
        .fail();
    }

    let progressing = conditions
        .iter()
        .any(|c| c.type_ == "Progressing" && c.status == "True");

    Ok(progressing && status.ready_replicas.unwrap_or(0) == status.replicas.unwrap_or(0))
}

/// Under OrderedReady pod management a crashlooping pod blocks every pod
/// behind it forever; with `forceDeleteStsPodOnError` set the operator
/// deletes such pods so the statefulset controller can recreate them.
pub async fn check_crash_status(
    ctx: &Context,
    drd: &Druid,
    node_spec: &DruidNodeSpec,
) -> Result<(), Error> {
    if !drd.spec.force_delete_sts_pod_on_error {
        return Ok(());
    }

    let policy = node_spec
        .pod_management_policy
        .or(drd.spec.pod_management_policy)
        .unwrap_or_default();
    if policy != PodManagementPolicy::OrderedReady {
        return Ok(());
    }

    let ns = drd.namespace()?;
    let pods = ctx
        .list_labeled::<corev1::Pod>(&ns, &drd.cluster_labels())
        .await?;

    for pod in pods {
        let Some(status) = &pod.status else { continue };

        let restarted = status
            .container_statuses
            .as_ref()
            .and_then(|cs| cs.first())
            .is_some_and(|c| c.restart_count > 1);
        if !restarted {
            continue;
        }

        let not_running = status.phase.as_deref() != Some("Running");
        let containers_not_ready = status
            .conditions
            .as_ref()
            .into_iter()
            .flatten()
            .any(|c| c.type_ == "ContainersReady" && c.status == "False");

        if not_running || containers_not_ready {
            let pod_name = pod.name_any();
            match ctx.delete::<corev1::Pod>(&pod_name, &ns).await {
                Ok(()) => {
                    info!(pod = %pod_name, namespace = %ns, "deleted crashlooping pod");
                    ctx.record(
                        drd,
                        EventType::Normal,
                        "DruidNodeDeleteSuccess",
                        &format!("Deleted crashlooping pod [{pod_name}]"),
                    )
                    .await
                    .ok();
                }
                Err(e) => {
                    ctx.record(
                        drd,
                        EventType::Warning,
                        "DruidNodeDeleteFail",
                        &format!("Failed to delete crashlooping pod [{pod_name}]: {e}"),
                    )
                    .await
                    .ok();
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
