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

//! Decommission-aware replacement of historical pods.
//!
//! Instead of a blind rolling update, the statefulset is switched to
//! OnDelete, scaled up by one batch, and then old pods are handed to the
//! Druid coordinator for segment drain before they are deleted batch by
//! batch. All progress lives in `status.historical`, so any step can be
//! resumed after a crash from what is persisted there.

use crate::config;
use crate::context::Context;
use crate::druid_client::{DECOMMISSIONING_NODES_KEY, DruidClient};
use crate::reconcile::{CoordinatorSnafu, Error};
use crate::types::v1alpha1::druid::Druid;
use crate::types::v1alpha1::node::{DruidNodeSpec, NodeType};
use crate::types::v1alpha1::status::HistoricalStatus;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use snafu::ResultExt;
use std::collections::BTreeMap;
use tracing::info;

const DRUID_USER_NAME: &str = "admin";

/// Base URL of the coordinator API, derived from the first coordinator node
/// spec. None when the CR declares no coordinator.
pub fn coordinator_base_url(drd: &Druid) -> Option<String> {
    drd.spec
        .nodes
        .iter()
        .find(|(_, node)| node.node_type == NodeType::Coordinator)
        .map(|(key, node)| {
            format!("http://{}:{}", drd.node_unique_name(key), node.druid_port)
        })
}

/// Pod names sorted by statefulset ordinal, so that index N addresses pod
/// `<sts>-N` even beyond ten replicas.
fn sort_by_ordinal(pod_names: &mut [String]) {
    fn ordinal(name: &str) -> i64 {
        name.rsplit_once('-')
            .and_then(|(_, ord)| ord.parse().ok())
            .unwrap_or(i64::MAX)
    }
    pod_names.sort_by(|a, b| ordinal(a).cmp(&ordinal(b)).then_with(|| a.cmp(b)));
}

async fn patch_historical_status(
    ctx: &Context,
    drd: &Druid,
    hist: &HistoricalStatus,
) -> Result<(), Error> {
    // decommissionedPods must be written even when None, so the merge patch
    // clears a finished batch instead of leaving the old list behind.
    ctx.patch_status_merge(
        drd,
        serde_json::json!({
            "status": {
                "historical": {
                    "replica": hist.replica,
                    "currentBatch": hist.current_batch,
                    "decommissionedPods": hist.decommissioned_pods,
                }
            }
        }),
    )
    .await?;
    Ok(())
}

/// Drive one transition of the drain state machine. Returns true while a
/// session is still in flight and the tick should requeue.
pub async fn deploy_historical(
    ctx: &Context,
    drd: &Druid,
    node_spec: &DruidNodeSpec,
    unique_str: &str,
) -> Result<bool, Error> {
    let Some(deployment_config) = &node_spec.deployment_config else {
        return Ok(false);
    };
    let batch_size = deployment_config.batch_size.max(1);

    let Some(base_url) = coordinator_base_url(drd) else {
        ctx.record(
            drd,
            EventType::Warning,
            "DruidOperatorDrainSkipped",
            "historical drain requires a coordinator node spec",
        )
        .await
        .ok();
        return Ok(false);
    };

    let ns = drd.namespace()?;
    let mut hist = drd
        .status
        .as_ref()
        .map(|s| s.historical.clone())
        .unwrap_or_default();

    // A node scaled to zero has nothing to drain.
    if node_spec.replicas == 0 && !hist.session_active() {
        return Ok(false);
    }

    if hist.current_batch == 0 {
        if hist.replica == 0 {
            // Idle -> ScaledUp: pin pods in place and add one batch of
            // fresh capacity. The status snapshot is written after the
            // scale patch, so a crash in between replays the same patch.
            let scaled_replica = node_spec.replicas + batch_size;

            ctx.patch_merge::<appsv1::StatefulSet>(
                unique_str,
                &ns,
                serde_json::json!({ "spec": { "updateStrategy": { "type": "OnDelete" } } }),
            )
            .await?;
            ctx.patch_merge::<appsv1::StatefulSet>(
                unique_str,
                &ns,
                serde_json::json!({ "spec": { "replicas": scaled_replica } }),
            )
            .await?;

            hist = HistoricalStatus {
                replica: scaled_replica,
                current_batch: 0,
                decommissioned_pods: None,
            };
            patch_historical_status(ctx, drd, &hist).await?;
            return Ok(true);
        }

        if hist.decommissioned_pods.is_none() {
            // ScaledUp: the first batch of fresh pods may not be up yet.
            let sts: appsv1::StatefulSet = ctx.get(unique_str, &ns).await?;
            let status = sts.status.unwrap_or_default();
            if status.replicas != hist.replica
                || status.ready_replicas.unwrap_or(0) != status.current_replicas.unwrap_or(0)
            {
                info!(
                    sts = %unique_str,
                    namespace = %ns,
                    "scale-up roll out in progress, CurrentReplicas[{}] != ReadyReplicas[{}]",
                    status.current_replicas.unwrap_or(0),
                    status.ready_replicas.unwrap_or(0)
                );
                return Ok(true);
            }
        }
    }

    let original_replica = hist.replica - batch_size;
    if original_replica <= 0 {
        patch_historical_status(ctx, drd, &HistoricalStatus::default()).await?;
        return Ok(false);
    }
    let batch_count = original_replica / batch_size + 1;

    if hist.current_batch >= batch_count {
        // Advance -> Idle: every batch replaced.
        patch_historical_status(ctx, drd, &HistoricalStatus::default()).await?;
        ctx.record(
            drd,
            EventType::Normal,
            "DruidOperatorDrainComplete",
            &format!("historical drain of [sts:{unique_str}] finished"),
        )
        .await
        .ok();
        return Ok(false);
    }

    let node_labels = drd.node_labels(node_spec, unique_str);
    let pods = ctx.list_labeled::<corev1::Pod>(&ns, &node_labels).await?;
    let mut pod_names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
    sort_by_ordinal(&mut pod_names);

    let start_pod = hist.current_batch * batch_size;
    let end_pod = (start_pod + batch_size - 1).min(original_replica - 1);
    if start_pod > end_pod {
        // The final batch is empty when batchSize divides the replica count
        // evenly; the session is done.
        patch_historical_status(ctx, drd, &HistoricalStatus::default()).await?;
        return Ok(false);
    }
    if end_pod as usize >= pod_names.len() {
        // The pod list has not caught up with the scale yet.
        return Ok(true);
    }
    let batch_range = start_pod as usize..=end_pod as usize;

    let druid = DruidClient::new(&base_url, DRUID_USER_NAME, &config::druid_password());

    if hist.decommissioned_pods.is_none() {
        // MarkingDecommission: hand this batch to the coordinator.
        let batch: Vec<String> = pod_names[batch_range.clone()].to_vec();

        let mut coordinator_config =
            druid.coordinator_config().await.context(CoordinatorSnafu)?;
        coordinator_config.insert(
            DECOMMISSIONING_NODES_KEY.to_string(),
            serde_json::json!(batch),
        );
        druid
            .update_coordinator_config(&coordinator_config)
            .await
            .context(CoordinatorSnafu)?;

        hist.decommissioned_pods = Some(batch.clone());
        patch_historical_status(ctx, drd, &hist).await?;
        ctx.record(
            drd,
            EventType::Normal,
            "DruidOperatorDrainStarted",
            &format!("decommissioning pods {batch:?}"),
        )
        .await
        .ok();
    }

    // Draining: every pod in the batch must report zero segment bytes.
    let usage = druid.historical_usage().await.context(CoordinatorSnafu)?;
    let drained = pod_names[batch_range.clone()]
        .iter()
        .all(|pod| usage.get(pod).copied() == Some(0));
    if !drained {
        info!(name = %drd.name(), namespace = %ns, "waiting for pods to drain");
        return Ok(true);
    }

    // DeletingPods: pop one name at a time so a crash resumes mid-batch.
    let mut remaining = hist.decommissioned_pods.clone().unwrap_or_default();
    while let Some(pod_name) = remaining.first().cloned() {
        match ctx.delete::<corev1::Pod>(&pod_name, &ns).await {
            Ok(()) => info!(pod = %pod_name, namespace = %ns, "deleted drained pod"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        remaining.remove(0);
        hist.decommissioned_pods = Some(remaining.clone());
        patch_historical_status(ctx, drd, &hist).await?;
    }

    // DeletingClaims: claims of the drained ordinals go with their pods.
    let pvc_selector: BTreeMap<String, String> = [
        ("druid_cr".to_string(), drd.name()),
        ("nodeSpecUniqueStr".to_string(), unique_str.to_string()),
        ("component".to_string(), node_spec.node_type.to_string()),
    ]
    .into_iter()
    .collect();
    let claims = ctx
        .list_labeled::<corev1::PersistentVolumeClaim>(&ns, &pvc_selector)
        .await?;

    for pod_name in &pod_names[batch_range] {
        let suffix = format!("-{pod_name}");
        for claim in claims.iter().filter(|c| c.name_any().ends_with(&suffix)) {
            let claim_name = claim.name_any();
            match ctx
                .delete::<corev1::PersistentVolumeClaim>(&claim_name, &ns)
                .await
            {
                Ok(()) => info!(pvc = %claim_name, namespace = %ns, "deleted drained pod pvc"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    hist.current_batch += 1;
    hist.decommissioned_pods = None;

    if hist.current_batch >= batch_count {
        patch_historical_status(ctx, drd, &HistoricalStatus::default()).await?;
        ctx.record(
            drd,
            EventType::Normal,
            "DruidOperatorDrainComplete",
            &format!("historical drain of [sts:{unique_str}] finished"),
        )
        .await
        .ok();
        return Ok(false);
    }

    patch_historical_status(ctx, drd, &hist).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{broker_node, create_test_druid, node_of_type};

    #[test]
    fn test_batch_arithmetic() {
        // replicas snapshot 4 after scale-up, batch 1: original 3, four
        // batch indexes before the loop ends.
        let replica = 4;
        let batch_size = 1;
        let original = replica - batch_size;
        assert_eq!(original, 3);
        assert_eq!(original / batch_size + 1, 4);
    }

    #[test]
    fn test_end_pod_clamped_when_batch_exceeds_replicas() {
        // replicas 2, batch 5: snapshot 7 after scale-up, original 2; the
        // only batch must stop at pod index 1.
        let original_replica = 2;
        let batch_size = 5;
        let current_batch = 0;

        let start_pod = current_batch * batch_size;
        let end_pod = (start_pod + batch_size - 1).min(original_replica - 1);

        assert_eq!(start_pod, 0);
        assert_eq!(end_pod, 1);
    }

    #[test]
    fn test_last_batch_clamps_to_original_replica() {
        let original_replica = 5;
        let batch_size = 2;

        // Third batch (index 2) covers pods 4..5 but only pod 4 exists.
        let start_pod = 2 * batch_size;
        let end_pod = (start_pod + batch_size - 1).min(original_replica - 1);
        assert_eq!((start_pod, end_pod), (4, 4));
    }

    #[test]
    fn test_pod_ordinal_sort() {
        let mut pods: Vec<String> = ["druid-x-historicals-10", "druid-x-historicals-2", "druid-x-historicals-0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        sort_by_ordinal(&mut pods);
        assert_eq!(
            pods,
            vec![
                "druid-x-historicals-0",
                "druid-x-historicals-2",
                "druid-x-historicals-10"
            ]
        );
    }

    #[test]
    fn test_coordinator_base_url_from_first_coordinator_node() {
        let mut druid = create_test_druid();
        druid
            .spec
            .nodes
            .insert("coordinators".to_string(), node_of_type(NodeType::Coordinator));

        assert_eq!(
            coordinator_base_url(&druid).unwrap(),
            "http://druid-test-cluster-coordinators:8081"
        );
    }

    #[test]
    fn test_no_coordinator_means_no_url() {
        let mut druid = create_test_druid();
        druid.spec.nodes.clear();
        druid.spec.nodes.insert("brokers".to_string(), broker_node(1));

        assert!(coordinator_base_url(&druid).is_none());
    }
}
