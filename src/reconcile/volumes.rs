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

//! Volume lifecycle: in-place claim expansion (shrink rejected), orphan
//! statefulset replacement when template sizes change, and garbage
//! collection of claims no running pod references.

use crate::context::Context;
use crate::reconcile::{Error, PvcShrinkRejectedSnafu};
use crate::types::v1alpha1::druid::Druid;
use crate::types::v1alpha1::node::DruidNodeSpec;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::storage::v1 as storagev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Parse a Kubernetes resource quantity into bytes. Supports the binary and
/// decimal suffixes that appear in storage requests; anything else is
/// considered unparsable and compared as a raw string by the caller.
pub fn parse_quantity(quantity: &Quantity) -> Option<i64> {
    let s = quantity.0.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let value: i64 = digits.parse().ok()?;

    let multiplier: i64 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        _ => return None,
    };

    value.checked_mul(multiplier)
}

fn storage_request(spec: Option<&corev1::PersistentVolumeClaimSpec>) -> Option<Quantity> {
    spec?.resources.as_ref()?.requests.as_ref()?.get("storage").cloned()
}

/// Expansion only runs when the storage class behind at least one of the
/// node's claim templates allows it.
pub async fn is_volume_expansion_enabled(
    ctx: &Context,
    node_spec: &DruidNodeSpec,
) -> bool {
    for template in node_spec.volume_claim_templates.iter().flatten() {
        let Some(sc_name) = template
            .spec
            .as_ref()
            .and_then(|s| s.storage_class_name.as_deref())
        else {
            continue;
        };

        match ctx.get_cluster_scoped::<storagev1::StorageClass>(sc_name).await {
            Ok(sc) if sc.allow_volume_expansion == Some(true) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
    false
}

/// Compare the CR's claim template sizes against the live statefulset and
/// its claims. Shrinks are fatal; a genuine grow deletes the statefulset
/// with orphan propagation (pods keep running, the next tick recreates it
/// with the new templates) and patches every claim up to the desired size.
pub async fn expand_statefulset_volumes(
    ctx: &Context,
    drd: &Druid,
    node_spec: &DruidNodeSpec,
    unique_str: &str,
) -> Result<(), Error> {
    let ns = drd.namespace()?;

    // Wait for full quiescence; replacing a statefulset mid-rollout loses
    // track of which pods carry which revision.
    let all_sts = ctx
        .list_labeled::<appsv1::StatefulSet>(&ns, &drd.cluster_labels())
        .await?;
    for sts in &all_sts {
        let status = sts.status.clone().unwrap_or_default();
        if status.replicas != status.ready_replicas.unwrap_or(0) {
            return Ok(());
        }
    }

    // The statefulset may not exist yet (e.g. right after an orphan
    // delete); the materialize path will recreate it.
    let Ok(sts) = ctx.get::<appsv1::StatefulSet>(unique_str, &ns).await else {
        return Ok(());
    };

    let pvc_selector: BTreeMap<String, String> = [
        ("druid_cr".to_string(), drd.name()),
        ("component".to_string(), node_spec.node_type.to_string()),
    ]
    .into_iter()
    .collect();
    let Ok(claims) = ctx
        .list_labeled::<corev1::PersistentVolumeClaim>(&ns, &pvc_selector)
        .await
    else {
        return Ok(());
    };

    let desired_templates = drd.claim_templates(node_spec);
    let live_templates = sts
        .spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.clone())
        .unwrap_or_default();

    // A fresh statefulset may not have materialized all claims yet.
    if claims.items.len() < desired_templates.len() {
        return Ok(());
    }

    for (index, desired_template) in desired_templates.iter().enumerate() {
        let Some(live_template) = live_templates.get(index) else {
            continue;
        };

        let Some(desired_size) = storage_request(desired_template.spec.as_ref()) else {
            continue;
        };
        let Some(live_size) = storage_request(live_template.spec.as_ref()) else {
            continue;
        };

        let desired_bytes = parse_quantity(&desired_size);
        let live_bytes = parse_quantity(&live_size);

        if let (Some(desired_bytes), Some(live_bytes)) = (desired_bytes, live_bytes)
            && desired_bytes < live_bytes
        {
            ctx.record(
                drd,
                EventType::Warning,
                "DruidOperatorPvcReSizeFail",
                &format!(
                    "Shrinking sts pvc size from [{}] to [{}] for [sts:{unique_str}] is not supported",
                    live_size.0, desired_size.0
                ),
            )
            .await
            .ok();
            return PvcShrinkRejectedSnafu { name: unique_str }.fail();
        }

        if desired_bytes != live_bytes || (desired_bytes.is_none() && desired_size != live_size) {
            let msg = format!(
                "Detected change in volumeClaimTemplate size for [sts:{unique_str}]: desired [{}], current [{}]; deleting sts with cascade=false",
                desired_size.0, live_size.0
            );
            info!(name = %drd.name(), namespace = %ns, "{msg}");
            ctx.record(drd, EventType::Normal, "DruidOperatorPvcReSizeDetected", &msg)
                .await
                .ok();

            ctx.delete_orphan::<appsv1::StatefulSet>(unique_str, &ns)
                .await?;
            ctx.record(
                drd,
                EventType::Normal,
                "DruidOperatorStsOrphaned",
                &format!("[sts:{unique_str}] deleted with cascade=false"),
            )
            .await
            .ok();
        }

        // Patch every claim born from this template whose size lags behind.
        let template_prefix = format!(
            "{}-",
            desired_template.metadata.name.as_deref().unwrap_or_default()
        );
        for claim in claims.iter().filter(|c| c.name_any().starts_with(&template_prefix)) {
            let Some(claim_size) = storage_request(claim.spec.as_ref()) else {
                continue;
            };
            if parse_quantity(&claim_size) == desired_bytes {
                continue;
            }

            let claim_name = claim.name_any();
            ctx.patch_merge::<corev1::PersistentVolumeClaim>(
                &claim_name,
                &ns,
                serde_json::json!({
                    "spec": { "resources": { "requests": { "storage": desired_size.0 } } }
                }),
            )
            .await?;
            info!(
                pvc = %claim_name,
                size = %desired_size.0,
                namespace = %ns,
                "patched pvc to new size"
            );
        }
    }

    Ok(())
}

/// Delete claims labeled for this cluster that no running pod mounts. Only
/// runs when every pod is Running with all conditions True, so a pod that is
/// starting up cannot lose its claim.
pub async fn delete_orphan_claims(ctx: &Context, drd: &Druid) -> Result<(), Error> {
    let ns = drd.namespace()?;

    let pods = ctx
        .list_labeled::<corev1::Pod>(&ns, &drd.cluster_labels())
        .await?;

    for pod in &pods {
        let status = pod.status.clone().unwrap_or_default();
        if status.phase.as_deref() != Some("Running") {
            return Ok(());
        }
        for condition in status.conditions.unwrap_or_default() {
            if condition.status != "True" {
                return Ok(());
            }
        }
    }

    let mut mounted = BTreeSet::new();
    for pod in &pods {
        if pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Pending") {
            continue;
        }
        for volume in pod.spec.iter().flat_map(|s| s.volumes.iter().flatten()) {
            if let Some(pvc) = &volume.persistent_volume_claim {
                mounted.insert(pvc.claim_name.clone());
            }
        }
    }

    let pvc_selector: BTreeMap<String, String> =
        [("druid_cr".to_string(), drd.name())].into_iter().collect();
    let claims = ctx
        .list_labeled::<corev1::PersistentVolumeClaim>(&ns, &pvc_selector)
        .await?;

    for claim in claims {
        let claim_name = claim.name_any();
        if mounted.contains(&claim_name) {
            continue;
        }

        match ctx
            .delete::<corev1::PersistentVolumeClaim>(&claim_name, &ns)
            .await
        {
            Ok(()) => {
                info!(pvc = %claim_name, namespace = %ns, "deleted orphaned pvc");
                ctx.record(
                    drd,
                    EventType::Normal,
                    "DruidOperatorDeleteSuccess",
                    &format!("Deleted orphaned pvc [{claim_name}]"),
                )
                .await
                .ok();
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(pvc = %claim_name, error = %e, "failed to delete orphaned pvc");
                return Err(e.into());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity_suffixes() {
        assert_eq!(parse_quantity(&Quantity("100".to_string())), Some(100));
        assert_eq!(
            parse_quantity(&Quantity("100Gi".to_string())),
            Some(100 * (1 << 30))
        );
        assert_eq!(
            parse_quantity(&Quantity("5Ti".to_string())),
            Some(5 * (1i64 << 40))
        );
        assert_eq!(parse_quantity(&Quantity("2G".to_string())), Some(2_000_000_000));
        assert_eq!(parse_quantity(&Quantity("1.5Gi".to_string())), None);
        assert_eq!(parse_quantity(&Quantity("".to_string())), None);
    }

    #[test]
    fn test_shrink_detection_orders_sizes_correctly() {
        let bigger = parse_quantity(&Quantity("100Gi".to_string())).unwrap();
        let smaller = parse_quantity(&Quantity("50Gi".to_string())).unwrap();
        assert!(smaller < bigger);

        // Decimal vs binary suffix comparison holds under byte parsing.
        let decimal = parse_quantity(&Quantity("100G".to_string())).unwrap();
        assert!(decimal < bigger);
    }
}
