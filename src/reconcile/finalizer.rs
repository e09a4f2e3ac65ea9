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

//! Cascade deletion. The finalizer blocks CR removal until every
//! statefulset and then every claim of the cluster is gone; claims must go
//! second because a claim cannot be deleted while a pod still references it.

use crate::context::Context;
use crate::reconcile::Error;
use crate::types::v1alpha1::druid::Druid;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use std::collections::BTreeMap;
use tracing::info;

pub const FINALIZER_NAME: &str = "deletepvc.finalizers.druid.apache.org";

fn has_finalizer(drd: &Druid) -> bool {
    drd.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

/// Add the finalizer if it is not present yet. Returns the updated CR so
/// the caller keeps working with the latest resourceVersion.
pub async fn ensure_finalizer(ctx: &Context, drd: &Druid) -> Result<Option<Druid>, Error> {
    if has_finalizer(drd) {
        return Ok(None);
    }

    let ns = drd.namespace()?;
    let mut updated = drd.clone();
    updated
        .metadata
        .finalizers
        .get_or_insert_default()
        .push(FINALIZER_NAME.to_string());

    let updated = ctx.update(&updated, &ns).await?;
    Ok(Some(updated))
}

/// Tear the cluster down in order: statefulsets first, claims second, then
/// release the finalizer so the CR can go away.
pub async fn execute_finalizers(ctx: &Context, drd: &Druid) -> Result<(), Error> {
    if !has_finalizer(drd) {
        return Ok(());
    }

    let ns = drd.namespace()?;

    ctx.record(
        drd,
        EventType::Normal,
        "DruidOperatorFinalizerTriggered",
        &format!("Triggering finalizer for CR [{}] in namespace [{ns}]", drd.name()),
    )
    .await
    .ok();

    let sts_list = ctx
        .list_labeled::<appsv1::StatefulSet>(&ns, &drd.cluster_labels())
        .await?;
    for sts in sts_list.iter() {
        let name = sts.name_any();
        match ctx.delete::<appsv1::StatefulSet>(&name, &ns).await {
            Ok(()) => info!(sts = %name, namespace = %ns, "finalizer deleted statefulset"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let pvc_selector: BTreeMap<String, String> =
        [("druid_cr".to_string(), drd.name())].into_iter().collect();
    let pvc_list = ctx
        .list_labeled::<corev1::PersistentVolumeClaim>(&ns, &pvc_selector)
        .await?;
    for pvc in pvc_list.iter() {
        let name = pvc.name_any();
        match ctx
            .delete::<corev1::PersistentVolumeClaim>(&name, &ns)
            .await
        {
            Ok(()) => info!(pvc = %name, namespace = %ns, "finalizer deleted pvc"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    ctx.record(
        drd,
        EventType::Normal,
        "DruidOperatorFinalizerSuccess",
        &format!("Finalizer success for CR [{}] in namespace [{ns}]", drd.name()),
    )
    .await
    .ok();

    let mut updated = drd.clone();
    if let Some(finalizers) = &mut updated.metadata.finalizers {
        finalizers.retain(|f| f != FINALIZER_NAME);
    }
    ctx.update(&updated, &ns).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::create_test_druid;

    #[test]
    fn test_has_finalizer() {
        let mut druid = create_test_druid();
        assert!(!has_finalizer(&druid));

        druid.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
        assert!(has_finalizer(&druid));
    }

    #[test]
    fn test_finalizer_string_matches_api_contract() {
        assert_eq!(FINALIZER_NAME, "deletepvc.finalizers.druid.apache.org");
    }
}
