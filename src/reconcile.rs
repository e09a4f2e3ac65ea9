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

//! The reconcile tick: validate the CR, materialize children in the
//! prescribed order with per-step rollout gates, then project the observed
//! state back into the CR status.

pub mod drain;
pub mod finalizer;
pub mod sequence;
pub mod volumes;
pub mod writer;

use crate::context::Context;
use crate::types::v1alpha1::druid::Druid;
use crate::types::v1alpha1::node::{DeploymentMode, NodeType, WorkloadKind};
use crate::types::v1alpha1::status::{
    DruidClusterStatus, DruidNodeConditionType, DruidNodeTypeStatus,
};
use crate::util::first_some;
use crate::{context, druid_client, types};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::autoscaling::v2 as autoscalingv2;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as networkingv1;
use k8s_openapi::api::policy::v1 as policyv1;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use writer::ApplyResult;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(display("Druid coordinator API error: {}", source))]
    Coordinator { source: druid_client::Error },

    #[snafu(display("shrinking of sts pvc size for [sts:{}] is not supported", name))]
    PvcShrinkRejected { name: String },

    #[snafu(display("deployment [{}] reported replica failure: {}", name, reason))]
    ReplicaFailure { name: String, reason: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Context { source } if source.is_not_found())
    }
}

pub async fn reconcile_druid(druid: Arc<Druid>, ctx: Arc<Context>) -> Result<Action, Error> {
    let requeue = Action::requeue(ctx.settings().reconcile_wait);
    let ns = druid.namespace()?;

    if ctx.settings().is_denied(&ns) {
        info!(
            namespace = %ns,
            "namespace is deny-listed, alter DENY_LIST to reconcile"
        );
        return Ok(Action::await_change());
    }

    // Work against the freshest CR; the watch event may be stale.
    let drd = match ctx.get::<Druid>(&druid.name(), &ns).await {
        Ok(d) => d,
        Err(e) if e.is_not_found() => return Ok(Action::await_change()),
        Err(e) => return Err(e.into()),
    };

    if drd.spec.ignored || drd.is_marked_ignored() {
        return Ok(Action::await_change());
    }

    if let Err(e) = drd.validate() {
        ctx.record(
            &drd,
            EventType::Warning,
            "DruidOperatorInvalidSpec",
            &format!("invalid DruidSpec[{}:{}]: {e}", ns, drd.name()),
        )
        .await
        .ok();
        // Not retried; the user has to edit the CR.
        return Ok(Action::await_change());
    }

    let mut drd = drd;
    if !drd.spec.disable_pvc_deletion_finalizer {
        if drd.meta().deletion_timestamp.is_some() {
            finalizer::execute_finalizers(&ctx, &drd).await?;
            return Ok(Action::await_change());
        }
        if let Some(updated) = finalizer::ensure_finalizer(&ctx, &drd).await? {
            drd = updated;
        }
    } else if drd.meta().deletion_timestamp.is_some() {
        // Children are garbage-collected through owner references.
        return Ok(Action::await_change());
    }
    let drd = drd;

    let ls = drd.cluster_labels();
    let generation = drd.generation();

    let mut sts_names = BTreeSet::new();
    let mut deployment_names = BTreeSet::new();
    let mut service_names = BTreeSet::new();
    let mut config_map_names = BTreeSet::new();
    let mut pdb_names = BTreeSet::new();
    let mut hpa_names = BTreeSet::new();
    let mut ingress_names = BTreeSet::new();
    let mut pvc_names = BTreeSet::new();

    let common_config = drd.new_common_config_map(&ls)?;
    let common_config_sha = writer::object_hash(&common_config)?;
    writer::create_or_update(
        &ctx,
        &drd,
        common_config,
        &mut config_map_names,
        writer::always_equal,
        writer::noop_preserve,
    )
    .await?;

    for (key, node_spec) in sequence::nodes_in_prescribed_order(&drd.spec) {
        let unique_str = drd.node_unique_name(key);
        let lm = drd.node_labels(node_spec, &unique_str);

        let node_config = drd.new_node_config_map(node_spec, &lm, &unique_str)?;
        let node_config_sha = writer::object_hash(&node_config)?;
        writer::create_or_update(
            &ctx,
            &drd,
            node_config,
            &mut config_map_names,
            writer::always_equal,
            writer::noop_preserve,
        )
        .await?;

        // Services go first so headless DNS exists before pods start.
        let mut first_service_name = String::new();
        let service_templates = first_some(
            node_spec.services.as_ref(),
            drd.spec.services.as_ref(),
        )
        .unwrap_or_default();
        for template in &service_templates {
            let svc = drd.new_service(template, node_spec, &lm, &unique_str);
            let svc_name = svc.name_any();
            writer::create_or_update(
                &ctx,
                &drd,
                svc,
                &mut service_names,
                writer::always_equal,
                writer::preserve_cluster_ip,
            )
            .await?;
            if first_service_name.is_empty() {
                first_service_name = svc_name;
            }
        }

        let config_sha = format!("{common_config_sha}-{node_config_sha}");

        match node_spec.workload_kind() {
            WorkloadKind::Deployment => {
                let deployment = drd.new_deployment(node_spec, &lm, &unique_str, &config_sha);
                let outcome = writer::create_or_update(
                    &ctx,
                    &drd,
                    deployment,
                    &mut deployment_names,
                    writer::always_equal,
                    writer::preserve_deployment_replicas,
                )
                .await?;

                if drd.spec.rolling_deploy {
                    if outcome == ApplyResult::Updated {
                        // Give the deployment controller a tick to reflect
                        // the update in status before gating on it.
                        return Ok(requeue);
                    }

                    // First generation materializes everything in parallel.
                    if generation > 1
                        && !sequence::is_deployment_fully_deployed(&ctx, &unique_str, &ns).await?
                    {
                        return Ok(requeue);
                    }
                }
            }
            WorkloadKind::StatefulSet => {
                if generation > 1
                    && drd.spec.scale_pvc_sts
                    && volumes::is_volume_expansion_enabled(&ctx, node_spec).await
                {
                    volumes::expand_statefulset_volumes(&ctx, &drd, node_spec, &unique_str)
                        .await?;
                }

                let sts = drd.new_stateful_set(
                    node_spec,
                    &lm,
                    &unique_str,
                    &config_sha,
                    &first_service_name,
                );
                let outcome = writer::create_or_update(
                    &ctx,
                    &drd,
                    sts,
                    &mut sts_names,
                    writer::always_equal,
                    writer::preserve_sts_replicas,
                )
                .await?;

                let drain_configured = node_spec.node_type == NodeType::Historical
                    && node_spec
                        .deployment_config
                        .as_ref()
                        .is_some_and(|c| c.deployment_mode == DeploymentMode::RollingDeploy);
                let drain_session_active = drd
                    .status
                    .as_ref()
                    .is_some_and(|s| s.historical.session_active());

                if drain_configured && (outcome == ApplyResult::Updated || drain_session_active) {
                    // Drain replaces the blind rolling-update gate for this
                    // node; the session keeps the tick requeueing until the
                    // last batch lands.
                    if drain::deploy_historical(&ctx, &drd, node_spec, &unique_str).await? {
                        return Ok(requeue);
                    }
                } else if drd.spec.rolling_deploy {
                    if outcome == ApplyResult::Updated {
                        return Ok(requeue);
                    }

                    sequence::check_crash_status(&ctx, &drd, node_spec).await?;

                    if generation > 1
                        && !sequence::is_sts_fully_deployed(&ctx, &unique_str, &ns).await?
                    {
                        return Ok(requeue);
                    }
                }

                sequence::check_crash_status(&ctx, &drd, node_spec).await?;
            }
        }

        if let Some(ingress) = drd.new_ingress(node_spec, &lm, &unique_str) {
            writer::create_or_update(
                &ctx,
                &drd,
                ingress,
                &mut ingress_names,
                writer::always_equal,
                writer::noop_preserve,
            )
            .await?;
        }

        if let Some(pdb) = drd.new_pod_disruption_budget(node_spec, &lm, &unique_str) {
            writer::create_or_update(
                &ctx,
                &drd,
                pdb,
                &mut pdb_names,
                writer::always_equal,
                writer::noop_preserve,
            )
            .await?;
        }

        if let Some(hpa) = drd.new_horizontal_pod_autoscaler(node_spec, &lm, &unique_str) {
            writer::create_or_update(
                &ctx,
                &drd,
                hpa,
                &mut hpa_names,
                writer::always_equal,
                writer::noop_preserve,
            )
            .await?;
        }

        for template in node_spec.persistent_volume_claim.iter().flatten() {
            let pvc = drd.new_persistent_volume_claim(template, &lm, &unique_str);
            writer::create_or_update(
                &ctx,
                &drd,
                pvc,
                &mut pvc_names,
                writer::always_equal,
                writer::noop_preserve,
            )
            .await?;
        }
    }

    if generation > 1 && drd.spec.delete_orphan_pvc {
        volumes::delete_orphan_claims(&ctx, &drd).await?;
    }

    let mut status = DruidClusterStatus {
        stateful_sets: writer::delete_unused::<appsv1::StatefulSet>(&ctx, &drd, &sts_names, &ls)
            .await,
        deployments: writer::delete_unused::<appsv1::Deployment>(
            &ctx,
            &drd,
            &deployment_names,
            &ls,
        )
        .await,
        services: writer::delete_unused::<corev1::Service>(&ctx, &drd, &service_names, &ls).await,
        config_maps: writer::delete_unused::<corev1::ConfigMap>(
            &ctx,
            &drd,
            &config_map_names,
            &ls,
        )
        .await,
        pod_disruption_budgets: writer::delete_unused::<policyv1::PodDisruptionBudget>(
            &ctx, &drd, &pdb_names, &ls,
        )
        .await,
        hpa_autoscalers: writer::delete_unused::<autoscalingv2::HorizontalPodAutoscaler>(
            &ctx, &drd, &hpa_names, &ls,
        )
        .await,
        ingress: writer::delete_unused::<networkingv1::Ingress>(&ctx, &drd, &ingress_names, &ls)
            .await,
        ..Default::default()
    };

    // Claims are never garbage-collected here; templates create them outside
    // the operator's name sets and deleteOrphanPvc owns their lifecycle.
    let pvc_selector: BTreeMap<String, String> =
        [("druid_cr".to_string(), drd.name())].into_iter().collect();
    status.persistent_volume_claims =
        list_names::<corev1::PersistentVolumeClaim>(&ctx, &drd, &pvc_selector).await;

    let pods = ctx
        .list_labeled::<corev1::Pod>(&ns, &ls)
        .await
        .map(|l| l.items)
        .unwrap_or_default();
    status.pods = {
        let mut names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
        names.sort();
        names
    };

    status.druid_node_status = aggregate_node_condition(&pods);

    // Drain progress is owned by the drain controller; carry it over.
    status.historical = drd
        .status
        .as_ref()
        .map(|s| s.historical.clone())
        .unwrap_or_default();

    if drd.status.as_ref() != Some(&status) {
        ctx.update_status(&drd, status).await?;
    }

    Ok(requeue)
}

/// Any pod with PodReady=False flips the aggregate condition to an error
/// state naming the pod; rolling problems caught by the per-step gates never
/// reach this point.
fn aggregate_node_condition(pods: &[corev1::Pod]) -> DruidNodeTypeStatus {
    let mut aggregate =
        DruidNodeTypeStatus::new(DruidNodeConditionType::DruidClusterReady, None, None);
    for pod in pods {
        for condition in pod.status.iter().flat_map(|s| s.conditions.iter().flatten()) {
            if condition.type_ == "Ready" && condition.status == "False" {
                aggregate = DruidNodeTypeStatus::new(
                    DruidNodeConditionType::DruidNodeErrorState,
                    Some(pod.name_any()),
                    condition.reason.clone(),
                );
            }
        }
    }
    aggregate
}

async fn list_names<T>(
    ctx: &Context,
    drd: &Druid,
    selector: &BTreeMap<String, String>,
) -> Vec<String>
where
    T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    let Ok(ns) = drd.namespace() else {
        return Vec::new();
    };
    let Ok(list) = ctx.list_labeled::<T>(&ns, selector).await else {
        return Vec::new();
    };

    let mut names: Vec<String> = list.iter().map(|item| item.name_any()).collect();
    names.sort();
    names
}

pub fn error_policy(_object: Arc<Druid>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!("{:?}", error);
    if error.is_not_found() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

    fn pod(name: &str, ready: &str, reason: Option<&str>) -> corev1::Pod {
        corev1::Pod {
            metadata: metav1::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(corev1::PodStatus {
                conditions: Some(vec![corev1::PodCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    reason: reason.map(str::to_string),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_all_pods_ready_reports_cluster_ready() {
        let pods = vec![pod("druid-x-brokers-0", "True", None)];

        let condition = aggregate_node_condition(&pods);
        assert_eq!(
            condition.druid_node_condition_type,
            DruidNodeConditionType::DruidClusterReady
        );
        assert!(condition.druid_node.is_none());
    }

    #[test]
    fn test_unready_pod_flips_condition_and_names_pod() {
        let pods = vec![
            pod("druid-x-brokers-0", "True", None),
            pod("druid-x-historicals-1", "False", Some("ContainersNotReady")),
        ];

        let condition = aggregate_node_condition(&pods);
        assert_eq!(
            condition.druid_node_condition_type,
            DruidNodeConditionType::DruidNodeErrorState
        );
        assert_eq!(
            condition.druid_node.as_deref(),
            Some("druid-x-historicals-1")
        );
        assert_eq!(condition.reason.as_deref(), Some("ContainersNotReady"));
    }

    #[test]
    fn test_no_pods_reports_cluster_ready() {
        let condition = aggregate_node_condition(&[]);
        assert_eq!(
            condition.druid_node_condition_type,
            DruidNodeConditionType::DruidClusterReady
        );
    }
}
