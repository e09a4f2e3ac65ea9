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

use crate::config::Settings;
use crate::types;
use crate::types::v1alpha1::druid::Druid;
use crate::types::v1alpha1::status::DruidClusterStatus;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{DeleteParams, ListParams, ObjectList, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt, api::Api};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::Snafu;
use snafu::futures::TryFutureExt;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::info;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(e)
            } if e.code == 404
        )
    }
}

pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) recorder: Recorder,
    pub(crate) settings: Settings,
}

impl Context {
    pub fn new(client: kube::Client, settings: Settings) -> Self {
        let reporter = Reporter {
            controller: "druid-operator".into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// send event
    #[inline]
    pub async fn record(
        &self,
        resource: &Druid,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error> {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &resource.object_ref(&()),
            )
            .context(RecordSnafu)
            .await
    }

    pub async fn get<T>(&self, name: &str, namespace: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).context(KubeSnafu).await
    }

    pub async fn get_cluster_scoped<T>(&self, name: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = ClusterResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        api.get(name).context(KubeSnafu).await
    }

    pub async fn list_labeled<T>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<ObjectList<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let labels = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.list(&ListParams::default().labels(&labels))
            .context(KubeSnafu)
            .await
    }

    pub async fn create<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    /// Replace an existing object. The caller must have copied the live
    /// resourceVersion onto `resource` for optimistic concurrency.
    pub async fn update<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&resource.name_any(), &PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    pub async fn delete<T>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    /// Delete without cascading to dependents; the children are orphaned and
    /// keep running while the owner is recreated.
    pub async fn delete_orphan<T>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::orphan())
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    pub async fn patch_merge<T>(
        &self,
        name: &str,
        namespace: &str,
        patch: serde_json::Value,
    ) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .context(KubeSnafu)
            .await
    }

    /// Merge-patch the status subresource. Callers build the patch value
    /// themselves when only a sub-struct changes.
    pub async fn patch_status_merge(
        &self,
        resource: &Druid,
        patch: serde_json::Value,
    ) -> Result<Druid, Error> {
        let api: Api<Druid> = Api::namespaced(self.client.clone(), &resource.namespace()?);
        api.patch_status(
            &resource.name(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .context(KubeSnafu)
        .await
    }

    pub async fn update_status(
        &self,
        resource: &Druid,
        status: DruidClusterStatus,
    ) -> Result<Druid, Error> {
        let api: Api<Druid> = Api::namespaced(self.client.clone(), &resource.namespace()?);
        let name = resource.name();

        let mut updated = resource.clone();
        updated.status = Some(status.clone());

        if let Ok(d) = api
            .replace_status(&name, &PostParams::default(), &updated)
            .context(KubeSnafu)
            .await
        {
            return Ok(d);
        }

        info!("status update failed due to conflict, retrieve the latest resource and retry.");

        let mut latest = api.get(&name).context(KubeSnafu).await?;
        latest.status = Some(status);

        api.replace_status(&name, &PostParams::default(), &latest)
            .context(KubeSnafu)
            .await
    }
}
