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

use crate::config::{Settings, parse_bind_addr};
use crate::context::Context;
use crate::coordination::LeaderElector;
use crate::reconcile::{error_policy, reconcile_druid};
use crate::types::v1alpha1::druid::Druid;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResourceExt;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use shadow_rs::shadow;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

shadow!(build);

pub mod config;
mod context;
pub mod coordination;
pub mod druid_client;
pub mod health;
pub mod reconcile;
pub mod types;
pub mod util;

#[cfg(test)]
pub mod tests;

pub struct ServerOptions {
    pub metrics_addr: String,
    pub health_probe_addr: String,
    pub enable_leader_election: bool,
}

fn scoped_api<T>(client: &Client, namespace: Option<&str>) -> Api<T>
where
    T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

pub async fn run(opts: ServerOptions) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    info!(version = build::PKG_VERSION, "starting druid-operator");

    let settings = Settings::from_env();
    let client = Client::try_default().await?;

    health::install_metrics_exporter(parse_bind_addr(&opts.metrics_addr)?)?;
    let probe_addr = parse_bind_addr(&opts.health_probe_addr)?;
    tokio::spawn(async move {
        if let Err(e) = health::serve_probes(probe_addr).await {
            warn!(error = %e, "health probe server terminated");
        }
    });

    if opts.enable_leader_election {
        let elector = Arc::new(LeaderElector::new(client.clone()));
        elector.acquire().await?;
        elector.spawn_renewal();
    }

    // A single watched namespace narrows the watch itself; longer lists are
    // enforced per-tick against the allow list in Settings.
    let single_namespace = match settings.watch_namespaces.as_slice() {
        [ns] => Some(ns.clone()),
        _ => None,
    };
    let ns = single_namespace.as_deref();

    let druids = scoped_api::<Druid>(&client, ns);
    let context = Context::new(client.clone(), settings);

    Controller::new(druids, watcher::Config::default())
        .owns(
            scoped_api::<corev1::ConfigMap>(&client, ns),
            watcher::Config::default(),
        )
        .owns(
            scoped_api::<corev1::Service>(&client, ns),
            watcher::Config::default(),
        )
        .owns(
            scoped_api::<appsv1::StatefulSet>(&client, ns),
            watcher::Config::default(),
        )
        .owns(
            scoped_api::<appsv1::Deployment>(&client, ns),
            watcher::Config::default(),
        )
        .owns(
            scoped_api::<corev1::Pod>(&client, ns),
            watcher::Config::default(),
        )
        .owns(
            scoped_api::<corev1::PersistentVolumeClaim>(&client, ns),
            watcher::Config::default(),
        )
        .run(reconcile_druid, error_policy, Arc::new(context))
        .for_each(|res| async move {
            match res {
                Ok((druid, _)) => {
                    metrics::counter!(health::METRIC_RECONCILE_TOTAL).increment(1);
                    info!("reconciled successfully, object {:?}", druid.name);
                }
                Err(e) => {
                    metrics::counter!(health::METRIC_RECONCILE_ERRORS_TOTAL).increment(1);
                    warn!("reconcile failed: {}", e);
                }
            }
        })
        .await;

    Ok(())
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer
        .write_all(serde_yaml_ng::to_string(&Druid::crd())?.as_bytes())
        .await?;

    Ok(())
}
