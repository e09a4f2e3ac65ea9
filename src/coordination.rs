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

//! Leader election over `coordination.k8s.io/v1` Leases.
//!
//! One operator replica holds the lease and runs the controller; the others
//! block in `acquire` until the holder stops renewing. The API server does
//! not fence by itself, but optimistic concurrency on the Lease object makes
//! a split acquire lose with a conflict.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};

const LEASE_NAME: &str = "druid-operator-lock";
const LEASE_DURATION_SECONDS: i64 = 15;
const RENEW_INTERVAL_SECONDS: u64 = 10;
const RETRY_INTERVAL_SECONDS: u64 = 2;

pub struct LeaderElector {
    client: Client,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client) -> Self {
        let namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let identity =
            std::env::var("HOSTNAME").unwrap_or_else(|_| "druid-operator".to_string());
        Self {
            client,
            namespace,
            identity,
        }
    }

    /// Block until this instance holds the lease.
    pub async fn acquire(&self) -> Result<(), kube::Error> {
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "acquired leader lease");
                    return Ok(());
                }
                Ok(false) => {}
                // Conflicts mean another candidate raced us; retry.
                Err(kube::Error::Api(e)) if e.code == 409 => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(std::time::Duration::from_secs(RETRY_INTERVAL_SECONDS)).await;
        }
    }

    /// Keep renewing the lease for as long as the process lives.
    pub fn spawn_renewal(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(RENEW_INTERVAL_SECONDS)).await;
                if let Err(e) = self.try_acquire().await {
                    warn!(error = %e, "failed to renew leader lease");
                }
            }
        })
    }

    async fn try_acquire(&self) -> Result<bool, kube::Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let Some(current) = api.get_opt(LEASE_NAME).await? else {
            let lease = self.new_lease(now, 0);
            api.create(&PostParams::default(), &lease).await?;
            return Ok(true);
        };

        let spec = current.spec.clone().unwrap_or_default();
        let holder = spec.holder_identity.clone().unwrap_or_default();
        let expired = spec
            .renew_time
            .as_ref()
            .map(|t| renew_deadline(&micro_time_to_chrono(&t.0)) < now)
            .unwrap_or(true);

        if holder != self.identity && !expired {
            return Ok(false);
        }

        let transitions = spec.lease_transitions.unwrap_or(0)
            + if holder == self.identity { 0 } else { 1 };

        let mut updated = self.new_lease(now, transitions);
        updated.metadata.resource_version = current.metadata.resource_version.clone();
        if holder == self.identity
            && let Some(s) = updated.spec.as_mut()
        {
            s.acquire_time = spec.acquire_time.clone();
        }

        api.replace(LEASE_NAME, &PostParams::default(), &updated)
            .await?;
        Ok(true)
    }

    fn new_lease(&self, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION_SECONDS as i32),
                acquire_time: Some(MicroTime(chrono_to_micro_time(now))),
                renew_time: Some(MicroTime(chrono_to_micro_time(now))),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }
}

fn renew_deadline(renewed_at: &DateTime<Utc>) -> DateTime<Utc> {
    *renewed_at + Duration::seconds(LEASE_DURATION_SECONDS)
}

fn chrono_to_micro_time(dt: DateTime<Utc>) -> k8s_openapi::jiff::Timestamp {
    k8s_openapi::jiff::Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos() as i32)
        .expect("chrono DateTime<Utc> is always in range for k8s_openapi::jiff::Timestamp")
}

fn micro_time_to_chrono(ts: &k8s_openapi::jiff::Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.as_second(), ts.subsec_nanosecond() as u32)
        .expect("k8s_openapi::jiff::Timestamp is always in range for chrono DateTime<Utc>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_deadline_adds_lease_duration() {
        let renewed = Utc::now();
        assert_eq!(
            renew_deadline(&renewed) - renewed,
            Duration::seconds(LEASE_DURATION_SECONDS)
        );
    }
}
