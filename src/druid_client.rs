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

//! HTTP client for the Druid coordinator API, used by the historical drain
//! controller to mark pods as decommissioning and poll their segment load.

use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::time::Duration;

const COORDINATOR_CONFIG_PATH: &str = "/druid/coordinator/v1/config";
const SQL_PATH: &str = "/druid/v2/sql";

/// Key inside the coordinator dynamic config holding pod names whose
/// segments the coordinator is moving away.
pub const DECOMMISSIONING_NODES_KEY: &str = "decommissioningNodes";

const HISTORICAL_USAGE_QUERY: &str = "SELECT server AS service, tier, curr_size, max_size \
     FROM sys.servers WHERE server_type = 'historical' ORDER BY service DESC";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("coordinator request to {} failed: {}", path, source))]
    Request { path: String, source: reqwest::Error },

    #[snafu(display("coordinator returned {} for {}", status, path))]
    Status {
        path: String,
        status: reqwest::StatusCode,
    },

    #[snafu(display("failed to decode coordinator response from {}: {}", path, source))]
    Decode { path: String, source: reqwest::Error },
}

#[derive(Debug, Deserialize)]
struct ServerUsageRow {
    service: String,
    curr_size: i64,
}

pub struct DruidClient {
    base_url: String,
    user_name: String,
    password: String,
    client: reqwest::Client,
}

impl DruidClient {
    pub fn new(base_url: &str, user_name: &str, password: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_name: user_name.to_string(),
            password: password.to_string(),
            client,
        }
    }

    /// The coordinator dynamic config, opaque except for
    /// [`DECOMMISSIONING_NODES_KEY`].
    pub async fn coordinator_config(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
        let path = COORDINATOR_CONFIG_PATH;
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .basic_auth(&self.user_name, Some(&self.password))
            .send()
            .await
            .context(RequestSnafu { path })?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { path, status }.fail();
        }

        response.json().await.context(DecodeSnafu { path })
    }

    /// Install a modified dynamic config; the full object is posted back.
    pub async fn update_coordinator_config(
        &self,
        config: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), Error> {
        let path = COORDINATOR_CONFIG_PATH;
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.user_name, Some(&self.password))
            .json(config)
            .send()
            .await
            .context(RequestSnafu { path })?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { path, status }.fail();
        }
        Ok(())
    }

    /// Current segment bytes per historical, keyed by pod name. A pod is
    /// drained once its entry reads zero.
    pub async fn historical_usage(&self) -> Result<BTreeMap<String, i64>, Error> {
        let path = SQL_PATH;
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.user_name, Some(&self.password))
            .json(&serde_json::json!({ "query": HISTORICAL_USAGE_QUERY }))
            .send()
            .await
            .context(RequestSnafu { path })?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { path, status }.fail();
        }

        let rows: Vec<ServerUsageRow> = response.json().await.context(DecodeSnafu { path })?;

        // `service` is `<pod>.<headless-service>...:<port>`; the pod name is
        // everything before the first dot.
        Ok(rows
            .into_iter()
            .map(|row| {
                let pod = row.service.split('.').next().unwrap_or_default().to_string();
                (pod, row.curr_size)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_rows_keyed_by_pod_name() {
        let rows: Vec<ServerUsageRow> = serde_json::from_value(serde_json::json!([
            {"service": "druid-x-historicals-1.druid-x-historicals.default.svc:8083",
             "tier": "_default_tier", "curr_size": 100, "max_size": 1000},
            {"service": "druid-x-historicals-0.druid-x-historicals.default.svc:8083",
             "tier": "_default_tier", "curr_size": 0, "max_size": 1000}
        ]))
        .unwrap();

        let usage: BTreeMap<String, i64> = rows
            .into_iter()
            .map(|row| {
                let pod = row.service.split('.').next().unwrap_or_default().to_string();
                (pod, row.curr_size)
            })
            .collect();

        assert_eq!(usage.get("druid-x-historicals-0"), Some(&0));
        assert_eq!(usage.get("druid-x-historicals-1"), Some(&100));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = DruidClient::new("http://coordinator:8081/", "admin", "pw");
        assert_eq!(client.base_url, "http://coordinator:8081");
    }
}
