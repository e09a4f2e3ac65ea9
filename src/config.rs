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

//! Runtime settings read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";
pub const DENY_LIST_ENV: &str = "DENY_LIST";
pub const RECONCILE_WAIT_ENV: &str = "RECONCILE_WAIT";
pub const DRUID_PASSWORD_ENV: &str = "DRUID_PASSWORD";

const DEFAULT_RECONCILE_WAIT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// Namespaces the operator watches; empty means cluster-wide.
    pub watch_namespaces: Vec<String>,

    /// Namespaces whose reconcile events are dropped.
    pub deny_list: Vec<String>,

    /// Requeue delay after a successful tick.
    pub reconcile_wait: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            watch_namespaces: env_as_list(WATCH_NAMESPACE_ENV),
            deny_list: env_as_list(DENY_LIST_ENV),
            reconcile_wait: std::env::var(RECONCILE_WAIT_ENV)
                .ok()
                .and_then(|v| humantime::parse_duration(v.trim()).ok())
                .unwrap_or(DEFAULT_RECONCILE_WAIT),
        }
    }

    /// True when events from `namespace` must not be reconciled, either
    /// because it is deny-listed or outside the watched set.
    pub fn is_denied(&self, namespace: &str) -> bool {
        if self.deny_list.iter().any(|ns| ns == namespace) {
            return true;
        }
        !self.watch_namespaces.is_empty() && !self.watch_namespaces.iter().any(|ns| ns == namespace)
    }
}

/// The coordinator credential is read fresh on every use so rotating the
/// variable takes effect without an operator restart.
pub fn druid_password() -> String {
    std::env::var(DRUID_PASSWORD_ENV).unwrap_or_default()
}

fn env_as_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts both Go-manager style `:8080` and full `host:port` bind specs.
pub fn parse_bind_addr(addr: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}").parse()
    } else {
        addr.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_list_blocks_namespace() {
        let settings = Settings {
            deny_list: vec!["kube-system".to_string()],
            ..Default::default()
        };

        assert!(settings.is_denied("kube-system"));
        assert!(!settings.is_denied("druid"));
    }

    #[test]
    fn test_watch_namespaces_act_as_allow_list() {
        let settings = Settings {
            watch_namespaces: vec!["druid-a".to_string(), "druid-b".to_string()],
            ..Default::default()
        };

        assert!(!settings.is_denied("druid-a"));
        assert!(settings.is_denied("druid-c"));
    }

    #[test]
    fn test_parse_bind_addr_accepts_go_style() {
        assert_eq!(
            parse_bind_addr(":8080").unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_addr("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }
}
