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

//! Probe endpoints and the Prometheus exporter.

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub const METRIC_RECONCILE_TOTAL: &str = "druid_operator_reconcile_total";
pub const METRIC_RECONCILE_ERRORS_TOTAL: &str = "druid_operator_reconcile_errors_total";

/// Expose `/metrics` on the given address via the prometheus exporter's
/// built-in listener.
pub fn install_metrics_exporter(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_counter!(
        METRIC_RECONCILE_TOTAL,
        "Number of completed reconcile ticks."
    );
    metrics::describe_counter!(
        METRIC_RECONCILE_ERRORS_TOTAL,
        "Number of reconcile ticks that returned an error."
    );

    info!("metrics endpoint listening on http://{addr}/metrics");
    Ok(())
}

/// Serve `/healthz` and `/readyz`. The operator has no state to warm up, so
/// both report ok as soon as the listener is bound.
pub async fn serve_probes(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready_check));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("health probes listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ready_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
