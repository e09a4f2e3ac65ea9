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

use clap::{Parser, Subcommand};
use operator::ServerOptions;

#[derive(Parser)]
#[command(name = "druid-op")]
#[command(about = "Apache Druid Kubernetes Operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Output the Druid CRD in YAML
    Crd {
        /// Optional output path. If not set, the output will be written to stdout.
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Run the controller
    Server {
        /// The address the metric endpoint binds to.
        #[arg(long = "metrics-addr", default_value = ":8080")]
        metrics_addr: String,

        /// The address the probe endpoint binds to.
        #[arg(long = "health-probe-bind-address", default_value = ":8081")]
        health_probe_bind_address: String,

        /// Enable leader election for the controller manager, ensuring only
        /// one active instance.
        #[arg(long = "enable-leader-election")]
        enable_leader_election: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crd { file } => operator::crd(file).await?,
        Commands::Server {
            metrics_addr,
            health_probe_bind_address,
            enable_leader_election,
        } => {
            operator::run(ServerOptions {
                metrics_addr,
                health_probe_addr: health_probe_bind_address,
                enable_leader_election,
            })
            .await?
        }
    }

    Ok(())
}
