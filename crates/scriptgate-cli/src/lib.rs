// Copyright 2025 Scriptgate Authors
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

//! # Scriptgate CLI
//!
//! Argument definitions for the `scriptgate` binary and their translation
//! into a [`GatewayConfig`].
//!
//! ## Key Commands
//!
//! - `scriptgate serve`: load a bootstrap script and serve its handlers

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;

use scriptgate_common::auth::AuthConfig;
use scriptgate_server::{GatewayConfig, ResourceLimits};

#[derive(FromArgs, Debug)]
/// scriptgate - HTTP endpoints defined at runtime by JavaScript
pub struct Cli {
    #[argh(subcommand)]
    pub command: Commands,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum Commands {
    Serve(ServeArgs),
}

/// Arguments for `scriptgate serve`.
///
/// # Example
///
/// ```bash
/// scriptgate serve -s routes.js -b 0.0.0.0:8080 --timeout-ms 5000
/// ```
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "serve")]
/// start the gateway
pub struct ServeArgs {
    /// bootstrap script evaluated before the first request
    ///
    /// The script registers routes with `registerHandler(method, path, fn)`.
    /// Without it the gateway starts empty and is configured through
    /// `POST /_admin/execute`.
    #[argh(option, short = 's')]
    pub script: Option<String>,

    /// address to bind the HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:8080\".into()")]
    pub bind: String,

    /// how long a request may wait for its handler, in milliseconds
    #[argh(option, long = "timeout-ms", default = "30000")]
    pub timeout_ms: u64,

    /// how many jobs may wait in front of the execution lane
    #[argh(option, long = "queue-capacity", default = "1024")]
    pub queue_capacity: usize,

    /// API key required on the admin surface
    ///
    /// Falls back to the SCRIPTGATE_API_KEY environment variable. When
    /// neither is set the admin surface is open.
    #[argh(option, long = "api-key")]
    pub api_key: Option<String>,

    /// path prefix of the admin surface
    #[argh(option, long = "admin-prefix", default = "\"/_admin\".into()")]
    pub admin_prefix: String,
}

impl ServeArgs {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("Invalid bind address {}", self.bind))
    }

    /// Builds the gateway configuration, reading the bootstrap script if one
    /// was given.
    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        let limits = ResourceLimits::new()
            .with_execution_timeout(Duration::from_millis(self.timeout_ms))
            .with_queue_capacity(self.queue_capacity);

        let mut config = GatewayConfig::new()
            .with_limits(limits)
            .with_auth(AuthConfig::from_env(self.api_key.clone()))
            .with_admin_prefix(self.admin_prefix.clone());

        if let Some(script) = &self.script {
            config = config.with_bootstrap_file(script)?;
        }

        config.validate()?;
        Ok(config)
    }
}
