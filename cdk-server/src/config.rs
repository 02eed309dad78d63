// File: cdk-server/src/config.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use cdk_core::rate_limit::{Budget, RateLimitConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "cdk-server")]
#[command(author, version, about = "Redemption code service: batch issuance, verify and one-time redeem")]
pub struct Args {
    /// Address the HTTP listener binds to
    #[arg(long, env = "CDK_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Postgres connection URL
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://cdk@localhost:5432/cdk")]
    pub database_url: String,

    /// Keep all state in process memory instead of Postgres (single instance only)
    #[arg(long, default_value = "false")]
    pub in_memory: bool,

    /// JSON file mapping bearer tokens to user ids and roles
    #[arg(long, env = "CDK_KEY_FILE")]
    pub key_file: PathBuf,

    #[arg(long, env = "CDK_MAX_CONNECTIONS", default_value_t = 16)]
    pub max_connections: u32,

    /// Per-request deadline in milliseconds
    #[arg(long, env = "CDK_REQUEST_DEADLINE_MS", default_value_t = 2_000)]
    pub request_deadline_ms: u64,

    /// Batch creations per caller per minute
    #[arg(long, default_value_t = 10)]
    pub create_batch_per_minute: u32,

    /// Redeem attempts per caller per minute
    #[arg(long, default_value_t = 20)]
    pub redeem_per_minute: u32,

    /// Verify calls per caller per minute
    #[arg(long, default_value_t = 30)]
    pub verify_per_minute: u32,

    /// Batch summary and history lookups per caller per minute
    #[arg(long, default_value_t = 60)]
    pub query_per_minute: u32,

    /// Upper bound on distinct (action, caller) windows held by the limiter
    #[arg(long, default_value_t = 10_000)]
    pub max_tracked_keys: usize,

    /// Take the client address from the first `X-Forwarded-For` hop. Only
    /// enable behind a proxy that overwrites that header.
    #[arg(long, env = "CDK_TRUST_FORWARDED_FOR", default_value = "false")]
    pub trust_forwarded_for: bool,

    /// Apply migrations and exit
    #[arg(long, default_value = "false")]
    pub migrate_only: bool,
}

impl Args {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn rate_limits(&self) -> RateLimitConfig {
        RateLimitConfig {
            create_batch: Budget::per_minute(self.create_batch_per_minute),
            redeem: Budget::per_minute(self.redeem_per_minute),
            verify: Budget::per_minute(self.verify_per_minute),
            query: Budget::per_minute(self.query_per_minute),
            max_tracked_keys: self.max_tracked_keys,
            ..Default::default()
        }
    }
}
