//! Command line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pglock", version, about = "Lease-based locks on PostgreSQL")]
pub struct Cli {
    /// PostgreSQL connection URL
    #[arg(long = "db-url", env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Lock table name
    #[arg(long = "table", global = true)]
    pub table: Option<String>,

    /// Use the in-process store instead of PostgreSQL
    #[arg(long = "memory", global = true)]
    pub memory: bool,

    /// Configuration file (defaults to conf/application.yml when present)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and create the lock table
    Setup,
    /// Run a demo workload
    Demo {
        #[command(subcommand)]
        demo: DemoCommand,
    },
    /// Show the current holders of a lock
    Inspect {
        name: String,
    },
    /// Release every claim `lock_id` holds on `name`
    Unlock {
        name: String,
        lock_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum DemoCommand {
    /// Several workers contending for a bounded shared lock
    Slock(SlockDemoArgs),
    /// Exclusive and shared locking scenarios, one after another
    Scenarios,
}

#[derive(Debug, Clone, Args)]
pub struct SlockDemoArgs {
    /// Number of concurrent workers
    #[arg(long, default_value_t = 5)]
    pub workers: usize,

    /// Shared lock capacity, -1 for unlimited
    #[arg(long = "max-shared", default_value_t = 2, allow_negative_numbers = true)]
    pub max_shared: i32,

    /// Lease duration in seconds
    #[arg(long, default_value_t = 60)]
    pub ttl: u32,

    /// How long each worker holds the lock
    #[arg(long = "hold-ms", default_value_t = 1000)]
    pub hold_ms: u64,
}
