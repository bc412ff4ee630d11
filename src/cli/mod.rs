//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running LocalStack until interrupted (`up`)
//! - Listing the service catalog (`services`)

mod services;
mod up;

pub use services::run_services_command;
pub use up::{UpArgs, run_up_command};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "localstack-harness")]
#[command(about = "Run disposable LocalStack containers for integration tests")]
#[command(
    long_about = "Starts LocalStack in Docker, waits until it answers and prints the service endpoints.\nExamples:\n  localstack-harness up --service sqs --service s3\n  localstack-harness services"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "localstack_harness=info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start LocalStack and keep it running until Ctrl-C
    #[command(
        about = "Start LocalStack",
        long_about = "Starts a LocalStack container, prints its endpoints and stops it on Ctrl-C.\nExample: localstack-harness up --version 0.11.4 --service sqs"
    )]
    Up(UpArgs),

    /// List the services and container ports LocalStack publishes
    Services,
}
