//! Main entry point for the pglock command line tool.

use clap::Parser;
use pglock_cli::{
    cli::{Cli, Command, DemoCommand},
    commands,
    config::Configuration,
    demo::{self, DemoTiming},
    logging, shutdown,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let configuration = Configuration::from_cli(&args)?;

    let _logging_guard =
        logging::init_logging(&configuration.logging_config()).map_err(|e| anyhow::anyhow!(e))?;
    let cancel = shutdown::cancel_on_shutdown_signal();

    match args.command {
        Command::Setup => commands::setup(&configuration, args.memory).await?,
        Command::Demo { demo } => {
            let client = commands::build_client(&configuration, args.memory).await?;
            let retry_interval = configuration.retry_interval();

            let reports = match demo {
                DemoCommand::Slock(slock_args) => {
                    vec![demo::run_slock_demo(&client, &slock_args, retry_interval, &cancel).await]
                }
                DemoCommand::Scenarios => {
                    let timing = DemoTiming {
                        retry_interval,
                        ..Default::default()
                    };
                    demo::run_scenarios(&client, &timing, &cancel).await?
                }
            };

            for report in &reports {
                info!(
                    scenario = report.name,
                    acquired = report.acquired,
                    failed = report.failed,
                    peak_holders = report.peak_holders,
                    contender = ?report.contender,
                    "Scenario finished"
                );
            }
            info!("All workers have finished.");
        }
        Command::Inspect { name } => {
            let client = commands::build_client(&configuration, args.memory).await?;
            match commands::inspect(&client, &name).await? {
                Some(snapshot) => println!("{}", commands::render_snapshot(&snapshot)?),
                None => println!("lock '{}' does not exist", name),
            }
        }
        Command::Unlock { name, lock_id } => {
            let client = commands::build_client(&configuration, args.memory).await?;
            if commands::unlock(&client, &name, &lock_id).await? {
                println!("released '{}' held by '{}'", name, lock_id);
            } else {
                println!("'{}' held nothing on '{}'", lock_id, name);
            }
        }
    }

    Ok(())
}
