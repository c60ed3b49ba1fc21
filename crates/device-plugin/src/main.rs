use anyhow::Result;
use clap::Parser;
use device_plugin::config::Cli;
use device_plugin::config::Commands;
use device_plugin::config::RunArgs;
use device_plugin::supervisor;
use device_plugin::Supervisor;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run(run_args).await,
        Commands::PrintConfig(run_args) => print_config(&run_args),
    }
}

/// Runs the plugin until a terminating signal or a fatal error, then exits
/// with status 1: the plugin never stops on its own.
async fn run(run_args: RunArgs) -> Result<()> {
    let guard = utils::logging::init(run_args.log_file.as_ref());

    tracing::info!(
        "Starting device plugin {} ({})",
        &**version::VERSION,
        version::branch()
    );

    let outcome = match run_args.to_config() {
        Ok(config) => match supervisor::listen_for_signals() {
            Ok(signals) => Supervisor::new(config).run(signals).await.map_err(|e| {
                tracing::error!("device plugin failed: {:?}", e);
            }),
            Err(e) => {
                tracing::error!("failed to install signal handlers: {:?}", e);
                Err(())
            }
        },
        Err(e) => {
            tracing::error!("invalid configuration: {:#}", e);
            Err(())
        }
    };

    if let Ok(exit) = outcome {
        tracing::info!("device plugin exiting: {:?}", exit);
    }

    // flush the file appender before leaving without running destructors
    drop(guard);
    std::process::exit(1)
}

fn print_config(run_args: &RunArgs) -> Result<()> {
    let config = run_args.to_config()?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
