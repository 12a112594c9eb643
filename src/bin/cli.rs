use clap::Parser;
use monthly_balance_monitor::cli::{Cli, CliHandler, Commands};
use monthly_balance_monitor::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Less verbose than the monitor itself
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::SampleConfig => AppConfig::default(),
        _ => match AppConfig::load_from(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration from '{}': {}", cli.config, e);
                std::process::exit(1);
            }
        },
    };

    let handler = CliHandler::new(config);
    if let Err(e) = handler.execute_command(&cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
