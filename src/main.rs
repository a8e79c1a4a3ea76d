use clap::Parser;
use courtbot::configuration::config::{CliArgs, Config};
use courtbot::controller::controller_handler::Controller;
use log::{error, info};

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = CliArgs::parse();

    info!("Importing configuration from {}", args.config_file.display());

    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.apply_overrides(&args) {
        error!("Invalid command line override: {}", e);
        std::process::exit(1);
    }

    info!(
        "Configuration imported successfully ({} courts, {:?} engine)",
        config.courts.len(),
        config.site.engine
    );

    let mut controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        controller.shutdown().await;
        std::process::exit(1);
    }
}
