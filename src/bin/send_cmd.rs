use dudu_sim::command::{CommandSender, DEFAULT_COMMAND};
use dudu_sim::config::Config;
use dudu_sim::service_utils::init_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cmd = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_COMMAND.to_string());

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let sender = CommandSender::new(&config, &cmd);
    match sender.run(&config).await {
        Ok(sent) => {
            let payload = sender.payload();
            info!(
                "'{}' for child {} sent to {} of {} devices.",
                payload.cmd,
                payload.child_id,
                sent,
                config.target_devices.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Connection failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
