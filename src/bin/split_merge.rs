use dudu_sim::config::Config;
use dudu_sim::service_utils::init_logging;
use dudu_sim::telemetry::TelemetryPublisher;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match TelemetryPublisher::new(&config).run_split_merge(&config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Split-merge scenario aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
