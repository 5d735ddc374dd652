use dudu_sim::config::Config;
use dudu_sim::service_utils::{cancel_on_ctrl_c, init_logging};
use dudu_sim::telemetry::{LoopFormat, TelemetryPublisher};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Continuous,
    Batch,
    Legacy,
}

fn parse_mode(arg: Option<&str>) -> Option<Mode> {
    match arg {
        None | Some("continuous") => Some(Mode::Continuous),
        Some("batch") => Some(Mode::Batch),
        Some("legacy") => Some(Mode::Legacy),
        Some(_) => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let Some(mode) = parse_mode(args.get(1).map(String::as_str)) else {
        error!("Usage: telemetry-publisher [continuous|batch|legacy]");
        return ExitCode::FAILURE;
    };

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let publisher = TelemetryPublisher::new(&config);
    let result = match mode {
        Mode::Batch => publisher.run_batch(&config).await.map(|_| ()),
        Mode::Continuous | Mode::Legacy => {
            let format = if mode == Mode::Legacy {
                LoopFormat::Legacy
            } else {
                LoopFormat::Structured
            };
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            publisher
                .run_continuous(&config, format, cancel)
                .await
                .map(|published| info!("Published {} messages.", published))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Telemetry publisher stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_continuous() {
        assert_eq!(parse_mode(None), Some(Mode::Continuous));
        assert_eq!(parse_mode(Some("batch")), Some(Mode::Batch));
        assert_eq!(parse_mode(Some("legacy")), Some(Mode::Legacy));
        assert_eq!(parse_mode(Some("loop")), None);
    }
}
