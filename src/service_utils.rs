use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Unique client id so parallel simulator runs do not kick each other off
/// the broker.
pub fn unique_client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Simulation stopped");
                token.cancel();
            }
            Err(e) => error!("Failed to handle termination signal: {:?}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_prefixed_and_unique() {
        let a = unique_client_id("dudu-sim");
        let b = unique_client_id("dudu-sim");
        assert!(a.starts_with("dudu-sim-"));
        assert_ne!(a, b);
    }

    #[test]
    fn clock_is_past_2023() {
        assert!(unix_now() > 1_672_531_200);
    }
}
