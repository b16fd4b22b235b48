// service/background_jobs.rs
use std::sync::Arc;

use tokio::time::{interval, Duration};

use crate::AppState;

/// Periodically releases funded escrows whose auto-release time has passed.
pub async fn start_escrow_auto_release_job(app_state: Arc<AppState>) {
    let every = app_state.env.ledger.auto_release_interval_secs.max(1);
    let mut interval = interval(Duration::from_secs(every));

    loop {
        interval.tick().await;

        tracing::info!("Running escrow auto-release job");

        match app_state.escrow_service.check_auto_release().await {
            Ok(released) if released.is_empty() => {
                tracing::debug!("Escrow auto-release job found nothing due")
            }
            Ok(released) => tracing::info!(
                "Escrow auto-release job completed: {} escrows released",
                released.len()
            ),
            Err(e) => tracing::error!("Escrow auto-release job failed: {}", e),
        }
    }
}
