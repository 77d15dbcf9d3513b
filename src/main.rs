use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::signal;

use ara_notification_client::api::{NotificationApi, RestClient};
use ara_notification_client::center::NotificationCenter;
use ara_notification_client::config::Settings;
use ara_notification_client::metrics::encode_metrics;
use ara_notification_client::relay::LiveEventRelay;
use ara_notification_client::telemetry::init_telemetry;
use ara_notification_client::transport::TransportChannel;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    let _telemetry = init_telemetry(&settings.logging, &settings.otel)?;
    tracing::info!(
        api = %settings.api.base_url,
        socket = %settings.socket.url,
        namespace = %settings.socket.namespace,
        "Configuration loaded"
    );

    let api: Arc<dyn NotificationApi> = Arc::new(RestClient::new(&settings.api)?);

    let channel = Arc::new(TransportChannel::new(settings.socket.clone()));
    let relay = LiveEventRelay::new(settings.feed.relay_capacity);
    relay.attach(&channel, &settings.socket.event);

    // Subscribe before dialing so no event is missed
    let live = relay.subscribe();
    let transport_handle = channel.connect();

    let (center, center_task) =
        NotificationCenter::start(api.clone(), &settings.feed, live, Some(channel.status()));
    tracing::info!(session_id = %center.session_id(), "Notification center running");

    if settings.feed.emit_test_on_start {
        match api.emit_test().await {
            Ok(()) => tracing::info!("Requested test notification"),
            Err(e) => tracing::warn!(error = %e, "Test notification request failed"),
        }
    }

    let mut updates = center.updates();
    let view_logger = tokio::spawn(async move {
        while let Some(view) = updates.next().await {
            let newest = view.records.first().map(|r| r.title.as_str()).unwrap_or("-");
            tracing::info!(
                records = view.records.len(),
                unread = view.unread_count,
                history_loaded = view.history_loaded,
                newest = %newest,
                "Notification list updated"
            );
        }
    });

    shutdown_signal().await;

    center.close();
    channel.shutdown();
    let _ = tokio::join!(center_task, transport_handle);
    view_logger.abort();

    match encode_metrics() {
        Ok(text) => tracing::debug!(metrics = %text, "Final metrics snapshot"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    tracing::info!("Notification client stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
