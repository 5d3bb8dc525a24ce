// Platform client entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr)
// 2. Load config
// 3. Build the REST client (token from env or config)
// 4. Create mpsc channels
// 5. Start the push connection manager
// 6. Spawn the application loop
// 7. Log UI updates until Ctrl+C
// 8. Cleanup on exit

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use focuspact::api::{ApiClient, StaticToken};
use focuspact::app::{App, UiUpdate, UserCommand};
use focuspact::config;
use focuspact::push::{push_endpoint, BackoffPolicy, PushClient, PushConfig};
use focuspact::store::ViewId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("focuspact client starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: api={}, push path={}",
        config.api.base_url, config.push.path
    );

    // 3. Build the REST client. The environment variable wins over the
    // config file so tokens never have to be written to disk.
    let token = std::env::var("FOCUSPACT_ACCESS_TOKEN")
        .ok()
        .or_else(|| config.auth.access_token.clone());
    if token.is_none() {
        warn!("no access token configured; authenticated endpoints will be rejected");
    }
    let api = Arc::new(
        ApiClient::new(
            &config.api.base_url,
            config.request_timeout(),
            Arc::new(StaticToken(token)),
        )
        .context("failed to build API client")?,
    );

    // 4. Create mpsc channels
    let (push_tx, push_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, mut ui_rx) = mpsc::channel(256);

    // 5. Start the push connection manager
    let mut push_client = PushClient::new(PushConfig {
        endpoint: push_endpoint(&config.api.base_url, &config.push.path),
        keepalive: config.keepalive(),
        backoff: BackoffPolicy {
            base: config.backoff_base(),
            cap: config.backoff_cap(),
            max_jitter: config.backoff_max_jitter(),
        },
    });
    push_client.start(push_tx);
    let mut status_rx = push_client.subscribe_status();

    // 6. Spawn the application loop
    let (app, channels) = App::new(api, ui_tx);
    let app_handle = tokio::spawn(app.run(channels, push_rx, cmd_rx));

    // Kick off the initial view load.
    cmd_tx
        .send(UserCommand::SwitchView(ViewId::All))
        .await
        .context("application loop unavailable at startup")?;

    // 7. Surface UI updates and status transitions until Ctrl+C. A real
    // front end would consume these channels instead.
    loop {
        tokio::select! {
            update = ui_rx.recv() => match update {
                Some(UiUpdate::ConnectionChanged { online }) => {
                    info!(online, "push connection status changed");
                }
                Some(UiUpdate::Toast(text)) => info!("{text}"),
                Some(UiUpdate::ViewSnapshot { view, challenges }) => {
                    info!(view = view.as_str(), count = challenges.len(), "view updated");
                }
                Some(UiUpdate::Error(text)) => error!("{text}"),
                None => break,
            },
            _ = status_rx.changed() => {
                info!(status = ?*status_rx.borrow(), "connection state");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    // 8. Cleanup: stop the push connection, then let the loop drain.
    push_client.stop();
    let _ = cmd_tx.send(UserCommand::Quit).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), app_handle).await;

    info!("focuspact client shut down cleanly");
    Ok(())
}

/// Initialize tracing to stderr, honoring `RUST_LOG` when set.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("focuspact=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
