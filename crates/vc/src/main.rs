use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vc_core::config::Config;
use vc_core::derive::DeriveState;
use vc_core::secrets::{write_password_file, Secrets, SecretsStatus};
use vc_core::time::{system_clock, Clock};
use vc_core::{paths, Event};
use vc_db::Store;
use vc_ingest::{
    calculate_replay_since, replay, Ingester, IngesterOptions, LogDirSource, LogDirSourceConfig,
};
use vc_notify::{FilterConfig, Notifier, NotifierOptions, WebhookSender};
use vc_serve::hub::{Hub, HubConfig};
use vc_serve::middleware::limit::{
    AuthFailureLimiter, AuthFailureLimiterConfig, RateLimiter, RateLimiterConfig,
};
use vc_serve::AppState;

#[derive(Parser)]
#[command(name = "vrclog-companion", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the companion (default).
    Serve {
        /// Override the configured HTTP port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the OpenAPI document and exit.
    Openapi,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Openapi) => {
            println!("{}", vc_serve::openapi::generate_spec());
        }
        Some(Command::Serve { port }) => {
            if let Err(err) = serve(port).await {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        None => {
            if let Err(err) = serve(None).await {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
    }
}

async fn serve(port_override: Option<u16>) -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let version = env!("CARGO_PKG_VERSION");
    let clock = system_clock();

    // Configuration, then secrets. Corrupt files degrade to defaults; a
    // corrupt secrets file additionally blocks writes so it is never
    // clobbered.
    let config_path = paths::config_path();
    let config = Config::load_from(&config_path).apply_env_overrides();

    let secrets_path = paths::secrets_path();
    let (mut secrets, secrets_status) = Secrets::load_from(&secrets_path);

    let generated_password = secrets.ensure_lan_auth(config.lan_enabled);
    let mut secrets_updated = generated_password.is_some();
    secrets_updated |= secrets.ensure_sse_secret();

    let data_dir = paths::ensure_data_dir().map_err(|err| format!("create data dir: {err}"))?;

    if secrets_updated {
        if secrets_status == SecretsStatus::Fallback {
            warn!("secrets file has errors; new credentials kept in memory only");
            warn!("fix or delete secrets.json and restart");
        } else {
            secrets
                .save_to(&secrets_path)
                .map_err(|err| format!("save secrets: {err}"))?;
            if let Some(password) = &generated_password {
                match write_password_file(&data_dir, &secrets.basic_auth_username, password) {
                    Ok(path) => {
                        info!(path = %path.display(), "generated credentials written; delete the file after saving them");
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to write password file");
                    }
                }
            }
        }
    }

    let port = port_override.unwrap_or(config.port);

    // Storage.
    let db_path: PathBuf = data_dir.join(paths::DATABASE_FILE_NAME);
    let store = Store::open(&db_path).map_err(|err| format!("open database: {err}"))?;

    match store.vacuum_if_needed(clock.now()) {
        Ok(true) => info!("database maintenance completed"),
        Ok(false) => {}
        Err(err) => warn!(error = %err, "vacuum check failed"),
    }

    // Replay window: wide on first run, narrow safety margin otherwise.
    let last_event_time = store
        .get_last_event_time()
        .map_err(|err| format!("get last event time: {err}"))?;
    let rollback = match last_event_time {
        None => replay::first_run_rollback(),
        Some(_) => replay::default_rollback(),
    };
    let replay_since = calculate_replay_since(last_event_time, rollback, clock.now());
    info!(%replay_since, "replaying events");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Derived state and live-stream hub.
    let derive = Arc::new(DeriveState::new());
    let (hub, hub_runner) = Hub::new(HubConfig::default());
    tokio::spawn(hub_runner.run());

    // Notifier, only when a webhook is configured.
    let webhook_configured = !secrets.webhook_url.is_empty();
    let notifier = if webhook_configured {
        let sender = Arc::new(WebhookSender::new(secrets.webhook_url.clone()));
        let filter = FilterConfig {
            notify_on_join: config.notify_on_join,
            notify_on_leave: config.notify_on_leave,
            notify_on_world_join: config.notify_on_world_join,
        };
        let (notifier, runner) = Notifier::new(
            sender,
            config.batch_delay_secs,
            filter,
            NotifierOptions::default(),
        );
        tokio::spawn(runner.run(shutdown_rx.clone()));
        info!("webhook notifications enabled");
        Some(notifier)
    } else {
        info!("webhook not configured, notifications disabled");
        None
    };

    // Ingest pipeline: source -> store -> {derive, notifier, hub}.
    let mut source_config = LogDirSourceConfig::new(replay_since);
    if !config.log_path.is_empty() {
        source_config.log_dir = Some(PathBuf::from(&config.log_path));
    }
    let source = LogDirSource::new(source_config);

    let on_insert = {
        let derive = derive.clone();
        let hub = hub.clone();
        let notifier = notifier.clone();
        move |event: &Event| {
            if let Some(derived) = derive.update(event) {
                if let Some(notifier) = &notifier {
                    notifier.enqueue(derived);
                }
            }
            hub.publish(event.clone());
        }
    };
    let ingester = Ingester::new(
        source,
        store,
        IngesterOptions {
            clock: clock.clone(),
            on_insert: Some(Box::new(on_insert)),
        },
    );
    {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            match ingester.run(shutdown_rx).await {
                Ok(()) => info!("ingestion finished"),
                Err(vc_ingest::IngestError::Cancelled) => {}
                Err(err) => error!(error = %err, "ingester failed"),
            }
        });
    }

    // HTTP surface; LAN mode turns on auth and the protection stack.
    let host = if config.lan_enabled {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    };
    let addr = SocketAddr::new(host, port);

    let mut state = AppState {
        db_path,
        config_path,
        hub: hub.clone(),
        derive,
        notifier: notifier.clone(),
        clock: clock.clone(),
        version: version.to_string(),
        webhook_configured,
        auth: None,
        sse_secret: secrets.sse_secret.expose().as_bytes().to_vec(),
        rate_limiter: None,
        failure_limiter: None,
        csrf_enabled: false,
        csrf_hosts: Vec::new(),
    };

    if config.lan_enabled {
        state = state.with_basic_auth(
            &secrets.basic_auth_username,
            secrets.basic_auth_password.clone(),
        );
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        tokio::spawn(rate_limiter.clone().cleanup_loop(shutdown_rx.clone()));
        state.rate_limiter = Some(rate_limiter);
        state.failure_limiter = Some(Arc::new(AuthFailureLimiter::new(
            AuthFailureLimiterConfig::default(),
        )));
        state.csrf_enabled = true;
        state.csrf_hosts = vec![addr.to_string()];
        info!("LAN mode: auth, rate limiting, and CSRF protection enabled");
    }

    // Ctrl-C fires the shared shutdown signal.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    info!(version, %addr, "starting VRClog Companion");
    let result = vc_serve::serve(state, addr, shutdown_rx).await;

    // Teardown order: stop producers first, then the fan-out.
    let _ = shutdown_tx.send(true);
    if let Some(notifier) = &notifier {
        if tokio::time::timeout(Duration::from_secs(3), notifier.stop())
            .await
            .is_err()
        {
            warn!("notifier stop timed out");
        }
    }
    hub.stop().await;

    info!("server stopped");
    result.map_err(|err| format!("serve: {err}"))
}
