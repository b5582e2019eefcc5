//! Application entry point for the `feinstaub-bridge` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading `.env` into the process environment
//! - Initializing structured logging/tracing
//! - Loading configuration from environment variables
//! - Assembling the enabled sinks (InfluxDB, MQTT discovery) and the alert
//!   engine into the ingestion pipeline
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! See [`feinstaub_bridge::config::load_from_env`] for the full list. Logging:
//! - `LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use feinstaub_bridge::alert::{AlertEngine, AlertLedger, ThreemaGateway};
use feinstaub_bridge::sinks::{
    DiscoveryCache, DiscoverySink, InfluxClient, MetricsSink, MqttPublisher, Sink,
};
use feinstaub_bridge::{config, routes, Config, Pipeline};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pipeline = Arc::new(build_pipeline(&cfg)?);
    tracing::info!("Registered sinks: {:?}", pipeline.sink_names());

    // Build app from routes gateway (EMBP)
    let app = routes::router(pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Assemble the capability list from the enabled configuration sections.
fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    // ---
    let http = reqwest::Client::builder()
        .timeout(cfg.sink_timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    let mut ledger: Option<Arc<dyn AlertLedger>> = None;

    if let Some(influx) = &cfg.influx {
        let credentials = influx
            .user
            .clone()
            .map(|user| (user, influx.password.clone().unwrap_or_default()));
        let client = Arc::new(InfluxClient::new(
            http.clone(),
            &influx.url,
            &influx.database,
            &influx.measurement,
            credentials,
        ));
        sinks.push(Arc::new(MetricsSink::new(client.clone(), &influx.measurement)));
        let influx_ledger: Arc<dyn AlertLedger> = client;
        ledger = Some(influx_ledger);
    }

    if let Some(mqtt) = &cfg.mqtt {
        let (publisher, eventloop) = MqttPublisher::connect(mqtt);
        tokio::spawn(publisher.clone().drive(eventloop));
        sinks.push(Arc::new(DiscoverySink::new(
            Arc::new(publisher),
            Arc::new(DiscoveryCache::new()),
            &mqtt.discovery_prefix,
        )));
    }

    let alerts = match (&cfg.alerts, ledger) {
        (Some(alerts), Some(ledger)) => Some(AlertEngine::new(
            ledger,
            Arc::new(ThreemaGateway::new(http, &alerts.threema)),
            alerts.recipients.clone(),
            alerts.window,
        )),
        _ => None,
    };

    if sinks.is_empty() {
        tracing::warn!("No sinks enabled, reports will be accepted and dropped");
    }

    Ok(Pipeline::new(sinks, alerts, cfg.sink_timeout))
}

// ---

// Noisy dependencies stay at these levels unless RUST_LOG says otherwise.
const DEPENDENCY_LEVELS: &str = "rumqttc=info,hyper=warn,reqwest=warn";

/// Install the global subscriber. Must run after `.env` is loaded.
///
/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` (default `info`) applies to
/// the bridge. `SPAN_EVENTS` selects which span lifecycle events are logged and
/// `FORCE_COLOR` overrides TTY detection.
fn init_tracing() {
    // ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(env::var("LOG_LEVEL").ok().as_deref())));

    let use_color = env::var("FORCE_COLOR")
        .ok()
        .and_then(|v| parse_flag(&v))
        .unwrap_or_else(|| std::io::stdout().is_terminal());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(span_events(env::var("SPAN_EVENTS").ok().as_deref()))
        .with_ansi(use_color)
        .with_target(true)
        .with_line_number(true)
        .compact()
        .init();
}

fn log_directives(level: Option<&str>) -> String {
    let level = match level.map(str::to_ascii_lowercase).as_deref() {
        Some(l @ ("trace" | "debug" | "info" | "warn" | "error")) => l.to_string(),
        _ => "info".to_string(),
    };
    format!("{level},{DEPENDENCY_LEVELS}")
}

fn span_events(mode: Option<&str>) -> FmtSpan {
    match mode {
        Some("full") => FmtSpan::FULL,
        Some("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        Some("none") => FmtSpan::NONE,
        _ => FmtSpan::CLOSE,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_log_directives() {
        // ---
        assert_eq!(log_directives(Some("WARN")), format!("warn,{DEPENDENCY_LEVELS}"));
        assert_eq!(log_directives(Some("loud")), format!("info,{DEPENDENCY_LEVELS}"));
        assert_eq!(log_directives(None), format!("info,{DEPENDENCY_LEVELS}"));
    }

    #[test]
    fn test_span_events_and_flags() {
        // ---
        assert_eq!(span_events(Some("full")), FmtSpan::FULL);
        assert_eq!(span_events(None), FmtSpan::CLOSE);
        assert_eq!(parse_flag(" Yes "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("auto"), None);
    }
}
