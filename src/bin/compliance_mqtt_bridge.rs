//! compliance_mqtt_bridge - Publish stored compliance reports to MQTT.
//!
//! Reads new frame reports from the SQLite report store and publishes:
//! 1. `<prefix>/compliance`: the latest compliance result (retained)
//! 2. `<prefix>/alert`: warnings and critical alerts, rate limited per cooldown
//! 3. `<prefix>/status`: online/offline availability via Last Will
//!
//! Runs once or, with `--daemon`, polls the store until interrupted. Alert
//! cooldowns follow each report's capture time, and together with the cursor
//! they can be carried across runs in a state file.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ppe_compliance::{
    AlertDecision, AlertGate, AlertType, PipelineConfig, ReportStore, SqliteReportStore,
    StoredReport,
};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

#[path = "../ui.rs"]
mod ui;

const BRIDGE_NAME: &str = "compliance_mqtt_bridge";
const DEFAULT_TOPIC_PREFIX: &str = "ppe";
const AVAILABILITY_TOPIC_SUFFIX: &str = "status";
const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const ALERT_CHANNEL: &str = "mqtt";
const BATCH_SIZE: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish PPE compliance reports to MQTT")]
struct Args {
    /// Report database (defaults to the configured db_path).
    #[arg(long)]
    db: Option<String>,

    /// File holding the last published report id and alert cooldowns.
    #[arg(long, env = "PPE_BRIDGE_STATE_PATH")]
    state_path: Option<PathBuf>,

    /// MQTT broker address (mqtt://host:port or mqtts://host:port).
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts://).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// MQTT topic prefix.
    #[arg(long, env = "MQTT_TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
    mqtt_topic_prefix: String,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = BRIDGE_NAME)]
    mqtt_client_id: String,

    /// Keep polling the store for new reports.
    #[arg(long, env = "DAEMON_MODE")]
    daemon: bool,

    /// Poll interval in seconds (daemon mode only).
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 5)]
    poll_interval: u64,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

struct MqttRuntime {
    client: Client,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttRuntime {
    fn new(client: Client, mut connection: Connection) -> Self {
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            client,
            connection_handle: Some(handle),
        }
    }

    fn disconnect(mut self) -> Result<()> {
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Progress carried between runs.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct BridgeState {
    cursor: i64,
    #[serde(default)]
    alerts: Vec<AlertMark>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct AlertMark {
    alert_type: AlertType,
    fired_at: u64,
}

struct Bridge {
    store: SqliteReportStore,
    gate: AlertGate,
    cursor: i64,
    state_path: Option<PathBuf>,
    topic_prefix: String,
}

impl Bridge {
    fn new(
        store: SqliteReportStore,
        cooldown: Duration,
        state: BridgeState,
        state_path: Option<PathBuf>,
        topic_prefix: String,
    ) -> Self {
        let mut gate = AlertGate::new(cooldown);
        for mark in &state.alerts {
            gate.record_fired(ALERT_CHANNEL, mark.alert_type, mark.fired_at);
        }
        Self {
            store,
            gate,
            cursor: state.cursor,
            state_path,
            topic_prefix,
        }
    }

    fn state(&self) -> BridgeState {
        BridgeState {
            cursor: self.cursor,
            alerts: self
                .gate
                .last_fired(ALERT_CHANNEL)
                .into_iter()
                .map(|(alert_type, fired_at)| AlertMark {
                    alert_type,
                    fired_at,
                })
                .collect(),
        }
    }

    /// Publish every report after the cursor. Returns how many were sent.
    fn publish_pending(&mut self, client: &Client) -> Result<usize> {
        let mut published = 0;
        loop {
            let batch = self.store.reports_after(self.cursor, BATCH_SIZE)?;
            if batch.is_empty() {
                break;
            }
            for stored in &batch {
                self.publish_report(client, stored)?;
                self.cursor = stored.id;
                published += 1;
            }
            if let Some(path) = self.state_path.as_deref() {
                save_state(path, &self.state())?;
            }
            if batch.len() < BATCH_SIZE {
                break;
            }
        }
        Ok(published)
    }

    fn publish_report(&mut self, client: &Client, stored: &StoredReport) -> Result<()> {
        let result = &stored.report.result;
        let topic = format!("{}/compliance", self.topic_prefix);
        mqtt_publish_qos1(client, &topic, &serde_json::to_vec(result)?, true)?;

        if let Some(decision) = self.alert_for(stored) {
            publish_alert(client, &self.topic_prefix, &decision)?;
        }
        Ok(())
    }

    /// Cooldowns are measured between capture times, so a backlog drained in
    /// one pass alerts as often as it would have live.
    fn alert_for(&mut self, stored: &StoredReport) -> Option<AlertDecision> {
        self.gate.evaluate_at(
            ALERT_CHANNEL,
            &stored.report.result,
            stored.report.captured_at,
        )
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(&args.ui);

    let config = PipelineConfig::load()?;
    let endpoint = parse_mqtt_endpoint(&args.mqtt_broker_addr, args.mqtt_use_tls)?;
    let ca = match args.mqtt_tls_ca_path.as_ref() {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("failed to read MQTT TLS CA {}", path.display()))?,
        ),
        None => None,
    };

    let db_path = args.db.clone().unwrap_or_else(|| config.db_path.clone());
    let mut bridge = {
        let _stage = ui.stage("Open report store");
        let state = match args.state_path.as_deref() {
            Some(path) => load_state(path)?,
            None => BridgeState::default(),
        };
        Bridge::new(
            SqliteReportStore::open(&db_path)?,
            config.alert_cooldown,
            state,
            args.state_path.clone(),
            args.mqtt_topic_prefix.clone(),
        )
    };

    let availability_topic = format!("{}/{}", args.mqtt_topic_prefix, AVAILABILITY_TOPIC_SUFFIX);
    let conn = {
        let _stage = ui.stage("Connect to MQTT broker");
        connect_mqtt(
            &endpoint,
            ca,
            &args.mqtt_client_id,
            args.mqtt_username.as_deref(),
            args.mqtt_password.as_deref(),
            &availability_topic,
        )?
    };
    mqtt_publish_qos1(
        &conn.client,
        &availability_topic,
        PAYLOAD_ONLINE.as_bytes(),
        true,
    )?;

    if args.daemon {
        run_daemon(&mut bridge, &conn.client, Duration::from_secs(args.poll_interval))?;
        mqtt_publish_qos1(
            &conn.client,
            &availability_topic,
            PAYLOAD_OFFLINE.as_bytes(),
            true,
        )?;
    } else {
        let _stage = ui.stage("Publish reports");
        let published = bridge.publish_pending(&conn.client)?;
        log::info!("Published {} reports", published);
    }

    conn.disconnect()
}

fn run_daemon(bridge: &mut Bridge, client: &Client, poll_interval: Duration) -> Result<()> {
    log::info!(
        "Starting daemon mode (poll interval: {}s)",
        poll_interval.as_secs()
    );
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    loop {
        match bridge.publish_pending(client) {
            Ok(0) => {}
            Ok(published) => log::info!("Published {} new reports", published),
            Err(e) => log::warn!("Failed to publish reports: {:#}", e),
        }
        match stop_rx.recv_timeout(poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("Stopping at report {}", bridge.cursor);
                return Ok(());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }
}

fn publish_alert(client: &Client, topic_prefix: &str, decision: &AlertDecision) -> Result<()> {
    let topic = format!("{}/alert", topic_prefix);
    mqtt_publish_qos1(client, &topic, &serde_json::to_vec(decision)?, false)?;
    log::info!("Alert sent: {}", decision.subject);
    Ok(())
}

fn load_state(path: &Path) -> Result<BridgeState> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("invalid bridge state in {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeState::default()),
        Err(e) => Err(anyhow!("failed to read bridge state {}: {}", path.display(), e)),
    }
}

fn save_state(path: &Path, state: &BridgeState) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(state)?)
        .with_context(|| format!("failed to write bridge state {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace bridge state {}", path.display()))?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
struct MqttEndpoint {
    host: String,
    port: u16,
    use_tls: bool,
}

fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

fn build_transport(endpoint: &MqttEndpoint, ca: Option<Vec<u8>>) -> Result<Transport> {
    match (endpoint.use_tls, ca) {
        (false, None) => Ok(Transport::tcp()),
        (false, Some(_)) => Err(anyhow!(
            "MQTT TLS CA provided but TLS is disabled (use --mqtt-use-tls or mqtts://)"
        )),
        (true, None) => Ok(Transport::tls_with_default_config()),
        (true, Some(ca)) => Ok(Transport::tls(ca, None, None)),
    }
}

fn connect_mqtt(
    endpoint: &MqttEndpoint,
    ca: Option<Vec<u8>>,
    client_id: &str,
    username: Option<&str>,
    password: Option<&str>,
    will_topic: &str,
) -> Result<MqttRuntime> {
    let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(Duration::from_secs(60));
    options.set_clean_start(true);
    if let Some(user) = username {
        options.set_credentials(user, password.unwrap_or_default());
    }
    let will = rumqttc::v5::mqttbytes::v5::LastWill::new(
        will_topic,
        PAYLOAD_OFFLINE.as_bytes().to_vec(),
        QoS::AtLeastOnce,
        true,
        None,
    );
    options.set_last_will(will);
    options.set_transport(build_transport(endpoint, ca)?);

    let (client, connection) = Client::new(options, 10);
    log::info!(
        "Connected to MQTT broker {}:{} (TLS: {}, auth: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls,
        username.is_some()
    );
    Ok(MqttRuntime::new(client, connection))
}

fn mqtt_publish_qos1(client: &Client, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
    client.publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())?;
    Ok(())
}
