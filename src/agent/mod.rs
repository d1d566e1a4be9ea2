//! Reconciliation engine.
//!
//! # Data Flow
//! ```text
//! tick (poll interval)
//!     → api fetch desired state
//!     → model validation gate
//!     → fingerprint compare (no-op when unchanged)
//!     → store backup → render → atomic apply
//!     → epoch-numbered hot restart
//!     → config_updated event + status report (best effort)
//!
//! On reload failure: restore backup, epoch already rolled back, tick fails
//! ```
//!
//! # Design Decisions
//! - One reconciliation in flight per load balancer, ever
//! - Loop errors are logged and the next tick retries; only startup fails hard
//! - The fingerprint covers the whole serialized model, timestamps included

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use metrics::counter;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, ClientError, VpsieClient};
use crate::config::{load_api_key, AgentConfig, ConfigError};
use crate::envoy::{
    BinaryValidator, ConfigStore, Generator, ReloadError, Reloader, RenderError, StoreError,
};
use crate::models::{LoadBalancer, ValidationError};

/// Fatal errors while assembling the agent. The process should exit
/// non-zero on any of these.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to load API key: {0}")]
    ApiKey(#[from] ConfigError),

    #[error("failed to create API client: {0}")]
    Client(#[from] ClientError),

    #[error("invalid Envoy config directory: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a single reconciliation tick. Never fatal: the loop logs it
/// and waits for the next tick.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch config: {0}")]
    Fetch(#[from] ApiError),

    #[error("invalid configuration from VPSie: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to generate Envoy config: {0}")]
    Render(#[from] RenderError),

    #[error("failed to apply config: {0}")]
    Apply(StoreError),

    #[error("failed to reload Envoy: {0}")]
    Reload(#[from] ReloadError),
}

/// The control-plane agent: owns the reconciliation loop and all Envoy
/// collaborators for one load balancer.
pub struct Agent {
    config: AgentConfig,
    client: VpsieClient,
    generator: Generator,
    store: ConfigStore,
    reloader: Reloader,
    validator: BinaryValidator,
    last_fingerprint: Mutex<Option<String>>,
    running: AtomicBool,
}

impl Agent {
    /// Assemble the agent from its local configuration: read the API key,
    /// construct the guarded client, and wire up the Envoy collaborators.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let api_key = load_api_key(Path::new(&config.vpsie.api_key_file))?;
        let client = VpsieClient::new(
            api_key,
            &config.vpsie.api_url,
            config.vpsie.loadbalancer_id.clone(),
        )?;
        Self::assemble(config, client)
    }

    fn assemble(config: AgentConfig, client: VpsieClient) -> Result<Self, AgentError> {
        let generator = Generator::new(
            config.vpsie.loadbalancer_id.clone(),
            config.envoy.config_path.clone(),
            config.envoy.admin_address.clone(),
            config.envoy.admin_port,
            config.envoy.max_connections,
        );
        let store = ConfigStore::new(&config.envoy.config_path)?;
        let reloader = Reloader::new(
            &config.envoy.binary_path,
            store.bootstrap_path(),
            &config.envoy.pid_file,
        );
        let validator = BinaryValidator::new(&config.envoy.binary_path);

        Ok(Self {
            config,
            client,
            generator,
            store,
            reloader,
            validator,
            last_fingerprint: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Test-only assembly with an externally built (guard-bypassed) client.
    #[cfg(test)]
    pub(crate) fn with_client(config: AgentConfig, client: VpsieClient) -> Result<Self, AgentError> {
        Self::assemble(config, client)
    }

    /// Run the reconciliation loop until the shutdown signal arrives.
    ///
    /// One immediate attempt happens at startup; afterwards the loop wakes
    /// once per poll interval. Tick failures are logged and retried on the
    /// next tick, never escalated.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            loadbalancer_id = %self.config.vpsie.loadbalancer_id,
            poll_interval = ?self.config.vpsie.poll_interval,
            "starting VPSie load balancer agent"
        );
        self.running.store(true, Ordering::SeqCst);

        self.write_bootstrap();

        if let Err(err) = self.sync_configuration().await {
            warn!(error = %err, "initial configuration sync failed");
        }

        let mut ticker = interval(self.config.vpsie.poll_interval);
        // The first tick of a fresh interval completes immediately and the
        // initial sync already ran; consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("agent stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sync_configuration().await {
                        error!(error = %err, "error syncing configuration");
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Render and persist the static bootstrap, then let the binary check
    /// it when available. Neither step blocks startup: a tick can still
    /// succeed later once the directory or binary appears.
    fn write_bootstrap(&self) {
        let bootstrap = self.generator.generate_bootstrap();
        if let Err(err) = self.store.write_bootstrap(&bootstrap) {
            error!(error = %err, "failed to write bootstrap config");
            return;
        }
        if let Err(err) = self.validator.validate_bootstrap(&self.store.bootstrap_path()) {
            warn!(error = %err, "bootstrap validation skipped or failed");
        }
    }

    /// One reconciliation pass.
    pub async fn sync_configuration(&self) -> Result<(), SyncError> {
        debug!("syncing configuration from VPSie API");

        let lb = self.client.fetch_config().await?;
        lb.validate()?;

        let fingerprint = compute_fingerprint(&lb);
        if self.last_fingerprint.lock().unwrap_or_else(|e| e.into_inner()).as_deref()
            == Some(fingerprint.as_str())
        {
            debug!("configuration unchanged, skipping update");
            counter!("agent_reconciliations_total", "outcome" => "noop").increment(1);
            return Ok(());
        }

        info!(config_hash = %fingerprint, "configuration changed, applying");

        if let Err(err) = self.store.backup_config() {
            warn!(error = %err, "failed to back up current config");
        }

        let rendered = self.generator.generate_full_config(&lb)?;
        self.store.apply_config(&rendered).map_err(SyncError::Apply)?;

        if let Err(err) = self.reload_envoy() {
            warn!(error = %err, "reload failed, restoring backup");
            if let Err(restore_err) = self.store.restore_config() {
                error!(error = %restore_err, "failed to restore backup");
            }
            counter!("agent_reconciliations_total", "outcome" => "rolled_back").increment(1);
            return Err(err.into());
        }

        *self
            .last_fingerprint
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(fingerprint.clone());

        let epoch = self.reloader.current_epoch();
        if let Err(err) = self
            .client
            .send_event(
                "config_updated",
                "Configuration successfully updated",
                json!({ "config_hash": fingerprint, "epoch": epoch }),
            )
            .await
        {
            warn!(error = %err, "failed to send update event");
        }
        if let Err(err) = self.client.report_status("active").await {
            warn!(error = %err, "failed to report status");
        }

        counter!("agent_reconciliations_total", "outcome" => "applied").increment(1);
        info!(epoch, "configuration sync completed");
        Ok(())
    }

    fn reload_envoy(&self) -> Result<(), ReloadError> {
        let current = self.reloader.current_epoch();
        info!(from = current, to = current + 1, "initiating Envoy hot restart");
        self.reloader.reload()
    }
}

/// Content hash of the desired-state model used for no-op detection.
///
/// Falls back to a coarse composite when serialization fails; degraded but
/// still change-sensitive enough to avoid a frozen data plane.
fn compute_fingerprint(lb: &LoadBalancer) -> String {
    match serde_json::to_vec(lb) {
        Ok(data) => {
            let digest = Sha256::digest(&data);
            digest.iter().map(|b| format!("{b:02x}")).collect()
        }
        Err(err) => {
            warn!(error = %err, "failed to marshal config for hashing, using degraded fingerprint");
            counter!("agent_fingerprint_fallbacks_total").increment(1);
            format!("{}-{}-{}", lb.updated_at.to_rfc3339(), lb.backends.len(), lb.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvoySettings, LoggingConfig, VpsieSettings};
    use crate::lifecycle::Shutdown;
    use std::fs;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lb_payload(address: &str, port: u16) -> serde_json::Value {
        json!({
            "id": "lb-1",
            "name": "t",
            "protocol": "http",
            "port": 80,
            "algorithm": "round_robin",
            "backends": [
                {"id": "be-1", "address": address, "port": port, "enabled": true}
            ],
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z"
        })
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        server: MockServer,
        agent: Agent,
    }

    async fn harness(binary_path: &str) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join("conf");
        fs::create_dir_all(&config_dir).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/loadbalancers/lb-1/events"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/loadbalancers/lb-1/status"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let config = AgentConfig {
            vpsie: VpsieSettings {
                api_url: server.uri(),
                api_key_file: String::new(),
                loadbalancer_id: "lb-1".into(),
                poll_interval: Duration::from_millis(20),
            },
            envoy: EnvoySettings {
                config_path: config_dir.to_string_lossy().into_owned(),
                binary_path: binary_path.into(),
                ..EnvoySettings::default()
            },
            logging: LoggingConfig::default(),
        };

        let client = VpsieClient::new_for_tests("key", &server.uri(), "lb-1").unwrap();
        let agent = Agent::with_client(config, client).unwrap();

        Harness {
            _tmp: tmp,
            server,
            agent,
        }
    }

    async fn mount_fetch(server: &MockServer, payload: serde_json::Value, times: u64) {
        Mock::given(method("GET"))
            .and(path("/loadbalancers/lb-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload))
            .up_to_n_times(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn first_sync_applies_and_restarts() {
        let h = harness("/bin/true").await;
        mount_fetch(&h.server, lb_payload("10.0.0.1", 8080), 1).await;

        h.agent.sync_configuration().await.unwrap();

        let listeners = fs::read_to_string(h.agent.store.listeners_path()).unwrap();
        let clusters = fs::read_to_string(h.agent.store.clusters_path()).unwrap();
        assert!(listeners.contains("listener_http_80"));
        assert!(clusters.contains("cluster_lb-1"));
        assert!(clusters.contains("address: \"10.0.0.1\""));
        assert!(clusters.contains("port_value: 8080"));
        assert_eq!(h.agent.reloader.current_epoch(), 1);
    }

    #[tokio::test]
    async fn unchanged_config_is_a_noop() {
        let h = harness("/bin/true").await;
        mount_fetch(&h.server, lb_payload("10.0.0.1", 8080), 2).await;

        h.agent.sync_configuration().await.unwrap();
        let first = fs::metadata(h.agent.store.listeners_path()).unwrap().modified().unwrap();

        h.agent.sync_configuration().await.unwrap();
        let second = fs::metadata(h.agent.store.listeners_path()).unwrap().modified().unwrap();

        assert_eq!(h.agent.reloader.current_epoch(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invalid_config_writes_nothing() {
        let h = harness("/bin/true").await;
        let mut payload = lb_payload("10.0.0.1", 8080);
        payload["protocol"] = json!("https");
        mount_fetch(&h.server, payload, 1).await;

        let err = h.agent.sync_configuration().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Validation(ValidationError::MissingTlsConfig)
        ));
        assert!(!h.agent.store.listeners_path().exists());
        assert_eq!(h.agent.reloader.current_epoch(), 0);
    }

    #[tokio::test]
    async fn changed_backend_triggers_second_epoch() {
        let h = harness("/bin/true").await;
        mount_fetch(&h.server, lb_payload("10.0.0.1", 8080), 1).await;
        mount_fetch(&h.server, lb_payload("10.0.0.2", 8080), 1).await;

        h.agent.sync_configuration().await.unwrap();
        h.agent.sync_configuration().await.unwrap();

        let clusters = fs::read_to_string(h.agent.store.clusters_path()).unwrap();
        assert!(clusters.contains("address: \"10.0.0.2\""));
        assert!(!clusters.contains("address: \"10.0.0.1\""));
        assert_eq!(h.agent.reloader.current_epoch(), 2);
    }

    #[tokio::test]
    async fn failed_reload_restores_previous_files() {
        let tmp_bin = tempfile::tempdir().unwrap();
        let flaky_binary = tmp_bin.path().join("envoy");
        fs::copy("/bin/true", &flaky_binary).unwrap();

        let h = harness(&flaky_binary.to_string_lossy()).await;
        mount_fetch(&h.server, lb_payload("10.0.0.1", 8080), 1).await;
        mount_fetch(&h.server, lb_payload("10.0.0.1", 9090), 1).await;

        h.agent.sync_configuration().await.unwrap();
        let listeners_before = fs::read(h.agent.store.listeners_path()).unwrap();
        let clusters_before = fs::read(h.agent.store.clusters_path()).unwrap();

        // The next reload cannot spawn.
        fs::remove_file(&flaky_binary).unwrap();

        let err = h.agent.sync_configuration().await.unwrap_err();
        assert!(matches!(err, SyncError::Reload(ReloadError::Spawn(_))));
        assert_eq!(h.agent.reloader.current_epoch(), 1);
        assert_eq!(fs::read(h.agent.store.listeners_path()).unwrap(), listeners_before);
        assert_eq!(fs::read(h.agent.store.clusters_path()).unwrap(), clusters_before);

        // The tick after the failure applies cleanly again.
        fs::copy("/bin/true", &flaky_binary).unwrap();
        mount_fetch(&h.server, lb_payload("10.0.0.1", 9090), 1).await;
        h.agent.sync_configuration().await.unwrap();
        assert_eq!(h.agent.reloader.current_epoch(), 2);
        let clusters = fs::read_to_string(h.agent.store.clusters_path()).unwrap();
        assert!(clusters.contains("port_value: 9090"));
    }

    #[tokio::test]
    async fn fetch_failure_abandons_the_tick() {
        let h = harness("/bin/true").await;
        Mock::given(method("GET"))
            .and(path("/loadbalancers/lb-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&h.server)
            .await;

        let err = h.agent.sync_configuration().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(ApiError::Status { code: 404, .. })));
        assert!(!h.agent.store.listeners_path().exists());
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let h = harness("/bin/true").await;
        mount_fetch(&h.server, lb_payload("10.0.0.1", 8080), 100).await;

        let shutdown = Shutdown::new();
        let receiver = shutdown.subscribe();
        assert!(!h.agent.is_running());

        let agent = std::sync::Arc::new(h.agent);
        let runner = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.run(receiver).await })
        };

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(agent.is_running());
        shutdown.trigger();
        runner.await.unwrap();
        assert!(!agent.is_running());

        // Identical payloads across ticks produced exactly one restart.
        assert_eq!(agent.reloader.current_epoch(), 1);
    }

    #[test]
    fn fingerprint_is_stable_and_change_sensitive() {
        let lb: LoadBalancer = serde_json::from_value(lb_payload("10.0.0.1", 8080)).unwrap();
        let same: LoadBalancer = serde_json::from_value(lb_payload("10.0.0.1", 8080)).unwrap();
        let changed: LoadBalancer = serde_json::from_value(lb_payload("10.0.0.1", 9090)).unwrap();

        assert_eq!(compute_fingerprint(&lb), compute_fingerprint(&same));
        assert_ne!(compute_fingerprint(&lb), compute_fingerprint(&changed));
        assert_eq!(compute_fingerprint(&lb).len(), 64);
    }

    #[test]
    fn fingerprint_tracks_timestamp_changes() {
        let lb: LoadBalancer = serde_json::from_value(lb_payload("10.0.0.1", 8080)).unwrap();
        let mut touched = lb.clone();
        touched.updated_at = touched.updated_at + chrono::Duration::seconds(1);
        assert_ne!(compute_fingerprint(&lb), compute_fingerprint(&touched));
    }
}
