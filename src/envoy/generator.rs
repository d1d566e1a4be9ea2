//! Envoy configuration rendering.
//!
//! Pure text generation: one validated [`LoadBalancer`] in, a listener
//! document and a cluster document out, plus the static bootstrap rendered
//! once per agent. The output layer is textual YAML, so every dynamic
//! scalar is re-checked against its charset before it is written, and both
//! documents are re-parsed before they are accepted.

use thiserror::Error;

use crate::models::{
    self, HealthCheck, LbAlgorithm, LoadBalancer, Protocol, ValidationError,
};

/// Connect timeout emitted for every cluster, in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Circuit breaker profile emitted for every cluster.
const MAX_CONNECTIONS: u32 = 1024;
const MAX_PENDING_REQUESTS: u32 = 1024;
const MAX_REQUESTS: u32 = 1024;
const MAX_RETRIES: u32 = 3;

/// Rendering failures. None of these leave any file touched; the
/// reconciliation tick is abandoned before the store is involved.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid load balancer config: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid backend address for {backend_id}: {address:?}")]
    InvalidAddress { backend_id: String, address: String },

    #[error("invalid health check path {path:?}: must start with / and contain only [A-Za-z0-9/_-.]")]
    InvalidHealthCheckPath { path: String },

    #[error("rendered {document} is not valid YAML: {source}")]
    InvalidYaml {
        document: &'static str,
        source: serde_yaml::Error,
    },
}

/// Rendered proxy configuration: two YAML documents consumed through the
/// file-based LDS/CDS sources named in the bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvoyConfig {
    pub listeners: String,
    pub clusters: String,
}

/// Renders Envoy configuration from load balancer models.
#[derive(Debug, Clone)]
pub struct Generator {
    node_id: String,
    config_path: String,
    admin_address: String,
    admin_port: u16,
    max_connections: u64,
}

impl Generator {
    pub fn new(
        node_id: impl Into<String>,
        config_path: impl Into<String>,
        admin_address: impl Into<String>,
        admin_port: u16,
        max_connections: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            config_path: config_path.into(),
            admin_address: admin_address.into(),
            admin_port,
            max_connections,
        }
    }

    /// Render the complete per-tick configuration. The model is re-validated
    /// first so the renderer never consumes an ungated instance, and both
    /// documents are parsed back before they are returned.
    pub fn generate_full_config(&self, lb: &LoadBalancer) -> Result<EnvoyConfig, RenderError> {
        lb.validate()?;

        let listeners = self.generate_listener(lb)?;
        let clusters = self.generate_cluster(lb)?;

        parse_check("listener document", &listeners)?;
        parse_check("cluster document", &clusters)?;

        Ok(EnvoyConfig { listeners, clusters })
    }

    /// Render the listener document for the load balancer's protocol.
    pub fn generate_listener(&self, lb: &LoadBalancer) -> Result<String, RenderError> {
        let name = format!("listener_{}_{}", lb.protocol.as_str(), lb.port);
        let stat_prefix = format!("{}_{}", lb.protocol.as_str(), lb.port);
        let cluster_name = format!("cluster_{}", lb.id);

        let mut out = String::new();
        out.push_str("resources:\n");
        out.push_str("- \"@type\": type.googleapis.com/envoy.config.listener.v3.Listener\n");
        out.push_str(&format!("  name: {name}\n"));
        out.push_str("  address:\n");
        out.push_str("    socket_address:\n");
        out.push_str("      address: 0.0.0.0\n");
        out.push_str(&format!("      port_value: {}\n", lb.port));
        out.push_str("  filter_chains:\n");

        match lb.protocol {
            Protocol::Http | Protocol::Https => {
                out.push_str("  - filters:\n");
                out.push_str("    - name: envoy.filters.network.http_connection_manager\n");
                out.push_str("      typed_config:\n");
                out.push_str("        \"@type\": type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager\n");
                out.push_str(&format!("        stat_prefix: {stat_prefix}\n"));
                if let Some(timeouts) = &lb.timeouts {
                    if timeouts.request > 0 {
                        out.push_str(&format!("        request_timeout: {}s\n", timeouts.request));
                    }
                    if timeouts.idle > 0 {
                        out.push_str("        common_http_protocol_options:\n");
                        out.push_str(&format!("          idle_timeout: {}s\n", timeouts.idle));
                    }
                }
                out.push_str("        route_config:\n");
                out.push_str("          name: local_route\n");
                out.push_str("          virtual_hosts:\n");
                out.push_str("          - name: backend\n");
                out.push_str("            domains: [\"*\"]\n");
                out.push_str("            routes:\n");
                out.push_str("            - match:\n");
                out.push_str("                prefix: \"/\"\n");
                out.push_str("              route:\n");
                out.push_str(&format!("                cluster: {cluster_name}\n"));
                out.push_str("        http_filters:\n");
                out.push_str("        - name: envoy.filters.http.router\n");
                out.push_str("          typed_config:\n");
                out.push_str("            \"@type\": type.googleapis.com/envoy.extensions.filters.http.router.v3.Router\n");

                if lb.protocol == Protocol::Https {
                    if let Some(tls) = &lb.tls_config {
                        out.push_str("    transport_socket:\n");
                        out.push_str("      name: envoy.transport_sockets.tls\n");
                        out.push_str("      typed_config:\n");
                        out.push_str("        \"@type\": type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext\n");
                        out.push_str("        common_tls_context:\n");
                        out.push_str("          tls_params:\n");
                        out.push_str(&format!(
                            "            tls_minimum_protocol_version: {}\n",
                            tls_version_name(&tls.min_version)
                        ));
                        if let Some(max) = &tls.max_version {
                            out.push_str(&format!(
                                "            tls_maximum_protocol_version: {}\n",
                                tls_version_name(max)
                            ));
                        }
                        if !tls.cipher_suites.is_empty() {
                            out.push_str("            cipher_suites:\n");
                            for suite in &tls.cipher_suites {
                                out.push_str(&format!("            - {suite}\n"));
                            }
                        }
                        out.push_str("          tls_certificates:\n");
                        out.push_str("          - certificate_chain:\n");
                        out.push_str(&format!(
                            "              filename: \"{}\"\n",
                            tls.certificate_path
                        ));
                        out.push_str("            private_key:\n");
                        out.push_str(&format!(
                            "              filename: \"{}\"\n",
                            tls.private_key_path
                        ));
                        if let Some(ca) = &tls.ca_cert_path {
                            out.push_str("          validation_context:\n");
                            out.push_str(&format!("            trusted_ca:\n              filename: \"{ca}\"\n"));
                        }
                        out.push_str("          alpn_protocols:\n");
                        for proto in tls.alpn_or_default() {
                            out.push_str(&format!("          - \"{proto}\"\n"));
                        }
                    }
                }
            }
            Protocol::Tcp => {
                out.push_str("  - filters:\n");
                out.push_str("    - name: envoy.filters.network.tcp_proxy\n");
                out.push_str("      typed_config:\n");
                out.push_str("        \"@type\": type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy\n");
                out.push_str(&format!("        stat_prefix: {stat_prefix}\n"));
                out.push_str(&format!("        cluster: {cluster_name}\n"));
                if let Some(timeouts) = &lb.timeouts {
                    if timeouts.idle > 0 {
                        out.push_str(&format!("        idle_timeout: {}s\n", timeouts.idle));
                    }
                }
            }
        }

        Ok(out)
    }

    /// Render the cluster document with endpoints for every enabled backend.
    pub fn generate_cluster(&self, lb: &LoadBalancer) -> Result<String, RenderError> {
        let cluster_name = format!("cluster_{}", lb.id);

        let mut out = String::new();
        out.push_str("resources:\n");
        out.push_str("- \"@type\": type.googleapis.com/envoy.config.cluster.v3.Cluster\n");
        out.push_str(&format!("  name: {cluster_name}\n"));
        out.push_str(&format!("  connect_timeout: {CONNECT_TIMEOUT_SECS}s\n"));
        out.push_str("  type: STRICT_DNS\n");
        out.push_str(&format!("  lb_policy: {}\n", lb_policy_name(lb.algorithm)));
        out.push_str("  load_assignment:\n");
        out.push_str(&format!("    cluster_name: {cluster_name}\n"));
        out.push_str("    endpoints:\n");
        out.push_str("    - lb_endpoints:\n");

        for backend in lb.backends.iter().filter(|b| b.enabled) {
            // The address lands in a textual document; refuse anything
            // outside the validated charset even if the model was tampered
            // with after validation.
            if !models::is_valid_address(&backend.address) {
                return Err(RenderError::InvalidAddress {
                    backend_id: backend.id.clone(),
                    address: backend.address.clone(),
                });
            }
            out.push_str("      - endpoint:\n");
            out.push_str("          address:\n");
            out.push_str("            socket_address:\n");
            out.push_str(&format!("              address: \"{}\"\n", backend.address));
            out.push_str(&format!("              port_value: {}\n", backend.port));
            if backend.weight > 0 {
                out.push_str(&format!("        load_balancing_weight: {}\n", backend.weight));
            }
        }

        if let Some(hc) = &lb.health_check {
            self.push_health_check(&mut out, hc)?;
        }

        out.push_str("  circuit_breakers:\n");
        out.push_str("    thresholds:\n");
        out.push_str(&format!("    - max_connections: {MAX_CONNECTIONS}\n"));
        out.push_str(&format!("      max_pending_requests: {MAX_PENDING_REQUESTS}\n"));
        out.push_str(&format!("      max_requests: {MAX_REQUESTS}\n"));
        out.push_str(&format!("      max_retries: {MAX_RETRIES}\n"));

        Ok(out)
    }

    fn push_health_check(&self, out: &mut String, hc: &HealthCheck) -> Result<(), RenderError> {
        if hc.is_http_based() && !models::is_valid_probe_path(&hc.path) {
            return Err(RenderError::InvalidHealthCheckPath {
                path: hc.path.clone(),
            });
        }

        out.push_str("  health_checks:\n");
        out.push_str(&format!("  - timeout: {}s\n", hc.timeout));
        out.push_str(&format!("    interval: {}s\n", hc.interval));
        out.push_str(&format!("    unhealthy_threshold: {}\n", hc.unhealthy_threshold));
        out.push_str(&format!("    healthy_threshold: {}\n", hc.healthy_threshold));
        if hc.is_http_based() {
            out.push_str("    http_health_check:\n");
            out.push_str(&format!("      path: \"{}\"\n", hc.path));
            if !hc.expected_status.is_empty() {
                out.push_str("      expected_statuses:\n");
                for code in &hc.expected_status {
                    out.push_str(&format!("      - start: {code}\n"));
                    out.push_str(&format!("        end: {}\n", code + 1));
                }
            }
        } else {
            out.push_str("    tcp_health_check: {}\n");
        }
        Ok(())
    }

    /// Render the static bootstrap document: node identity, admin socket,
    /// file-based LDS/CDS sources, and the global connection runtime cap.
    pub fn generate_bootstrap(&self) -> String {
        let admin_host = self
            .admin_address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(self.admin_address.as_str());
        let config_path = self.config_path.trim_end_matches('/');

        let mut out = String::new();
        out.push_str("node:\n");
        out.push_str(&format!("  id: {}\n", self.node_id));
        out.push_str("  cluster: vpsie-lb\n");
        out.push_str("admin:\n");
        out.push_str("  address:\n");
        out.push_str("    socket_address:\n");
        out.push_str(&format!("      address: {admin_host}\n"));
        out.push_str(&format!("      port_value: {}\n", self.admin_port));
        out.push_str("dynamic_resources:\n");
        out.push_str("  lds_config:\n");
        out.push_str("    path_config_source:\n");
        out.push_str(&format!("      path: \"{config_path}/listeners.yaml\"\n"));
        out.push_str("  cds_config:\n");
        out.push_str("    path_config_source:\n");
        out.push_str(&format!("      path: \"{config_path}/clusters.yaml\"\n"));
        out.push_str("layered_runtime:\n");
        out.push_str("  layers:\n");
        out.push_str("  - name: static_layer\n");
        out.push_str("    static_layer:\n");
        out.push_str("      overload:\n");
        out.push_str(&format!(
            "        global_downstream_max_connections: {}\n",
            self.max_connections
        ));
        out
    }
}

fn lb_policy_name(algorithm: LbAlgorithm) -> &'static str {
    match algorithm {
        LbAlgorithm::RoundRobin => "ROUND_ROBIN",
        LbAlgorithm::LeastRequest => "LEAST_REQUEST",
        LbAlgorithm::Random => "RANDOM",
        LbAlgorithm::RingHash => "RING_HASH",
    }
}

/// Map the service's version names onto Envoy's enum names.
fn tls_version_name(version: &str) -> &'static str {
    match version {
        "TLSv1.3" => "TLSv1_3",
        _ => "TLSv1_2",
    }
}

fn parse_check(document: &'static str, yaml: &str) -> Result<(), RenderError> {
    serde_yaml::from_str::<serde_yaml::Value>(yaml).map(|_| ()).map_err(|source| {
        RenderError::InvalidYaml { document, source }
    })
}
