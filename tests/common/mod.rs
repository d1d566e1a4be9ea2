//! Shared fixtures for integration tests.

use chrono::{TimeZone, Utc};
use vpsie_lb_agent::models::{Backend, BackendStatus, LbAlgorithm, LoadBalancer, Protocol};

/// A minimal valid HTTP load balancer with one enabled backend.
pub fn sample_lb() -> LoadBalancer {
    LoadBalancer {
        id: "lb-1".into(),
        name: "integration".into(),
        protocol: Protocol::Http,
        port: 80,
        algorithm: LbAlgorithm::RoundRobin,
        backends: vec![Backend {
            id: "be-1".into(),
            address: "10.0.0.1".into(),
            port: 8080,
            weight: 0,
            enabled: true,
            status: BackendStatus::Up,
        }],
        health_check: None,
        tls_config: None,
        timeouts: None,
        max_connections: 0,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        updated_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
    }
}
