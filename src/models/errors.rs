//! Validation sentinels for inbound load balancer configuration.

use thiserror::Error;

/// Error returned when an inbound configuration violates a model invariant.
///
/// Validation is a gate: a configuration that fails any check is rejected
/// before it can reach the renderer or the on-disk store. Each variant maps
/// to exactly one invariant so callers can report which one was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid load balancer ID")]
    InvalidId,

    #[error("invalid load balancer name")]
    InvalidName,

    #[error("invalid port number")]
    InvalidPort,

    #[error("no backends configured")]
    NoBackends,

    #[error("HTTPS protocol requires TLS configuration")]
    MissingTlsConfig,

    #[error("invalid backend ID")]
    InvalidBackendId,

    #[error("invalid backend address")]
    InvalidBackendAddress,

    #[error("invalid backend port")]
    InvalidBackendPort,

    #[error("invalid health check interval")]
    InvalidHealthCheckInterval,

    #[error("invalid health check timeout")]
    InvalidHealthCheckTimeout,

    #[error("health check timeout must be less than interval")]
    HealthCheckTimeoutTooLong,

    #[error("invalid unhealthy threshold")]
    InvalidUnhealthyThreshold,

    #[error("invalid healthy threshold")]
    InvalidHealthyThreshold,

    #[error("HTTP/HTTPS health check requires path")]
    MissingHealthCheckPath,

    #[error("invalid health check path")]
    InvalidHealthCheckPath,

    #[error("missing certificate path")]
    MissingCertificate,

    #[error("missing private key path")]
    MissingPrivateKey,

    #[error("invalid TLS version")]
    InvalidTlsVersion,

    #[error("certificate path outside trusted directory")]
    UntrustedCertificatePath,
}
