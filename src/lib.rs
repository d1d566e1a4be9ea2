//! VPSie Load Balancer Agent
//!
//! Control-plane agent that reconciles load balancer desired state from the
//! VPSie API into file-based Envoy configuration on the same host.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌────────────────────────────────────────────────────┐
//!                  │                      AGENT                         │
//!                  │                                                    │
//!   VPSie API      │  ┌─────────┐   ┌─────────┐   ┌────────────────┐   │
//!   ◀──────────────┼─▶│   api   │──▶│ models  │──▶│ envoy/generator │   │
//!   (poll, report) │  │ client  │   │validate │   │  (YAML render) │   │
//!                  │  └─────────┘   └─────────┘   └───────┬────────┘   │
//!                  │        ▲                             │            │
//!                  │        │      ┌──────────────┐      ▼            │
//!                  │  ┌─────┴────┐ │ envoy/store  │  listeners.yaml    │
//!                  │  │  agent   │▶│ atomic apply │  clusters.yaml     │
//!                  │  │  loop    │ │backup/restore│  bootstrap.yaml    │
//!                  │  └─────┬────┘ └──────────────┘                    │
//!                  │        │      ┌──────────────┐                    │
//!                  │        └─────▶│envoy/reloader│──▶ envoy binary    │
//!                  │               │ epoch + spawn│    (hot restart)   │
//!                  │               └──────────────┘                    │
//!                  └────────────────────────────────────────────────────┘
//! ```
//!
//! The proxy itself is an external collaborator: the agent only writes its
//! configuration files and drives epoch-numbered hot restarts.

// Core subsystems
pub mod agent;
pub mod api;
pub mod config;
pub mod envoy;
pub mod models;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use agent::Agent;
pub use config::AgentConfig;
pub use lifecycle::Shutdown;
