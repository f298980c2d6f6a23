//! Kubernetes operator provisioning Tempo in microservices mode.
//!
//! A reconcile cycle resolves the parameters of a `TempoStack`, renders the Tempo
//! configuration, builds the desired objects and converges the cluster to them.

pub mod cli;
pub mod config;
pub mod controller;
pub mod converge;
pub mod error;
pub mod generate;
pub mod logging;
pub mod manifests;
pub mod naming;
pub mod objects;
pub mod params;
pub mod platform;
pub mod reconcile;
pub mod status;
pub mod templates;
pub mod upgrade;
pub mod webhook;
