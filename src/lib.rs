//! Synthesizes an EKS cluster stack as a declarative provisioning template.
//!
//! The pipeline is pure: context values become [`config::Settings`], the
//! network reference is materialized, the cluster and its capacity are
//! added, and the resulting [`template::Template`] is serialized.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod context;
pub mod network;
pub mod stack;
pub mod template;
