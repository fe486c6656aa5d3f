//! nr computes and applies releases of container images to workloads whose
//! manifests live in a git repository and run in a Kubernetes cluster.

pub mod auth;
pub mod cluster;
pub mod config;
pub mod git;
pub mod image;
pub mod manifest;
pub mod policy;
pub mod registry;
pub mod release;
pub mod resource;
pub mod workload;
