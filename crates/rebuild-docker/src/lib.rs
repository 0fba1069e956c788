//! # rebuild-docker
//!
//! A Docker API interception proxy for containerized builds. Requests to
//! the daemon pass through mostly untouched; around the container
//! lifecycle the proxy injects trust for the ephemeral rebuild CA
//! (container create and start) and removes every trace of it again
//! (export and commit), so the artifacts a build produces never reveal
//! they were built behind an intercepting proxy.

mod classify;
mod client;
mod containerfs;
mod error;
mod patch;
mod proxy;

pub use classify::{classify, Action};
pub use client::DockerClient;
pub use containerfs::{ContainerFile, ContainerFs, PathStat};
pub use error::DockerError;
pub use patch::{
    truststore_for_os_release, Patch, PatchRegistry, PatchSet, DISTRO_TRUSTSTORES,
    KANIKO_TRUSTSTORE,
};
pub use proxy::{
    DockerConfig, DockerListen, DockerProxy, CONTAINER_CERT, CONTAINER_JKS, CONTAINER_SOCK,
};
