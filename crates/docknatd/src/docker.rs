//! Container introspection.
//!
//! [`ContainerInspector`] reduces the container runtime to the one query the
//! reconciler needs. [`DockerInspector`] answers it through the Docker Engine
//! API; [`desired_mappings`] turns the answer into the desired mapping set.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use bollard::Docker;
use tracing::{debug, instrument, warn};

use docknat_common::{NatError, NatResult};

use crate::mapping::{MappingSet, PortMapping, Protocol};

/// One port publication of a container, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    /// Host address the port is bound to.
    pub ip: Option<String>,
    /// Port inside the container.
    pub private_port: u16,
    /// Host port; `None` for exposed but unpublished ports.
    pub public_port: Option<u16>,
    /// `tcp`, `udp` or `sctp`.
    pub protocol: String,
}

/// A running container, reduced to what the reconciler needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub published_ports: Vec<PublishedPort>,
    /// Container address keyed by network name.
    pub network_addresses: HashMap<String, String>,
}

/// Source of the running containers.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// Lists running containers.
    async fn list_containers(&self) -> NatResult<Vec<ContainerInfo>>;
}

/// [`ContainerInspector`] backed by the local Docker daemon.
pub struct DockerInspector {
    docker: Docker,
}

/// Seconds before a Docker API request is abandoned.
const DOCKER_TIMEOUT_SECS: u64 = 120;

impl DockerInspector {
    /// Connects using `DOCKER_HOST` or the default local socket, then
    /// negotiates the API version with the daemon.
    pub async fn connect() -> NatResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| NatError::unavailable("docker", e.to_string()))?;
        Self::negotiated(docker).await
    }

    /// Connects to the daemon listening on `path`.
    pub async fn connect_socket(path: &str) -> NatResult<Self> {
        let docker =
            Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|e| NatError::unavailable("docker", e.to_string()))?;
        Self::negotiated(docker).await
    }

    /// Older daemons reject requests made with a newer client version.
    async fn negotiated(docker: Docker) -> NatResult<Self> {
        let docker = docker
            .negotiate_version()
            .await
            .map_err(|e| NatError::unavailable("docker", format!("version negotiation: {e}")))?;
        debug!(version = ?docker.client_version(), "Negotiated Docker API version");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerInspector for DockerInspector {
    #[instrument(skip(self))]
    async fn list_containers(&self) -> NatResult<Vec<ContainerInfo>> {
        #[allow(deprecated)]
        let options = bollard::container::ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        #[allow(deprecated)]
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| NatError::unavailable("docker", e.to_string()))?;

        let infos: Vec<ContainerInfo> = containers
            .into_iter()
            .map(|container| {
                let published_ports = container
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PublishedPort {
                        ip: p.ip,
                        private_port: p.private_port,
                        public_port: p.public_port,
                        protocol: p.typ.map(|t| t.to_string()).unwrap_or_default(),
                    })
                    .collect();

                let network_addresses = container
                    .network_settings
                    .and_then(|settings| settings.networks)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(name, endpoint)| {
                        endpoint
                            .ip_address
                            .filter(|ip| !ip.is_empty())
                            .map(|ip| (name, ip))
                    })
                    .collect();

                ContainerInfo {
                    id: container.id.unwrap_or_default(),
                    published_ports,
                    network_addresses,
                }
            })
            .collect();

        debug!(containers = infos.len(), "Listed running containers");
        Ok(infos)
    }
}

/// Derives the desired mappings from the containers attached to `network`.
///
/// Publications without a host port, with a zero port, or with a protocol
/// other than tcp/udp are skipped.
pub fn desired_mappings(containers: &[ContainerInfo], network: &str) -> MappingSet {
    let mut set = MappingSet::new();

    for container in containers {
        let Some(address) = container.network_addresses.get(network) else {
            debug!(container = %container.id, network = %network, "Container not on network");
            continue;
        };
        let bridge_address = match address.parse::<Ipv4Addr>() {
            Ok(addr) => addr,
            Err(_) => {
                warn!(
                    container = %container.id,
                    address = %address,
                    "Container address is not IPv4, skipping"
                );
                continue;
            }
        };

        for port in &container.published_ports {
            let public_port = match port.public_port {
                Some(p) if p != 0 => p,
                _ => continue,
            };
            let protocol = if port.protocol.is_empty() {
                Protocol::Tcp
            } else {
                match port.protocol.parse::<Protocol>() {
                    Ok(protocol) => protocol,
                    Err(e) => {
                        debug!(container = %container.id, error = %e, "Skipping publication");
                        continue;
                    }
                }
            };

            let mut mapping =
                PortMapping::new(bridge_address, public_port, port.private_port, protocol);
            if let Some(ip) = &port.ip {
                mapping = mapping.with_source_address(ip.clone());
            }
            set.insert(mapping);
        }
    }

    set.retain_live("docker");
    set
}
