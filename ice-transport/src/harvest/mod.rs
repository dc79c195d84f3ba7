//! Host candidate harvesting: walks the allowed interfaces and addresses,
//! binds a socket for each within the requested port range, and hands the
//! resulting candidates to their component.

pub mod filters;

#[cfg(test)]
mod harvest_test;

use crate::candidate::{Component, HostCandidate};
use crate::config;
use crate::socket::IceSocketWrapper;
use crate::stack::StunDataFilter;
use crate::transport::tcp::IceTcpTransport;
use crate::transport::udp::IceUdpTransport;
use crate::transport::DEFAULT_TRANSPORT_ID;
use filters::NetInterface;
use log::warn;
use serde::Serialize;
use shared::error::{Error, Result};
use shared::{TransportAddress, TransportProtocol};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timing and yield of one or more harvests.
#[derive(Debug, Default, Serialize)]
pub struct HarvestStatistics {
    #[serde(skip)]
    started: Option<Instant>,
    /// Accumulated harvesting time.
    pub elapsed: Duration,
    /// Candidates the component ended up with, recorded even when the
    /// harvest failed part-way.
    pub candidate_count: usize,
}

impl HarvestStatistics {
    fn start_harvest_timing(&mut self) {
        self.started = Some(Instant::now());
    }

    fn stop_harvest_timing(&mut self, candidate_count: usize) {
        if let Some(started) = self.started.take() {
            self.elapsed += started.elapsed();
        }
        self.candidate_count = candidate_count;
    }
}

/// Gathers host candidates for a component. Most other harvesters rely on
/// the sockets this one binds.
pub struct HostCandidateHarvester {
    transport_id: String,
    harvest_statistics: HarvestStatistics,
}

impl Default for HostCandidateHarvester {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCandidateHarvester {
    pub fn new() -> Self {
        Self::with_transport_id(DEFAULT_TRANSPORT_ID)
    }

    /// A harvester feeding a dedicated acceptor instance instead of the
    /// shared one.
    pub fn with_transport_id(transport_id: &str) -> Self {
        Self {
            transport_id: transport_id.to_owned(),
            harvest_statistics: HarvestStatistics::default(),
        }
    }

    pub fn harvest_statistics(&self) -> &HarvestStatistics {
        &self.harvest_statistics
    }

    /// Binds sockets for `component` on every allowed local address,
    /// starting at `preferred_port` and scanning `[min_port, max_port]`
    /// with wrap-around.
    ///
    /// Fails with `ErrIllegalArgument` on a bad port range, `ErrConfig`
    /// on an invalid filter configuration and `ErrNoBoundCandidate` when
    /// not a single socket could be bound. Per-address bind failures are
    /// logged and skipped; statistics record the partial progress either
    /// way.
    pub async fn harvest(
        &mut self,
        component: &Component,
        preferred_port: u16,
        min_port: u16,
        max_port: u16,
        transport: TransportProtocol,
    ) -> Result<()> {
        let interfaces = filters::enumerate_interfaces();
        self.harvest_interfaces(
            component,
            interfaces,
            preferred_port,
            min_port,
            max_port,
            transport,
        )
        .await
    }

    pub(crate) async fn harvest_interfaces(
        &mut self,
        component: &Component,
        interfaces: Vec<NetInterface>,
        preferred_port: u16,
        min_port: u16,
        max_port: u16,
        transport: TransportProtocol,
    ) -> Result<()> {
        self.harvest_statistics.start_harvest_timing();
        let result = self
            .do_harvest(
                component,
                interfaces,
                preferred_port,
                min_port,
                max_port,
                transport,
            )
            .await;
        self.harvest_statistics
            .stop_harvest_timing(component.local_candidate_count());
        result
    }

    async fn do_harvest(
        &self,
        component: &Component,
        interfaces: Vec<NetInterface>,
        preferred_port: u16,
        min_port: u16,
        max_port: u16,
        transport: TransportProtocol,
    ) -> Result<()> {
        check_ports(preferred_port, min_port, max_port)?;
        let interface_filter = filters::interface_filter()?;
        let address_filter = filters::address_filter();

        let mut bound_at_least_one_socket = false;
        for iface in interfaces {
            if iface.is_loopback || !interface_filter.is_interface_allowed(&iface.name) {
                continue;
            }
            for addr in &iface.addrs {
                if !address_filter.admits(addr) {
                    continue;
                }
                if transport == TransportProtocol::TCP && addr.is_ipv6() {
                    continue;
                }
                let socket = match transport {
                    TransportProtocol::UDP => {
                        self.create_datagram_socket(*addr, preferred_port, min_port, max_port)
                            .await
                    }
                    TransportProtocol::TCP => {
                        self.create_server_socket(*addr, preferred_port, min_port, max_port)
                            .await
                    }
                };
                let socket = match socket {
                    Ok(socket) => socket,
                    Err(err) => {
                        warn!(
                            "socket creation failed on {addr}/{transport}, ports - \
                             preferred: {preferred_port} min: {min_port} max: {max_port}: {err}"
                        );
                        continue;
                    }
                };
                bound_at_least_one_socket = true;

                let mut candidate =
                    HostCandidate::new(socket.clone(), component.component_id(), transport);
                candidate.set_virtual(iface.is_virtual);
                component.add_local_candidate(candidate);

                match transport {
                    TransportProtocol::UDP => {
                        // host candidates carry the connectivity checks, so
                        // their queues only admit STUN
                        socket.add_filter(Arc::new(StunDataFilter));
                        IceUdpTransport::instance(&self.transport_id)
                            .add_binding_with(component.stun_stack(), socket.clone())
                            .await?;
                    }
                    TransportProtocol::TCP => {
                        // the stack attaches once a client actually connects
                        IceTcpTransport::instance(&self.transport_id)
                            .add_binding_with(component.stun_stack(), socket.clone())
                            .await?;
                    }
                }
            }
        }
        if !bound_at_least_one_socket {
            return Err(Error::ErrNoBoundCandidate);
        }
        Ok(())
    }

    /// Binds a datagram socket on `addr`, trying `preferred_port` first
    /// and then scanning upward with wrap-around, for at most
    /// `ICE_BIND_RETRIES` attempts.
    pub(crate) async fn create_datagram_socket(
        &self,
        addr: IpAddr,
        preferred_port: u16,
        min_port: u16,
        max_port: u16,
    ) -> Result<Arc<IceSocketWrapper>> {
        let transport = IceUdpTransport::instance(&self.transport_id);
        let mut port = preferred_port;
        for _ in 0..config::bind_retries() {
            let local = TransportAddress::new(addr, port, TransportProtocol::UDP);
            match transport.add_binding(local).await {
                Ok(()) => {
                    let wrapper = IceSocketWrapper::with_transport_id(local, &self.transport_id);
                    wrapper.set_owns_binding();
                    return Ok(wrapper);
                }
                Err(err) => {
                    warn!("retrying a bind because of a failure to bind to {local}: {err}")
                }
            }
            port = if port >= max_port { min_port } else { port + 1 };
        }
        Err(Error::ErrBindFailed)
    }

    /// TCP analogue of
    /// [`create_datagram_socket`](HostCandidateHarvester::create_datagram_socket):
    /// binds a listener and returns its wrapper.
    pub(crate) async fn create_server_socket(
        &self,
        addr: IpAddr,
        preferred_port: u16,
        min_port: u16,
        max_port: u16,
    ) -> Result<Arc<IceSocketWrapper>> {
        let transport = IceTcpTransport::instance(&self.transport_id);
        let mut port = preferred_port;
        for _ in 0..config::bind_retries() {
            let local = TransportAddress::new(addr, port, TransportProtocol::TCP);
            match transport.add_binding(local).await {
                Ok(()) => {
                    let wrapper = IceSocketWrapper::with_transport_id(local, &self.transport_id);
                    wrapper.set_owns_binding();
                    return Ok(wrapper);
                }
                Err(err) => {
                    warn!("retrying a bind because of a failure to bind to {local}: {err}")
                }
            }
            port = if port >= max_port { min_port } else { port + 1 };
        }
        Err(Error::ErrBindFailed)
    }
}

/// Port sanity: dynamic-range ports only, ordered, with the preferred
/// port inside the range.
fn check_ports(preferred_port: u16, min_port: u16, max_port: u16) -> Result<()> {
    if min_port < 1024 || max_port < 1024 {
        return Err(Error::ErrIllegalArgument(format!(
            "min_port ({min_port}) and max_port ({max_port}) should be integers between \
             1024 and 65535"
        )));
    }
    if min_port > max_port {
        return Err(Error::ErrIllegalArgument(format!(
            "min_port ({min_port}) should be less than or equal to max_port ({max_port})"
        )));
    }
    if preferred_port < min_port || preferred_port > max_port {
        return Err(Error::ErrIllegalArgument(format!(
            "preferred_port ({preferred_port}) must be between min_port ({min_port}) and \
             max_port ({max_port})"
        )));
    }
    Ok(())
}
