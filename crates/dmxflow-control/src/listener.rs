//! UDP listeners
//!
//! sACN gets one socket per universe, each joined to that universe's
//! multicast group. Art-Net universes share a single broadcast socket on
//! 6454. Every socket is opened with `SO_REUSEADDR` so several listeners can
//! share a port; the kernel may then hand a socket datagrams meant for
//! another universe, so each listener filters on its own universe list.

use parking_lot::RwLock;
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use dmxflow_core::{Protocol, Universe};

use crate::dmx::{decoder_for, default_port, multicast_group, FrameDecoder};
use crate::engine::ReceiverEngine;
use crate::error::{ControlError, Result};

/// Largest datagram we expect (an Ethernet MTU)
const RECV_BUFFER_LEN: usize = 1500;

/// What one listener binds to and which universes it accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub protocol: Protocol,
    /// Interface for sACN multicast membership and unicast binding.
    /// Art-Net always binds the wildcard address so broadcasts arrive.
    pub interface: Ipv4Addr,
    pub port: u16,
    /// Accepted universes; empty accepts all
    pub universes: Vec<Universe>,
    /// Join the sACN multicast group of every universe
    pub join_multicast: bool,
}

impl ListenerConfig {
    /// sACN listener for one universe
    pub fn sacn(universe: Universe, interface: Ipv4Addr) -> Self {
        Self {
            protocol: Protocol::Sacn,
            interface,
            port: default_port(Protocol::Sacn),
            universes: vec![universe],
            join_multicast: true,
        }
    }

    /// Shared Art-Net listener for a set of universes
    pub fn artnet(universes: Vec<Universe>, interface: Ipv4Addr) -> Self {
        Self {
            protocol: Protocol::ArtNet,
            interface,
            port: default_port(Protocol::ArtNet),
            universes,
            join_multicast: false,
        }
    }

    /// Use a non-standard port (0 picks a free one)
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bind to the interface address and receive unicast only
    pub fn unicast_only(mut self) -> Self {
        self.join_multicast = false;
        self
    }

    fn bind_addr(&self) -> SocketAddr {
        // Multicast and subnet broadcast delivery both need the wildcard address
        let ip = if self.join_multicast || self.protocol == Protocol::ArtNet {
            Ipv4Addr::UNSPECIFIED
        } else {
            self.interface
        };
        SocketAddr::V4(SocketAddrV4::new(ip, self.port))
    }
}

/// Universes a running listener hands to the engine.
///
/// Shared between the listener task and the engine, which widens it when a
/// fixture is patched into a new universe. Empty accepts all.
#[derive(Debug, Clone, Default)]
pub struct UniverseFilter(Arc<RwLock<Vec<Universe>>>);

impl UniverseFilter {
    pub fn new(universes: &[Universe]) -> Self {
        let mut universes = universes.to_vec();
        universes.sort();
        universes.dedup();
        Self(Arc::new(RwLock::new(universes)))
    }

    pub fn accepts(&self, universe: Universe) -> bool {
        let universes = self.0.read();
        universes.is_empty() || universes.contains(&universe)
    }

    /// Add a universe. Returns false if it was already accepted.
    pub fn insert(&self, universe: Universe) -> bool {
        let mut universes = self.0.write();
        if universes.is_empty() || universes.contains(&universe) {
            return false;
        }
        universes.push(universe);
        universes.sort();
        true
    }

    /// Snapshot of the accepted universes
    pub fn universes(&self) -> Vec<Universe> {
        self.0.read().clone()
    }
}

/// Listener configs for a set of protocols and universes.
///
/// One sACN listener per universe, one Art-Net listener covering all.
pub fn listener_plan(
    protocols: &[Protocol],
    universes: &[Universe],
    interface: Ipv4Addr,
) -> Vec<ListenerConfig> {
    let mut universes = universes.to_vec();
    universes.sort();
    universes.dedup();

    let mut plan = Vec::new();
    for protocol in protocols {
        match protocol {
            Protocol::Sacn => plan.extend(
                universes
                    .iter()
                    .map(|universe| ListenerConfig::sacn(*universe, interface)),
            ),
            Protocol::ArtNet => {
                plan.push(ListenerConfig::artnet(universes.clone(), interface));
            }
        }
    }
    plan
}

/// A bound socket feeding one protocol's frames to the engine
pub struct UniverseListener {
    config: ListenerConfig,
    filter: UniverseFilter,
    socket: UdpSocket,
    decoder: Box<dyn FrameDecoder>,
}

impl UniverseListener {
    /// Open the socket and join multicast groups.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: ListenerConfig) -> Result<Self> {
        let addr = config.bind_addr();
        let socket = open_socket(&config, addr)
            .and_then(UdpSocket::from_std)
            .map_err(|source| ControlError::SocketBind {
                protocol: config.protocol,
                addr,
                source,
            })?;

        tracing::info!(
            "{} listener bound on {} for universes {:?}",
            config.protocol,
            addr,
            config.universes.iter().map(|u| u.get()).collect::<Vec<_>>()
        );

        Ok(Self {
            decoder: decoder_for(config.protocol),
            filter: UniverseFilter::new(&config.universes),
            config,
            socket,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Listener settings
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Handle to the live universe filter
    pub fn filter(&self) -> UniverseFilter {
        self.filter.clone()
    }

    /// Receive until the shutdown flag is set
    pub async fn run(self, engine: ReceiverEngine, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.dispatch(&engine, &buf[..len], peer),
                    Err(e) => tracing::warn!("{} receive error: {}", self.config.protocol, e),
                }
            }
        }

        tracing::debug!("{} listener on {:?} stopped", self.config.protocol, self.socket.local_addr());
    }

    fn dispatch(&self, engine: &ReceiverEngine, datagram: &[u8], peer: SocketAddr) {
        match self.decoder.decode(datagram, peer) {
            Ok(frame) if self.filter.accepts(frame.universe) => engine.handle_frame(frame),
            Ok(frame) => engine.record_foreign_universe(frame.universe),
            Err(e) => engine.record_decode_error(&e),
        }
    }
}

fn open_socket(config: &ListenerConfig, addr: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
    socket.set_reuse_address(true)?;
    if config.protocol == Protocol::ArtNet {
        socket.set_broadcast(true)?;
    }
    socket.bind(&addr.into())?;

    if config.join_multicast && config.protocol == Protocol::Sacn {
        for universe in &config.universes {
            socket.join_multicast_v4(&multicast_group(*universe), &config.interface)?;
        }
    }

    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
