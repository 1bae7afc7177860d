//! SNMP trap listener
//!
//! Receives SNMP notifications on a UDP port, checks version and community
//! against the listener configuration and hands every accepted trap to a
//! `TrapSource`. Packets that fail to decode or validate are logged and
//! discarded; the receive loop never stops on a bad packet.

use crate::config::ListenerConfig;
use crate::snmp_codec::{self, PduKind};
use crate::trap::{DecodedTrap, TrapSource};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

pub struct SnmpListener {
    config: ListenerConfig,
    sink: Arc<dyn TrapSource>,
}

impl SnmpListener {
    pub fn new(config: ListenerConfig, sink: Arc<dyn TrapSource>) -> Self {
        Self { config, sink }
    }

    /// Bind the configured address and receive until the task is aborted
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let socket = self.bind().await?;
        self.serve(socket).await
    }

    pub async fn bind(&self) -> Result<UdpSocket> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        info!("SNMP listener started on {}", bind_addr);
        Ok(socket)
    }

    /// Receive loop over an already bound socket
    pub async fn serve(self: Arc<Self>, socket: UdpSocket) -> Result<()> {
        let mut buffer = vec![0u8; self.config.max_packet_size];
        let mut packet_count = 0u64;

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, src_addr)) => {
                    packet_count += 1;
                    if packet_count % 1000 == 0 {
                        info!("Received {} UDP packets on port {}", packet_count, self.config.port);
                    }

                    if let Err(e) = self.handle_packet(&buffer[..len], src_addr) {
                        warn!("Discarded SNMP packet from {}: {:#}", src_addr, e);
                    }
                }
                Err(e) => {
                    error!("Failed to receive UDP packet: {}", e);
                }
            }
        }
    }

    /// Decode and validate one datagram, then pass the trap on
    pub fn handle_packet(&self, data: &[u8], src_addr: SocketAddr) -> Result<()> {
        debug!("Processing SNMP packet from {} ({} bytes)", src_addr, data.len());

        let message = snmp_codec::decode_message(data).context("SNMP decoding failed")?;

        if !self.config.accepts_version(message.version) {
            anyhow::bail!("SNMP version {:?} is not enabled on this listener", message.version);
        }
        if !self.config.community_strings.contains(&message.community) {
            anyhow::bail!("Invalid community string '{}'", message.community);
        }
        if message.pdu == PduKind::Inform {
            debug!("Inform from {} accepted without acknowledgement", src_addr);
        }

        let trap = DecodedTrap::received_now(src_addr.ip().to_string(), message.varbinds);
        self.sink.on_trap(trap);
        Ok(())
    }
}
