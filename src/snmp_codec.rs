//! Minimal BER decoder for SNMPv1 and SNMPv2c notifications
//!
//! Decodes the message envelope (version, community) and the three
//! notification PDUs a trap receiver sees: v1 Trap-PDU, SNMPv2-Trap-PDU and
//! InformRequest-PDU. v1 traps are translated to the v2 varbind layout
//! (sysUpTime.0, snmpTrapOID.0, ...) following RFC 3584 so the rest of the
//! pipeline only ever deals with one shape. SNMPv3 is not decoded.

use crate::config::SnmpVersion;
use crate::rules::SNMP_TRAP_OID;
use crate::trap::Varbind;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::net::Ipv4Addr;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

const PDU_TRAP_V1: u8 = 0xA4;
const PDU_INFORM: u8 = 0xA6;
const PDU_TRAP_V2: u8 = 0xA7;

const SYS_UPTIME_OID: &str = "1.3.6.1.2.1.1.3.0";
const SNMP_TRAP_ADDRESS_OID: &str = "1.3.6.1.6.3.18.1.3.0";
const SNMP_TRAP_ENTERPRISE_OID: &str = "1.3.6.1.6.3.1.1.4.3.0";
const SNMP_TRAPS_PREFIX: &str = "1.3.6.1.6.3.1.1.5";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    TrapV1,
    TrapV2,
    Inform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpMessage {
    pub version: SnmpVersion,
    pub community: String,
    pub pdu: PduKind,
    /// Always in v2 layout; v1 traps are translated
    pub varbinds: Vec<Varbind>,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .context("unexpected end of BER data")?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> Result<usize> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }

        let count = (first & 0x7F) as usize;
        if count == 0 {
            anyhow::bail!("indefinite BER length is not allowed in SNMP");
        }
        if count > 4 {
            anyhow::bail!("BER length field of {} bytes is too large", count);
        }

        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.byte()? as usize;
        }
        Ok(len)
    }

    /// Next tag and its content bytes
    fn tlv(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = self.byte()?;
        if tag & 0x1F == 0x1F {
            anyhow::bail!("multi-byte BER tags are not used by SNMP");
        }

        let len = self.length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .with_context(|| format!("BER value of {} bytes runs past end of packet", len))?;

        let content = &self.data[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8, what: &str) -> Result<&'a [u8]> {
        let (tag, content) = self.tlv()?;
        if tag != expected {
            anyhow::bail!("expected {} (tag 0x{:02X}), found tag 0x{:02X}", what, expected, tag);
        }
        Ok(content)
    }
}

fn decode_signed(content: &[u8]) -> Result<i64> {
    if content.is_empty() || content.len() > 8 {
        anyhow::bail!("INTEGER of {} bytes is not supported", content.len());
    }
    let init: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(content.iter().fold(init, |acc, b| (acc << 8) | *b as i64))
}

fn decode_unsigned(content: &[u8]) -> Result<u64> {
    let digits = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || digits.len() > 8 {
        anyhow::bail!("unsigned value of {} bytes is not supported", content.len());
    }
    Ok(digits.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn decode_oid(content: &[u8]) -> Result<String> {
    if content.is_empty() {
        anyhow::bail!("empty OBJECT IDENTIFIER");
    }

    let mut arcs: Vec<u64> = Vec::new();
    let mut value: u64 = 0;
    let mut pending = false;

    for &b in content {
        if value > (u64::MAX >> 7) {
            anyhow::bail!("OBJECT IDENTIFIER sub-identifier overflows");
        }
        value = (value << 7) | (b & 0x7F) as u64;
        pending = true;

        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let (first, second) = match value {
                    0..=39 => (0, value),
                    40..=79 => (1, value - 40),
                    _ => (2, value - 80),
                };
                arcs.push(first);
                arcs.push(second);
            } else {
                arcs.push(value);
            }
            value = 0;
            pending = false;
        }
    }

    if pending {
        anyhow::bail!("OBJECT IDENTIFIER ends inside a sub-identifier");
    }

    let mut oid = String::with_capacity(arcs.len() * 3);
    for (idx, arc) in arcs.iter().enumerate() {
        if idx > 0 {
            oid.push('.');
        }
        let _ = write!(oid, "{}", arc);
    }
    Ok(oid)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Printable UTF-8 as text, anything else as `0x`-prefixed hex
fn render_octets(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if text.chars().all(|c| !c.is_control() || matches!(c, '\r' | '\n' | '\t')) => {
            text.to_string()
        }
        _ => hex(bytes),
    }
}

fn ipv4(content: &[u8]) -> Result<Ipv4Addr> {
    let octets: [u8; 4] = content
        .try_into()
        .map_err(|_| anyhow::anyhow!("IpAddress must be 4 bytes, got {}", content.len()))?;
    Ok(Ipv4Addr::from(octets))
}

/// Render a varbind value as the string the rule engine matches against
fn render_value(tag: u8, content: &[u8]) -> Result<String> {
    let rendered = match tag {
        TAG_INTEGER => decode_signed(content)?.to_string(),
        TAG_OCTET_STRING => render_octets(content),
        TAG_NULL => String::new(),
        TAG_OID => decode_oid(content)?,
        TAG_IP_ADDRESS => ipv4(content)?.to_string(),
        TAG_COUNTER32 | TAG_GAUGE32 | TAG_TIMETICKS | TAG_COUNTER64 => {
            decode_unsigned(content)?.to_string()
        }
        TAG_OPAQUE => hex(content),
        TAG_NO_SUCH_OBJECT => "noSuchObject".to_string(),
        TAG_NO_SUCH_INSTANCE => "noSuchInstance".to_string(),
        TAG_END_OF_MIB_VIEW => "endOfMibView".to_string(),
        other => anyhow::bail!("unsupported varbind value type 0x{:02X}", other),
    };
    Ok(rendered)
}

fn decode_varbinds(content: &[u8]) -> Result<Vec<Varbind>> {
    let mut list = Reader::new(content);
    let mut varbinds = Vec::new();

    while !list.is_empty() {
        let pair = list.expect(TAG_SEQUENCE, "VarBind")?;
        let mut pair = Reader::new(pair);
        let oid = decode_oid(pair.expect(TAG_OID, "VarBind name")?)?;
        let (tag, value) = pair.tlv()?;
        let value = render_value(tag, value).with_context(|| format!("varbind {}", oid))?;
        varbinds.push(Varbind { oid, value });
    }

    Ok(varbinds)
}

fn decode_v2_pdu(content: &[u8]) -> Result<Vec<Varbind>> {
    let mut pdu = Reader::new(content);
    pdu.expect(TAG_INTEGER, "request-id")?;
    pdu.expect(TAG_INTEGER, "error-status")?;
    pdu.expect(TAG_INTEGER, "error-index")?;
    decode_varbinds(pdu.expect(TAG_SEQUENCE, "variable-bindings")?)
}

fn decode_v1_trap(content: &[u8]) -> Result<Vec<Varbind>> {
    let mut pdu = Reader::new(content);
    let enterprise = decode_oid(pdu.expect(TAG_OID, "enterprise")?)?;
    let agent = ipv4(pdu.expect(TAG_IP_ADDRESS, "agent-addr")?)?;
    let generic = decode_signed(pdu.expect(TAG_INTEGER, "generic-trap")?)?;
    let specific = decode_signed(pdu.expect(TAG_INTEGER, "specific-trap")?)?;
    let uptime = decode_unsigned(pdu.expect(TAG_TIMETICKS, "time-stamp")?)?;
    let body = decode_varbinds(pdu.expect(TAG_SEQUENCE, "variable-bindings")?)?;

    let trap_oid = match generic {
        0..=5 => format!("{}.{}", SNMP_TRAPS_PREFIX, generic + 1),
        6 => format!("{}.0.{}", enterprise, specific),
        other => anyhow::bail!("invalid generic-trap value {}", other),
    };

    let mut varbinds = Vec::with_capacity(body.len() + 4);
    varbinds.push(Varbind::new(SYS_UPTIME_OID, uptime.to_string()));
    varbinds.push(Varbind::new(SNMP_TRAP_OID, trap_oid));
    varbinds.extend(body);
    varbinds.push(Varbind::new(SNMP_TRAP_ADDRESS_OID, agent.to_string()));
    varbinds.push(Varbind::new(SNMP_TRAP_ENTERPRISE_OID, enterprise));
    Ok(varbinds)
}

/// Decode one UDP datagram into an SNMP notification
pub fn decode_message(data: &[u8]) -> Result<SnmpMessage> {
    let mut outer = Reader::new(data);
    let message = outer.expect(TAG_SEQUENCE, "SNMP message")?;
    let mut message = Reader::new(message);

    let version = match decode_signed(message.expect(TAG_INTEGER, "version")?)? {
        0 => SnmpVersion::V1,
        1 => SnmpVersion::V2c,
        3 => anyhow::bail!("SNMPv3 messages are not supported"),
        other => anyhow::bail!("unknown SNMP version field {}", other),
    };

    let community = render_octets(message.expect(TAG_OCTET_STRING, "community")?);
    let (tag, pdu) = message.tlv()?;

    let (pdu, varbinds) = match (version, tag) {
        (SnmpVersion::V1, PDU_TRAP_V1) => (PduKind::TrapV1, decode_v1_trap(pdu)?),
        (SnmpVersion::V2c, PDU_TRAP_V2) => (PduKind::TrapV2, decode_v2_pdu(pdu)?),
        (SnmpVersion::V2c, PDU_INFORM) => (PduKind::Inform, decode_v2_pdu(pdu)?),
        (_, other) => anyhow::bail!(
            "PDU type 0x{:02X} is not a notification for SNMP {:?}",
            other,
            version
        ),
    };

    Ok(SnmpMessage {
        version,
        community,
        pdu,
        varbinds,
    })
}
