//! Packet source abstraction and the bundled adapters.

use chrono::{DateTime, Utc};
use ns_core::model::{self, Proto};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// A parsed L3/L4 record as delivered by a capture backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub ts: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub proto: Proto,
    pub src_port: u16,
    pub dst_port: u16,
    pub size: u64,
    /// TCP flag bits; zero for non-TCP traffic.
    pub flags: u8,
}

/// A blocking stream of packets.
///
/// `next_packet` may block on I/O; the engine runs it on a dedicated
/// blocking thread. Returning `None` signals end of stream, after which the
/// engine goes idle but its subscriptions stay live.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Option<PacketRecord>;
}

/// Wire shape of one replay line. Extra fields are ignored, missing
/// optional fields default.
#[derive(Debug, Deserialize)]
struct RawPacket {
    ts: f64,
    src_ip: String,
    dst_ip: String,
    #[serde(default)]
    proto: u8,
    #[serde(default)]
    src_port: u16,
    #[serde(default)]
    dst_port: u16,
    size: u64,
    #[serde(default)]
    flags: u8,
}

/// Offline replay of captured traffic from a JSONL file, one packet per
/// line. Malformed lines are dropped with a warning; the stream continues.
pub struct ReplaySource {
    reader: BufReader<std::fs::File>,
    line: String,
}

impl ReplaySource {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(std::fs::File::open(path)?),
            line: String::new(),
        })
    }

    fn parse(line: &str) -> Option<PacketRecord> {
        let raw: RawPacket = serde_json::from_str(line).ok()?;
        let ts = model::from_unix_seconds(raw.ts)?;
        let src_ip: IpAddr = raw.src_ip.parse().ok()?;
        let dst_ip: IpAddr = raw.dst_ip.parse().ok()?;
        if raw.size == 0 {
            return None;
        }
        Some(PacketRecord {
            ts,
            src_ip,
            dst_ip,
            proto: Proto::from_number(raw.proto),
            src_port: raw.src_port,
            dst_port: raw.dst_port,
            size: raw.size,
            flags: raw.flags,
        })
    }
}

impl PacketSource for ReplaySource {
    fn next_packet(&mut self) -> Option<PacketRecord> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line).ok()?;
            if n == 0 {
                return None;
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match Self::parse(line) {
                Some(packet) => return Some(packet),
                None => {
                    metrics::counter!("ns_packets_malformed_total").increment(1);
                    warn!("dropping malformed replay line");
                }
            }
        }
    }
}

/// Synthetic traffic generator for demos and load tests.
///
/// Emits mostly low-volume background chatter from a pool of source hosts,
/// with one "hot" talker producing the high-rate flow a detector should
/// flag. Deterministic for a given seed.
pub struct SyntheticSource {
    rng: StdRng,
    remaining: u64,
    clock: DateTime<Utc>,
    pacing: Option<Duration>,
}

impl SyntheticSource {
    pub fn new(packets: u64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            remaining: packets,
            clock: Utc::now(),
            pacing: None,
        }
    }

    /// Sleep this long between packets (for demo runs that should not spin).
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }
}

impl PacketSource for SyntheticSource {
    fn next_packet(&mut self) -> Option<PacketRecord> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        if let Some(pacing) = self.pacing {
            std::thread::sleep(pacing);
        }

        // One talker in ten is the hot flow: large fast packets from a
        // single source; the rest is background noise.
        let hot = self.rng.gen_ratio(1, 10);
        let (src, size, step_ms) = if hot {
            (IpAddr::from([203, 0, 113, 66]), self.rng.gen_range(1_000..1_500), 5)
        } else {
            let octet = self.rng.gen_range(2u8..250);
            (
                IpAddr::from([192, 0, 2, octet]),
                self.rng.gen_range(60..400),
                self.rng.gen_range(50..500),
            )
        };

        self.clock += chrono::Duration::milliseconds(step_ms);
        Some(PacketRecord {
            ts: self.clock,
            src_ip: src,
            dst_ip: IpAddr::from([10, 0, 0, 5]),
            proto: Proto::Tcp,
            src_port: self.rng.gen_range(1024..u16::MAX),
            dst_port: 443,
            size,
            flags: 0x18,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replay_parses_and_skips_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"ts": 1700000000.5, "src_ip": "192.0.2.1", "dst_ip": "10.0.0.5", "proto": 6, "src_port": 40000, "dst_port": 443, "size": 120, "flags": 24, "iface": "eth0"}}"#
        )
        .unwrap();
        writeln!(file, "not json at all").unwrap();
        writeln!(
            file,
            r#"{{"ts": 1700000001.0, "src_ip": "192.0.2.2", "dst_ip": "10.0.0.5", "size": 80}}"#
        )
        .unwrap();

        let mut source = ReplaySource::open(file.path()).unwrap();
        let first = source.next_packet().unwrap();
        assert_eq!(first.src_ip, "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(first.proto, Proto::Tcp);
        assert_eq!(first.flags, 24);

        // Malformed line is skipped, defaulted fields parse.
        let second = source.next_packet().unwrap();
        assert_eq!(second.src_ip, "192.0.2.2".parse::<IpAddr>().unwrap());
        assert_eq!(second.proto, Proto::Other);
        assert_eq!(second.src_port, 0);

        assert!(source.next_packet().is_none());
    }

    #[test]
    fn zero_size_packet_is_invalid() {
        assert!(ReplaySource::parse(
            r#"{"ts": 1.0, "src_ip": "192.0.2.1", "dst_ip": "10.0.0.5", "size": 0}"#
        )
        .is_none());
    }

    #[test]
    fn synthetic_is_deterministic_and_bounded() {
        let collect = |seed| {
            let mut source = SyntheticSource::new(50, seed);
            let mut packets = Vec::new();
            while let Some(p) = source.next_packet() {
                packets.push(p);
            }
            packets
        };

        let shape =
            |packets: &[PacketRecord]| -> Vec<(IpAddr, u64, u16)> {
                packets.iter().map(|p| (p.src_ip, p.size, p.src_port)).collect()
            };

        let a = collect(7);
        let b = collect(7);
        assert_eq!(a.len(), 50);
        // Wall-clock start differs between runs; everything else is seeded.
        assert_eq!(shape(&a), shape(&b));
        assert!(a.iter().any(|p| p.src_ip == IpAddr::from([203, 0, 113, 66])));
    }
}
