//! Flow aggregation with online statistics.
//!
//! A flow is the unidirectional packet sequence sharing
//! (src, dst, proto, src_port, dst_port). Inter-arrival statistics use
//! Welford's online algorithm so variance never needs the packet history.

use crate::packet::PacketRecord;
use chrono::{DateTime, Utc};
use lru::LruCache;
use ns_core::model::Proto;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Flow identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub proto: Proto,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    pub fn of(packet: &PacketRecord) -> Self {
        Self {
            src_ip: packet.src_ip,
            dst_ip: packet.dst_ip,
            proto: packet.proto,
            src_port: packet.src_port,
            dst_port: packet.dst_port,
        }
    }
}

/// Rolling statistics of one flow.
///
/// Invariants held by construction: `last_seen >= first_seen`,
/// `packets >= 1`, `bytes >= packets` (every packet has nonzero size).
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStats {
    pub packets: u64,
    pub bytes: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Accumulated TCP flag bits.
    pub tcp_flags: u8,
    iat_count: u64,
    iat_mean: f64,
    iat_m2: f64,
    iat_min: f64,
    iat_max: f64,
    /// Updated since the last periodic flush.
    pub(crate) dirty: bool,
}

impl FlowStats {
    fn new(packet: &PacketRecord) -> Self {
        Self {
            packets: 1,
            bytes: packet.size,
            first_seen: packet.ts,
            last_seen: packet.ts,
            tcp_flags: packet.flags,
            iat_count: 0,
            iat_mean: 0.0,
            iat_m2: 0.0,
            iat_min: 0.0,
            iat_max: 0.0,
            dirty: true,
        }
    }

    fn update(&mut self, packet: &PacketRecord) {
        // Out-of-order timestamps clamp to zero rather than going negative.
        let dt = (packet.ts - self.last_seen)
            .num_microseconds()
            .unwrap_or(0)
            .max(0) as f64
            / 1_000_000.0;

        self.iat_count += 1;
        let delta = dt - self.iat_mean;
        self.iat_mean += delta / self.iat_count as f64;
        self.iat_m2 += delta * (dt - self.iat_mean);
        if self.iat_count == 1 {
            self.iat_min = dt;
            self.iat_max = dt;
        } else {
            self.iat_min = self.iat_min.min(dt);
            self.iat_max = self.iat_max.max(dt);
        }

        self.packets += 1;
        self.bytes += packet.size;
        if packet.ts > self.last_seen {
            self.last_seen = packet.ts;
        }
        self.tcp_flags |= packet.flags;
        self.dirty = true;
    }

    /// Mean inter-arrival time in seconds; 0 for a single-packet flow.
    pub fn iat_mean(&self) -> f64 {
        self.iat_mean
    }

    /// Population standard deviation of inter-arrival times; 0 for flows
    /// with fewer than two packets.
    pub fn iat_std(&self) -> f64 {
        if self.iat_count == 0 {
            0.0
        } else {
            (self.iat_m2 / self.iat_count as f64).sqrt()
        }
    }

    pub fn iat_min(&self) -> f64 {
        self.iat_min
    }

    pub fn iat_max(&self) -> f64 {
        self.iat_max
    }

    fn idle_since(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        (now - self.last_seen).num_milliseconds() >= timeout.as_millis() as i64
    }
}

/// Bounded flow table with idle-timeout and LRU eviction.
///
/// Owned exclusively by the ingest task; scoring workers only ever see
/// snapshots that leave through the return values here.
pub struct FlowTable {
    flows: LruCache<FlowKey, FlowStats>,
    idle_timeout: Duration,
}

impl FlowTable {
    pub fn new(max_flows: usize, idle_timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_flows.max(1)).expect("capacity clamped to >= 1");
        Self {
            flows: LruCache::new(capacity),
            idle_timeout,
        }
    }

    /// Inserts a packet into its flow. If the table is at capacity and the
    /// packet creates a new flow, the least-recently-seen flow is evicted
    /// and returned for scoring.
    pub fn observe(&mut self, packet: &PacketRecord) -> Option<(FlowKey, FlowStats)> {
        let key = FlowKey::of(packet);
        if let Some(stats) = self.flows.get_mut(&key) {
            stats.update(packet);
            return None;
        }
        let evicted = self.flows.push(key, FlowStats::new(packet));
        // push returns the displaced entry; ignore the (impossible here)
        // case of displacing the key just inserted.
        evicted.filter(|(evicted_key, _)| *evicted_key != key)
    }

    /// Removes and returns flows idle longer than the timeout.
    pub fn sweep_idle(&mut self, now: DateTime<Utc>) -> Vec<(FlowKey, FlowStats)> {
        let idle: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, stats)| stats.idle_since(now, self.idle_timeout))
            .map(|(key, _)| *key)
            .collect();

        idle.into_iter()
            .filter_map(|key| self.flows.pop(&key).map(|stats| (key, stats)))
            .collect()
    }

    /// Snapshots flows updated since the previous flush, leaving them
    /// tracked. Bounds detection latency for long-lived flows.
    pub fn flush_active(&mut self) -> Vec<(FlowKey, FlowStats)> {
        let mut flushed = Vec::new();
        for (key, stats) in self.flows.iter_mut() {
            if stats.dirty {
                stats.dirty = false;
                flushed.push((*key, stats.clone()));
            }
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
