//! Process-wide performance counters.
//!
//! Four per-second rates (entries/watches, received/broadcast) are
//! snapshotted and reset by a 1 Hz ticker; cumulative totals and the
//! connection gauges are also exported in Prometheus text format.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use prometheus::{
    Encoder, IntCounter, IntGauge, TextEncoder, register_int_counter, register_int_gauge,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

lazy_static! {
    pub static ref ENTRIES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "lantern_entries_received_total",
        "Total log entries accepted from producers"
    )
    .unwrap();
    pub static ref ENTRIES_BROADCAST_TOTAL: IntCounter = register_int_counter!(
        "lantern_entries_broadcast_total",
        "Total entry deliveries to subscribers"
    )
    .unwrap();
    pub static ref WATCHES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "lantern_watches_received_total",
        "Total watch samples accepted from producers"
    )
    .unwrap();
    pub static ref WATCHES_BROADCAST_TOTAL: IntCounter = register_int_counter!(
        "lantern_watches_broadcast_total",
        "Total watch samples broadcast to subscribers"
    )
    .unwrap();
    pub static ref ACTIVE_PRODUCERS: IntGauge = register_int_gauge!(
        "lantern_active_producers",
        "Currently connected producers"
    )
    .unwrap();
    pub static ref ACTIVE_SUBSCRIBERS: IntGauge = register_int_gauge!(
        "lantern_active_subscribers",
        "Currently connected subscribers"
    )
    .unwrap();
}

/// Rates observed during the last completed one-second window
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerSecondRates {
    pub entries_received: u64,
    pub entries_broadcast: u64,
    pub watches_received: u64,
    pub watches_broadcast: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfTotals {
    pub entries_received: u64,
    pub entries_broadcast: u64,
    pub watches_received: u64,
    pub watches_broadcast: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSnapshot {
    pub per_second: PerSecondRates,
    pub totals: PerfTotals,
}

#[derive(Debug, Default)]
pub struct PerfCounters {
    window_entries_received: AtomicU64,
    window_entries_broadcast: AtomicU64,
    window_watches_received: AtomicU64,
    window_watches_broadcast: AtomicU64,
    total_entries_received: AtomicU64,
    total_entries_broadcast: AtomicU64,
    total_watches_received: AtomicU64,
    total_watches_broadcast: AtomicU64,
    rates: RwLock<PerSecondRates>,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_entry_received(&self) {
        self.window_entries_received.fetch_add(1, Ordering::Relaxed);
        self.total_entries_received.fetch_add(1, Ordering::Relaxed);
        ENTRIES_RECEIVED_TOTAL.inc();
    }

    pub fn record_entries_broadcast(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.window_entries_broadcast
            .fetch_add(count, Ordering::Relaxed);
        self.total_entries_broadcast
            .fetch_add(count, Ordering::Relaxed);
        ENTRIES_BROADCAST_TOTAL.inc_by(count);
    }

    pub fn record_watch_received(&self) {
        self.window_watches_received.fetch_add(1, Ordering::Relaxed);
        self.total_watches_received.fetch_add(1, Ordering::Relaxed);
        WATCHES_RECEIVED_TOTAL.inc();
    }

    pub fn record_watches_broadcast(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.window_watches_broadcast
            .fetch_add(count, Ordering::Relaxed);
        self.total_watches_broadcast
            .fetch_add(count, Ordering::Relaxed);
        WATCHES_BROADCAST_TOTAL.inc_by(count);
    }

    pub fn producer_connected(&self) {
        ACTIVE_PRODUCERS.inc();
    }

    pub fn producer_disconnected(&self) {
        ACTIVE_PRODUCERS.dec();
    }

    pub fn subscriber_connected(&self) {
        ACTIVE_SUBSCRIBERS.inc();
    }

    pub fn subscriber_disconnected(&self) {
        ACTIVE_SUBSCRIBERS.dec();
    }

    /// Close the current one-second window
    pub fn tick(&self) {
        let rates = PerSecondRates {
            entries_received: self.window_entries_received.swap(0, Ordering::Relaxed),
            entries_broadcast: self.window_entries_broadcast.swap(0, Ordering::Relaxed),
            watches_received: self.window_watches_received.swap(0, Ordering::Relaxed),
            watches_broadcast: self.window_watches_broadcast.swap(0, Ordering::Relaxed),
        };
        *self.rates.write() = rates;
    }

    pub fn rates(&self) -> PerSecondRates {
        *self.rates.read()
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        PerfSnapshot {
            per_second: self.rates(),
            totals: PerfTotals {
                entries_received: self.total_entries_received.load(Ordering::Relaxed),
                entries_broadcast: self.total_entries_broadcast.load(Ordering::Relaxed),
                watches_received: self.total_watches_received.load(Ordering::Relaxed),
                watches_broadcast: self.total_watches_broadcast.load(Ordering::Relaxed),
            },
        }
    }

    /// Spawn the 1 Hz snapshot/reset ticker
    pub fn start_ticker(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                self.tick();
            }
        });
    }
}

/// Force registration of every metric before the first scrape
pub fn init_metrics() {
    let _ = &*ENTRIES_RECEIVED_TOTAL;
    let _ = &*ENTRIES_BROADCAST_TOTAL;
    let _ = &*WATCHES_RECEIVED_TOTAL;
    let _ = &*WATCHES_BROADCAST_TOTAL;
    let _ = &*ACTIVE_PRODUCERS;
    let _ = &*ACTIVE_SUBSCRIBERS;
}

/// Encode all registered metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
