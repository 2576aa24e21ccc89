use std::sync::atomic::{AtomicU64, Ordering};

/// Election counters for one node, exported on `/metrics`.
#[derive(Debug, Default)]
pub struct RaftMetrics {
    elections_started: AtomicU64,
    votes_granted: AtomicU64,
    heartbeats_sent: AtomicU64,
    step_downs: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub elections_started: u64,
    pub votes_granted: u64,
    pub heartbeats_sent: u64,
    pub step_downs: u64,
}

impl RaftMetrics {
    pub fn record_election(&self) {
        self.elections_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vote_granted(&self) {
        self.votes_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_down(&self) {
        self.step_downs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elections_started: self.elections_started.load(Ordering::Relaxed),
            votes_granted: self.votes_granted.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            step_downs: self.step_downs.load(Ordering::Relaxed),
        }
    }
}
