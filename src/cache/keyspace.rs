use std::{sync::atomic::AtomicU64, sync::atomic::Ordering, time::Duration};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString};

use crate::config::KeyspaceTtlConfig;

/// Key suffix of the market-wide volatility reading in the `vol` keyspace.
pub const MARKET_VOLATILITY_KEY: &str = "market";

/// The cache keyspaces, each with its own TTL and invalidation generation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Keyspace {
    /// `borrow:{ticker}` — SecLend rate and status. Rates move intraday.
    Borrow,
    /// `vol:{ticker}` and `vol:market` — volatility indices.
    Vol,
    /// `event:{ticker}` — corporate event calendars.
    Event,
    /// `broker:{client_id}` — broker configs, invalidated on admin change.
    Broker,
    /// `minrate:{ticker}` — reference-data rate floors.
    Minrate,
    /// `calc:{fingerprint}` — short-lived idempotent calculation results.
    Calc,
}

impl Keyspace {
    /// Formats the full cache key for a suffix in this keyspace.
    pub fn key(&self, suffix: &str) -> String {
        format!("{self}:{suffix}")
    }

    /// The configured TTL of this keyspace.
    pub fn ttl(&self, config: &KeyspaceTtlConfig) -> Duration {
        match self {
            Self::Borrow => config.borrow,
            Self::Vol => config.volatility,
            Self::Event => config.event,
            Self::Broker => config.broker,
            Self::Minrate => config.min_rate,
            Self::Calc => config.calc,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// An invalidation message on the shared channel.
///
/// `key = None` retires the whole keyspace. Subscribers drop matching local
/// entries and advance their generation counter; both effects are
/// idempotent, so redelivery is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub keyspace: Keyspace,
    pub key: Option<String>,
    pub generation: u64,
}

/// Per-keyspace invalidation generations.
///
/// A fetch snapshots the generation before going upstream and writes back
/// only if it is unchanged, which stops an in-flight fetch from overwriting
/// post-invalidation state. Counters only advance.
#[derive(Debug)]
pub struct Generations {
    counters: [AtomicU64; Keyspace::COUNT],
}

impl Default for Generations {
    fn default() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl Generations {
    pub fn current(&self, keyspace: Keyspace) -> u64 {
        self.counters[keyspace.index()].load(Ordering::Acquire)
    }

    /// Advances the local counter, returning the new generation.
    pub fn bump(&self, keyspace: Keyspace) -> u64 {
        self.counters[keyspace.index()].fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Folds in a generation observed on the invalidation channel.
    pub fn observe(&self, keyspace: Keyspace, generation: u64) {
        self.counters[keyspace.index()].fetch_max(generation, Ordering::AcqRel);
    }

    /// Mixed generation of the broker and min-rate keyspaces, used in
    /// calculation fingerprints.
    pub fn config_generation(&self) -> u64 {
        mix(&[self.current(Keyspace::Broker), self.current(Keyspace::Minrate)])
    }

    /// Mixed generation of the three signal keyspaces, used in calculation
    /// fingerprints.
    pub fn signal_generation(&self) -> u64 {
        mix(&[
            self.current(Keyspace::Borrow),
            self.current(Keyspace::Vol),
            self.current(Keyspace::Event),
        ])
    }
}

/// Position-sensitive mix so distinct generation vectors produce distinct
/// combined values (a plain sum would not).
fn mix(generations: &[u64]) -> u64 {
    generations.iter().fold(0xcbf2_9ce4_8422_2325, |acc, g| {
        (acc ^ g.wrapping_add(0x9e37_79b9_7f4a_7c15))
            .wrapping_mul(0x100_0000_01b3)
            .rotate_left(17)
    })
}
