use std::sync::Arc;

use anyhow::{Context, Result};
use driftlog_core::entry::Identity;
use driftlog_core::{
    AppendOptions, Entry, Error, JoinOptions, JoinOutcome, Log, LogOptions, ShallowEntry, Storage,
};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{ClockSpec, SimulatedClock};
use crate::rng::DeterministicRng;

/// Stable identifier for a simulated agent.
pub type AgentId = usize;

/// One entry as an agent's index holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub hash: String,
    pub cut: bool,
    pub head: bool,
    pub next: Vec<String>,
}

impl From<ShallowEntry> for EntrySummary {
    fn from(entry: ShallowEntry) -> Self {
        Self {
            cut: entry.meta.is_cut(),
            hash: entry.hash,
            head: entry.head,
            next: entry.meta.next,
        }
    }
}

/// Snapshot of an agent's log, in log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub entries: Vec<EntrySummary>,
}

impl AgentState {
    /// Hashes in log order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.hash.as_str()).collect()
    }

    #[must_use]
    pub fn heads(&self) -> Vec<&str> {
        let mut heads: Vec<&str> = self
            .entries
            .iter()
            .filter(|e| e.head)
            .map(|e| e.hash.as_str())
            .collect();
        heads.sort_unstable();
        heads
    }

    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.entries.iter().any(|e| e.hash == hash)
    }
}

/// How a delivered batch went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveOutcome {
    pub inserted: usize,
    pub skipped: usize,
    /// Hash whose ancestry was not available yet; left for anti-entropy.
    pub deferred: Option<String>,
}

/// A peer driving a real [`Log`] with a simulated clock.
///
/// Identities, log ids, and root gids are all drawn from the agent's seeded
/// RNG, so entry hashes replay exactly.
#[derive(Debug)]
pub struct SimulatedAgent {
    id: AgentId,
    log: Log<u64>,
    clock: SimulatedClock,
    rng: DeterministicRng,
    next_seq: u64,
    outbox: Vec<Entry<u64>>,
}

impl SimulatedAgent {
    /// # Errors
    ///
    /// Fails if the in-memory log cannot be opened.
    pub fn new(id: AgentId, spec: ClockSpec, mut rng: DeterministicRng) -> Result<Self> {
        let clock = SimulatedClock::new(spec);
        let identity: Arc<dyn Identity> = Arc::new(SigningKey::from_bytes(&rng.bytes32()));
        let options = LogOptions::default()
            .with_id(rng.bytes32())
            .with_physical_clock(clock.physical_clock());
        let log = Log::open(Storage::Memory, identity, options)
            .with_context(|| format!("failed to open log for agent {id}"))?;

        Ok(Self {
            id,
            log,
            clock,
            rng,
            next_seq: 0,
            outbox: Vec::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    #[must_use]
    pub const fn log(&self) -> &Log<u64> {
        &self.log
    }

    #[must_use]
    pub const fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    pub const fn clock_mut(&mut self) -> &mut SimulatedClock {
        &mut self.clock
    }

    fn next_value(&mut self) -> u64 {
        let source = u64::try_from(self.id).unwrap_or(u64::MAX);
        let value = (source << 32) | (self.next_seq & 0xFFFF_FFFF);
        self.next_seq = self.next_seq.saturating_add(1);
        value
    }

    /// Append onto the current heads.
    ///
    /// # Errors
    ///
    /// Propagates log errors.
    pub async fn append(&mut self) -> Result<Entry<u64>> {
        let value = self.next_value();
        let mut options = AppendOptions::default();
        if self.log.heads(None).collect_all()?.is_empty() {
            options.gid_seed = Some(self.rng.bytes32().to_vec());
        }
        let entry = self.log.append(value, options).await?.entry;
        debug!(agent = self.id, hash = %entry.hash(), "agent appended");
        self.outbox.push(entry.clone());
        Ok(entry)
    }

    /// Write a detached entry and immediately cut it. Both go out in the
    /// same batch.
    ///
    /// # Errors
    ///
    /// Propagates log errors.
    pub async fn retract(&mut self) -> Result<(Entry<u64>, Entry<u64>)> {
        let value = self.next_value();
        let options = AppendOptions {
            gid_seed: Some(self.rng.bytes32().to_vec()),
            ..AppendOptions::default()
        }
        .with_next(Vec::new());
        let target = self.log.append(value, options).await?.entry;
        let tombstone = self
            .log
            .append(0, AppendOptions::cut(vec![target.clone()]))
            .await?
            .entry;
        debug!(agent = self.id, target = %target.hash(), "agent retracted");
        self.outbox.push(target.clone());
        self.outbox.push(tombstone.clone());
        Ok((target, tombstone))
    }

    /// Entries written since the last call.
    pub fn take_outbox(&mut self) -> Vec<Entry<u64>> {
        std::mem::take(&mut self.outbox)
    }

    /// Join a delivered batch. Missing ancestry is not a failure: whatever
    /// joined stays, the rest waits for anti-entropy.
    ///
    /// # Errors
    ///
    /// Any join error other than missing data.
    pub async fn receive(&self, entries: Vec<Entry<u64>>) -> Result<ReceiveOutcome> {
        match self.log.join(entries, JoinOptions::default().verified()).await {
            Ok(outcomes) => {
                let inserted = outcomes.iter().filter(|o| o.is_inserted()).count();
                let skipped = outcomes
                    .iter()
                    .filter(|o| matches!(o, JoinOutcome::Skipped(_)))
                    .count();
                Ok(ReceiveOutcome {
                    inserted,
                    skipped,
                    deferred: None,
                })
            }
            Err(Error::MissingEntry { hash }) => Ok(ReceiveOutcome {
                deferred: Some(hash),
                ..ReceiveOutcome::default()
            }),
            Err(e) => Err(e).with_context(|| format!("agent {} failed to join a batch", self.id)),
        }
    }

    /// Pull everything `other` holds.
    ///
    /// # Errors
    ///
    /// Propagates join errors.
    pub async fn sync_from(&self, other: &Self) -> Result<usize> {
        let outcomes = self
            .log
            .join_log(&other.log, JoinOptions::default().verified())
            .await
            .with_context(|| format!("agent {} failed to sync from {}", self.id, other.id))?;
        Ok(outcomes.iter().filter(|o| o.is_inserted()).count())
    }

    /// # Errors
    ///
    /// Index read errors.
    pub fn snapshot(&self) -> Result<AgentState> {
        Ok(AgentState {
            id: self.id,
            entries: self
                .log
                .values()?
                .into_iter()
                .map(EntrySummary::from)
                .collect(),
        })
    }
}
