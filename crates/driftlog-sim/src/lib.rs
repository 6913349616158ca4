//! driftlog-sim: deterministic multi-peer simulation of driftlog replicas.
//!
//! Every agent drives a real [`driftlog_core::Log`] under a simulated wall
//! clock. Agents append, retract (append then immediately CUT), and gossip
//! their new entries through a network that delays, duplicates, reorders,
//! drops, and partitions. After the last round the network is drained and
//! every agent pulls from every other; the [`oracle`] then checks that all
//! replicas agree.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).
//! - **Determinism**: all randomness flows from the seed through
//!   [`rng::DeterministicRng`]; a seed replays to the same trace and states.

pub mod agent;
pub mod campaign;
pub mod clock;
pub mod network;
pub mod oracle;
pub mod rng;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use driftlog_core::entry::Identity;
use driftlog_core::{Blocks, JoinOptions, Log, LogOptions, MemoryBlocks, Storage};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::{AgentId, AgentState, SimulatedAgent};
use crate::clock::ClockConfig;
use crate::network::{FaultConfig, NetworkMessage, SimulatedNetwork};
use crate::oracle::{ConvergenceOracle, OracleResult};
use crate::rng::DeterministicRng;

/// Parameters of one simulated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub agent_count: usize,
    pub rounds: u64,
    /// Peers each agent gossips its new entries to per round.
    pub fanout: usize,
    /// Chance per round that an agent appends.
    pub append_rate_percent: u8,
    /// Chance per round that an agent retracts.
    pub retract_rate_percent: u8,
    /// Shuffled replays of the converged entries checked for commutativity.
    pub replays: usize,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            agent_count: 4,
            rounds: 16,
            fanout: 2,
            append_rate_percent: 70,
            retract_rate_percent: 10,
            replays: 2,
            fault: FaultConfig::default(),
            clock: ClockConfig::default(),
        }
    }
}

/// One recorded simulation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    Append {
        agent: AgentId,
        hash: String,
    },
    Retract {
        agent: AgentId,
        target: String,
        cut: String,
    },
    Send {
        from: AgentId,
        to: AgentId,
        entries: usize,
        dropped: bool,
        duplicated: bool,
        delay_rounds: u8,
    },
    Deliver {
        from: AgentId,
        to: AgentId,
        inserted: usize,
        skipped: usize,
        deferred: Option<String>,
    },
    Reorder {
        messages: usize,
    },
    Partition {
        agent: AgentId,
        isolated: bool,
    },
    Freeze {
        agent: AgentId,
    },
    Unfreeze {
        agent: AgentId,
    },
    Sync {
        agent: AgentId,
        from: AgentId,
        inserted: usize,
    },
}

impl TraceEventKind {
    /// Whether this step exercised a fault path.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        match self {
            Self::Send {
                dropped, duplicated, ..
            } => *dropped || *duplicated,
            Self::Deliver {
                skipped, deferred, ..
            } => *skipped > 0 || deferred.is_some(),
            Self::Reorder { .. } | Self::Partition { .. } | Self::Freeze { .. } => true,
            Self::Append { .. }
            | Self::Retract { .. }
            | Self::Unfreeze { .. }
            | Self::Sync { .. } => false,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    /// Agent snapshots after the final drain.
    pub states: Vec<AgentState>,
    /// Agent snapshots after pulling from a peer once more.
    pub rejoined: Vec<AgentState>,
    /// Fresh replicas fed the converged entries in shuffled batches.
    pub replays: Vec<AgentState>,
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    #[must_use]
    pub fn check(&self) -> OracleResult {
        ConvergenceOracle::check_all(&self.states, &self.rejoined, &self.replays)
    }

    /// Hashes of every entry agents wrote, in write order.
    #[must_use]
    pub fn written(&self) -> Vec<&str> {
        self.trace
            .iter()
            .flat_map(|event| match &event.kind {
                TraceEventKind::Append { hash, .. } => vec![hash.as_str()],
                TraceEventKind::Retract { target, cut, .. } => vec![target.as_str(), cut.as_str()],
                _ => Vec::new(),
            })
            .collect()
    }
}

/// Runs one seeded simulation.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    agents: Vec<SimulatedAgent>,
    network: SimulatedNetwork,
    frozen_until: Vec<Option<u64>>,
    trace: Vec<TraceEvent>,
}

impl Simulator {
    /// # Errors
    ///
    /// Rejects configurations without agents, and fails if an agent's log
    /// cannot be opened.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.agent_count == 0 {
            bail!("agent_count must be > 0");
        }

        let mut rng = DeterministicRng::new(config.seed);
        let agents = (0..config.agent_count)
            .map(|id| {
                let spec = config.clock.assign(&mut rng);
                let agent_rng = rng.fork(u64::try_from(id).unwrap_or(u64::MAX));
                SimulatedAgent::new(id, spec, agent_rng)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            network: SimulatedNetwork::new(config.fault),
            frozen_until: vec![None; config.agent_count],
            config,
            rng,
            agents,
            trace: Vec::new(),
        })
    }

    /// Run every round, drain, and snapshot.
    ///
    /// # Errors
    ///
    /// Fails on any log error other than missing ancestry during gossip.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("failed to build simulation runtime")?;
        runtime.block_on(self.run_rounds())
    }

    async fn run_rounds(&mut self) -> Result<SimulationResult> {
        info!(
            seed = self.config.seed,
            agents = self.config.agent_count,
            rounds = self.config.rounds,
            "simulation started"
        );

        for round in 0..self.config.rounds {
            self.inject_faults(round);
            self.advance_clocks(round);
            self.write(round).await?;
            self.gossip(round);
            self.deliver(round, round).await?;
        }

        let end = self.config.rounds;
        self.network.heal();
        for id in 0..self.agents.len() {
            if self.frozen_until[id].take().is_some() {
                self.agents[id].clock_mut().unfreeze();
            }
        }
        self.advance_clocks(end);
        self.deliver(end, u64::MAX).await?;
        self.anti_entropy(end).await?;

        let states = self.snapshot()?;
        let rejoined = self.rejoin().await?;
        let replays = self.replay().await?;
        let interesting_state_reached = self.trace.iter().any(|e| e.kind.is_fault());

        debug!(
            seed = self.config.seed,
            trace = self.trace.len(),
            entries = states.first().map_or(0, |s| s.entries.len()),
            "simulation finished"
        );

        Ok(SimulationResult {
            trace: std::mem::take(&mut self.trace),
            states,
            rejoined,
            replays,
            interesting_state_reached,
        })
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    fn inject_faults(&mut self, round: u64) {
        for id in 0..self.agents.len() {
            if self.frozen_until[id].is_some_and(|until| until <= round) {
                self.frozen_until[id] = None;
                self.agents[id].clock_mut().unfreeze();
                self.record(round, TraceEventKind::Unfreeze { agent: id });
            }
        }

        let fault = self.config.fault;
        if self.rng.hit_rate_percent(fault.partition_rate_percent) {
            let agent = self.rng.next_index(self.agents.len());
            let isolated = !self.network.is_partitioned(agent);
            self.network.set_partitioned(agent, isolated);
            self.record(round, TraceEventKind::Partition { agent, isolated });
        }

        if self.rng.hit_rate_percent(fault.freeze_rate_percent) {
            let agent = self.rng.next_index(self.agents.len());
            if self.frozen_until[agent].is_none() {
                self.agents[agent].clock_mut().freeze(round);
                self.frozen_until[agent] =
                    Some(round.saturating_add(u64::from(fault.freeze_duration_rounds)));
                self.record(round, TraceEventKind::Freeze { agent });
            }
        }
    }

    fn advance_clocks(&self, round: u64) {
        for agent in &self.agents {
            agent.clock().advance(round);
        }
    }

    async fn write(&mut self, round: u64) -> Result<()> {
        for id in 0..self.agents.len() {
            if self.rng.hit_rate_percent(self.config.append_rate_percent) {
                let entry = self.agents[id].append().await?;
                self.record(
                    round,
                    TraceEventKind::Append {
                        agent: id,
                        hash: entry.hash().to_owned(),
                    },
                );
            }
            if self.rng.hit_rate_percent(self.config.retract_rate_percent) {
                let (target, cut) = self.agents[id].retract().await?;
                self.record(
                    round,
                    TraceEventKind::Retract {
                        agent: id,
                        target: target.hash().to_owned(),
                        cut: cut.hash().to_owned(),
                    },
                );
            }
        }
        Ok(())
    }

    fn gossip(&mut self, round: u64) {
        for from in 0..self.agents.len() {
            let entries = self.agents[from].take_outbox();
            if entries.is_empty() {
                continue;
            }

            let mut peers: Vec<AgentId> = (0..self.agents.len()).filter(|&p| p != from).collect();
            self.rng.shuffle(&mut peers);
            peers.truncate(self.config.fanout);

            for to in peers {
                let message = NetworkMessage {
                    from,
                    to,
                    entries: entries.clone(),
                };
                let outcome = self.network.send(message, round, &mut self.rng);
                self.record(
                    round,
                    TraceEventKind::Send {
                        from,
                        to,
                        entries: entries.len(),
                        dropped: outcome.dropped,
                        duplicated: outcome.duplicated,
                        delay_rounds: outcome.delay_rounds,
                    },
                );
            }
        }
    }

    async fn deliver(&mut self, round: u64, until: u64) -> Result<()> {
        let outcome = self.network.deliver_ready(until, &mut self.rng);
        if outcome.reordered {
            self.record(
                round,
                TraceEventKind::Reorder {
                    messages: outcome.delivered.len(),
                },
            );
        }

        for message in outcome.delivered {
            let received = self.agents[message.to].receive(message.entries).await?;
            self.record(
                round,
                TraceEventKind::Deliver {
                    from: message.from,
                    to: message.to,
                    inserted: received.inserted,
                    skipped: received.skipped,
                    deferred: received.deferred,
                },
            );
        }
        Ok(())
    }

    /// Every agent pulls from every other agent. After one full pass the
    /// first agent holds the union and every later agent has pulled from
    /// it; the second pass brings earlier agents up to date.
    async fn anti_entropy(&mut self, round: u64) -> Result<()> {
        for _ in 0..2 {
            for agent in 0..self.agents.len() {
                for from in 0..self.agents.len() {
                    if agent == from {
                        continue;
                    }
                    let inserted = self.agents[agent].sync_from(&self.agents[from]).await?;
                    if inserted > 0 {
                        self.record(round, TraceEventKind::Sync { agent, from, inserted });
                    }
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<AgentState>> {
        self.agents.iter().map(SimulatedAgent::snapshot).collect()
    }

    async fn rejoin(&self) -> Result<Vec<AgentState>> {
        let count = self.agents.len();
        let mut states = Vec::with_capacity(count);
        for (id, agent) in self.agents.iter().enumerate() {
            agent.sync_from(&self.agents[(id + 1) % count]).await?;
            states.push(agent.snapshot()?);
        }
        Ok(states)
    }

    /// Feed the first agent's entries, shuffled and split into batches, to
    /// fresh replicas whose block stores already hold every entry.
    async fn replay(&mut self) -> Result<Vec<AgentState>> {
        let Some(first) = self.agents.first() else {
            return Ok(Vec::new());
        };
        let entries = first.log().to_array().await?;

        let mut replays = Vec::with_capacity(self.config.replays);
        for index in 0..self.config.replays {
            let blocks = Arc::new(MemoryBlocks::new());
            for entry in &entries {
                blocks.put(entry.to_bytes()?).await?;
            }
            let identity: Arc<dyn Identity> =
                Arc::new(SigningKey::from_bytes(&self.rng.bytes32()));
            let log: Log<u64> =
                Log::open(Storage::with_blocks(blocks)?, identity, LogOptions::default())?;

            let mut shuffled = entries.clone();
            self.rng.shuffle(&mut shuffled);
            let batch = self.rng.next_index(4) + 1;
            for chunk in shuffled.chunks(batch) {
                log.join(chunk.to_vec(), JoinOptions::default()).await?;
            }

            replays.push(AgentState {
                id: self.config.agent_count + index,
                entries: log.values()?.into_iter().map(Into::into).collect(),
            });
        }
        Ok(replays)
    }
}
