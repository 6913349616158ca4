use std::collections::BTreeSet;

use driftlog_core::Entry;
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::rng::DeterministicRng;

/// Fault injection knobs for message delivery and clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    pub drop_rate_percent: u8,
    pub duplicate_rate_percent: u8,
    /// Chance of reversing the ready queue at each delivery.
    pub reorder_rate_percent: u8,
    /// Chance per round of toggling one agent's isolation.
    pub partition_rate_percent: u8,
    /// Chance per round of freezing one agent's clock.
    pub freeze_rate_percent: u8,
    pub freeze_duration_rounds: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            partition_rate_percent: 2,
            freeze_rate_percent: 2,
            freeze_duration_rounds: 2,
        }
    }
}

impl FaultConfig {
    /// Faults that delay or repeat messages but never lose them.
    #[must_use]
    pub const fn lossless(self) -> Self {
        Self {
            drop_rate_percent: 0,
            partition_rate_percent: 0,
            ..self
        }
    }
}

/// A batch of entries from one agent to another.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    pub from: AgentId,
    pub to: AgentId,
    pub entries: Vec<Entry<u64>>,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingMessage {
    deliver_at_round: u64,
    message: NetworkMessage,
}

/// What happened to one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub dropped: bool,
    pub duplicated: bool,
    pub delay_rounds: u8,
}

impl SendOutcome {
    const DROPPED: Self = Self {
        dropped: true,
        duplicated: false,
        delay_rounds: 0,
    };
}

/// Messages released in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverOutcome {
    pub delivered: Vec<NetworkMessage>,
    pub reordered: bool,
}

/// Seeded network that delays, duplicates, reorders, drops, and
/// partitions.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedNetwork {
    pending: Vec<PendingMessage>,
    partitioned_agents: BTreeSet<AgentId>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            partitioned_agents: BTreeSet::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    pub fn set_partitioned(&mut self, agent: AgentId, isolated: bool) {
        if isolated {
            self.partitioned_agents.insert(agent);
        } else {
            self.partitioned_agents.remove(&agent);
        }
    }

    #[must_use]
    pub fn is_partitioned(&self, agent: AgentId) -> bool {
        self.partitioned_agents.contains(&agent)
    }

    /// Reconnect every agent.
    pub fn heal(&mut self) {
        self.partitioned_agents.clear();
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue `message`, applying drop, delay, and duplication faults.
    pub fn send(
        &mut self,
        message: NetworkMessage,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        if self.is_partitioned(message.from) || self.is_partitioned(message.to) {
            return SendOutcome::DROPPED;
        }
        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return SendOutcome::DROPPED;
        }

        let delay_bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay =
            u8::try_from(rng.next_bounded(delay_bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.pending.push(PendingMessage {
                deliver_at_round,
                message: message.clone(),
            });
        }
        self.pending.push(PendingMessage {
            deliver_at_round,
            message,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Release every message due by `round`, possibly reordered.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (mut ready, future): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|pending| pending.deliver_at_round <= round);
        self.pending = future;

        let reordered = ready.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            rng.shuffle(&mut ready);
        }

        DeliverOutcome {
            delivered: ready.into_iter().map(|pending| pending.message).collect(),
            reordered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: AgentId, to: AgentId) -> NetworkMessage {
        NetworkMessage {
            from,
            to,
            entries: Vec::new(),
        }
    }

    #[test]
    fn partitioned_agents_lose_messages() {
        let mut network = SimulatedNetwork::new(FaultConfig::default().lossless());
        let mut rng = DeterministicRng::new(1);
        network.set_partitioned(1, true);

        assert!(network.send(message(0, 1), 0, &mut rng).dropped);
        assert!(network.send(message(1, 2), 0, &mut rng).dropped);
        assert_eq!(network.pending_len(), 0);

        network.heal();
        assert!(!network.send(message(0, 1), 0, &mut rng).dropped);
    }

    #[test]
    fn lossless_network_delivers_everything_eventually() {
        let fault = FaultConfig {
            duplicate_rate_percent: 50,
            ..FaultConfig::default().lossless()
        };
        let mut network = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(2);
        let mut sent = 0;
        for round in 0..10 {
            let outcome = network.send(message(0, 1), round, &mut rng);
            sent += 1 + usize::from(outcome.duplicated);
        }

        let delivered = network.deliver_ready(u64::MAX, &mut rng).delivered.len();
        assert_eq!(delivered, sent);
        assert_eq!(network.pending_len(), 0);
    }

    #[test]
    fn messages_wait_for_their_round() {
        let fault = FaultConfig {
            max_delay_rounds: 0,
            ..FaultConfig::default().lossless()
        };
        let mut network = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(3);
        let _ = network.send(message(0, 1), 5, &mut rng);

        assert!(network.deliver_ready(4, &mut rng).delivered.is_empty());
        assert_eq!(network.deliver_ready(5, &mut rng).delivered.len(), 1);
    }
}
