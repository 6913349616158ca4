use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentState};

// ── Core result types ─────────────────────────────────────────────────────────

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Accumulate `other`'s failures into this result.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantViolation {
    /// Two agents hold different entries, or the same entries in a
    /// different order, after full delivery.
    Convergence {
        agent_a: AgentId,
        agent_b: AgentId,
        only_in_a: Vec<String>,
        only_in_b: Vec<String>,
        /// Same entry set, different order.
        order_differs: bool,
    },

    /// Two agents disagree on which entries are heads.
    Heads {
        agent_a: AgentId,
        agent_b: AgentId,
        heads_a: Vec<String>,
        heads_b: Vec<String>,
    },

    /// An entry's head flag disagrees with its live referrers.
    HeadFlag {
        agent: AgentId,
        hash: String,
        flagged_head: bool,
    },

    /// An agent holds an entry that some CUT names as a target, with no
    /// live entry of its own referring to it.
    Tombstone {
        agent: AgentId,
        target: String,
        cut: String,
    },

    /// Joining what an agent already has changed its log.
    Idempotence {
        agent: AgentId,
        before: usize,
        after: usize,
    },

    /// Joining the converged entries in another order gave another log.
    Commutativity {
        permutation_index: usize,
        missing: Vec<String>,
        extra: Vec<String>,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Convergence {
                agent_a,
                agent_b,
                only_in_a,
                only_in_b,
                order_differs,
            } => write!(
                f,
                "agents {agent_a} and {agent_b} diverged: {} only in {agent_a}, \
                 {} only in {agent_b}, order differs: {order_differs}",
                only_in_a.len(),
                only_in_b.len()
            ),
            Self::Heads {
                agent_a,
                agent_b,
                heads_a,
                heads_b,
            } => write!(
                f,
                "agents {agent_a} and {agent_b} disagree on heads: {heads_a:?} vs {heads_b:?}"
            ),
            Self::HeadFlag {
                agent,
                hash,
                flagged_head,
            } => write!(f, "agent {agent} flags {hash} head={flagged_head}"),
            Self::Tombstone { agent, target, cut } => {
                write!(f, "agent {agent} still holds {target}, cut by {cut}")
            }
            Self::Idempotence {
                agent,
                before,
                after,
            } => write!(f, "agent {agent} went from {before} to {after} entries on rejoin"),
            Self::Commutativity {
                permutation_index,
                missing,
                extra,
            } => write!(
                f,
                "replay {permutation_index} lost {} and gained {} entries",
                missing.len(),
                extra.len()
            ),
        }
    }
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Invariant checks over agent snapshots taken after the final drain.
///
/// 1. **Convergence**: every agent has the same order and the same heads.
/// 2. **Head flags**: an entry is a head iff no live entry points at it.
/// 3. **Tombstones**: no agent holds a direct target of any CUT it or a
///    peer holds, unless a live entry of that agent still has it as a
///    parent.
/// 4. **Idempotence**: re-joining a peer leaves a log unchanged.
/// 5. **Commutativity**: replaying the converged entries in shuffled
///    batches reproduces the same log.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    #[must_use]
    pub fn check_all(
        states: &[AgentState],
        rejoined: &[AgentState],
        replays: &[AgentState],
    ) -> OracleResult {
        let mut result = Self::check_convergence(states)
            .merge(Self::check_head_flags(states))
            .merge(Self::check_tombstones(states))
            .merge(Self::check_idempotence(states, rejoined));
        if let Some(canonical) = states.first() {
            result = result.merge(Self::check_commutativity(canonical, replays));
        }
        result
    }

    // ── Invariant 1: Convergence ─────────────────────────────────────────────

    #[must_use]
    pub fn check_convergence(states: &[AgentState]) -> OracleResult {
        let mut violations = Vec::new();

        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                if a.order() != b.order() {
                    let set_a: BTreeSet<&str> = a.order().into_iter().collect();
                    let set_b: BTreeSet<&str> = b.order().into_iter().collect();
                    violations.push(InvariantViolation::Convergence {
                        agent_a: a.id,
                        agent_b: b.id,
                        only_in_a: set_a.difference(&set_b).map(|h| (*h).to_owned()).collect(),
                        only_in_b: set_b.difference(&set_a).map(|h| (*h).to_owned()).collect(),
                        order_differs: set_a == set_b,
                    });
                }
                if a.heads() != b.heads() {
                    violations.push(InvariantViolation::Heads {
                        agent_a: a.id,
                        agent_b: b.id,
                        heads_a: to_owned(&a.heads()),
                        heads_b: to_owned(&b.heads()),
                    });
                }
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 2: Head flags ──────────────────────────────────────────────

    #[must_use]
    pub fn check_head_flags(states: &[AgentState]) -> OracleResult {
        let mut violations = Vec::new();

        for state in states {
            let live_parents: HashSet<&str> = state
                .entries
                .iter()
                .filter(|e| !e.cut)
                .flat_map(|e| e.next.iter().map(String::as_str))
                .collect();
            for entry in &state.entries {
                let expected = !live_parents.contains(entry.hash.as_str());
                if entry.head != expected {
                    violations.push(InvariantViolation::HeadFlag {
                        agent: state.id,
                        hash: entry.hash.clone(),
                        flagged_head: entry.head,
                    });
                }
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 3: Tombstones ──────────────────────────────────────────────

    #[must_use]
    pub fn check_tombstones(states: &[AgentState]) -> OracleResult {
        let cuts: Vec<(&str, &str)> = states
            .iter()
            .flat_map(|s| s.entries.iter())
            .filter(|e| e.cut)
            .flat_map(|cut| cut.next.iter().map(move |t| (cut.hash.as_str(), t.as_str())))
            .collect();

        let mut violations = Vec::new();
        for state in states {
            let live_parents: HashSet<&str> = state
                .entries
                .iter()
                .filter(|e| !e.cut)
                .flat_map(|e| e.next.iter().map(String::as_str))
                .collect();
            for &(cut, target) in &cuts {
                if state.contains(target) && !live_parents.contains(target) {
                    violations.push(InvariantViolation::Tombstone {
                        agent: state.id,
                        target: target.to_owned(),
                        cut: cut.to_owned(),
                    });
                }
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 4: Idempotence ─────────────────────────────────────────────

    /// `rejoined[i]` is agent `i` after joining a converged peer again.
    #[must_use]
    pub fn check_idempotence(states: &[AgentState], rejoined: &[AgentState]) -> OracleResult {
        let violations = states
            .iter()
            .zip(rejoined)
            .filter(|(before, after)| before != after)
            .map(|(before, after)| InvariantViolation::Idempotence {
                agent: before.id,
                before: before.entries.len(),
                after: after.entries.len(),
            })
            .collect();

        OracleResult::from_violations(violations)
    }

    // ── Invariant 5: Commutativity ───────────────────────────────────────────

    #[must_use]
    pub fn check_commutativity(canonical: &AgentState, replays: &[AgentState]) -> OracleResult {
        if replays.is_empty() {
            return OracleResult::pass();
        }

        let expected = canonical.order();
        let expected_set: BTreeSet<&str> = expected.iter().copied().collect();
        let violations = replays
            .iter()
            .enumerate()
            .filter(|(_, replay)| replay.order() != expected)
            .map(|(permutation_index, replay)| {
                let got: BTreeSet<&str> = replay.order().into_iter().collect();
                InvariantViolation::Commutativity {
                    permutation_index,
                    missing: expected_set.difference(&got).map(|h| (*h).to_owned()).collect(),
                    extra: got.difference(&expected_set).map(|h| (*h).to_owned()).collect(),
                }
            })
            .collect();

        OracleResult::from_violations(violations)
    }
}

fn to_owned(hashes: &[&str]) -> Vec<String> {
    hashes.iter().map(|h| (*h).to_owned()).collect()
}
