//! Adversaries racing to build the longest chain, and the blocks they mine.

use std::{collections::HashSet, fmt::Display};

use serde::Serialize;

/// Stable 0-based index of an [`Adversary`], displayed as `A<index>`.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct AdversaryId(pub(crate) usize);

impl AdversaryId {
    /// Returns the [`usize`] index corresponding to this [`AdversaryId`].
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for AdversaryId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl Display for AdversaryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

impl Serialize for AdversaryId {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Value a block was mined with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockHash {
    /// A hash drawn from the hash space.
    Mined(u32),
    /// Synthetic block placed on a chain before the simulation starts.
    Rewind(usize),
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockHash::Mined(hash) => write!(f, "{}", hash),
            BlockHash::Rewind(n) => write!(f, "RWB{}", n),
        }
    }
}

/// PoS confirmation of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    /// Size of the ticket committee drawn for the block.
    pub online_tickets: usize,
    /// Committee tickets owned by the adversary which mined the block.
    pub owned_tickets: Vec<u32>,
}

/// A block appended to an adversary's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub hash: BlockHash,
    /// Cycle in which the block was accepted.
    pub cycle: usize,
    /// `None` for pure PoW blocks and rewind blocks.
    pub validation: Option<Validation>,
}

/// Live state of one participant in a simulation run.
///
/// Created by [`endowment::assign`](crate::endowment::assign), mutated by
/// [`MiningEngine::mine`](crate::mining::MiningEngine::mine) and discarded
/// once turned into an [`AdversarySnapshot`].
#[derive(Debug, Clone)]
pub struct Adversary {
    pub id: AdversaryId,
    /// Configured share of the hash power, in percent.
    pub hash_share: f64,
    /// Configured share of the staked tickets, in percent. `None` when
    /// staking is disabled.
    pub stake_share: Option<f64>,
    pub owned_hashes: HashSet<u32>,
    pub owned_tickets: Option<HashSet<u32>>,
    pub chain: Vec<Block>,
    pub validated_blocks: u64,
    pub invalidated_blocks: u64,
    pub total_blocks_mined: u64,
}

impl Adversary {
    pub fn new(id: AdversaryId, hash_share: f64) -> Self {
        Self {
            id,
            hash_share,
            stake_share: None,
            owned_hashes: HashSet::new(),
            owned_tickets: None,
            chain: Vec::new(),
            validated_blocks: 0,
            invalidated_blocks: 0,
            total_blocks_mined: 0,
        }
    }

    /// Height of this adversary's chain.
    #[inline]
    pub fn height(&self) -> usize {
        self.chain.len()
    }

    /// Tickets of `committee` owned by this adversary.
    pub fn tickets_in(&self, committee: &[u32]) -> Vec<u32> {
        match &self.owned_tickets {
            None => vec![],
            Some(owned) => committee
                .iter()
                .copied()
                .filter(|ticket| owned.contains(ticket))
                .collect(),
        }
    }

    /// Share of the hash space actually owned, in percent.
    pub fn realized_hash_share(&self, hash_space: u32) -> f64 {
        self.owned_hashes.len() as f64 * 100.0 / hash_space as f64
    }

    /// Share of the ticket pool actually owned, in percent.
    pub fn realized_stake_share(&self, ticket_pool: u32) -> Option<f64> {
        self.owned_tickets
            .as_ref()
            .map(|owned| owned.len() as f64 * 100.0 / ticket_pool as f64)
    }

    /// Final state of this adversary, without its owned hashes and tickets.
    pub fn snapshot(self) -> AdversarySnapshot {
        AdversarySnapshot {
            id: self.id,
            hash_share: self.hash_share,
            stake_share: self.stake_share,
            owned_hashes: self.owned_hashes.len(),
            owned_tickets: self.owned_tickets.map(|t| t.len()),
            chain: self.chain,
            validated_blocks: self.validated_blocks,
            invalidated_blocks: self.invalidated_blocks,
            total_blocks_mined: self.total_blocks_mined,
        }
    }
}

/// State of an [`Adversary`] at the end of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdversarySnapshot {
    pub id: AdversaryId,
    pub hash_share: f64,
    pub stake_share: Option<f64>,
    /// Number of hashes owned.
    pub owned_hashes: usize,
    /// Number of tickets owned.
    pub owned_tickets: Option<usize>,
    pub chain: Vec<Block>,
    pub validated_blocks: u64,
    pub invalidated_blocks: u64,
    pub total_blocks_mined: u64,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{Adversary, AdversaryId, BlockHash};

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(AdversaryId::from(3).to_string(), "A3");
        assert_eq!(BlockHash::Rewind(1).to_string(), "RWB1");
        assert_eq!(BlockHash::Mined(42).to_string(), "42");
    }

    #[test]
    fn tickets_in_committee() {
        let mut adversary = Adversary::new(0.into(), 50.0);
        assert!(adversary.tickets_in(&[1, 2, 3]).is_empty());

        adversary.owned_tickets = Some(HashSet::from([2, 3, 9]));
        assert_eq!(adversary.tickets_in(&[1, 2, 3, 4, 5]), vec![2, 3]);
    }

    #[test]
    fn snapshot_keeps_counts_only() {
        let mut adversary = Adversary::new(1.into(), 25.0);
        adversary.owned_hashes = (0..2500).collect();
        adversary.total_blocks_mined = 7;

        assert_eq!(adversary.realized_hash_share(10_000), 25.0);
        assert_eq!(adversary.realized_stake_share(100), None);

        let snapshot = adversary.snapshot();
        assert_eq!(snapshot.owned_hashes, 2500);
        assert_eq!(snapshot.owned_tickets, None);
        assert_eq!(snapshot.total_blocks_mined, 7);
    }
}
