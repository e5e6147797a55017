/*!
Producing one accepted block per cycle

A cycle draws a hash uniformly from the hash space. Every adversary which owns
the hash wins the PoW draw. In pure PoW every winner appends a block. With
staking, a committee of 5, 4 or 3 tickets is drawn from the whole ticket pool
and a winner's block is only accepted if it owns a strict majority of the
committee. Draws without a winner, or without any confirmed winner, are
discarded and drawn again.
*/

use log::{debug, info};
use rand::{
    distributions::{Uniform, WeightedError, WeightedIndex},
    prelude::Distribution,
    seq::index,
    Rng,
};
use serde::Serialize;

use crate::{
    adversary::{Adversary, AdversaryId, Block, BlockHash, Validation},
    config::{ChainParams, VoteHistory},
};

/// Draws committees of online tickets.
#[derive(Debug, Clone)]
struct Committee {
    sizes: [usize; 3],
    weights: WeightedIndex<u64>,
    ticket_pool: usize,
}

impl Committee {
    fn new(
        votes: &VoteHistory,
        ticket_pool: u32,
    ) -> Result<Self, WeightedError> {
        let history = votes.weights();
        let weights = WeightedIndex::new(history.iter().map(|(_, n)| *n))?;

        Ok(Self {
            sizes: history.map(|(size, _)| size),
            weights,
            ticket_pool: ticket_pool as usize,
        })
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u32> {
        let size = self.sizes[self.weights.sample(rng)];
        index::sample(rng, self.ticket_pool, size)
            .into_iter()
            .map(|ticket| ticket as u32)
            .collect()
    }
}

/// Result of the accepted attempt of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundOutcome {
    /// Hash drawn in the accepted attempt.
    pub hash: u32,
    /// Adversaries which own `hash`.
    pub pow_winners: Vec<AdversaryId>,
    /// PoW winners confirmed by the ticket committee. `None` in pure PoW.
    pub pos_winners: Option<Vec<AdversaryId>>,
    /// Committee size of the accepted attempt. `None` in pure PoW.
    pub committee_size: Option<usize>,
    /// Attempts discarded before one was accepted.
    pub rejected_attempts: u64,
}

/// A single draw and its effects, before anything is applied to the
/// adversaries.
struct Attempt {
    hash: u32,
    pow_winners: Vec<AdversaryId>,
    committee: Option<Vec<u32>>,
    /// PoW winners with the committee tickets they own. Every PoW winner in
    /// pure PoW.
    confirmed: Vec<(AdversaryId, Vec<u32>)>,
    /// PoW winners without a committee majority.
    vetoed: Vec<AdversaryId>,
}

impl Attempt {
    fn count_vetoes(&self, counts: &mut [u64]) {
        for id in self.vetoed.iter() {
            counts[id.0] += 1;
        }
    }
}

/// Simulates the block production race of a single cycle.
#[derive(Debug, Clone)]
pub struct MiningEngine {
    hashes: Uniform<u32>,
    committee: Option<Committee>,
}

impl MiningEngine {
    /// Creates an engine for the given chain parameters. A ticket committee
    /// is only drawn when `staking` is true.
    pub fn new(
        params: &ChainParams,
        staking: bool,
    ) -> Result<Self, WeightedError> {
        let committee = match staking {
            true => Some(Committee::new(
                &params.ticket_pool.votes,
                params.ticket_pool.average_size,
            )?),
            false => None,
        };

        Ok(Self { hashes: Uniform::new(0, params.hash_space), committee })
    }

    pub fn staking(&self) -> bool {
        self.committee.is_some()
    }

    /// Draws until one attempt is accepted, then appends a block to the chain
    /// of every confirmed winner.
    ///
    /// The loop has no cap. It terminates almost surely when some adversary
    /// owns a hash and, with staking, at least a majority of the smallest
    /// committee that can be drawn. [`SimulationBuilder`] rejects shares for
    /// which no adversary does.
    ///
    /// [`SimulationBuilder`]: crate::simulation::SimulationBuilder
    pub fn mine<R: Rng + ?Sized>(
        &self,
        adversaries: &mut [Adversary],
        cycle: usize,
        rng: &mut R,
    ) -> RoundOutcome {
        let mut vetoed = vec![0u64; adversaries.len()];
        let mut rejected_attempts = 0;

        let attempt = loop {
            let attempt = self.attempt(adversaries, rng);

            if attempt.pow_winners.is_empty() {
                debug!(
                    "cycle {:03}: no PoW winner for hash {}; next draw",
                    cycle, attempt.hash
                );
            } else if attempt.confirmed.is_empty() {
                debug!(
                    "cycle {:03}: PoS and PoW winners don't match; next draw",
                    cycle
                );
                attempt.count_vetoes(&mut vetoed);
            } else {
                attempt.count_vetoes(&mut vetoed);
                break attempt;
            }

            rejected_attempts += 1;
        };

        for (adversary, count) in adversaries.iter_mut().zip(vetoed) {
            adversary.invalidated_blocks += count;
        }

        let committee_size = attempt.committee.as_ref().map(|c| c.len());
        for (id, owned_tickets) in attempt.confirmed.iter() {
            let adversary = &mut adversaries[id.0];
            let validation = committee_size.map(|online_tickets| {
                adversary.validated_blocks += 1;
                Validation {
                    online_tickets,
                    owned_tickets: owned_tickets.clone(),
                }
            });

            adversary.chain.push(Block {
                hash: BlockHash::Mined(attempt.hash),
                cycle,
                validation,
            });
            adversary.total_blocks_mined += 1;

            info!("cycle {:03}: block accepted for {}", cycle, id);
        }

        let pos_winners = attempt
            .committee
            .as_ref()
            .map(|_| attempt.confirmed.iter().map(|(id, _)| *id).collect());

        RoundOutcome {
            hash: attempt.hash,
            pow_winners: attempt.pow_winners,
            pos_winners,
            committee_size,
            rejected_attempts,
        }
    }

    /// Makes one hash draw and, if anyone won it and staking is enabled, one
    /// committee draw. Reads, but does not modify, the adversaries.
    fn attempt<R: Rng + ?Sized>(
        &self,
        adversaries: &[Adversary],
        rng: &mut R,
    ) -> Attempt {
        let hash = self.hashes.sample(rng);
        let pow_winners: Vec<_> = adversaries
            .iter()
            .filter(|adversary| adversary.owned_hashes.contains(&hash))
            .map(|adversary| adversary.id)
            .collect();

        let mut attempt = Attempt {
            hash,
            pow_winners,
            committee: None,
            confirmed: vec![],
            vetoed: vec![],
        };
        if attempt.pow_winners.is_empty() {
            return attempt;
        }

        let committee = match &self.committee {
            None => {
                attempt.confirmed = attempt
                    .pow_winners
                    .iter()
                    .map(|&id| (id, vec![]))
                    .collect();
                return attempt;
            }
            Some(committee) => committee.draw(rng),
        };
        debug!(
            "online tickets: {}; drawn tickets: {:?}",
            committee.len(),
            committee
        );

        let majority = committee.len() / 2;
        for &id in attempt.pow_winners.iter() {
            let owned = adversaries[id.0].tickets_in(&committee);
            debug!("tickets for {}: {}", id, owned.len());

            if owned.len() > majority {
                attempt.confirmed.push((id, owned));
            } else {
                attempt.vetoed.push(id);
            }
        }
        attempt.committee = Some(committee);

        attempt
    }
}
