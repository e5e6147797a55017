/*!
Distributing hashes and tickets between adversaries

Hashes are sampled independently for every adversary, so two adversaries may
own the same hash and both mine a block in the same cycle. Tickets are drawn
from a shared pool which shrinks after every adversary's draw, so ticket
ownership is a partition of the pool.
*/

use std::collections::HashSet;

use log::info;
use rand::{seq::index, Rng};

use crate::{
    adversary::{Adversary, AdversaryId},
    config::ChainParams,
};

/// Share of hash power and, optionally, of staked tickets for each
/// adversary, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct Shares {
    pub hash: Vec<f64>,
    pub stake: Option<Vec<f64>>,
}

#[derive(Debug, thiserror::Error)]
pub enum EndowmentError {
    #[error("cannot draw {requested} values from a pool of {available}")]
    SampleShortfall { requested: usize, available: usize },
}

impl Shares {
    /// Number of adversaries described by these shares.
    pub fn len(&self) -> usize {
        self.hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hash.is_empty()
    }

    pub fn staking(&self) -> bool {
        self.stake.is_some()
    }
}

/// Number of values of a space of size `space` owned by a share of
/// `percent`. 50.01% of 10000 hashes is 5001 hashes.
#[inline]
pub fn owned_count(percent: f64, space: u32) -> usize {
    (percent / 100.0 * space as f64).round() as usize
}

/// Draws `amount` distinct indices below `length`, failing instead of
/// returning fewer.
fn sample<R: Rng + ?Sized>(
    rng: &mut R,
    length: usize,
    amount: usize,
) -> Result<Vec<usize>, EndowmentError> {
    if amount > length {
        return Err(EndowmentError::SampleShortfall {
            requested: amount,
            available: length,
        });
    }

    Ok(index::sample(rng, length, amount).into_vec())
}

/// Creates a fresh set of adversaries with randomly drawn hashes and
/// tickets.
pub fn assign<R: Rng + ?Sized>(
    shares: &Shares,
    params: &ChainParams,
    rng: &mut R,
) -> Result<Vec<Adversary>, EndowmentError> {
    let hash_space = params.hash_space;

    let mut adversaries = Vec::with_capacity(shares.len());
    for (i, &share) in shares.hash.iter().enumerate() {
        let mut adversary = Adversary::new(AdversaryId(i), share);
        let count = owned_count(share, hash_space);
        adversary.owned_hashes = sample(rng, hash_space as usize, count)?
            .into_iter()
            .map(|hash| hash as u32)
            .collect();

        adversaries.push(adversary);
    }

    if let Some(stakes) = &shares.stake {
        let pool_size = params.ticket_pool.average_size;
        let mut pool: Vec<u32> = (0..pool_size).collect();

        for (adversary, &share) in adversaries.iter_mut().zip(stakes) {
            let count = owned_count(share, pool_size);
            let drawn: HashSet<u32> = sample(rng, pool.len(), count)?
                .into_iter()
                .map(|i| pool[i])
                .collect();
            pool.retain(|ticket| !drawn.contains(ticket));

            adversary.stake_share = Some(share);
            adversary.owned_tickets = Some(drawn);
        }
    }

    for adversary in adversaries.iter() {
        let hash = adversary.realized_hash_share(hash_space);
        match adversary
            .realized_stake_share(params.ticket_pool.average_size)
        {
            Some(stake) => info!(
                "{} hashpower: {:.2}% and stake size: {:.4}%",
                adversary.id, hash, stake
            ),
            None => info!("{} hashpower: {:.2}%", adversary.id, hash),
        }
    }

    Ok(adversaries)
}
