use std::num::NonZeroUsize;

use crate::{
    adversary::AdversaryId,
    config::{ChainParams, ConfigError},
    distance::TERMINAL_DISTANCE,
    endowment::{owned_count, Shares},
};

use super::{Rewind, SimulationGroup};

/// Builds a [`SimulationGroup`], checking every precondition of the
/// configuration before any simulation runs.
///
/// # Example
/// ```
/// use invalidation_game::prelude::*;
///
/// let batch = SimulationBuilder::new()
///     .hash_shares([50.0, 50.0])
///     .stake_shares([50.0, 50.0])
///     .simulations(3)
///     .rewind(2, 0)
///     .seed(42)
///     .build()
///     .unwrap();
///
/// let result = batch.run_all().unwrap();
/// assert_eq!(result.runs.len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct SimulationBuilder {
    hash_shares: Vec<f64>,
    stake_shares: Option<Vec<f64>>,
    params: Option<ChainParams>,
    simulations: Option<usize>,
    rewind: Option<(usize, usize)>,
    seed: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationBuildError {
    #[error("at least 2 adversaries are required, {0} given")]
    TooFewAdversaries(usize),
    #[error("share {0} is not in the range 0.0..=100.0")]
    BadShareValue(f64),
    #[error("total hashpower must sum to 100, but summed {0}")]
    BadHashShareSum(f64),
    #[error("total stake must sum to 100, but summed {0}")]
    BadStakeShareSum(f64),
    #[error("{0} hash shares and {1} stake shares given")]
    ShareCountMismatch(usize, usize),
    #[error("rewind adversary {0} does not exist among {1} adversaries")]
    RewindAdversaryOutOfRange(AdversaryId, usize),
    #[error("cannot rewind {0} blocks, more than the terminal lead")]
    RewindTooDeep(usize),
    #[error("number of simulations must be greater than 0")]
    ZeroSimulations,
    #[error(
        "no adversary owns both a hash and enough tickets for a committee \
         majority, so no block can ever be accepted"
    )]
    NoConfirmableAdversary,
    #[error(transparent)]
    InvalidParams(#[from] ConfigError),
}

enum BadShare {
    Value(f64),
    Sum(f64),
}

impl SimulationBuilder {
    /// Allowable difference between a share sum and 100.
    const EPSILON_SHARE: f64 = 1e-6;

    /// Creates a new [`SimulationBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hash power of each adversary, in percent. One adversary is
    /// created per value.
    pub fn hash_shares<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.hash_shares = values.into_iter().collect();

        self
    }

    /// Enables staking, with the stake of each adversary given in percent.
    pub fn stake_shares<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.stake_shares = Some(values.into_iter().collect());

        self
    }

    /// Sets the hash space, ticket pool and vote history
    /// ([`ChainParams::default`] used otherwise).
    pub fn params(mut self, params: ChainParams) -> Self {
        self.params = Some(params);

        self
    }

    /// Sets the number of independent runs in the batch (default 1).
    pub fn simulations(mut self, num: usize) -> Self {
        self.simulations = Some(num);

        self
    }

    /// Places `blocks` rewind blocks on the chain of adversary `adversary`
    /// (0-based) before every run.
    pub fn rewind(mut self, blocks: usize, adversary: usize) -> Self {
        self.rewind = Some((blocks, adversary));

        self
    }

    /// Seeds the batch for reproducible runs. Seeded from entropy otherwise.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);

        self
    }

    /// Creates a [`SimulationGroup`] from the specified parameters.
    pub fn build(self) -> Result<SimulationGroup, SimulationBuildError> {
        use SimulationBuildError::*;

        let SimulationBuilder {
            hash_shares,
            stake_shares,
            params,
            simulations,
            rewind,
            seed,
        } = self;

        let n = hash_shares.len();
        if n < 2 {
            return Err(TooFewAdversaries(n));
        }
        Self::validate_shares(&hash_shares).map_err(|bad| match bad {
            BadShare::Value(value) => BadShareValue(value),
            BadShare::Sum(sum) => BadHashShareSum(sum),
        })?;

        if let Some(stakes) = &stake_shares {
            if stakes.len() != n {
                return Err(ShareCountMismatch(n, stakes.len()));
            }
            Self::validate_shares(stakes).map_err(|bad| match bad {
                BadShare::Value(value) => BadShareValue(value),
                BadShare::Sum(sum) => BadStakeShareSum(sum),
            })?;
        }

        let params = params.unwrap_or_default();
        params.validate()?;
        let stakes = stake_shares.as_deref();
        if !Self::can_accept_blocks(&hash_shares, stakes, &params) {
            return Err(NoConfirmableAdversary);
        }

        let simulations = match simulations {
            Some(x) => NonZeroUsize::new(x).ok_or(ZeroSimulations)?,
            None => NonZeroUsize::MIN,
        };

        let rewind = match rewind {
            Some((_, adversary)) if adversary >= n => {
                return Err(RewindAdversaryOutOfRange(adversary.into(), n))
            }
            Some((blocks, _)) if blocks > TERMINAL_DISTANCE => {
                return Err(RewindTooDeep(blocks))
            }
            Some((0, _)) | None => None,
            Some((blocks, adversary)) => {
                Some(Rewind { blocks, adversary: adversary.into() })
            }
        };

        Ok(SimulationGroup {
            shares: Shares { hash: hash_shares, stake: stake_shares },
            params,
            simulations,
            rewind,
            seed,
        })
    }

    /// True if some adversary owns at least one hash and, with staking, at
    /// least a majority of the smallest committee.
    fn can_accept_blocks(
        hash_shares: &[f64],
        stake_shares: Option<&[f64]>,
        params: &ChainParams,
    ) -> bool {
        let mut miners = hash_shares
            .iter()
            .map(|&share| owned_count(share, params.hash_space) > 0);

        match stake_shares {
            None => miners.any(|mines| mines),
            Some(stakes) => {
                let pool = params.ticket_pool.average_size;
                let majority = params.ticket_pool.votes.majority_threshold();
                miners.zip(stakes).any(|(mines, &share)| {
                    mines && owned_count(share, pool) >= majority
                })
            }
        }
    }

    /// Checks that every share is a percentage and that they sum to 100.
    fn validate_shares(shares: &[f64]) -> Result<(), BadShare> {
        if let Some(&value) = shares
            .iter()
            .find(|&x| x.is_nan() || !(0.0..=100.0).contains(x))
        {
            return Err(BadShare::Value(value));
        }

        let sum: f64 = shares.iter().sum();
        if (sum - 100.0).abs() > Self::EPSILON_SHARE {
            return Err(BadShare::Sum(sum));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SimulationBuildError, SimulationBuilder};
    use crate::config::ChainParams;

    #[test]
    fn example_build() {
        let batch = SimulationBuilder::new()
            .hash_shares([50.01, 49.99])
            .build()
            .expect("valid simulation build");

        assert!(!batch.shares().staking());
        assert!(batch.rewind().is_none());
        assert_eq!(batch.params(), &ChainParams::default());
    }

    #[test]
    fn rejects_bad_configurations() {
        use SimulationBuildError::*;

        let result = SimulationBuilder::new().hash_shares([100.0]).build();
        assert!(matches!(result, Err(TooFewAdversaries(1))));

        let result = SimulationBuilder::new().hash_shares([60.0, 30.0]).build();
        assert!(matches!(result, Err(BadHashShareSum(_))));

        let result =
            SimulationBuilder::new().hash_shares([120.0, -20.0]).build();
        assert!(matches!(result, Err(BadShareValue(_))));

        let result = SimulationBuilder::new()
            .hash_shares([50.0, 50.0])
            .stake_shares([50.0, 40.0])
            .build();
        assert!(matches!(result, Err(BadStakeShareSum(_))));

        let result = SimulationBuilder::new()
            .hash_shares([50.0, 50.0])
            .stake_shares([100.0])
            .build();
        assert!(matches!(result, Err(ShareCountMismatch(2, 1))));

        let result = SimulationBuilder::new()
            .hash_shares([50.0, 50.0])
            .rewind(2, 2)
            .build();
        assert!(matches!(result, Err(RewindAdversaryOutOfRange(_, 2))));

        let result = SimulationBuilder::new()
            .hash_shares([50.0, 50.0])
            .rewind(7, 0)
            .build();
        assert!(matches!(result, Err(RewindTooDeep(7))));

        let result = SimulationBuilder::new()
            .hash_shares([50.0, 50.0])
            .simulations(0)
            .build();
        assert!(matches!(result, Err(ZeroSimulations)));

        let result = SimulationBuilder::new()
            .hash_shares([100.0, 0.0])
            .stake_shares([0.0, 100.0])
            .build();
        assert!(matches!(result, Err(NoConfirmableAdversary)));

        let mut params = ChainParams::default();
        params.hash_space = 0;
        let result = SimulationBuilder::new()
            .hash_shares([50.0, 50.0])
            .params(params)
            .build();
        assert!(matches!(result, Err(InvalidParams(_))));
    }

    #[test]
    fn stake_must_meet_hash_power_somewhere() {
        use SimulationBuildError::NoConfirmableAdversary;

        let mut params = ChainParams::default();
        params.ticket_pool.average_size = 100;

        // one ticket is never a majority of a committee of 3
        let result = SimulationBuilder::new()
            .hash_shares([100.0, 0.0])
            .stake_shares([1.0, 99.0])
            .params(params.clone())
            .build();
        assert!(matches!(result, Err(NoConfirmableAdversary)));

        let result = SimulationBuilder::new()
            .hash_shares([100.0, 0.0])
            .stake_shares([2.0, 98.0])
            .params(params.clone())
            .build();
        assert!(result.is_ok());

        // only 5-ticket committees were ever observed
        params.ticket_pool.votes.blocks_with_4_votes = 0;
        params.ticket_pool.votes.blocks_with_3_votes = 0;
        let result = SimulationBuilder::new()
            .hash_shares([100.0, 0.0])
            .stake_shares([2.0, 98.0])
            .params(params)
            .build();
        assert!(matches!(result, Err(NoConfirmableAdversary)));
    }

    #[test]
    fn unconfirmable_stake_batch_is_rejected_before_running() {
        let result = SimulationBuilder::new()
            .hash_shares([60.0, 40.0, 0.0])
            .stake_shares([0.0, 0.0, 100.0])
            .simulations(3)
            .build();

        assert!(matches!(
            result,
            Err(SimulationBuildError::NoConfirmableAdversary)
        ));
    }

    #[test]
    fn zero_rewind_is_no_rewind() {
        let batch = SimulationBuilder::new()
            .hash_shares([50.0, 50.0])
            .rewind(0, 1)
            .build()
            .unwrap();

        assert!(batch.rewind().is_none());
    }
}
