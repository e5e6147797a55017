//! Running simulations of the race until one chain is 6 blocks ahead

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use log::{debug, info, warn};
use rand::{distributions::WeightedError, rngs::StdRng, Rng, SeedableRng};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    adversary::{Adversary, AdversaryId, AdversarySnapshot, Block, BlockHash},
    config::ChainParams,
    distance::{DistanceError, DistanceTracker, Milestone, Observation},
    endowment::{self, EndowmentError, Shares},
    mining::{MiningEngine, RoundOutcome},
    results::{BatchResult, BatchTiming, Summary},
};

pub mod builder;

pub use builder::{SimulationBuildError, SimulationBuilder};

/// Synthetic blocks placed on one adversary's chain before a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rewind {
    pub blocks: usize,
    pub adversary: AdversaryId,
}

/// Shared flag used to stop a batch between simulation runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the batch stop once the current run completes.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Container for a batch of independent simulations which share the same
/// configuration. Built with [`SimulationBuilder`].
///
/// Every run draws new endowments from the configured shares. Each run is
/// driven by its own [`StdRng`], seeded from a master generator, so a seeded
/// batch always produces the same runs.
#[derive(Debug, Clone)]
pub struct SimulationGroup {
    shares: Shares,
    params: ChainParams,
    simulations: NonZeroUsize,
    rewind: Option<Rewind>,
    seed: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    EndowmentError(#[from] EndowmentError),
    #[error("could not create rand::distributions::WeightedIndex")]
    WeightedIndexError(#[from] WeightedError),
    #[error(transparent)]
    DistanceError(#[from] DistanceError),
    #[error("rewind adversary {0} does not exist")]
    UnknownAdversary(AdversaryId),
    #[error("batch cancelled before any simulation completed")]
    Cancelled,
}

impl SimulationGroup {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    pub fn shares(&self) -> &Shares {
        &self.shares
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn rewind(&self) -> Option<Rewind> {
        self.rewind
    }

    /// Runs every simulation in order.
    pub fn run_all(&self) -> Result<BatchResult, SimulationError> {
        self.run_all_until(&CancelToken::new())
    }

    /// Runs simulations in order until all are complete or `cancel` is
    /// triggered. Cancellation is only checked between runs.
    pub fn run_all_until(
        &self,
        cancel: &CancelToken,
    ) -> Result<BatchResult, SimulationError> {
        let engine = self.engine()?;
        let seeds = self.seeds();

        info!("starting simulation batch");
        let (started, clock) = (SystemTime::now(), Instant::now());

        let mut runs = Vec::with_capacity(seeds.len());
        let mut cancelled = false;
        for (index, seed) in seeds.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("simulation batch cancelled after {} runs", index);
                cancelled = true;
                break;
            }
            runs.push(self.run_one(&engine, index, seed)?);
        }

        self.finish(runs, started, clock, cancelled)
    }

    /// Runs every simulation in parallel. Produces the same runs as
    /// [`SimulationGroup::run_all`] for the same seed.
    #[cfg(feature = "rayon")]
    pub fn run_all_parallel(&self) -> Result<BatchResult, SimulationError> {
        self.run_all_parallel_until(&CancelToken::new())
    }

    /// Runs simulations in parallel until all are complete or `cancel` is
    /// triggered. Runs already started when `cancel` is triggered complete;
    /// the rest are skipped.
    #[cfg(feature = "rayon")]
    pub fn run_all_parallel_until(
        &self,
        cancel: &CancelToken,
    ) -> Result<BatchResult, SimulationError> {
        let engine = self.engine()?;
        let seeds = self.seeds();

        info!("starting parallel simulation batch");
        let (started, clock) = (SystemTime::now(), Instant::now());

        let runs: Result<Vec<_>, _> = seeds
            .into_par_iter()
            .enumerate()
            .map(|(index, seed)| match cancel.is_cancelled() {
                true => Ok(None),
                false => self.run_one(&engine, index, seed).map(Some),
            })
            .collect();

        let runs = runs?;
        let cancelled = runs.iter().any(Option::is_none);
        if cancelled {
            warn!("parallel simulation batch cancelled");
        }
        let runs = runs.into_iter().flatten().collect();

        self.finish(runs, started, clock, cancelled)
    }

    fn engine(&self) -> Result<MiningEngine, SimulationError> {
        Ok(MiningEngine::new(&self.params, self.shares.staking())?)
    }

    /// One seed per run, drawn from the master generator.
    fn seeds(&self) -> Vec<u64> {
        let mut master = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        (0..self.simulations.get()).map(|_| master.gen()).collect()
    }

    fn run_one(
        &self,
        engine: &MiningEngine,
        index: usize,
        seed: u64,
    ) -> Result<SimulationOutput, SimulationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let adversaries =
            endowment::assign(&self.shares, &self.params, &mut rng)?;

        Simulation { index, adversaries, rewind: self.rewind }
            .run(engine, &mut rng)
    }

    fn finish(
        &self,
        runs: Vec<SimulationOutput>,
        started: SystemTime,
        clock: Instant,
        cancelled: bool,
    ) -> Result<BatchResult, SimulationError> {
        let timing = BatchTiming {
            started,
            finished: SystemTime::now(),
            elapsed: clock.elapsed(),
        };
        info!("end of simulation batch");

        let summary = Summary::new(&runs, &self.params)
            .ok_or(SimulationError::Cancelled)?;

        Ok(BatchResult {
            runs,
            summary,
            timing,
            rewind: self.rewind,
            cancelled,
        })
    }
}

/// One cycle of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Round {
    pub cycle: usize,
    /// Distance and catch-up probability before the cycle was mined.
    pub observation: Observation,
    pub outcome: RoundOutcome,
}

/// A single run of the race, from fresh endowments to a 6-block lead.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub index: usize,
    pub adversaries: Vec<Adversary>,
    pub rewind: Option<Rewind>,
}

/// Contains the output data from a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationOutput {
    pub index: usize,
    pub rewind: Option<Rewind>,
    /// Mined cycles, in order. Rewind cycles are not included.
    pub rounds: Vec<Round>,
    /// Terminal observation, made before a cycle which was never mined.
    pub final_observation: Observation,
    /// `None` if the lead never was exactly 2, which happens when the run
    /// starts with a deeper rewind.
    pub two_block: Option<Milestone>,
    pub six_block: Milestone,
    pub adversaries: Vec<AdversarySnapshot>,
    pub duration: Duration,
}

impl Simulation {
    /// Executes the run. Rewind blocks occupy the first cycles, so the first
    /// mined cycle is numbered after them.
    pub fn run<R: Rng + ?Sized>(
        self,
        engine: &MiningEngine,
        rng: &mut R,
    ) -> Result<SimulationOutput, SimulationError> {
        let Simulation { index, mut adversaries, rewind } = self;

        let start = Instant::now();
        info!("running simulation {}", index);

        let mut cycle = 0;
        if let Some(rewind) = rewind {
            cycle = apply_rewind(&mut adversaries, rewind)?;
        }

        let mut tracker = DistanceTracker::new();
        let mut rounds = vec![];
        let (six_block, final_observation) = loop {
            let observation = tracker.observe(&adversaries, cycle)?;
            if let Some(six_block) = tracker.six_block() {
                break (six_block, observation);
            }

            let outcome = engine.mine(&mut adversaries, cycle, rng);
            for adversary in adversaries.iter() {
                debug!(
                    "{} already mined {} blocks",
                    adversary.id, adversary.total_blocks_mined
                );
            }

            rounds.push(Round { cycle, observation, outcome });
            cycle += 1;
        };
        info!("end of simulation {} with a 6-block lead", index);

        Ok(SimulationOutput {
            index,
            rewind,
            rounds,
            final_observation,
            two_block: tracker.two_block(),
            six_block,
            adversaries: adversaries
                .into_iter()
                .map(Adversary::snapshot)
                .collect(),
            duration: start.elapsed(),
        })
    }
}

/// Appends the rewind blocks and returns the number of cycles they occupy.
fn apply_rewind(
    adversaries: &mut [Adversary],
    rewind: Rewind,
) -> Result<usize, SimulationError> {
    let adversary = adversaries
        .get_mut(rewind.adversary.0)
        .ok_or(SimulationError::UnknownAdversary(rewind.adversary))?;

    for b in 0..rewind.blocks {
        adversary.chain.push(Block {
            hash: BlockHash::Rewind(b),
            cycle: b,
            validation: None,
        });
        adversary.total_blocks_mined += 1;
        info!("cycle {:03}: set up rewind block for {}", b, adversary.id);
    }

    Ok(rewind.blocks)
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant, SystemTime},
    };

    use rand::{rngs::StdRng, SeedableRng};

    use super::{
        CancelToken, Rewind, Simulation, SimulationError, SimulationGroup,
    };
    use crate::{
        adversary::BlockHash, config::ChainParams, endowment,
        mining::MiningEngine,
    };

    fn single_run(
        hash: Vec<f64>,
        stake: Option<Vec<f64>>,
        rewind: Option<Rewind>,
        seed: u64,
    ) -> super::SimulationOutput {
        let params = ChainParams::default();
        let shares = endowment::Shares { hash, stake };
        let engine = MiningEngine::new(&params, shares.staking()).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let adversaries =
            endowment::assign(&shares, &params, &mut rng).unwrap();

        Simulation { index: 0, adversaries, rewind }
            .run(&engine, &mut rng)
            .unwrap()
    }

    #[test]
    fn run_ends_with_six_block_lead() {
        let output = single_run(vec![90.0, 10.0], None, None, 1);

        let heights: Vec<_> =
            output.adversaries.iter().map(|a| a.chain.len()).collect();
        let (max, min) =
            (heights.iter().max().unwrap(), heights.iter().min().unwrap());
        assert_eq!(max - min, 6);
        assert_eq!(output.final_observation.distance, 6);
        assert!(output.final_observation.terminal);
        assert_eq!(output.six_block.cycles, output.rounds.len() + 1);
        assert!(output.rounds.iter().all(|r| r.observation.distance < 6));
        for (i, round) in output.rounds.iter().enumerate() {
            assert_eq!(round.cycle, i);
        }
    }

    #[test]
    fn hybrid_run_reaches_both_milestones_in_order() {
        let output = single_run(
            vec![50.0, 50.0],
            Some(vec![50.0, 50.0]),
            None,
            2,
        );

        let two = output.two_block.unwrap();
        assert!(two.cycles <= output.six_block.cycles);
        for round in output.rounds.iter() {
            assert!(round.outcome.committee_size.is_some());
            let confirmed = round.outcome.pos_winners.as_ref().unwrap();
            assert!(!confirmed.is_empty());
            assert!(confirmed
                .iter()
                .all(|id| round.outcome.pow_winners.contains(id)));
        }
        for adversary in output.adversaries.iter() {
            assert_eq!(
                adversary.validated_blocks,
                adversary.chain.len() as u64
            );
            assert_eq!(
                adversary.total_blocks_mined,
                adversary.chain.len() as u64
            );
        }
    }

    #[test]
    fn rewind_blocks_give_a_head_start() {
        let rewind = Rewind { blocks: 2, adversary: 0.into() };
        let output = single_run(vec![50.0, 50.0], None, Some(rewind), 3);

        let first = &output.rounds[0];
        assert_eq!(first.cycle, 2);
        assert!(first.observation.distance >= 2);
        assert_eq!(first.observation.leader.get(), 0);
        assert_eq!(output.two_block.unwrap().cycles, 3);

        let chain = &output.adversaries[0].chain;
        assert_eq!(chain[0].hash, BlockHash::Rewind(0));
        assert_eq!(chain[1].hash, BlockHash::Rewind(1));
    }

    #[test]
    fn full_rewind_ends_immediately() {
        let rewind = Rewind { blocks: 6, adversary: 1.into() };
        let output = single_run(vec![50.0, 50.0], None, Some(rewind), 4);

        assert!(output.rounds.is_empty());
        assert_eq!(output.six_block.cycles, 7);
        assert_eq!(output.six_block.leader.get(), 1);
        assert!(output.two_block.is_none());
    }

    #[test]
    fn rewind_for_missing_adversary_fails() {
        let params = ChainParams::default();
        let engine = MiningEngine::new(&params, false).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let rewind = Rewind { blocks: 1, adversary: 5.into() };

        let simulation =
            Simulation { index: 0, adversaries: vec![], rewind: Some(rewind) };
        let result = simulation.run(&engine, &mut rng);
        assert!(matches!(result, Err(SimulationError::UnknownAdversary(_))));
    }

    #[test]
    fn lopsided_batch_always_terminates() {
        let batch = SimulationGroup::builder()
            .hash_shares([90.0, 10.0])
            .simulations(100)
            .seed(90)
            .build()
            .unwrap();

        let result = batch.run_all().unwrap();
        assert_eq!(result.runs.len(), 100);
        assert!(!result.cancelled);
        for run in result.runs.iter() {
            assert!(run.six_block.cycles >= 6);
        }
    }

    #[test]
    fn seeded_batches_are_reproducible() {
        let build = || {
            SimulationGroup::builder()
                .hash_shares([60.0, 40.0])
                .stake_shares([30.0, 70.0])
                .simulations(5)
                .seed(1234)
                .build()
                .unwrap()
        };

        let a = build().run_all().unwrap();
        let b = build().run_all().unwrap();
        for (x, y) in a.runs.iter().zip(b.runs.iter()) {
            assert_eq!(x.rounds, y.rounds);
            assert_eq!(x.six_block, y.six_block);
            assert_eq!(x.two_block, y.two_block);
        }
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn parallel_batch_matches_sequential() {
        let batch = SimulationGroup::builder()
            .hash_shares([70.0, 20.0, 10.0])
            .simulations(8)
            .seed(77)
            .build()
            .unwrap();

        let sequential = batch.run_all().unwrap();
        let parallel = batch.run_all_parallel().unwrap();
        for (x, y) in sequential.runs.iter().zip(parallel.runs.iter()) {
            assert_eq!(x.index, y.index);
            assert_eq!(x.rounds, y.rounds);
            assert_eq!(x.six_block, y.six_block);
        }
        assert_eq!(
            sequential.summary.mean_cycles_to_six_block,
            parallel.summary.mean_cycles_to_six_block
        );
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn cancelled_parallel_batch_reports_cancellation() {
        let batch = SimulationGroup::builder()
            .hash_shares([50.0, 50.0])
            .simulations(4)
            .seed(6)
            .build()
            .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            batch.run_all_parallel_until(&cancel),
            Err(SimulationError::Cancelled)
        ));
    }

    #[test]
    fn partial_batch_is_summarized() {
        let batch = SimulationGroup::builder()
            .hash_shares([50.0, 50.0])
            .simulations(3)
            .seed(12)
            .build()
            .unwrap();
        let full = batch.run_all().unwrap();

        let partial = batch
            .finish(
                full.runs[..2].to_vec(),
                SystemTime::now(),
                Instant::now(),
                true,
            )
            .unwrap();
        assert!(partial.cancelled);
        assert_eq!(partial.summary.total, 2);
        let wins: usize =
            partial.summary.adversaries.iter().map(|a| a.wins).sum();
        assert_eq!(wins, 2);
    }

    #[test]
    fn cancelling_from_another_thread_stops_the_batch() {
        let batch = SimulationGroup::builder()
            .hash_shares([50.0, 50.0])
            .simulations(2_000)
            .seed(21)
            .build()
            .unwrap();

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            trigger.cancel();
        });

        let outcome = batch.run_all_until(&cancel);
        handle.join().unwrap();
        match outcome {
            Ok(result) if result.cancelled => {
                assert!(result.runs.len() < 2_000);
                assert_eq!(result.summary.total, result.runs.len());
            }
            Ok(result) => assert_eq!(result.runs.len(), 2_000),
            Err(error) => {
                assert!(matches!(error, SimulationError::Cancelled))
            }
        }
    }

    #[test]
    fn cancelled_batch_stops_between_runs() {
        let batch = SimulationGroup::builder()
            .hash_shares([50.0, 50.0])
            .simulations(10)
            .seed(5)
            .build()
            .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            batch.run_all_until(&cancel),
            Err(SimulationError::Cancelled)
        ));
    }
}
