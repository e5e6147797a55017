//! Measuring how far ahead the leading chain is, and recording milestones.

use std::cmp::Reverse;

use log::{debug, info};
use serde::Serialize;

use crate::{
    adversary::{Adversary, AdversaryId},
    probability,
};

/// Lead at which the first milestone is recorded.
pub const FIRST_MILESTONE: usize = 2;
/// Lead at which a simulation run ends.
pub const TERMINAL_DISTANCE: usize = 6;

/// Cycle count at which a lead was first reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Milestone {
    /// Number of cycles run, including rewind cycles, when the lead was
    /// reached.
    pub cycles: usize,
    /// Adversary with the most blocks mined at that point. Ties go to the
    /// lowest [`AdversaryId`].
    pub leader: AdversaryId,
    pub leader_blocks: u64,
}

/// Distance between the chains before a cycle is mined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub distance: usize,
    /// Adversary with the longest chain. Ties go to the lowest
    /// [`AdversaryId`].
    pub leader: AdversaryId,
    /// Adversary with the shortest chain. Ties go to the lowest
    /// [`AdversaryId`].
    pub laggard: AdversaryId,
    /// Probability of `laggard` winning a single cycle.
    pub laggard_win_probability: f64,
    /// Probability of `laggard` eventually catching up with `leader`.
    pub catch_up_probability: f64,
    /// True once [`TERMINAL_DISTANCE`] is reached.
    pub terminal: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DistanceError {
    #[error("no adversaries to measure")]
    NoAdversaries,
    #[error("distance {distance} in cycle {cycle} exceeds the terminal lead")]
    Overflow { distance: usize, cycle: usize, heights: Vec<usize> },
}

/// Tracks the lead of the longest chain over the course of one run.
#[derive(Debug, Default, Clone)]
pub struct DistanceTracker {
    two_block: Option<Milestone>,
    six_block: Option<Milestone>,
}

impl DistanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn two_block(&self) -> Option<Milestone> {
        self.two_block
    }

    pub fn six_block(&self) -> Option<Milestone> {
        self.six_block
    }

    /// Measures the chains of `adversaries` before `cycle` (0-based) is
    /// mined and records any milestone reached.
    pub fn observe(
        &mut self,
        adversaries: &[Adversary],
        cycle: usize,
    ) -> Result<Observation, DistanceError> {
        let leader = adversaries
            .iter()
            .min_by_key(|a| (Reverse(a.height()), a.id))
            .ok_or(DistanceError::NoAdversaries)?;
        let laggard = adversaries
            .iter()
            .min_by_key(|a| (a.height(), a.id))
            .ok_or(DistanceError::NoAdversaries)?;

        let distance = leader.height() - laggard.height();
        if distance > TERMINAL_DISTANCE {
            return Err(DistanceError::Overflow {
                distance,
                cycle,
                heights: adversaries.iter().map(|a| a.height()).collect(),
            });
        }

        if distance == FIRST_MILESTONE && self.two_block.is_none() {
            let milestone = Self::milestone(adversaries, cycle);
            info!(
                "2-block lead reached in cycle {:03} (after {} cycles)",
                cycle, milestone.cycles
            );
            self.two_block = Some(milestone);
        }

        let terminal = distance == TERMINAL_DISTANCE;
        if terminal && self.six_block.is_none() {
            let milestone = Self::milestone(adversaries, cycle);
            info!(
                "6-block lead reached in cycle {:03} (after {} cycles)",
                cycle, milestone.cycles
            );
            self.six_block = Some(milestone);
        }

        let q = probability::win_probability(
            laggard.hash_share,
            laggard.stake_share,
        );
        let catch_up_probability = probability::catch_up(q, distance);

        debug!("cycle {:03}: distance before this cycle: {}", cycle, distance);
        if distance == 0 {
            debug!(
                "probability of catching up is {} because all heights are \
                 the same",
                catch_up_probability
            );
        } else {
            debug!(
                "probability of {} catching up to {}: {}",
                laggard.id, leader.id, catch_up_probability
            );
        }

        Ok(Observation {
            distance,
            leader: leader.id,
            laggard: laggard.id,
            laggard_win_probability: q,
            catch_up_probability,
            terminal,
        })
    }

    fn milestone(adversaries: &[Adversary], cycle: usize) -> Milestone {
        // Callers have already checked that `adversaries` is non-empty
        let top = adversaries
            .iter()
            .min_by_key(|a| (Reverse(a.total_blocks_mined), a.id));

        Milestone {
            cycles: cycle + 1,
            leader: top.map(|a| a.id).unwrap_or_default(),
            leader_blocks: top.map(|a| a.total_blocks_mined).unwrap_or(0),
        }
    }
}
