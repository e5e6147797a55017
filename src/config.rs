/*!
Chain parameters shared by every simulation in a batch

The parameters describe the size of the abstract hash space, the size of the
PoS ticket pool, and the historical number of blocks which were confirmed by
5, 4 and 3 votes. They can be stored in a YAML file:

```yaml
hash_space: 10000
ticket_pool:
  average_size: 40960
  blocks_with_5_votes: 401716
  blocks_with_4_votes: 22561
  blocks_with_3_votes: 5617
```
*/

use std::{fs, io, path::Path};

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Largest committee which can be drawn to confirm a block.
pub const MAX_COMMITTEE_SIZE: usize = 5;

/// Sizing parameters for the hash space and the ticket pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Number of abstract hash values a block can be mined with. Must be
    /// large enough for two-decimal percentages to map to whole hash counts.
    #[serde(default = "default_hash_space")]
    pub hash_space: u32,
    #[serde(default)]
    pub ticket_pool: TicketPoolParams,
}

/// Ticket pool size and historical committee sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPoolParams {
    pub average_size: u32,
    #[serde(flatten)]
    pub votes: VoteHistory,
}

/// Observed number of blocks which were confirmed by 5, 4 and 3 votes.
/// Normalized into the probability of drawing each committee size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteHistory {
    pub blocks_with_5_votes: u64,
    pub blocks_with_4_votes: u64,
    pub blocks_with_3_votes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not access configuration file")]
    Io(#[from] io::Error),
    #[error("malformed configuration file")]
    Yaml(#[from] serde_yaml::Error),
    #[error("hash space must contain at least one hash")]
    EmptyHashSpace,
    #[error("ticket pool of size {0} is smaller than a full committee")]
    TicketPoolTooSmall(u32),
    #[error("vote history contains no blocks")]
    EmptyVoteHistory,
}

fn default_hash_space() -> u32 {
    10_000
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            hash_space: default_hash_space(),
            ticket_pool: TicketPoolParams::default(),
        }
    }
}

impl Default for TicketPoolParams {
    fn default() -> Self {
        Self { average_size: 40_960, votes: VoteHistory::default() }
    }
}

impl Default for VoteHistory {
    /// Counts taken from the Decred chain between 2016-02-08 and 2020-02-08.
    fn default() -> Self {
        Self {
            blocks_with_5_votes: 401_716,
            blocks_with_4_votes: 22_561,
            blocks_with_3_votes: 5_617,
        }
    }
}

impl VoteHistory {
    /// Committee sizes paired with their observed block counts, largest
    /// committee first.
    pub fn weights(&self) -> [(usize, u64); 3] {
        [
            (5, self.blocks_with_5_votes),
            (4, self.blocks_with_4_votes),
            (3, self.blocks_with_3_votes),
        ]
    }

    pub fn total(&self) -> u64 {
        self.weights().iter().map(|(_, count)| count).sum()
    }

    /// Smallest committee size with any observed blocks.
    pub fn smallest_committee(&self) -> Option<usize> {
        self.weights()
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(size, _)| *size)
            .min()
    }

    /// Fewest tickets which can ever form a majority of a committee.
    pub fn majority_threshold(&self) -> usize {
        self.smallest_committee().unwrap_or(MAX_COMMITTEE_SIZE) / 2 + 1
    }

    /// Proportion of historical blocks confirmed by a committee of `size`.
    pub fn proportion(&self, size: usize) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }

        self.weights()
            .iter()
            .find(|(k, _)| *k == size)
            .map(|(_, count)| *count as f64 / total as f64)
            .unwrap_or_default()
    }
}

impl ChainParams {
    /// Checks that simulations can be run with these parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_space == 0 {
            return Err(ConfigError::EmptyHashSpace);
        }
        if (self.ticket_pool.average_size as usize) < MAX_COMMITTEE_SIZE {
            return Err(ConfigError::TicketPoolTooSmall(
                self.ticket_pool.average_size,
            ));
        }
        if self.ticket_pool.votes.total() == 0 {
            return Err(ConfigError::EmptyVoteHistory);
        }

        Ok(())
    }

    /// Reads and validates parameters from the YAML file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        let params: Self = serde_yaml::from_str(&text)?;
        params.validate()?;

        info!("read configuration from {}", path.as_ref().display());
        params.log_debug_info();

        Ok(params)
    }

    /// Writes these parameters to `path` as YAML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), text)?;

        info!("saved configuration to {}", path.as_ref().display());
        Ok(())
    }

    /// Reads parameters from `path`. If the file does not exist, the default
    /// parameters are returned and, when `create` is true, written to `path`.
    pub fn load_or_create<P: AsRef<Path>>(
        path: P,
        create: bool,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let params = Self::default();
        if create {
            params.save(path)?;
        }
        params.log_debug_info();

        Ok(params)
    }

    fn log_debug_info(&self) {
        let votes = &self.ticket_pool.votes;
        debug!("block hash space: {}", self.hash_space);
        debug!("average ticket pool size: {}", self.ticket_pool.average_size);
        for (size, count) in votes.weights() {
            debug!(
                "blocks with {} votes: {} (proportion {:.6})",
                size,
                count,
                votes.proportion(size)
            );
        }
        debug!("total blocks with votes: {}", votes.total());
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainParams, ConfigError, VoteHistory};

    #[test]
    fn default_params_are_valid() {
        let params = ChainParams::default();

        assert_eq!(params.hash_space, 10_000);
        assert_eq!(params.ticket_pool.average_size, 40_960);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn vote_proportions_sum_to_one() {
        let votes = VoteHistory::default();
        let sum: f64 = [5, 4, 3].iter().map(|&k| votes.proportion(k)).sum();

        assert!((sum - 1.0).abs() < 1e-12);
        assert!(votes.proportion(5) > 0.93);
        assert_eq!(votes.proportion(7), 0.0);
    }

    #[test]
    fn majority_follows_smallest_observed_committee() {
        let mut votes = VoteHistory::default();
        assert_eq!(votes.smallest_committee(), Some(3));
        assert_eq!(votes.majority_threshold(), 2);

        votes.blocks_with_3_votes = 0;
        votes.blocks_with_4_votes = 0;
        assert_eq!(votes.smallest_committee(), Some(5));
        assert_eq!(votes.majority_threshold(), 3);
    }

    #[test]
    fn yaml_round_trip_keeps_flat_ticket_pool_layout() {
        let yaml = "hash_space: 100\n\
                    ticket_pool:\n  \
                      average_size: 64\n  \
                      blocks_with_5_votes: 1\n  \
                      blocks_with_4_votes: 2\n  \
                      blocks_with_3_votes: 3\n";
        let params: ChainParams = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(params.hash_space, 100);
        assert_eq!(params.ticket_pool.average_size, 64);
        assert_eq!(params.ticket_pool.votes.blocks_with_3_votes, 3);

        let text = serde_yaml::to_string(&params).unwrap();
        assert!(text.contains("blocks_with_4_votes: 2"));
    }

    #[test]
    fn missing_hash_space_uses_default() {
        let yaml = "ticket_pool:\n  \
                      average_size: 64\n  \
                      blocks_with_5_votes: 1\n  \
                      blocks_with_4_votes: 0\n  \
                      blocks_with_3_votes: 0\n";
        let params: ChainParams = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(params.hash_space, 10_000);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let mut params = ChainParams::default();
        params.hash_space = 0;
        assert!(matches!(params.validate(), Err(ConfigError::EmptyHashSpace)));

        let mut params = ChainParams::default();
        params.ticket_pool.average_size = 4;
        assert!(matches!(
            params.validate(),
            Err(ConfigError::TicketPoolTooSmall(4))
        ));

        let mut params = ChainParams::default();
        params.ticket_pool.votes = VoteHistory {
            blocks_with_5_votes: 0,
            blocks_with_4_votes: 0,
            blocks_with_3_votes: 0,
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::EmptyVoteHistory)
        ));
    }

    #[test]
    fn load_or_create_writes_defaults() {
        let path = std::env::temp_dir().join(format!(
            "invalidation-game-config-{}.yaml",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let created = ChainParams::load_or_create(&path, true).unwrap();
        assert!(path.exists());

        let loaded = ChainParams::load(&path).unwrap();
        assert_eq!(created, loaded);

        std::fs::remove_file(&path).unwrap();
    }
}
