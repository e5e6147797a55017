/*!
Aggregating and presenting the results of a simulation batch

# Examples

Printing the summary table of a batch:

```
use invalidation_game::prelude::*;

let batch = SimulationBuilder::new()
    .hash_shares([70.0, 30.0])
    .simulations(5)
    .seed(7)
    .build()
    .unwrap();

let result = batch.run_all().unwrap();
let table = ResultsTable::new(&result.summary, Format::CSV);

println!("{}", table);
```
*/

use std::{
    fmt::Display,
    time::{Duration, SystemTime},
};

use serde::Serialize;

use crate::{
    adversary::{AdversaryId, AdversarySnapshot},
    config::ChainParams,
    probability,
    simulation::{Rewind, SimulationOutput},
};

/// Floating point precision of results data.
pub const FLOAT_PRECISION_DIGITS: usize = 6;

/// Largest number of blocks behind listed in catch-up reports.
pub const CATCH_UP_REPORT_DEPTH: usize = 6;

/// Wall-clock bounds of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchTiming {
    pub started: SystemTime,
    pub finished: SystemTime,
    pub elapsed: Duration,
}

/// Every run of a batch together with its aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub runs: Vec<SimulationOutput>,
    pub summary: Summary,
    pub timing: BatchTiming,
    pub rewind: Option<Rewind>,
    /// True if the batch was stopped before every run completed.
    pub cancelled: bool,
}

/// Statistics over the completed runs of a batch. All means divide by the
/// number of completed runs unless noted otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub staking: bool,
    /// Mean over the runs which reached a lead of exactly 2. `None` if no
    /// run did.
    pub mean_cycles_to_two_block: Option<f64>,
    /// Number of runs which reached a lead of exactly 2.
    pub two_block_reached: usize,
    pub mean_cycles_to_six_block: f64,
    pub mean_duration: Duration,
    pub adversaries: Vec<AdversarySummary>,
}

/// Per-adversary statistics over the completed runs of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdversarySummary {
    pub id: AdversaryId,
    pub hash_share: f64,
    pub stake_share: Option<f64>,
    /// Mean share of the hash space actually owned, in percent.
    pub realized_hash_share: f64,
    /// Mean share of the ticket pool actually owned, in percent.
    pub realized_stake_share: Option<f64>,
    /// Runs in which this adversary led at the 6-block milestone.
    pub wins: usize,
    pub win_percentage: f64,
    pub mean_total_blocks_mined: f64,
    pub mean_validated_blocks: Option<f64>,
    pub mean_invalidated_blocks: Option<f64>,
}

fn mean<I: IntoIterator<Item = f64>>(values: I, count: usize) -> f64 {
    values.into_iter().sum::<f64>() / count as f64
}

impl Summary {
    /// Aggregates `runs`. Returns `None` if `runs` is empty.
    pub fn new(
        runs: &[SimulationOutput],
        params: &ChainParams,
    ) -> Option<Self> {
        let first = runs.first()?;
        let total = runs.len();
        let staking = first.adversaries.iter().any(|a| a.stake_share.is_some());

        let two_blocks: Vec<_> = runs
            .iter()
            .filter_map(|run| run.two_block)
            .map(|m| m.cycles as f64)
            .collect();
        let two_block_reached = two_blocks.len();
        let mean_cycles_to_two_block = match two_block_reached {
            0 => None,
            n => Some(mean(two_blocks, n)),
        };

        let mean_cycles_to_six_block =
            mean(runs.iter().map(|run| run.six_block.cycles as f64), total);
        let durations = runs.iter().map(|run| run.duration);
        let mean_duration = durations.sum::<Duration>() / total as u32;

        let adversaries = first
            .adversaries
            .iter()
            .enumerate()
            .map(|(i, template)| {
                let states = || runs.iter().map(move |run| &run.adversaries[i]);
                let wins = runs
                    .iter()
                    .filter(|run| run.six_block.leader == template.id)
                    .count();

                let hash_space = params.hash_space as f64;
                let ticket_pool = params.ticket_pool.average_size as f64;
                let staked = |f: fn(&AdversarySnapshot) -> f64| {
                    staking.then(|| mean(states().map(f), total))
                };

                AdversarySummary {
                    id: template.id,
                    hash_share: template.hash_share,
                    stake_share: template.stake_share,
                    realized_hash_share: mean(
                        states().map(|a| {
                            a.owned_hashes as f64 * 100.0 / hash_space
                        }),
                        total,
                    ),
                    realized_stake_share: staked(|a| {
                        a.owned_tickets.unwrap_or(0) as f64
                    })
                    .map(|tickets| tickets * 100.0 / ticket_pool),
                    wins,
                    win_percentage: wins as f64 * 100.0 / total as f64,
                    mean_total_blocks_mined: mean(
                        states().map(|a| a.total_blocks_mined as f64),
                        total,
                    ),
                    mean_validated_blocks: staked(|a| {
                        a.validated_blocks as f64
                    }),
                    mean_invalidated_blocks: staked(|a| {
                        a.invalidated_blocks as f64
                    }),
                }
            })
            .collect();

        Some(Self {
            total,
            staking,
            mean_cycles_to_two_block,
            two_block_reached,
            mean_cycles_to_six_block,
            mean_duration,
            adversaries,
        })
    }

    /// Catch-up probabilities for each adversary which is not expected to
    /// win a majority of cycles.
    pub fn catch_up_reports(&self) -> Vec<CatchUpReport> {
        self.adversaries
            .iter()
            .filter_map(|a| {
                let q =
                    probability::win_probability(a.hash_share, a.stake_share);
                let listed = match self.staking {
                    true => q <= 0.5,
                    false => q < 0.5,
                };

                listed.then(|| CatchUpReport {
                    id: a.id,
                    q,
                    table: probability::catch_up_table(
                        q,
                        CATCH_UP_REPORT_DEPTH,
                    ),
                })
            })
            .collect()
    }

    /// True if every adversary won the same number of runs.
    pub fn is_draw(&self) -> bool {
        let mut wins = self.adversaries.iter().map(|a| a.wins);
        match wins.next() {
            Some(first) => wins.all(|w| w == first),
            None => true,
        }
    }

    /// Block rewards forgone by adversaries which abandon their chains.
    pub fn attack_costs(&self) -> Vec<AttackCost> {
        let draw = self.is_draw();
        let most_wins =
            self.adversaries.iter().map(|a| a.wins).max().unwrap_or(0);

        self.adversaries
            .iter()
            .filter_map(|a| {
                let blocks = a.mean_total_blocks_mined;
                match (draw, blocks > 0.0) {
                    (true, true) => Some(AttackCost::Draw { id: a.id, blocks }),
                    (true, false) => None,
                    (false, true) if a.wins < most_wins => {
                        Some(AttackCost::Forgone {
                            id: a.id,
                            blocks,
                            staking: self.staking,
                        })
                    }
                    (false, true) => None,
                    (false, false) => Some(AttackCost::Nothing { id: a.id }),
                }
            })
            .collect()
    }
}

/// Catch-up probabilities of one adversary, for 1 to
/// [`CATCH_UP_REPORT_DEPTH`] blocks behind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatchUpReport {
    pub id: AdversaryId,
    pub q: f64,
    pub table: Vec<(usize, f64)>,
}

impl Display for CatchUpReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Attacker probability of catching up for {}: \
             (z=number of blocks behind)",
            self.id
        )?;
        for (z, p) in self.table.iter() {
            write!(f, "z={}, p={:.2$}; ", z, p, FLOAT_PRECISION_DIGITS)?;
        }

        Ok(())
    }
}

/// Cost of an attack, measured in the mean number of PoW block rewards
/// mined on a chain which is later abandoned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttackCost {
    /// The adversary won fewer runs than the leader and forgoes its blocks.
    Forgone { id: AdversaryId, blocks: f64, staking: bool },
    /// The adversary never mined a block, so it forgoes nothing.
    Nothing { id: AdversaryId },
    /// Every adversary won equally often; all of them lose their blocks.
    Draw { id: AdversaryId, blocks: f64 },
}

impl Display for AttackCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forgone { id, blocks, staking } => {
                write!(
                    f,
                    "Assuming that {} won't fork the blockchain, the attack \
                     cost {:.2$} PoW block reward, on average",
                    id, blocks, FLOAT_PRECISION_DIGITS
                )?;
                if *staking {
                    write!(
                        f,
                        ", due to PoS invalidation of bad PoW mined blocks"
                    )?;
                }
                write!(f, ".")
            }
            Self::Nothing { id } => write!(
                f,
                "Assuming that {0} won't try to fork the blockchain, {0} \
                 won't forgo any PoW reward because no block was \
                 successfully mined.",
                id
            ),
            Self::Draw { id, blocks } => write!(
                f,
                "{} lost the equivalent of {:.2$} PoW block rewards, on \
                 average",
                id, blocks, FLOAT_PRECISION_DIGITS
            ),
        }
    }
}

/// Describes the appearance of a [`ResultsTable`] table as given by its
/// [`Display`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// Comma-separated, without extra whitespace.
    CSV,
    /// Human-readable.
    #[default]
    PrettyPrint,
}

/// One column of a [`ResultsTable`], stored with its display width.
struct Column {
    title: &'static str,
    cells: Vec<String>,
    width: usize,
}

impl Column {
    fn new<I>(title: &'static str, cells: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let cells: Vec<_> = cells.into_iter().collect();
        let width = cells.iter().map(String::len).fold(title.len(), usize::max);

        Self { title, cells, width }
    }

    /// Writes `text` padded to this column's width. Only the leading column
    /// is left-aligned.
    fn pad(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        text: &str,
        leading: bool,
    ) -> std::fmt::Result {
        match leading {
            true => write!(f, "{:<1$}", text, self.width),
            false => write!(f, " {:>1$}", text, self.width),
        }
    }
}

/// Per-adversary summary table of a batch.
pub struct ResultsTable {
    columns: Vec<Column>,
    format: Format,
}

impl ResultsTable {
    pub fn new(summary: &Summary, format: Format) -> Self {
        let rows = &summary.adversaries;
        let percent = |value: f64| format!("{:.2}%", value);
        let float =
            |value: f64| format!("{:.1$}", value, FLOAT_PRECISION_DIGITS);

        let mut columns = vec![
            Column::new("Adversary", rows.iter().map(|a| a.id.to_string())),
            Column::new(
                "Hashpower",
                rows.iter().map(|a| percent(a.realized_hash_share)),
            ),
        ];
        if summary.staking {
            columns.push(Column::new(
                "Stake",
                rows.iter()
                    .map(|a| percent(a.realized_stake_share.unwrap_or(0.0))),
            ));
        }
        columns.extend([
            Column::new(
                "Simulations Won",
                rows.iter().map(|a| a.wins.to_string()),
            ),
            Column::new(
                "Won %",
                rows.iter().map(|a| format!("{:.4}%", a.win_percentage)),
            ),
            Column::new(
                "Avg Blocks Mined",
                rows.iter().map(|a| float(a.mean_total_blocks_mined)),
            ),
        ]);
        if summary.staking {
            columns.extend([
                Column::new(
                    "Avg Invalidated Blocks",
                    rows.iter().map(|a| {
                        float(a.mean_invalidated_blocks.unwrap_or(0.0))
                    }),
                ),
                Column::new(
                    "Avg Validated Blocks",
                    rows.iter().map(|a| {
                        float(a.mean_validated_blocks.unwrap_or(0.0))
                    }),
                ),
            ]);
        }

        Self { columns, format }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |column| column.cells.len())
    }
}

impl Display for ResultsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.format == Format::CSV {
            let titles: Vec<_> = self.columns.iter().map(|c| c.title).collect();
            write!(f, "{}", titles.join(","))?;

            for row in 0..self.row_count() {
                let cells: Vec<_> = self
                    .columns
                    .iter()
                    .map(|c| c.cells[row].as_str())
                    .collect();
                write!(f, "\n{}", cells.join(","))?;
            }
            return Ok(());
        }

        for (i, column) in self.columns.iter().enumerate() {
            column.pad(f, column.title, i == 0)?;
        }
        writeln!(f)?;
        for (i, column) in self.columns.iter().enumerate() {
            column.pad(f, &"-".repeat(column.width), i == 0)?;
        }

        for row in 0..self.row_count() {
            writeln!(f)?;
            for (i, column) in self.columns.iter().enumerate() {
                column.pad(f, &column.cells[row], i == 0)?;
            }
        }

        Ok(())
    }
}
