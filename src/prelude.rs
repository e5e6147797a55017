/*!
Re-export of common values and datatypes used for running and analyzing
simulations. Must be imported manually.

```
use invalidation_game::prelude::*;
```
*/

use crate::{
    adversary, config, distance, endowment, mining, probability, results,
    simulation,
};

pub use adversary::{AdversaryId, AdversarySnapshot, Block, BlockHash};

pub use config::{ChainParams, ConfigError, TicketPoolParams, VoteHistory};

pub use distance::{Milestone, Observation};

pub use endowment::{EndowmentError, Shares};

pub use mining::RoundOutcome;

pub use probability::{catch_up, catch_up_table, win_probability};

pub use results::{
    AdversarySummary, AttackCost, BatchResult, CatchUpReport, Format,
    ResultsTable, Summary,
};

pub use simulation::{
    CancelToken, Rewind, SimulationBuildError, SimulationBuilder,
    SimulationError, SimulationGroup, SimulationOutput,
};
