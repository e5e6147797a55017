/*!
Simulator for chain reorganization races between adversaries mining competing
chains.

Each adversary is endowed with a share of a discrete hash space and,
optionally, a share of a pool of staked tickets. Every cycle a hash is drawn;
its owners mine a block, which in hybrid PoW/PoS mode must also be confirmed by
a majority of a randomly drawn ticket committee. A run ends once the longest
chain is 6 blocks ahead of the shortest, and a batch of runs is summarized by
win counts, block counts and the analytic probability of catching up.

```
use invalidation_game::prelude::*;

let batch = SimulationBuilder::new()
    .hash_shares([51.0, 49.0])
    .stake_shares([40.0, 60.0])
    .simulations(2)
    .build()
    .unwrap();

let result = batch.run_all().unwrap();
println!("{}", ResultsTable::new(&result.summary, Format::PrettyPrint));
```
*/

pub mod adversary;
pub mod config;
pub mod distance;
pub mod endowment;
pub mod mining;
pub mod prelude;
pub mod probability;
pub mod results;
pub mod simulation;
