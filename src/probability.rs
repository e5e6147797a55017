//! Analytic probability of a lagging adversary catching up.

/// Probability that an adversary which wins a cycle with probability `q`
/// eventually catches up from `z` blocks behind, following section 11 of
/// Nakamoto's Bitcoin paper.
///
/// Returns `1.0` when `z == 0` or `q >= 0.5`, and `0.0` when `q <= 0.0`
/// and `z > 0`.
pub fn catch_up(q: f64, z: usize) -> f64 {
    if z == 0 || q >= 0.5 {
        return 1.0;
    }
    if q <= 0.0 {
        return 0.0;
    }

    let p = 1.0 - q;
    let ratio = q / p;
    let lambda = z as f64 * ratio;

    let mut sum = 1.0;
    let mut poisson = (-lambda).exp();
    for k in 0..=z {
        if k > 0 {
            poisson *= lambda / k as f64;
        }
        sum -= poisson * (1.0 - ratio.powi((z - k) as i32));
    }

    sum.clamp(0.0, 1.0)
}

/// Probability that an adversary wins a single cycle.
///
/// In pure PoW this is its share of the hash power. With staking, the
/// probability is `(q_hash * q_stake)^(1 - q_stake)`, an empirical model
/// kept for compatibility with earlier results.
pub fn win_probability(hash_share: f64, stake_share: Option<f64>) -> f64 {
    let q_hash = hash_share / 100.0;
    match stake_share {
        None => q_hash,
        Some(stake_share) => {
            let q_stake = stake_share / 100.0;
            (q_hash * q_stake).powf(1.0 - q_stake)
        }
    }
}

/// Catch-up probabilities for `z = 1..=max_z`.
pub fn catch_up_table(q: f64, max_z: usize) -> Vec<(usize, f64)> {
    (1..=max_z).map(|z| (z, catch_up(q, z))).collect()
}
