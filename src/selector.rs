//! Coin selection for auto-fusion passes.
//!
//! Every selector mode reduces to a single per-coin inclusion fraction
//! against the current eligible set; each coin is then picked
//! independently with that probability. Randomized picks keep round
//! compositions from being linkable across repeats.

use rand::Rng;

use crate::backend::{Coin, CoinSnapshot};
use crate::settings::CoinSelector;

/// Widens the target so a typical pick still lands near it.
pub const COIN_FRACTION_FUDGE_FACTOR: f64 = 10.0;

/// Per-coin inclusion fraction for a selector against the eligible sum.
/// Always in [0, 1].
pub fn selection_fraction(selector: CoinSelector, sum_value: u64) -> f64 {
    let fraction = match selector {
        CoinSelector::Size(sats) => {
            if sum_value == 0 {
                1.0
            } else {
                COIN_FRACTION_FUDGE_FACTOR * sats as f64 / sum_value as f64
            }
        }
        CoinSelector::Count(count) => COIN_FRACTION_FUDGE_FACTOR / count.max(1) as f64,
        CoinSelector::Fraction(fraction) => fraction,
    };
    fraction.clamp(0.0, 1.0)
}

/// Pick coins for one round. May come up empty; callers treat that as
/// nothing to fuse right now.
pub fn pick_coins(snapshot: &CoinSnapshot, selector: CoinSelector) -> Vec<Coin> {
    let fraction = selection_fraction(selector, snapshot.sum_value);
    let mut rng = rand::thread_rng();
    snapshot
        .eligible
        .iter()
        .filter(|_| rng.gen::<f64>() < fraction)
        .cloned()
        .collect()
}
