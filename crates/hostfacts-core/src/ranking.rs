//! Choosing among competing resolutions of the same fact

use hostfacts_api::{FactLookup, FactValue};
use tracing::debug;

use crate::Resolution;

/// Indices of the suitable resolutions, heaviest first
///
/// Resolutions of equal weight keep their original order.
pub fn rank_suitable(resolutions: &[Resolution], lookup: &dyn FactLookup) -> Vec<usize> {
    let mut ranked: Vec<usize> = resolutions
        .iter()
        .enumerate()
        .filter(|(_, r)| r.suitable(lookup))
        .map(|(i, _)| i)
        .collect();
    ranked.sort_by_key(|&i| std::cmp::Reverse(resolutions[i].weight()));
    ranked
}

/// The heaviest suitable resolution, if any
pub fn best_suitable<'a>(
    resolutions: &'a mut [Resolution],
    lookup: &dyn FactLookup,
) -> Option<&'a mut Resolution> {
    let best = rank_suitable(resolutions, lookup).first().copied()?;
    resolutions.get_mut(best)
}

/// Value of the first suitable resolution, by weight, that has one
pub fn resolve_ranked(
    resolutions: &mut [Resolution],
    lookup: &dyn FactLookup,
) -> Option<FactValue> {
    for index in rank_suitable(resolutions, lookup) {
        let resolution = &mut resolutions[index];
        if let Some(value) = resolution.value() {
            return Some(value);
        }
        debug!(resolution = %resolution.name(), "No value, trying next resolution");
    }
    None
}
