use crate::types::{CaseBundle, MatchedSeries, Selection, Series};
use log::info;

/// Label fragments marking a re-acquired series
const REPEAT_MARKERS: [&str; 2] = ["repeat", "redo"];

/// Binds every role that has match criteria to at most one series
///
/// Roles without criteria stay [`Selection::Pending`]; roles whose criteria
/// match nothing become [`Selection::NoMatch`].
pub fn match_roles(catalog: &[Series], bundle: &mut CaseBundle) {
    let names = bundle.names().to_vec();
    for name in names {
        let Some(record) = bundle.get_mut(&name) else {
            continue;
        };
        let Some(criteria) = &record.spec.criteria else {
            continue;
        };

        info!("FINDING SERIES: {}", name);
        let candidates: Vec<&Series> = catalog
            .iter()
            .filter(|s| criteria.matches(&s.label))
            .collect();
        for (number, series) in candidates.iter().enumerate() {
            info!("- Matched series: {} ({})", series.label, number + 1);
        }

        record.selection = match select_keeper(&candidates) {
            Some(keeper) => {
                info!("- Keeping series: {}", keeper.label);
                Selection::Matched(MatchedSeries::from(keeper))
            }
            None => {
                info!("- No matching series found!");
                Selection::NoMatch
            }
        };
    }
}

/// Picks one series out of the candidates matching a role
///
/// 1. A single candidate wins outright.
/// 2. If any candidate is labelled as a repeat/redo, only those stay in the running.
/// 3. Starting from the first remaining candidate, a later one replaces the
///    keeper when it has strictly more images, or the same number of images and
///    a strictly later acquisition time. A candidate is not compared when
///    either image count is unknown, and times that do not parse as numbers
///    never win.
pub fn select_keeper<'a>(candidates: &[&'a Series]) -> Option<&'a Series> {
    match candidates {
        [] => return None,
        [only] => return Some(*only),
        _ => {}
    }

    let repeats: Vec<&Series> = candidates
        .iter()
        .copied()
        .filter(|s| is_repeat(&s.label))
        .collect();
    let pool = if repeats.is_empty() {
        candidates.to_vec()
    } else {
        repeats
    };

    let mut keeper = pool[0];
    for &candidate in &pool[1..] {
        if replaces(candidate, keeper) {
            keeper = candidate;
        }
    }
    Some(keeper)
}

fn is_repeat(label: &str) -> bool {
    let lower = label.to_lowercase();
    REPEAT_MARKERS.iter().any(|m| lower.contains(m))
}

fn replaces(candidate: &Series, keeper: &Series) -> bool {
    let (Some(count), Some(keeper_count)) = (candidate.image_count(), keeper.image_count()) else {
        return false;
    };
    if count != keeper_count {
        return count > keeper_count;
    }
    match (
        candidate.header.acquisition_time_value(),
        keeper.header.acquisition_time_value(),
    ) {
        (Some(time), Some(keeper_time)) => time > keeper_time,
        _ => false,
    }
}
