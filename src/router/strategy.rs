//! Rotation Strategies
//!
//! Given the ordered candidate pool and the current position, computes the
//! next candidate to try. Pure ordering logic; selectability is supplied by
//! the caller so this stays trivially testable.
//!
//! KEY_FIRST walks every model of the current key (model-priority order)
//! before moving to the next key. MODEL_FIRST tries every key's model at the
//! current priority rank (wrapping past the current key) before advancing to
//! the next rank. Both wrap over the whole pool, so `None` means nothing is
//! selectable anywhere.

use serde::{Deserialize, Serialize};

use crate::registry::Candidate;

/// Traversal order used to pick the next candidate after exhaustion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Exhaust all models of a key before moving to the next key
    #[default]
    KeyFirst,

    /// Try every key at the current model-priority rank before advancing rank
    ModelFirst,
}

/// Next selectable candidate after `current`, or `None` when the whole pool
/// is unusable. `current` is the (key_id, model_id) pair that was just tried;
/// pass `None` to start from the strategy's first preference.
pub fn next_candidate<'a>(
    candidates: &'a [Candidate],
    current: Option<(&str, &str)>,
    strategy: RotationStrategy,
    is_selectable: &dyn Fn(&Candidate) -> bool,
) -> Option<&'a Candidate> {
    let order = match strategy {
        RotationStrategy::KeyFirst => key_first_order(candidates, current),
        RotationStrategy::ModelFirst => model_first_order(candidates, current),
    };
    order
        .into_iter()
        .map(|i| &candidates[i])
        .find(|c| is_selectable(c))
}

/// Candidate indices grouped by key, preserving pool order
fn key_groups(candidates: &[Candidate]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if candidates[group[0]].key_id == candidate.key_id => group.push(i),
            _ => groups.push(vec![i]),
        }
    }
    groups
}

fn key_first_order(candidates: &[Candidate], current: Option<(&str, &str)>) -> Vec<usize> {
    let natural: Vec<usize> = (0..candidates.len()).collect();
    let Some((cur_key, cur_model)) = current else {
        return natural;
    };

    let groups = key_groups(candidates);
    let Some(gi) = groups
        .iter()
        .position(|g| candidates[g[0]].key_id == cur_key)
    else {
        return natural;
    };
    let group = &groups[gi];
    let Some(mi) = group
        .iter()
        .position(|&i| candidates[i].model_id == cur_model)
    else {
        return natural;
    };

    let mut order = Vec::with_capacity(candidates.len());
    // Remaining models of the current key, then later keys, then earlier
    // keys (wrap), then the current key again from the top with the current
    // pair last.
    order.extend_from_slice(&group[mi + 1..]);
    for g in &groups[gi + 1..] {
        order.extend_from_slice(g);
    }
    for g in &groups[..gi] {
        order.extend_from_slice(g);
    }
    order.extend_from_slice(&group[..mi]);
    order.push(group[mi]);
    order
}

fn model_first_order(candidates: &[Candidate], current: Option<(&str, &str)>) -> Vec<usize> {
    let mut ranks: Vec<i32> = candidates.iter().map(|c| c.model_priority).collect();
    ranks.sort_unstable();
    ranks.dedup();

    let members = |rank: i32| -> Vec<usize> {
        (0..candidates.len())
            .filter(|&i| candidates[i].model_priority == rank)
            .collect()
    };

    let cur = current.and_then(|(k, m)| candidates.iter().position(|c| c.is_pair(k, m)));
    let Some(cur_idx) = cur else {
        // Fresh start: ranks ascending, key order within each rank.
        return ranks.iter().flat_map(|&r| members(r)).collect();
    };

    let cur_rank = candidates[cur_idx].model_priority;
    let rank_members = members(cur_rank);
    let pos = rank_members
        .iter()
        .position(|&i| i == cur_idx)
        .unwrap_or(0);

    let mut order = Vec::with_capacity(candidates.len());
    // Same rank first, wrapping past the current key, then higher ranks,
    // then lower ranks (full wrap), with the current pair tried last.
    order.extend_from_slice(&rank_members[pos + 1..]);
    order.extend_from_slice(&rank_members[..pos]);
    for &r in ranks.iter().filter(|&&r| r > cur_rank) {
        order.extend(members(r));
    }
    for &r in ranks.iter().filter(|&&r| r < cur_rank) {
        order.extend(members(r));
    }
    order.push(cur_idx);
    order
}
