//! Reciprocal Rank Fusion (§4.3 step 4, trace/telemetry).

use std::collections::HashMap;

/// One hit in a single ranked sub-search result list.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub file: String,
    pub score: f64,
}

/// One list's contribution to a file's fused score.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub source: String,
    pub weight: f64,
    pub rank: usize,
    pub rrf_term: f64,
}

#[derive(Debug, Clone)]
pub struct FusionEntry {
    pub total_score: f64,
    pub top_rank: usize,
    pub top_rank_bonus: f64,
    pub max_source_score: f64,
    pub contributions: Vec<Contribution>,
}

/// Pure RRF scoring function, exposed for offline analysis (§4.3 "Trace and
/// telemetry"). `descriptors[i]` labels `lists[i]` (e.g. `"lex"`, `"vec"`);
/// `weights[i]` is that list's multiplier (the caller passes 2.0 for the
/// first sub-query, 1.0 for the rest, per §4.3 step 4).
pub fn build_rrf_trace(
    lists: &[Vec<RankedHit>],
    weights: &[f64],
    descriptors: &[&str],
    k: f64,
) -> HashMap<String, FusionEntry> {
    let mut trace: HashMap<String, FusionEntry> = HashMap::new();

    for (source_idx, list) in lists.iter().enumerate() {
        let weight = weights.get(source_idx).copied().unwrap_or(1.0);
        let source = descriptors.get(source_idx).copied().unwrap_or("unknown").to_string();

        for (i, hit) in list.iter().enumerate() {
            let rank = i + 1;
            let rrf_term = weight / (k + rank as f64);

            let entry = trace.entry(hit.file.clone()).or_insert_with(|| FusionEntry {
                total_score: 0.0,
                top_rank: usize::MAX,
                top_rank_bonus: 0.0,
                max_source_score: f64::MIN,
                contributions: Vec::new(),
            });

            entry.total_score += rrf_term;
            entry.top_rank = entry.top_rank.min(rank);
            entry.max_source_score = entry.max_source_score.max(hit.score);
            entry.contributions.push(Contribution {
                source,
                weight,
                rank,
                rrf_term,
            });
        }
    }

    for entry in trace.values_mut() {
        entry.top_rank_bonus = top_rank_bonus(entry.top_rank);
        entry.total_score += entry.top_rank_bonus;
    }

    trace
}

fn top_rank_bonus(top_rank: usize) -> f64 {
    match top_rank {
        1 => 0.05,
        2 | 3 => 0.02,
        _ => 0.0,
    }
}

/// Fuse ranked lists into one list sorted by fused score descending, ties
/// broken by the maximum per-list score (§4.3 step 4 tie-break rule).
pub fn rrf_fuse(lists: &[Vec<RankedHit>], weights: &[f64], descriptors: &[&str], k: f64) -> Vec<(String, f64)> {
    let trace = build_rrf_trace(lists, weights, descriptors, k);
    let mut results: Vec<(String, f64, f64)> = trace
        .into_iter()
        .map(|(file, entry)| (file, entry.total_score, entry.max_source_score))
        .collect();

    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
    });

    results.into_iter().map(|(file, score, _)| (file, score)).collect()
}
