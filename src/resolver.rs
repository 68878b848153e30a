use std::collections::{BTreeMap, HashSet};

use crate::models::ResolvedPair;

/// Pair destination tables with source tables.
///
/// Identically named tables come first, in source order. Renamed tables from
/// `mapping` (destination -> source) follow, but only when both ends exist and
/// the destination is not already paired. Destination tables matched by
/// neither rule are left out of the run.
pub fn resolve_pairs(
    destination: &[String],
    source: &[String],
    mapping: &BTreeMap<String, String>,
) -> Vec<ResolvedPair> {
    let dest_set: HashSet<&str> = destination.iter().map(String::as_str).collect();
    let source_set: HashSet<&str> = source.iter().map(String::as_str).collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut pairs = Vec::new();

    for name in source {
        if dest_set.contains(name.as_str()) && seen.insert(name.as_str()) {
            pairs.push(ResolvedPair::new(name, name));
        }
    }

    for (dest, src) in mapping {
        if dest_set.contains(dest.as_str())
            && source_set.contains(src.as_str())
            && seen.insert(dest.as_str())
        {
            pairs.push(ResolvedPair::new(dest, src));
        }
    }

    pairs
}
