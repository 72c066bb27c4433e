use crate::networking::endpoint::Endpoint;
use crate::storage::location_registry::ChunkSource;
use std::collections::HashMap;

///
/// Assigns every chunk that has at least one advertiser to exactly one
/// source endpoint. Pure function of the registry snapshot: no I/O, no
/// state, deterministic.
///
/// For each chunk index the candidates are sorted by declared rate,
/// descending and stable, and the first candidate with the fewest chunks
/// assigned so far wins. The strict `<` comparison keeps rate priority on
/// load ties, so a faster source is only passed over when it is genuinely
/// busier than a slower one.
///
/// Chunks with no advertisers are omitted; no endpoint appears in the result
/// with an empty list.
///
pub fn assign_sources(snapshot: &[Vec<ChunkSource>]) -> HashMap<Endpoint, Vec<u32>> {
    let mut assignment: HashMap<Endpoint, Vec<u32>> = HashMap::new();

    for (chunk_index, candidates) in snapshot.iter().enumerate() {
        if candidates.is_empty() {
            continue;
        }

        let mut by_rate = candidates.clone();
        by_rate.sort_by(|a, b| b.declared_rate.cmp(&a.declared_rate));

        let assigned_count =
            |assignment: &HashMap<Endpoint, Vec<u32>>, endpoint: &Endpoint| -> usize {
                assignment.get(endpoint).map_or(0, Vec::len)
            };

        let mut best = &by_rate[0];
        let mut min_load = assigned_count(&assignment, &best.endpoint);
        for candidate in &by_rate {
            let load = assigned_count(&assignment, &candidate.endpoint);
            if load < min_load {
                best = candidate;
                min_load = load;
            }
        }

        assignment
            .entry(best.endpoint.clone())
            .or_default()
            .push(chunk_index as u32);
    }

    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(port: u16, declared_rate: usize) -> ChunkSource {
        ChunkSource {
            endpoint: Endpoint::new("127.0.0.1", port),
            declared_rate,
        }
    }

    #[test]
    fn test_fastest_source_wins_a_single_chunk() {
        let snapshot = vec![vec![source(8001, 10), source(8002, 100)]];
        let assignment = assign_sources(&snapshot);

        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8002)], vec![0]);
    }

    #[test]
    fn test_equal_rates_split_the_load() {
        let candidates = vec![source(8001, 50), source(8002, 50)];
        let snapshot = vec![candidates.clone(), candidates];
        let assignment = assign_sources(&snapshot);

        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8001)], vec![0]);
        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8002)], vec![1]);
    }

    #[test]
    fn test_four_chunks_at_equal_rates_split_two_and_two() {
        let candidates = vec![source(8001, 50), source(8002, 50)];
        let snapshot = vec![candidates.clone(); 4];
        let assignment = assign_sources(&snapshot);

        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8001)].len(), 2);
        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8002)].len(), 2);
    }

    #[test]
    fn test_rate_priority_breaks_load_ties_only() {
        // The faster source wins whenever loads tie; a strictly lighter
        // load wins otherwise, even at a lower rate. Over four chunks the
        // two sources alternate.
        let candidates = vec![source(8001, 100), source(8002, 10)];
        let snapshot = vec![candidates.clone(); 4];
        let assignment = assign_sources(&snapshot);

        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8001)], vec![0, 2]);
        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8002)], vec![1, 3]);
    }

    #[test]
    fn test_chunks_without_candidates_are_omitted() {
        let snapshot = vec![vec![], vec![source(8001, 10)], vec![]];
        let assignment = assign_sources(&snapshot);

        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment[&Endpoint::new("127.0.0.1", 8001)], vec![1]);
    }

    #[test]
    fn test_empty_snapshot_yields_empty_assignment() {
        assert!(assign_sources(&[]).is_empty());
        assert!(assign_sources(&[vec![], vec![]]).is_empty());
    }

    #[test]
    fn test_deterministic_for_a_fixed_snapshot() {
        let snapshot = vec![
            vec![source(8001, 50), source(8002, 50), source(8003, 70)],
            vec![source(8002, 50), source(8001, 50)],
            vec![source(8003, 70), source(8001, 50)],
        ];
        let first = assign_sources(&snapshot);
        let second = assign_sources(&snapshot);
        assert_eq!(first, second);
    }
}
