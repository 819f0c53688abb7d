//! Infinite id-based sources
//!
//! Each source walks a list of ids forever and loads one item per id.
//! Plug the result into `InfiniteBuilder::source`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{PipelineError, Result};

fn check_ids<I>(ids: &[I]) -> Result<()> {
    if ids.is_empty() {
        return Err(PipelineError::invalid("a source needs at least one id"));
    }
    Ok(())
}

/// Load `ids` in the given order, over and over.
pub fn cycle_ids<I, T, F>(ids: Vec<I>, mut loader: F) -> Result<impl Iterator<Item = T>>
where
    F: FnMut(&I) -> T,
{
    check_ids(&ids)?;
    let mut position = 0;
    Ok(std::iter::from_fn(move || {
        let item = loader(&ids[position]);
        position = (position + 1) % ids.len();
        Some(item)
    }))
}

/// Load `ids` in a fresh random order on every pass.
///
/// The sequence of permutations is fully determined by `seed`.
pub fn shuffle_ids<I, T, F>(ids: Vec<I>, mut loader: F, seed: u64) -> Result<impl Iterator<Item = T>>
where
    F: FnMut(&I) -> T,
{
    check_ids(&ids)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..ids.len()).collect();
    let mut position = order.len();

    Ok(std::iter::from_fn(move || {
        if position == order.len() {
            order.shuffle(&mut rng);
            position = 0;
        }
        let item = loader(&ids[order[position]]);
        position += 1;
        Some(item)
    }))
}

/// Load uniformly sampled ids, with replacement.
pub fn sample_ids<I, T, F>(ids: Vec<I>, mut loader: F, seed: u64) -> Result<impl Iterator<Item = T>>
where
    F: FnMut(&I) -> T,
{
    check_ids(&ids)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(std::iter::from_fn(move || {
        let index = rng.random_range(0..ids.len());
        Some(loader(&ids[index]))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cycle_repeats_in_order() {
        let items: Vec<u32> = cycle_ids(vec![1, 2, 3], |id| id * 10)
            .unwrap()
            .take(7)
            .collect();
        assert_eq!(items, vec![10, 20, 30, 10, 20, 30, 10]);
    }

    #[test]
    fn test_shuffle_is_a_permutation_per_pass() {
        let ids: Vec<usize> = (0..10).collect();
        let items: Vec<usize> = shuffle_ids(ids, |id| *id, 42).unwrap().take(30).collect();

        for pass in items.chunks(10) {
            let unique: HashSet<_> = pass.iter().collect();
            assert_eq!(unique.len(), 10);
        }
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let ids: Vec<usize> = (0..20).collect();
        let a: Vec<usize> = shuffle_ids(ids.clone(), |id| *id, 7).unwrap().take(40).collect();
        let b: Vec<usize> = shuffle_ids(ids, |id| *id, 7).unwrap().take(40).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_stays_in_range() {
        let items: Vec<&str> = sample_ids(vec!["a", "b"], |id| *id, 0)
            .unwrap()
            .take(100)
            .collect();
        assert!(items.iter().all(|id| *id == "a" || *id == "b"));
    }

    #[test]
    fn test_empty_ids_rejected() {
        assert!(cycle_ids(Vec::<u8>::new(), |id| *id).is_err());
        assert!(shuffle_ids(Vec::<u8>::new(), |id| *id, 0).is_err());
        assert!(sample_ids(Vec::<u8>::new(), |id| *id, 0).is_err());
    }
}
