use crate::dataset::Dataset;
use crate::error::DataError;
use anyhow::{ensure, Result};
use rand::distr::{weighted::WeightedIndex, Distribution};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// A `Sampler` defines the order in which indices are drawn from a dataset
/// of known size.
///
/// # Method
/// - `iter(epoch)`: returns a lazy sequential or shuffled index sequence for that epoch.
///    - The sampler uses `epoch` together with its base RNG seed to shuffle in a
///      reproducible way across epochs.
/// - `num_samples()`: how many indices every `iter` call yields.
/// - `is_sequential()`: `true` only if `iter` always yields `0, 1, .., num_samples - 1`,
///   which lets [`SamplerStage`] stream its upstream instead of indexing it.
///
/// Implementations must be `Send + Sync` so a sampling stage can be shared
/// across threads.
pub trait Sampler: Send + Sync {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_>;

    fn num_samples(&self) -> usize;

    fn is_sequential(&self) -> bool {
        false
    }
}

impl Sampler for Box<dyn Sampler> {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        (**self).iter(epoch)
    }

    fn num_samples(&self) -> usize {
        (**self).num_samples()
    }

    fn is_sequential(&self) -> bool {
        (**self).is_sequential()
    }
}

#[inline]
fn derive_rng_for_epoch(base_seed: u64, epoch: usize) -> StdRng {
    StdRng::seed_from_u64(base_seed.wrapping_add(epoch as u64))
}

/// ============================================================================
/// Yields indices sequentially in order `(0,1,2,...,dataset_size-1)`.
///
/// # Arguments:
/// - `dataset_size`: Total number of elements in a dataset
///
/// # Examples
/// ```ignore
/// let sampler = SequentialSampler::new(5);
/// let indices: Vec<_> = sampler.iter(0).collect();
/// assert_eq!(indices, vec![0, 1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    dataset_size: usize,
}

impl SequentialSampler {
    pub fn new(dataset_size: usize) -> Self {
        Self { dataset_size }
    }
}

impl Sampler for SequentialSampler {
    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(0..self.dataset_size)
    }

    fn num_samples(&self) -> usize {
        self.dataset_size
    }

    fn is_sequential(&self) -> bool {
        true
    }
}

/// ============================================================================
/// Random uniform sampling over `0..dataset_size`, with optional replacement.
///
/// # Arguments:
/// - `dataset_size`: Total number of elements in a dataset.
/// - `replacement`: If `true`, each draw is independent and indices may repeat;
///                  If `false`, each index can only appear once.
/// - `num_samples`: Number of indices to draw (defaults to `dataset_size` if `None`).
///                  Independent of `replacement`, but without replacement it must
///                  be <= dataset_size.
/// - `base_seed`: Base RNG seed.
///
/// # Seeds
/// For each epoch a new RNG is derived as `base_seed + epoch`: a fresh order every
/// epoch, and the same sequence of orders for the same `base_seed`.
///
/// # Example usage
/// ```ignore
/// // Without replacement
/// let sampler1 = RandomSampler::new(1000, false, None, 42)?;
///
/// // With replacement, drawing 5000 indices
/// let sampler2 = RandomSampler::new(1000, true, Some(5000), 42)?;
/// ```
#[derive(Debug, Clone)]
pub struct RandomSampler {
    dataset_size: usize,
    replacement: bool,
    num_samples: usize,
    base_seed: u64,
}

impl RandomSampler {
    pub fn new(
        dataset_size: usize,
        replacement: bool,
        num_samples: Option<usize>,
        base_seed: u64,
    ) -> Result<Self> {
        let num_samples = num_samples.unwrap_or(dataset_size);
        ensure!(
            num_samples > 0,
            DataError::invalid_argument(format!(
                "num_samples must be a positive integer value, but got num_samples={}",
                num_samples
            ))
        );
        ensure!(
            dataset_size > 0,
            DataError::invalid_argument("cannot draw random samples from an empty dataset")
        );
        if !replacement {
            ensure!(
                num_samples <= dataset_size,
                DataError::invalid_argument(format!(
                    "num_samples ({}) exceeds dataset size ({}) without replacement",
                    num_samples, dataset_size
                ))
            );
        }

        Ok(Self {
            dataset_size,
            replacement,
            num_samples,
            base_seed,
        })
    }

    pub fn replacement(&self) -> bool {
        self.replacement
    }
}

impl Sampler for RandomSampler {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = derive_rng_for_epoch(self.base_seed, epoch);
        if self.replacement {
            Box::new((0..self.num_samples).map(move |_| rng.random_range(0..self.dataset_size)))
        } else {
            let mut indices: Vec<_> = (0..self.dataset_size).collect();
            indices.shuffle(&mut rng);
            indices.truncate(self.num_samples);
            Box::new(indices.into_iter())
        }
    }

    fn num_samples(&self) -> usize {
        self.num_samples
    }
}

/// ============================================================================
/// Samples randomly from a predefined subset of indices, without replacement.
///
/// Each call to `iter(epoch)` returns a new deterministic permutation of the provided
/// indices for that epoch. See `RandomSampler` docs for details.
///
/// # Arguments:
/// - `dataset_size`: Total number of elements in a dataset.
/// - `indices`: The subset of indices to shuffle and sample from. There should be
///              no duplicates and each index should be within bounds (`<dataset_size`).
/// - `base_seed`: Base RNG seed.
#[derive(Debug, Clone)]
pub struct SubsetRandomSampler {
    indices: Vec<usize>,
    base_seed: u64,
}

impl SubsetRandomSampler {
    pub fn new(dataset_size: usize, indices: Vec<usize>, base_seed: u64) -> Result<Self> {
        ensure!(
            !indices.is_empty(),
            DataError::invalid_argument("indices must not be empty")
        );

        let mut seen_indices = HashSet::with_capacity(indices.len());
        for &index in &indices {
            ensure!(
                index < dataset_size,
                DataError::invalid_argument(format!(
                    "index {} out of bounds for dataset of size {}",
                    index, dataset_size
                ))
            );
            ensure!(
                seen_indices.insert(index),
                DataError::invalid_argument(format!(
                    "duplicate index {} found in SubsetRandomSampler",
                    index
                ))
            );
        }
        Ok(Self { indices, base_seed })
    }
}

impl Sampler for SubsetRandomSampler {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = derive_rng_for_epoch(self.base_seed, epoch);
        let mut shuffled = self.indices.clone();
        shuffled.shuffle(&mut rng);
        Box::new(shuffled.into_iter())
    }

    fn num_samples(&self) -> usize {
        self.indices.len()
    }
}

/// ============================================================================
/// Samples indices according to the given weights, with optional replacement.
///
/// # Arguments:
/// - `dataset_size`: Total number of elements in a dataset.
/// - `weights`: Relative weight for each index (need not sum to 1). Length must match `dataset_size`.
/// - `replacement`: If `true`, each draw is independent and indices may repeat;
///                  If `false`, each index can only appear once.
/// - `num_samples`: Number of indices to draw (defaults to `dataset_size` if `None`).
/// - `base_seed`: Base RNG seed. See `RandomSampler` docs for details.
///
/// # Example
/// ```ignore
/// let sampler = WeightedRandomSampler::new(
///     5,                              // dataset_size
///     vec![1.0, 2.0, 0.5, 4.0, 1.5],  // weights
///     false,                          // without replacement
///     Some(3),                        // num_samples
///     42                              // seed
/// )?;
/// ```
#[derive(Debug, Clone)]
pub struct WeightedRandomSampler {
    weights: Vec<f64>,
    distribution: WeightedIndex<f64>,
    replacement: bool,
    num_samples: usize,
    base_seed: u64,
}

impl WeightedRandomSampler {
    pub fn new(
        dataset_size: usize,
        weights: Vec<f64>,
        replacement: bool,
        num_samples: Option<usize>,
        base_seed: u64,
    ) -> Result<Self> {
        ensure!(
            weights.len() == dataset_size,
            DataError::invalid_argument(format!(
                "the length of the weights sequence ({}) does not match the dataset size ({})",
                weights.len(),
                dataset_size
            ))
        );
        ensure!(
            !weights.is_empty(),
            DataError::invalid_argument("the weights sequence must not be empty")
        );
        ensure!(
            weights.iter().all(|&w| w >= 0.0 && w.is_finite()),
            DataError::invalid_argument("all weights must be finite and non-negative")
        );
        ensure!(
            weights.iter().any(|&w| w > 0.0),
            DataError::invalid_argument("all weights are zero, at least one must be positive")
        );

        let num_samples = num_samples.unwrap_or(dataset_size);
        ensure!(
            num_samples > 0,
            DataError::invalid_argument(format!(
                "num_samples must be a positive integer value, but got num_samples={}",
                num_samples
            ))
        );
        if !replacement {
            let positive_count = weights.iter().filter(|&&w| w > 0.0).count();
            ensure!(
                num_samples <= positive_count,
                DataError::invalid_argument(format!(
                    "num_samples ({}) must be <= number of positive-weight indices ({}) when replacement = false",
                    num_samples, positive_count
                ))
            );
        }

        let distribution = WeightedIndex::new(&weights)
            .map_err(|e| DataError::invalid_argument(format!("invalid weights: {e}")))?;

        Ok(Self {
            weights,
            distribution,
            replacement,
            num_samples,
            base_seed,
        })
    }
}

impl Sampler for WeightedRandomSampler {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = derive_rng_for_epoch(self.base_seed, epoch);

        if self.replacement {
            Box::new((0..self.num_samples).map(move |_| self.distribution.sample(&mut rng)))
        } else {
            // `WeightedIndex` only supports independent draws. Without replacement
            // each index gets the key `u^(1/w)` with `u ~ Uniform(0, 1)` and the
            // `num_samples` largest keys win.
            let mut scored_indices: Vec<(usize, f64)> = self
                .weights
                .iter()
                .enumerate()
                .filter(|(_, &weight)| weight > 0.0)
                .map(|(index, &weight)| {
                    let u = rng.random::<f64>();
                    (index, u.powf(1.0 / weight))
                })
                .collect();

            scored_indices.sort_by(|a, b| b.1.total_cmp(&a.1));
            scored_indices.truncate(self.num_samples);
            Box::new(scored_indices.into_iter().map(|(index, _)| index))
        }
    }

    fn num_samples(&self) -> usize {
        self.num_samples
    }
}

/// ============================================================================
/// Declarative choice of sampler, built once the dataset size is known.
///
/// Deserializes from a tagged map, e.g.
/// `{"kind": "random", "replacement": true, "num_samples": 500, "seed": 7}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Every index once, ascending.
    #[default]
    Sequential,
    /// See [`RandomSampler`].
    Random {
        #[serde(default)]
        replacement: bool,
        #[serde(default)]
        num_samples: Option<usize>,
        #[serde(default)]
        seed: u64,
    },
    /// See [`SubsetRandomSampler`].
    SubsetRandom {
        indices: Vec<usize>,
        #[serde(default)]
        seed: u64,
    },
    /// See [`WeightedRandomSampler`].
    Weighted {
        weights: Vec<f64>,
        #[serde(default)]
        replacement: bool,
        #[serde(default)]
        num_samples: Option<usize>,
        #[serde(default)]
        seed: u64,
    },
}

impl SamplingStrategy {
    /// Builds the sampler for a dataset of `dataset_size` elements.
    pub fn build(&self, dataset_size: usize) -> Result<Box<dyn Sampler>> {
        Ok(match self {
            Self::Sequential => Box::new(SequentialSampler::new(dataset_size)),
            Self::Random {
                replacement,
                num_samples,
                seed,
            } => Box::new(RandomSampler::new(
                dataset_size,
                *replacement,
                *num_samples,
                *seed,
            )?),
            Self::SubsetRandom { indices, seed } => Box::new(SubsetRandomSampler::new(
                dataset_size,
                indices.clone(),
                *seed,
            )?),
            Self::Weighted {
                weights,
                replacement,
                num_samples,
                seed,
            } => Box::new(WeightedRandomSampler::new(
                dataset_size,
                weights.clone(),
                *replacement,
                *num_samples,
                *seed,
            )?),
        })
    }
}

/// ============================================================================
/// Re-emits the elements of a dataset of known length in the order chosen by a
/// [`Sampler`].
///
/// The upstream length is required to build the sampler, so constructing the
/// stage over a length-less dataset fails with `InvalidArgument`. The stage's
/// length is the sampler's `num_samples()`.
///
/// Elements are fetched in one of three ways, chosen per pass:
/// - sequential sampler: the upstream is streamed directly;
/// - indexable upstream: each drawn index is read with `get`;
/// - otherwise the upstream is materialized once on the first `next()` of the
///   pass and indexed in memory.
///
/// Every call to `iter()` advances the stage's epoch, so random samplers
/// produce a new (seed-reproducible) order on every pass.
///
/// # Example
/// ```ignore
/// let shuffled = InMemoryDataset::new(records)
///     .sample_with(&SamplingStrategy::Random { replacement: false, num_samples: None, seed: 42 })?;
/// ```
pub struct SamplerStage<D, S = SequentialSampler> {
    upstream: D,
    sampler: S,
    epoch: AtomicUsize,
}

impl<D: Dataset> SamplerStage<D> {
    /// Sequential order over every upstream element.
    pub fn new(upstream: D) -> Result<Self> {
        Self::with_sampler(upstream, |len| Ok(SequentialSampler::new(len)))
    }
}

impl<D: Dataset> SamplerStage<D, Box<dyn Sampler>> {
    pub fn with_strategy(upstream: D, strategy: &SamplingStrategy) -> Result<Self> {
        Self::with_sampler(upstream, |len| strategy.build(len))
    }
}

impl<D: Dataset, S: Sampler> SamplerStage<D, S> {
    /// Builds the sampler from the upstream length with `make_sampler`.
    pub fn with_sampler<F>(upstream: D, make_sampler: F) -> Result<Self>
    where
        F: FnOnce(usize) -> Result<S>,
    {
        let Some(len) = upstream.try_len() else {
            return Err(DataError::invalid_argument(format!(
                "sampling requires a dataset with a known length, but {} has none",
                std::any::type_name::<D>()
            ))
            .into());
        };
        let sampler = make_sampler(len)?;
        Ok(Self {
            upstream,
            sampler,
            epoch: AtomicUsize::new(0),
        })
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    /// Epoch the next pass will use.
    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }
}

impl<D: fmt::Debug, S> fmt::Debug for SamplerStage<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplerStage")
            .field("upstream", &self.upstream)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

enum Access<'a, D>
where
    D: Dataset + 'a,
{
    Streaming(D::Iter<'a>),
    Indexed,
    Buffered(Option<Vec<D::Item>>),
}

/// Iterator over a [`SamplerStage`] pass.
pub struct SamplerIter<'a, D>
where
    D: Dataset + 'a,
{
    upstream: &'a D,
    upstream_len: usize,
    indices: Box<dyn Iterator<Item = usize> + Send + 'a>,
    access: Access<'a, D>,
    done: bool,
}

impl<D> Iterator for SamplerIter<'_, D>
where
    D: Dataset,
    D::Item: Clone,
{
    type Item = Result<D::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.indices.next()?;
        let out_of_bounds = || -> anyhow::Error {
            DataError::IndexOutOfBounds {
                index,
                len: self.upstream_len,
            }
            .into()
        };

        let result = match &mut self.access {
            Access::Streaming(inner) => inner.next().unwrap_or_else(|| Err(out_of_bounds())),
            Access::Indexed => self
                .upstream
                .get(index)
                .and_then(|item| item.ok_or_else(out_of_bounds)),
            Access::Buffered(buffer) => {
                if buffer.is_none() {
                    debug!(len = self.upstream_len, "materializing upstream for sampling");
                    match self.upstream.iter().collect::<Result<Vec<_>>>() {
                        Ok(items) => *buffer = Some(items),
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                buffer
                    .as_deref()
                    .unwrap_or_default()
                    .get(index)
                    .cloned()
                    .ok_or_else(out_of_bounds)
            }
        };
        self.done = result.is_err();
        Some(result)
    }
}

impl<D, S> Dataset for SamplerStage<D, S>
where
    D: Dataset,
    D::Item: Clone,
    S: Sampler,
{
    type Item = D::Item;
    type Iter<'a> = SamplerIter<'a, D>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        let access = if self.sampler.is_sequential() {
            Access::Streaming(self.upstream.iter())
        } else if self.upstream.is_indexable() {
            Access::Indexed
        } else {
            Access::Buffered(None)
        };
        trace!(epoch, num_samples = self.sampler.num_samples(), "starting sampler pass");

        SamplerIter {
            upstream: &self.upstream,
            upstream_len: self.upstream.try_len().unwrap_or_default(),
            indices: self.sampler.iter(epoch),
            access,
            done: false,
        }
    }

    fn try_len(&self) -> Option<usize> {
        Some(self.sampler.num_samples())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetExt, InMemoryDataset, IterableDataset};
    use crate::error::{error_kind, ErrorKind};
    use std::collections::HashSet;

    const TEST_SEED: u64 = 42;
    const TEST_DATASET_SIZE: usize = 100;

    mod sequential_sampler_tests {
        use super::*;

        #[test]
        fn yields_sequential_indices() {
            let sampler = SequentialSampler::new(100);
            let indices: Vec<usize> = sampler.iter(0).collect();
            assert_eq!(indices, (0..100).collect::<Vec<_>>());
            assert!(sampler.is_sequential());
        }

        #[test]
        fn handles_empty_dataset() {
            let sampler = SequentialSampler::new(0);
            assert_eq!(sampler.iter(0).count(), 0);
        }
    }

    mod random_sampler_tests {
        use super::*;

        #[test]
        fn validates_parameters() {
            assert!(RandomSampler::new(10, false, None, TEST_SEED).is_ok());

            // Invalid initialization: empty dataset and nothing to sample from
            assert!(RandomSampler::new(0, false, None, TEST_SEED).is_err());
            assert!(RandomSampler::new(0, true, Some(5), TEST_SEED).is_err());

            // Invalid initialization: `num_samples` > `dataset_size` when `replacement = false`
            let err = RandomSampler::new(10, false, Some(11), TEST_SEED).unwrap_err();
            assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
        }

        #[test]
        fn without_replacement_contains_all_indices() {
            let sampler = RandomSampler::new(TEST_DATASET_SIZE, false, None, TEST_SEED).unwrap();
            let samples: Vec<_> = sampler.iter(0).collect();
            assert_eq!(samples.len(), TEST_DATASET_SIZE);
            assert_eq!(HashSet::<_>::from_iter(samples).len(), TEST_DATASET_SIZE);
        }

        #[test]
        fn with_replacement_allows_duplicates() {
            let sampler = RandomSampler::new(10, true, Some(100), TEST_SEED).unwrap();
            let samples: Vec<_> = sampler.iter(0).collect();
            assert_eq!(samples.len(), 100);
            assert!(HashSet::<_>::from_iter(&samples).len() < 100);
            assert!(samples.iter().all(|&i| i < 10));
        }

        #[test]
        fn produces_deterministic_results() {
            let sampler = RandomSampler::new(TEST_DATASET_SIZE, false, None, TEST_SEED).unwrap();
            let epoch1 = sampler.iter(1).collect::<Vec<_>>();
            assert_eq!(epoch1, sampler.iter(1).collect::<Vec<_>>());
            assert_ne!(epoch1, sampler.iter(2).collect::<Vec<_>>());
        }
    }

    mod subset_random_sampler_tests {
        use super::*;

        #[test]
        fn rejects_invalid_indices() {
            // No indices to sample from
            assert!(SubsetRandomSampler::new(TEST_DATASET_SIZE, vec![], TEST_SEED).is_err());

            // Duplicate index
            assert!(SubsetRandomSampler::new(3, vec![1, 1, 2], TEST_SEED).is_err());

            // Index out of bounds
            assert!(SubsetRandomSampler::new(3, vec![1, 2, 3], TEST_SEED).is_err());
        }

        #[test]
        fn shuffles_provided_indices() {
            let indices = vec![10, 20, 30, 40];
            let sampler =
                SubsetRandomSampler::new(TEST_DATASET_SIZE, indices.clone(), TEST_SEED).unwrap();
            let samples: Vec<_> = sampler.iter(0).collect();
            assert_eq!(sampler.num_samples(), 4);
            assert_eq!(
                HashSet::<_>::from_iter(samples),
                HashSet::from_iter(indices)
            );
        }
    }

    mod weighted_random_sampler_tests {
        use super::*;

        #[test]
        fn validate_weights() {
            // Empty weights
            assert!(WeightedRandomSampler::new(0, vec![], false, Some(1), TEST_SEED).is_err());

            // Length mismatch
            assert!(WeightedRandomSampler::new(3, vec![1.0], true, None, TEST_SEED).is_err());

            // Negative weights
            assert!(
                WeightedRandomSampler::new(3, vec![0.1, -0.5, 0.2], true, Some(1), TEST_SEED)
                    .is_err()
            );

            // Zero weights
            assert!(
                WeightedRandomSampler::new(3, vec![0.0, 0.0, 0.0], false, Some(1), TEST_SEED)
                    .is_err()
            );
        }

        #[test]
        fn respects_zero_weights() {
            let weights = vec![1.0, 0.0, 2.0];
            let sampler =
                WeightedRandomSampler::new(weights.len(), weights, true, Some(10), TEST_SEED)
                    .unwrap();
            assert!(!sampler.iter(0).any(|index| index == 1));
        }

        #[test]
        fn with_replacement_samples_correctly() {
            let weights = vec![0.1, 0.9];
            let sampler =
                WeightedRandomSampler::new(weights.len(), weights, true, Some(1000), TEST_SEED)
                    .unwrap();
            let samples = sampler.iter(0).collect::<Vec<_>>();
            let count_1 = samples.iter().filter(|&&index| index == 1).count();
            assert!(count_1 > 800); // Very likely to have many more 1s than 0s
        }

        #[test]
        fn without_replacement_uses_all_indices() {
            let weights = vec![0.5, 0.5, 0.5, 0.5];
            let weights_len = weights.len();
            let sampler =
                WeightedRandomSampler::new(weights_len, weights, false, None, TEST_SEED).unwrap();
            let samples = sampler.iter(0).collect::<Vec<_>>();
            assert_eq!(HashSet::<_>::from_iter(samples).len(), weights_len);
        }
    }

    mod sampling_strategy_tests {
        use super::*;

        #[test]
        fn deserializes_tagged_config() -> Result<()> {
            let strategy: SamplingStrategy =
                serde_json::from_str(r#"{"kind": "random", "replacement": true, "num_samples": 5}"#)?;
            assert_eq!(
                strategy,
                SamplingStrategy::Random {
                    replacement: true,
                    num_samples: Some(5),
                    seed: 0
                }
            );

            let strategy: SamplingStrategy = serde_json::from_str(r#"{"kind": "sequential"}"#)?;
            assert_eq!(strategy, SamplingStrategy::default());
            Ok(())
        }

        #[test]
        fn builds_matching_sampler() -> Result<()> {
            let sampler = SamplingStrategy::default().build(7)?;
            assert!(sampler.is_sequential());
            assert_eq!(sampler.num_samples(), 7);

            let sampler = SamplingStrategy::SubsetRandom {
                indices: vec![0, 2],
                seed: 1,
            }
            .build(3)?;
            assert_eq!(sampler.num_samples(), 2);

            let err = SamplingStrategy::Weighted {
                weights: vec![1.0, 1.0],
                replacement: false,
                num_samples: None,
                seed: 0,
            }
            .build(3)
            .err()
            .unwrap();
            assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
            Ok(())
        }
    }

    mod sampler_stage_tests {
        use super::*;

        fn ten() -> InMemoryDataset<usize> {
            (0..10).collect()
        }

        fn collect<D: Dataset>(dataset: &D) -> Result<Vec<D::Item>> {
            dataset.iter().collect()
        }

        fn shuffled(seed: u64) -> SamplingStrategy {
            SamplingStrategy::Random {
                replacement: false,
                num_samples: None,
                seed,
            }
        }

        #[test]
        fn sequential_by_default() -> Result<()> {
            let stage = ten().sample()?;
            assert_eq!(stage.len()?, 10);
            assert_eq!(collect(&stage)?, (0..10).collect::<Vec<_>>());
            assert_eq!(collect(&stage)?, collect(&stage)?);
            Ok(())
        }

        #[test]
        fn requires_upstream_length() {
            let err = IterableDataset::new(|| 0..10).sample().err().unwrap();
            assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));

            let err = IterableDataset::new(|| 0..10)
                .sample_with(&shuffled(TEST_SEED))
                .err()
                .unwrap();
            assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
        }

        #[test]
        fn with_replacement_is_constructible() -> Result<()> {
            let stage = ten().sample_with(&SamplingStrategy::Random {
                replacement: true,
                num_samples: Some(25),
                seed: TEST_SEED,
            })?;

            assert_eq!(stage.len()?, 25);
            let drawn = collect(&stage)?;
            assert_eq!(drawn.len(), 25);
            assert!(drawn.iter().all(|&x| x < 10));
            Ok(())
        }

        #[test]
        fn with_replacement_defaults_to_upstream_length() -> Result<()> {
            let stage = ten().sample_with(&SamplingStrategy::Random {
                replacement: true,
                num_samples: None,
                seed: TEST_SEED,
            })?;
            assert_eq!(stage.len()?, 10);
            Ok(())
        }

        #[test]
        fn indexed_access_yields_a_permutation() -> Result<()> {
            let source: InMemoryDataset<usize> = (0..TEST_DATASET_SIZE).collect();
            let stage = source.sample_with(&shuffled(TEST_SEED))?;

            let mut drawn = collect(&stage)?;
            assert_ne!(drawn, (0..TEST_DATASET_SIZE).collect::<Vec<_>>());
            drawn.sort_unstable();
            assert_eq!(drawn, (0..TEST_DATASET_SIZE).collect::<Vec<_>>());
            Ok(())
        }

        #[test]
        fn streaming_upstream_is_buffered() -> Result<()> {
            let source = IterableDataset::new(|| 0..TEST_DATASET_SIZE).with_len(TEST_DATASET_SIZE);
            let stage = source.sample_with(&shuffled(TEST_SEED))?;

            let mut drawn = collect(&stage)?;
            drawn.sort_unstable();
            assert_eq!(drawn, (0..TEST_DATASET_SIZE).collect::<Vec<_>>());
            Ok(())
        }

        #[test]
        fn passes_advance_the_epoch() -> Result<()> {
            let source: InMemoryDataset<usize> = (0..TEST_DATASET_SIZE).collect();
            let stage = source.sample_with(&shuffled(TEST_SEED))?;

            assert_eq!(stage.epoch(), 0);
            let first = collect(&stage)?;
            let second = collect(&stage)?;
            assert_eq!(stage.epoch(), 2);
            assert_ne!(first, second);

            stage.set_epoch(0);
            assert_eq!(collect(&stage)?, first);
            Ok(())
        }

        #[test]
        fn overstated_length_is_out_of_bounds() {
            let stage = IterableDataset::new(|| 0..3).with_len(5).sample().unwrap();

            let results: Vec<_> = stage.iter().collect();
            assert_eq!(results.len(), 4);
            let err = results[3].as_ref().unwrap_err();
            assert_eq!(error_kind(err), Some(ErrorKind::IndexOutOfBounds));
        }

        #[test]
        fn samples_whole_batches() -> Result<()> {
            let stage = ten()
                .batch(3, false)?
                .sample_with(&SamplingStrategy::SubsetRandom {
                    indices: vec![3],
                    seed: TEST_SEED,
                })?;

            assert_eq!(collect(&stage)?, vec![vec![9]]);
            Ok(())
        }

        #[test]
        fn custom_sampler() -> Result<()> {
            struct Reversed(usize);

            impl Sampler for Reversed {
                fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
                    Box::new((0..self.0).rev())
                }

                fn num_samples(&self) -> usize {
                    self.0
                }
            }

            let stage = SamplerStage::with_sampler(ten(), |len| Ok(Reversed(len)))?;
            assert_eq!(collect(&stage)?, (0..10).rev().collect::<Vec<_>>());
            Ok(())
        }
    }
}
