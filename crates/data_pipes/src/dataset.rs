use crate::batch::BatchStage;
use crate::collate::{CollateStage, DefaultCollate, ToArray};
use crate::error::DataError;
use crate::readers::{LoadFiles, ReadTarMembers, TarOptions};
use crate::sampler::{Sampler, SamplerStage, SamplingStrategy};
use anyhow::Result;
use std::collections::HashMap;
use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

/// A `Dataset` is a lazy, re-iterable sequence of elements.
///
/// Datasets are composed by wrapping: every stage owns exactly one upstream
/// dataset and transforms its elements. Two capabilities are optional and are
/// queried explicitly rather than assumed:
/// - **length** via [`try_len`](Self::try_len): `Some(n)` only when the whole
///   upstream chain can report its size without iterating.
/// - **random access** via [`get`](Self::get), advertised by
///   [`is_indexable`](Self::is_indexable).
///
/// Each call to [`iter`](Self::iter) creates fresh iteration state, so the same
/// dataset can be traversed any number of times (sequentially). Elements are
/// produced on demand; nothing is computed ahead of the consumer. Errors are
/// yielded at the step that meets them, after which the iterator is finished.
pub trait Dataset {
    /// The element type produced by the dataset.
    type Item;

    /// The iterator type produced by `iter()`.
    type Iter<'a>: Iterator<Item = Result<Self::Item>> + 'a
    where
        Self: 'a;

    /// Starts a new pass over the dataset.
    fn iter(&self) -> Self::Iter<'_>;

    /// Returns the number of elements if this dataset can report it.
    fn try_len(&self) -> Option<usize> {
        None
    }

    /// Returns the number of elements, or a `NotSupported` error when the
    /// dataset chain has no known length.
    fn len(&self) -> Result<usize> {
        self.try_len()
            .ok_or_else(|| DataError::not_supported::<Self>("len").into())
    }

    /// Checks if the dataset is empty. Fails like [`len`](Self::len).
    fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// Whether [`get`](Self::get) is supported.
    fn is_indexable(&self) -> bool {
        false
    }

    /// Random-access lookup by index.
    /// - Indexable datasets return `Ok(Some(item))` or `Ok(None)` if out-of-bounds.
    /// - Streaming datasets return a `NotSupported` error.
    fn get(&self, index: usize) -> Result<Option<Self::Item>> {
        let _ = index;
        Err(DataError::not_supported::<Self>("get").into())
    }
}

impl<D: Dataset + ?Sized> Dataset for &D {
    type Item = D::Item;
    type Iter<'a> = D::Iter<'a>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        (**self).iter()
    }

    fn try_len(&self) -> Option<usize> {
        (**self).try_len()
    }

    fn is_indexable(&self) -> bool {
        (**self).is_indexable()
    }

    fn get(&self, index: usize) -> Result<Option<Self::Item>> {
        (**self).get(index)
    }
}

impl<D: Dataset + ?Sized> Dataset for Arc<D> {
    type Item = D::Item;
    type Iter<'a> = D::Iter<'a>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        (**self).iter()
    }

    fn try_len(&self) -> Option<usize> {
        (**self).try_len()
    }

    fn is_indexable(&self) -> bool {
        (**self).is_indexable()
    }

    fn get(&self, index: usize) -> Result<Option<Self::Item>> {
        (**self).get(index)
    }
}

/// A dataset that stores all elements in contiguous memory
/// with atomic-reference counting (`Arc<[T]>`).
///
/// This enables:
/// - Zero-copy clone: Cloning only bumps the `Arc` counter
/// - Thread-safe sharing: Safe concurrent read access
/// - Random access and a known length for downstream stages.
///
/// Ideal for datasets that comfortably fit into RAM.
#[derive(Debug, Clone)]
pub struct InMemoryDataset<T> {
    items: Arc<[T]>,
    metadata: HashMap<String, String>,
}

impl<T> InMemoryDataset<T> {
    /// Creates a new in-memory dataset from a vector of elements.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
            metadata: HashMap::new(),
        }
    }

    /// Adds/updates metadata and returns the modified dataset.
    /// Enables chaining: `dataset.with_metadata("source", "train")`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the value of a metadata field, if it exists.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Borrows the stored elements.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T> FromIterator<T> for InMemoryDataset<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Iterator over an [`InMemoryDataset`], cloning each element.
#[derive(Debug, Clone)]
pub struct InMemoryIter<'a, T> {
    items: std::slice::Iter<'a, T>,
}

impl<T: Clone> Iterator for InMemoryIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().cloned().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<T: Clone> Dataset for InMemoryDataset<T> {
    type Item = T;
    type Iter<'a> = InMemoryIter<'a, T>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        InMemoryIter {
            items: self.items.iter(),
        }
    }

    fn try_len(&self) -> Option<usize> {
        Some(self.items.len())
    }

    fn is_indexable(&self) -> bool {
        true
    }

    fn get(&self, index: usize) -> Result<Option<T>> {
        Ok(self.items.get(index).cloned())
    }
}

/// A streaming dataset backed by a generator.
///
/// The factory is called once per pass and must return a fresh iterator each
/// time. By default the dataset has no length; use
/// [`with_len`](Self::with_len) when the generator's size is known up front.
///
/// # Example
/// ```ignore
/// let squares = IterableDataset::new(|| (0..5).map(|i| i * i));
/// assert!(squares.len().is_err());
/// let squares = squares.with_len(5);
/// assert_eq!(squares.len()?, 5);
/// ```
pub struct IterableDataset<F, I> {
    factory: F,
    len: Option<usize>,
    _marker: PhantomData<fn() -> I>,
}

impl<F, I> IterableDataset<F, I>
where
    F: Fn() -> I,
    I: IntoIterator,
{
    /// Creates a length-less streaming dataset.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            len: None,
            _marker: PhantomData,
        }
    }

    /// Declares how many elements every pass produces.
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = Some(len);
        self
    }
}

/// Iterator over an [`IterableDataset`].
pub struct IterableIter<I> {
    inner: I,
}

impl<I: Iterator> Iterator for IterableIter<I> {
    type Item = Result<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }
}

impl<F, I> Dataset for IterableDataset<F, I>
where
    F: Fn() -> I,
    I: IntoIterator,
{
    type Item = I::Item;
    type Iter<'a> = IterableIter<I::IntoIter>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        IterableIter {
            inner: (self.factory)().into_iter(),
        }
    }

    fn try_len(&self) -> Option<usize> {
        self.len
    }
}

/// Fluent wrapping for any [`Dataset`].
///
/// ```ignore
/// let pipeline = ListDirFiles::new("./shards", "*.tar")?
///     .load_files()
///     .read_tar()
///     .collate(|(path, mut member)| { /* decode */ });
/// ```
pub trait DatasetExt: Dataset + Sized {
    /// Opens every path lazily. See [`LoadFiles`].
    fn load_files(self) -> LoadFiles<Self>
    where
        Self::Item: AsRef<Path>,
    {
        LoadFiles::new(self)
    }

    /// Expands `(identifier, stream)` pairs holding tar archives. See [`ReadTarMembers`].
    fn read_tar<P, R>(self) -> ReadTarMembers<Self>
    where
        Self: Dataset<Item = (P, R)>,
        P: AsRef<Path>,
        R: Read + 'static,
    {
        ReadTarMembers::new(self)
    }

    /// Like [`read_tar`](Self::read_tar) with explicit options.
    fn read_tar_with<P, R>(self, options: TarOptions) -> ReadTarMembers<Self>
    where
        Self: Dataset<Item = (P, R)>,
        P: AsRef<Path>,
        R: Read + 'static,
    {
        ReadTarMembers::with_options(self, options)
    }

    /// Groups consecutive elements. See [`BatchStage`].
    fn batch(self, batch_size: usize, drop_last: bool) -> Result<BatchStage<Self>> {
        BatchStage::new(self, batch_size, drop_last)
    }

    /// Applies `collate_fn` to every element. See [`CollateStage`].
    fn collate<F, O>(self, collate_fn: F) -> CollateStage<Self, F>
    where
        F: Fn(Self::Item) -> Result<O>,
    {
        CollateStage::with_fn(self, collate_fn)
    }

    /// Converts every element into an `ndarray` array.
    fn collate_default(self) -> CollateStage<Self, DefaultCollate<Self::Item>>
    where
        Self::Item: ToArray,
    {
        CollateStage::new(self)
    }

    /// Re-emits the elements in sequential index order. See [`SamplerStage`].
    fn sample(self) -> Result<SamplerStage<Self>> {
        SamplerStage::new(self)
    }

    /// Re-emits the elements in the order chosen by `strategy`.
    fn sample_with(
        self,
        strategy: &SamplingStrategy,
    ) -> Result<SamplerStage<Self, Box<dyn Sampler>>> {
        SamplerStage::with_strategy(self, strategy)
    }
}

impl<D: Dataset> DatasetExt for D {}
