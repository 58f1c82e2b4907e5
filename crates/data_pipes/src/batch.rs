use crate::dataset::Dataset;
use crate::error::DataError;
use anyhow::{ensure, Result};

/// ============================================================================
/// Groups consecutive upstream elements into `Vec`s of `batch_size`.
///
/// The final group may be shorter than `batch_size`; it is emitted when
/// `drop_last` is `false` and discarded otherwise.
///
/// # Arguments:
/// - `upstream`: Dataset to batch
/// - `batch_size`: Number of elements per batch. Must be >= 1
/// - `drop_last`: If true, discards a final batch smaller than `batch_size`
///
/// # Length
/// With an upstream of known length `n` the stage has `ceil(n / batch_size)`
/// batches, or `floor(n / batch_size)` when `drop_last` is set. The two agree
/// when `batch_size` divides `n`. Without an upstream length, `len()` fails
/// with `NotSupported`.
///
/// # Example
/// ```ignore
/// let batches = InMemoryDataset::new((0..10).collect()).batch(3, false)?;
/// assert_eq!(batches.len()?, 4); // [0,1,2] [3,4,5] [6,7,8] [9]
/// ```
#[derive(Debug, Clone)]
pub struct BatchStage<D> {
    upstream: D,
    batch_size: usize,
    drop_last: bool,
}

impl<D> BatchStage<D> {
    pub fn new(upstream: D, batch_size: usize, drop_last: bool) -> Result<Self> {
        ensure!(
            batch_size > 0,
            DataError::invalid_argument(format!(
                "batch_size must be > 0, but got batch_size={}",
                batch_size
            ))
        );
        Ok(Self {
            upstream,
            batch_size,
            drop_last,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn drop_last(&self) -> bool {
        self.drop_last
    }
}

/// Iterator over a [`BatchStage`] pass.
pub struct BatchIter<I> {
    inner: I,
    batch_size: usize,
    drop_last: bool,
    done: bool,
}

impl<I, T> Iterator for BatchIter<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        // batch_size may be far larger than the upstream, so only reserve what is hinted
        let mut batch = Vec::with_capacity(self.batch_size.min(self.inner.size_hint().0));
        while batch.len() < self.batch_size {
            match self.inner.next() {
                Some(Ok(item)) => batch.push(item),
                Some(Err(e)) => {
                    // The partial batch is discarded with the failed pass.
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if batch.is_empty() || (self.drop_last && batch.len() < self.batch_size) {
            return None;
        }
        Some(Ok(batch))
    }
}

impl<D: Dataset> Dataset for BatchStage<D> {
    type Item = Vec<D::Item>;
    type Iter<'a> = BatchIter<D::Iter<'a>>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        BatchIter {
            inner: self.upstream.iter(),
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            done: false,
        }
    }

    fn try_len(&self) -> Option<usize> {
        let n = self.upstream.try_len()?;
        Some(if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        })
    }

    fn is_indexable(&self) -> bool {
        self.upstream.is_indexable() && self.upstream.try_len().is_some()
    }

    /// Batch `index` holds upstream elements `[index * batch_size, (index + 1) * batch_size)`,
    /// clipped to the upstream length.
    fn get(&self, index: usize) -> Result<Option<Self::Item>> {
        let (Some(n), true) = (self.upstream.try_len(), self.upstream.is_indexable()) else {
            return Err(DataError::not_supported::<Self>("get").into());
        };

        let Some(start) = index.checked_mul(self.batch_size).filter(|&s| s < n) else {
            return Ok(None);
        };
        let end = (start + self.batch_size).min(n);
        if self.drop_last && end - start < self.batch_size {
            return Ok(None);
        }

        let mut batch = Vec::with_capacity(end - start);
        for i in start..end {
            let item = self
                .upstream
                .get(i)?
                .ok_or(DataError::IndexOutOfBounds { index: i, len: n })?;
            batch.push(item);
        }
        Ok(Some(batch))
    }
}
