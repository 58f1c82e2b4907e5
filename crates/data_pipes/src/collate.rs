use crate::dataset::Dataset;
use crate::error::DataError;
use anyhow::{ensure, Result};
use ndarray::{Array1, ArrayD, Axis, IxDyn};
use std::fmt;

/// Conversion of an element into a dense `ndarray` array.
///
/// This is what the default collate function applies to every element.
/// Numeric scalars become 0-d arrays, flat sequences become 1-d arrays,
/// rectangular `Vec<Vec<T>>` (e.g. a batch of equal-length rows) becomes a
/// 2-d array, and a list of equally shaped arrays is stacked along a new
/// leading axis. The element type is preserved.
pub trait ToArray {
    type Elem: Clone;

    fn to_array(self) -> Result<ArrayD<Self::Elem>>;
}

fn rows_to_array<T: Clone>(rows: Vec<Vec<T>>) -> Result<ArrayD<T>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
        return Err(DataError::invalid_argument(format!(
            "cannot collate ragged rows: row {} has length {}, expected {}",
            i,
            row.len(),
            n_cols
        ))
        .into());
    }
    let flat: Vec<T> = rows.into_iter().flatten().collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&[n_rows, n_cols]), flat)?)
}

macro_rules! impl_to_array {
    ($($t:ty),* $(,)?) => {$(
        impl ToArray for $t {
            type Elem = $t;

            fn to_array(self) -> Result<ArrayD<$t>> {
                Ok(ndarray::arr0(self).into_dyn())
            }
        }

        impl ToArray for Vec<$t> {
            type Elem = $t;

            fn to_array(self) -> Result<ArrayD<$t>> {
                Ok(Array1::from(self).into_dyn())
            }
        }

        impl<const N: usize> ToArray for [$t; N] {
            type Elem = $t;

            fn to_array(self) -> Result<ArrayD<$t>> {
                Ok(Array1::from(self.to_vec()).into_dyn())
            }
        }

        impl ToArray for Vec<Vec<$t>> {
            type Elem = $t;

            fn to_array(self) -> Result<ArrayD<$t>> {
                rows_to_array(self)
            }
        }
    )*};
}

impl_to_array!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, bool);

impl<T: Clone> ToArray for ArrayD<T> {
    type Elem = T;

    fn to_array(self) -> Result<ArrayD<T>> {
        Ok(self)
    }
}

impl<T: Clone> ToArray for Vec<ArrayD<T>> {
    type Elem = T;

    fn to_array(self) -> Result<ArrayD<T>> {
        ensure!(
            !self.is_empty(),
            DataError::invalid_argument("cannot stack an empty list of arrays")
        );

        // Validate that shapes are compatible for stacking
        let reference_shape = self[0].shape().to_vec();
        for (i, array) in self.iter().enumerate() {
            ensure!(
                array.shape() == reference_shape.as_slice(),
                DataError::invalid_argument(format!(
                    "shape mismatch in element {}: expected {:?}, got {:?}",
                    i,
                    reference_shape,
                    array.shape()
                ))
            );
        }

        let views: Vec<_> = self.iter().map(|a| a.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }
}

/// Signature of the default collate function for elements of type `T`.
pub type DefaultCollate<T> = fn(T) -> Result<ArrayD<<T as ToArray>::Elem>>;

/// Applies a collate function to every upstream element.
///
/// The stage is a 1:1 mapping: it yields `collate_fn(element)` in upstream
/// order, reports exactly the upstream length (or none), and supports random
/// access when the upstream does. Placed after a [`BatchStage`] the function
/// receives whole batches.
///
/// A collate function error is yielded at the element that produced it and
/// ends the pass.
///
/// # Example
/// ```ignore
/// let rows = InMemoryDataset::new(vec![vec![1, 2, 3], vec![4, 5, 6]]);
///
/// // user-supplied
/// let sums = (&rows).collate(|row| Ok(row.iter().sum::<i32>() as f32));
///
/// // default: each row becomes an ArrayD<i32> of shape [3]
/// let arrays = rows.collate_default();
/// ```
///
/// [`BatchStage`]: crate::batch::BatchStage
pub struct CollateStage<D, F> {
    upstream: D,
    collate_fn: F,
}

impl<D, F> CollateStage<D, F> {
    /// Creates the stage with a user-supplied collate function.
    pub fn with_fn(upstream: D, collate_fn: F) -> Self {
        Self {
            upstream,
            collate_fn,
        }
    }
}

impl<D> CollateStage<D, DefaultCollate<D::Item>>
where
    D: Dataset,
    D::Item: ToArray,
{
    /// Creates the stage with the default collate function, [`ToArray::to_array`].
    pub fn new(upstream: D) -> Self {
        Self::with_fn(upstream, <D::Item as ToArray>::to_array as DefaultCollate<D::Item>)
    }
}

impl<D: fmt::Debug, F> fmt::Debug for CollateStage<D, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollateStage")
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

/// Iterator over a [`CollateStage`] pass.
pub struct CollateIter<'a, I, F> {
    inner: I,
    collate_fn: &'a F,
    done: bool,
}

impl<I, F, T, O> Iterator for CollateIter<'_, I, F>
where
    I: Iterator<Item = Result<T>>,
    F: Fn(T) -> Result<O>,
{
    type Item = Result<O>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.inner.next()?.and_then(self.collate_fn);
        self.done = result.is_err();
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            self.inner.size_hint()
        }
    }
}

impl<D, F, O> Dataset for CollateStage<D, F>
where
    D: Dataset,
    F: Fn(D::Item) -> Result<O>,
{
    type Item = O;
    type Iter<'a> = CollateIter<'a, D::Iter<'a>, F>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        CollateIter {
            inner: self.upstream.iter(),
            collate_fn: &self.collate_fn,
            done: false,
        }
    }

    fn try_len(&self) -> Option<usize> {
        self.upstream.try_len()
    }

    fn is_indexable(&self) -> bool {
        self.upstream.is_indexable()
    }

    fn get(&self, index: usize) -> Result<Option<O>> {
        self.upstream
            .get(index)?
            .map(&self.collate_fn)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetExt, InMemoryDataset, IterableDataset};
    use crate::error::{error_kind, ErrorKind};
    use ndarray::{arr1, arr2};

    fn rows() -> Vec<Vec<i64>> {
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]
    }

    #[test]
    fn test_custom_fn_with_length() -> Result<()> {
        let source = InMemoryDataset::new(rows());
        let sums = (&source).collate(|row: Vec<i64>| Ok(row.iter().sum::<i64>() as f32));

        assert_eq!(sums.len()?, source.len()?);
        let values: Vec<f32> = sums.iter().collect::<Result<_>>()?;
        assert_eq!(values, vec![6.0, 15.0, 24.0]);
        Ok(())
    }

    #[test]
    fn test_default_without_length() -> Result<()> {
        let stage = IterableDataset::new(rows).collate_default();

        let err = stage.len().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotSupported));

        let arrays: Vec<_> = stage.iter().collect::<Result<_>>()?;
        for (array, row) in arrays.iter().zip(rows()) {
            assert_eq!(array, &arr1(&row).into_dyn());
        }
        Ok(())
    }

    #[test]
    fn test_to_array_shapes() -> Result<()> {
        assert_eq!(3.5f64.to_array()?.ndim(), 0);
        assert_eq!([1u8, 2, 3].to_array()?.shape(), &[3]);
        assert_eq!(
            vec![vec![1.0f32, 2.0], vec![3.0, 4.0]].to_array()?,
            arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).into_dyn()
        );
        assert_eq!(Vec::<Vec<i32>>::new().to_array()?.shape(), &[0, 0]);
        Ok(())
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let err = vec![vec![1i32, 2], vec![3]].to_array().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn test_stack_arrays() -> Result<()> {
        let parts = vec![arr1(&[1i32, 2]).into_dyn(), arr1(&[3, 4]).into_dyn()];
        assert_eq!(parts.to_array()?, arr2(&[[1, 2], [3, 4]]).into_dyn());

        let mismatched = vec![arr1(&[1i32, 2]).into_dyn(), arr1(&[3]).into_dyn()];
        let err = mismatched.to_array().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));

        let err = Vec::<ArrayD<i32>>::new().to_array().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
        Ok(())
    }

    #[test]
    fn test_collates_batches() -> Result<()> {
        let stage = InMemoryDataset::new((0..6).collect::<Vec<i32>>())
            .batch(3, false)?
            .collate_default();

        assert_eq!(stage.len()?, 2);
        let arrays: Vec<_> = stage.iter().collect::<Result<_>>()?;
        assert_eq!(arrays[1], arr1(&[3, 4, 5]).into_dyn());
        Ok(())
    }

    #[test]
    fn test_error_ends_the_pass() {
        let stage = InMemoryDataset::new(vec![vec![1, 2], vec![3], vec![4, 5]])
            .collate(|row: Vec<i32>| {
                ensure!(row.len() == 2, DataError::invalid_argument("short row"));
                Ok(row[0] + row[1])
            });

        let mut iter = stage.iter();
        assert_eq!(iter.next().unwrap().unwrap(), 3);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_random_access_passes_through() -> Result<()> {
        let stage = InMemoryDataset::new(vec![1u32, 2, 3]).collate(|x| Ok(x * 10));

        assert!(stage.is_indexable());
        assert_eq!(stage.get(2)?, Some(30));
        assert_eq!(stage.get(3)?, None);
        Ok(())
    }
}
