use crate::dataset::Dataset;
use crate::error::DataError;
use anyhow::Result;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::trace;

/// An open, buffered, sequentially readable file.
pub type FileHandle = BufReader<File>;

/// Opens every path produced by the upstream dataset and yields
/// `(path, handle)` pairs.
///
/// Files are opened one at a time, when their element is requested. A file
/// that cannot be opened fails only that step, with an `Open` error carrying
/// the path and the underlying I/O error. Length and random access are
/// inherited from the upstream dataset.
///
/// # Example
/// ```ignore
/// let files = ListDirFiles::new("./data", "*.txt")?.load_files();
/// for record in files.iter() {
///     let (path, mut handle) = record?;
///     let mut text = String::new();
///     handle.read_to_string(&mut text)?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LoadFiles<D> {
    upstream: D,
}

impl<D> LoadFiles<D> {
    pub fn new(upstream: D) -> Self {
        Self { upstream }
    }

    /// Returns the wrapped dataset.
    pub fn into_inner(self) -> D {
        self.upstream
    }
}

fn open(path: &Path) -> Result<(PathBuf, FileHandle)> {
    trace!(path = %path.display(), "opening file");
    let file = File::open(path).map_err(|source| DataError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((path.to_path_buf(), BufReader::new(file)))
}

/// Iterator over a [`LoadFiles`] pass.
pub struct LoadFilesIter<I> {
    inner: I,
    done: bool,
}

impl<I, P> Iterator for LoadFilesIter<I>
where
    I: Iterator<Item = Result<P>>,
    P: AsRef<Path>,
{
    type Item = Result<(PathBuf, FileHandle)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.inner.next()? {
            Ok(path) => open(path.as_ref()),
            Err(e) => Err(e),
        };
        self.done = result.is_err();
        Some(result)
    }
}

impl<D> Dataset for LoadFiles<D>
where
    D: Dataset,
    D::Item: AsRef<Path>,
{
    type Item = (PathBuf, FileHandle);
    type Iter<'a> = LoadFilesIter<D::Iter<'a>>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        LoadFilesIter {
            inner: self.upstream.iter(),
            done: false,
        }
    }

    fn try_len(&self) -> Option<usize> {
        self.upstream.try_len()
    }

    fn is_indexable(&self) -> bool {
        self.upstream.is_indexable()
    }

    fn get(&self, index: usize) -> Result<Option<Self::Item>> {
        self.upstream
            .get(index)?
            .map(|path| open(path.as_ref()))
            .transpose()
    }
}
