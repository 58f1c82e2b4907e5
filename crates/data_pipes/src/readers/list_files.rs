use crate::dataset::Dataset;
use crate::error::DataError;
use anyhow::Result;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Options for [`ListDirFiles`].
///
/// Example:
/// ```ignore
/// let options = ListFilesOptions::builder()
///     .pattern("*.tar")
///     .pattern("*.tar.gz")
///     .recursive(true)
///     .sort_by_name(true)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListFilesOptions {
    /// Glob patterns (`*`, `?`, `[...]`) matched against the file name.
    /// A file is listed when any pattern matches. No patterns, or only
    /// empty ones, lists every file.
    pub patterns: Vec<String>,
    /// Descend into subdirectories (default: true).
    pub recursive: bool,
    /// Follow symbolic links. When false, links are skipped (default: false).
    pub follow_links: bool,
    /// Yield canonical absolute paths instead of paths joined onto the root.
    pub absolute_paths: bool,
    /// Visit directory entries in file-name order instead of the order the
    /// file system returns them.
    pub sort_by_name: bool,
}

impl Default for ListFilesOptions {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            recursive: true,
            follow_links: false,
            absolute_paths: false,
            sort_by_name: false,
        }
    }
}

impl ListFilesOptions {
    pub fn builder() -> ListFilesOptionsBuilder {
        ListFilesOptionsBuilder::default()
    }
}

/// Builder for ListFilesOptions with method chaining
#[derive(Default)]
pub struct ListFilesOptionsBuilder {
    options: ListFilesOptions,
}

impl ListFilesOptionsBuilder {
    /// Add a file-name pattern
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.options.patterns.push(pattern.into());
        self
    }

    /// Set whether to descend into subdirectories
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.options.recursive = recursive;
        self
    }

    /// Set whether to follow symbolic links
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.options.follow_links = follow;
        self
    }

    /// Set whether to yield canonical absolute paths
    pub fn absolute_paths(mut self, absolute: bool) -> Self {
        self.options.absolute_paths = absolute;
        self
    }

    /// Set whether to sort directory entries by name
    pub fn sort_by_name(mut self, sort: bool) -> Self {
        self.options.sort_by_name = sort;
        self
    }

    /// Build the final options.
    pub fn build(self) -> ListFilesOptions {
        self.options
    }
}

/// Lists the files under a directory whose names match a glob pattern.
///
/// The walk is lazy: nothing touches the file system until the first element
/// is requested, so a missing root surfaces as a `NotFound` error from the
/// first `next()`, not from the constructor. The dataset has no length since
/// counting would require a full walk.
///
/// # Example
/// ```ignore
/// let archives = ListDirFiles::new("./data", "*.tar")?;
/// for path in archives.iter() {
///     println!("{}", path?.display());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ListDirFiles {
    root: PathBuf,
    patterns: Vec<Pattern>,
    options: ListFilesOptions,
}

impl ListDirFiles {
    /// Creates a recursive listing of `root` filtered by one pattern.
    /// An empty pattern matches every file.
    ///
    /// # Errors
    /// - `InvalidArgument` if the pattern is not valid glob syntax.
    pub fn new(root: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        Self::with_options(root, ListFilesOptions::builder().pattern(pattern).build())
    }

    /// Creates a listing with explicit options.
    pub fn with_options(root: impl Into<PathBuf>, options: ListFilesOptions) -> Result<Self> {
        let patterns = options
            .patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    DataError::invalid_argument(format!("invalid file pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: root.into(),
            patterns,
            options,
        })
    }

    /// The directory being listed.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ListFilesOptions {
        &self.options
    }

    fn matches(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy();
        self.patterns.iter().any(|p| p.matches(&name))
    }

    /// Validates the root and builds the directory walker.
    fn walk(&self) -> Result<walkdir::IntoIter> {
        let metadata = fs::metadata(&self.root).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => DataError::NotFound {
                path: self.root.clone(),
            },
            _ => DataError::Access {
                path: self.root.clone(),
                source,
            },
        })?;
        if !metadata.is_dir() {
            return Err(DataError::Access {
                path: self.root.clone(),
                source: io::Error::other("not a directory"),
            }
            .into());
        }

        let mut walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(self.options.follow_links);
        if !self.options.recursive {
            walker = walker.max_depth(1);
        }
        if self.options.sort_by_name {
            walker = walker.sort_by_file_name();
        }
        debug!(root = %self.root.display(), patterns = ?self.options.patterns, "listing files");
        Ok(walker.into_iter())
    }

    fn walk_error(&self, err: walkdir::Error) -> DataError {
        let path = err.path().unwrap_or(&self.root).to_path_buf();
        match err.into_io_error() {
            Some(source) if source.kind() == io::ErrorKind::NotFound => DataError::NotFound { path },
            Some(source) => DataError::Access { path, source },
            None => DataError::Access {
                path,
                source: io::Error::other("file system loop detected"),
            },
        }
    }
}

enum WalkState {
    Pending,
    Walking(walkdir::IntoIter),
    Done,
}

/// Iterator over a [`ListDirFiles`] pass.
pub struct ListDirIter<'a> {
    dataset: &'a ListDirFiles,
    state: WalkState,
}

impl Iterator for ListDirIter<'_> {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                WalkState::Pending => match self.dataset.walk() {
                    Ok(walker) => self.state = WalkState::Walking(walker),
                    Err(e) => {
                        self.state = WalkState::Done;
                        return Some(Err(e));
                    }
                },
                WalkState::Walking(walker) => {
                    let entry = match walker.next() {
                        None => {
                            self.state = WalkState::Done;
                            return None;
                        }
                        Some(Err(e)) => {
                            self.state = WalkState::Done;
                            return Some(Err(self.dataset.walk_error(e).into()));
                        }
                        Some(Ok(entry)) => entry,
                    };

                    // Directories, and symlinks when not following links, are skipped
                    if !entry.file_type().is_file() || !self.dataset.matches(entry.path()) {
                        continue;
                    }

                    if !self.dataset.options.absolute_paths {
                        return Some(Ok(entry.into_path()));
                    }
                    return match fs::canonicalize(entry.path()) {
                        Ok(path) => Some(Ok(path)),
                        Err(source) => {
                            self.state = WalkState::Done;
                            Some(Err(DataError::Access {
                                path: entry.into_path(),
                                source,
                            }
                            .into()))
                        }
                    };
                }
                WalkState::Done => return None,
            }
        }
    }
}

impl Dataset for ListDirFiles {
    type Item = PathBuf;
    type Iter<'a> = ListDirIter<'a>;

    fn iter(&self) -> Self::Iter<'_> {
        ListDirIter {
            dataset: self,
            state: WalkState::Pending,
        }
    }
}
