//! src/readers/archive.rs
//!
//! Expands tar archives into their regular-file members.
//!
//! Each upstream element is an `(identifier, stream)` pair whose stream holds
//! a tar archive, optionally gzip-compressed. The expander decodes the stream
//! sequentially and yields one `(member_identifier, TarMember)` pair per
//! regular file, in archive order, before moving to the next upstream pair.
//!
//! # Member handles
//!
//! With [`MemberMode::Streamed`] (the default) a `TarMember` reads straight
//! from the archive stream; nothing past the current member is buffered.
//! The price is that a handle is only readable until the next element is
//! requested:
//!
//! ```text
//!   archive stream:  [hdr a][data a..][hdr b][data b..][0000]
//!                            ^ handle a reads here
//!   next() ------------------------> skips rest of a, reads hdr b
//!                                     handle a now fails with StaleHandle
//! ```
//!
//! [`MemberMode::Buffered`] reads each member into memory as it is yielded so
//! handles stay valid after the expander moves on.
//!
//! Every pass asks the upstream dataset for a fresh stream, so iterating the
//! expander again decodes the archives from the start.

use crate::dataset::Dataset;
use crate::error::DataError;
use anyhow::Result;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, trace, warn};

const BLOCK_SIZE: u64 = 512;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression applied to the archive stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Detect gzip from the stream's magic bytes.
    #[default]
    Auto,
    /// Plain tar.
    None,
    /// Gzip-compressed tar.
    Gzip,
}

/// How member contents are handed to the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberMode {
    /// Handles read directly from the archive stream and expire when the
    /// expander advances.
    #[default]
    Streamed,
    /// Each member is read into memory when yielded.
    Buffered,
}

/// Options for [`ReadTarMembers`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TarOptions {
    pub compression: Compression,
    pub members: MemberMode,
}

impl TarOptions {
    pub fn builder() -> TarOptionsBuilder {
        TarOptionsBuilder::default()
    }
}

/// Builder for TarOptions with method chaining
#[derive(Default)]
pub struct TarOptionsBuilder {
    options: TarOptions,
}

impl TarOptionsBuilder {
    /// Set the archive compression
    pub fn compression(mut self, compression: Compression) -> Self {
        self.options.compression = compression;
        self
    }

    /// Set how member contents are delivered
    pub fn members(mut self, members: MemberMode) -> Self {
        self.options.members = members;
        self
    }

    /// Build the final options.
    pub fn build(self) -> TarOptions {
        self.options
    }
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "archive ends inside a member")
}

/// Decode position inside one archive stream.
///
/// Owned by a single pass of the expander and shared (through `Rc`) with the
/// streamed handles of that pass. `generation` changes every time the cursor
/// leaves a member; a handle created for an older generation is stale.
struct ArchiveCursor {
    archive: PathBuf,
    reader: Box<dyn Read>,
    remaining: u64,
    padding: u64,
    generation: u64,
}

impl ArchiveCursor {
    fn open<R: Read + 'static>(
        archive: PathBuf,
        mut stream: R,
        compression: Compression,
    ) -> io::Result<Self> {
        // `take(..).read_to_end` keeps reading through short reads until the
        // magic is complete or the stream ends.
        let mut magic = Vec::with_capacity(GZIP_MAGIC.len());
        if compression == Compression::Auto {
            (&mut stream)
                .take(GZIP_MAGIC.len() as u64)
                .read_to_end(&mut magic)?;
        }
        let gzip = match compression {
            Compression::None => false,
            Compression::Gzip => true,
            Compression::Auto => magic == GZIP_MAGIC,
        };
        let buffered = BufReader::new(Cursor::new(magic).chain(stream));
        let reader: Box<dyn Read> = if gzip {
            Box::new(GzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };
        Ok(Self {
            archive,
            reader,
            remaining: 0,
            padding: 0,
            generation: 0,
        })
    }

    /// Discards what is left of the current member and its block padding.
    fn skip_rest(&mut self) -> io::Result<()> {
        self.generation += 1;
        let pending = self.remaining + self.padding;
        self.remaining = 0;
        self.padding = 0;
        if pending == 0 {
            return Ok(());
        }
        let skipped = io::copy(&mut (&mut self.reader).take(pending), &mut io::sink())?;
        if skipped < pending {
            return Err(truncated());
        }
        Ok(())
    }

    /// Advances to the next regular-file member and returns its path and size,
    /// or `None` at the end of the archive.
    fn next_file(&mut self) -> io::Result<Option<(PathBuf, u64)>> {
        loop {
            self.skip_rest()?;

            // A fresh `tar::Archive` per header: it consumes exactly the header
            // blocks (including GNU long-name and PAX records) and leaves the
            // stream positioned at the member data.
            let (path, size, is_file) = {
                let mut archive = tar::Archive::new(&mut self.reader);
                let mut entries = archive.entries()?;
                let entry = match entries.next() {
                    None => return Ok(None),
                    Some(entry) => entry?,
                };
                let header = entry.header();
                let size = if header.entry_type().is_gnu_sparse() {
                    header.entry_size()?
                } else {
                    entry.size()
                };
                (
                    entry.path()?.into_owned(),
                    size,
                    header.entry_type().is_file(),
                )
            };

            self.remaining = size;
            self.padding = (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE;
            if is_file {
                return Ok(Some((path, size)));
            }
            trace!(member = %path.display(), "skipping non-regular archive member");
        }
    }

    fn read_current(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.reader.read(&mut buf[..limit])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                DataError::corrupt_archive(self.archive.clone(), "archive ends inside a member"),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let expected = self.remaining;
        // The header size is untrusted, so it only hints the allocation.
        let hint = usize::try_from(expected).unwrap_or(usize::MAX).min(1 << 20);
        let mut data = Vec::with_capacity(hint);
        (&mut self.reader).take(expected).read_to_end(&mut data)?;
        self.remaining = 0;
        if (data.len() as u64) < expected {
            return Err(truncated());
        }
        Ok(data)
    }
}

enum MemberBody {
    Streamed {
        cursor: Rc<RefCell<ArchiveCursor>>,
        generation: u64,
    },
    Buffered(Cursor<Vec<u8>>),
}

/// Readable contents of one archive member.
///
/// See the [module docs](self) for the lifetime of streamed handles.
pub struct TarMember {
    path: PathBuf,
    size: u64,
    body: MemberBody,
}

impl TarMember {
    /// Identifier of the member (`archive path / member path`).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the member's data in bytes, as recorded in the archive.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the contents are held in memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self.body, MemberBody::Buffered(_))
    }
}

impl fmt::Debug for TarMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarMember")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("buffered", &self.is_buffered())
            .finish()
    }
}

impl Read for TarMember {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            MemberBody::Buffered(data) => data.read(buf),
            MemberBody::Streamed { cursor, generation } => {
                let mut cursor = cursor.borrow_mut();
                if cursor.generation != *generation {
                    warn!(member = %self.path.display(), "read from an expired archive member");
                    return Err(io::Error::other(DataError::StaleHandle {
                        path: self.path.clone(),
                    }));
                }
                cursor.read_current(buf)
            }
        }
    }
}

/// Yields the regular-file members of the tar archives produced upstream.
///
/// The upstream dataset must yield `(identifier, stream)` pairs, typically
/// from [`LoadFiles`](crate::readers::LoadFiles). Members are identified by
/// `identifier.join(member_path)`. Directories, links and other special
/// entries are skipped. The stage has no length because the member count is
/// unknown until the archive has been decoded.
///
/// # Errors
/// - `CorruptArchive` when a header or member body cannot be decoded. The
///   members yielded before it remain valid.
///
/// # Example
/// ```ignore
/// let members = ListDirFiles::new("./shards", "*.tar.gz")?
///     .load_files()
///     .read_tar();
/// for record in members.iter() {
///     let (name, mut member) = record?;
///     let mut bytes = Vec::new();
///     member.read_to_end(&mut bytes)?; // before asking for the next member
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ReadTarMembers<D> {
    upstream: D,
    options: TarOptions,
}

impl<D> ReadTarMembers<D> {
    pub fn new(upstream: D) -> Self {
        Self::with_options(upstream, TarOptions::default())
    }

    pub fn with_options(upstream: D, options: TarOptions) -> Self {
        Self { upstream, options }
    }

    pub fn options(&self) -> &TarOptions {
        &self.options
    }
}

enum ExpandState {
    AwaitingNextUpstreamPair,
    DecodingCurrentArchive {
        archive: PathBuf,
        cursor: Rc<RefCell<ArchiveCursor>>,
    },
    Exhausted,
}

/// Iterator over a [`ReadTarMembers`] pass.
pub struct ReadTarIter<I> {
    upstream: I,
    options: TarOptions,
    state: ExpandState,
}

impl<I, P, R> Iterator for ReadTarIter<I>
where
    I: Iterator<Item = Result<(P, R)>>,
    P: AsRef<Path>,
    R: Read + 'static,
{
    type Item = Result<(PathBuf, TarMember)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                ExpandState::AwaitingNextUpstreamPair => match self.upstream.next() {
                    None => {
                        self.state = ExpandState::Exhausted;
                        return None;
                    }
                    Some(Err(e)) => {
                        self.state = ExpandState::Exhausted;
                        return Some(Err(e));
                    }
                    Some(Ok((id, stream))) => {
                        let archive = id.as_ref().to_path_buf();
                        debug!(archive = %archive.display(), "decoding archive");
                        match ArchiveCursor::open(archive.clone(), stream, self.options.compression) {
                            Ok(cursor) => {
                                self.state = ExpandState::DecodingCurrentArchive {
                                    archive,
                                    cursor: Rc::new(RefCell::new(cursor)),
                                }
                            }
                            Err(e) => {
                                self.state = ExpandState::Exhausted;
                                return Some(Err(DataError::corrupt_archive(archive, e).into()));
                            }
                        }
                    }
                },
                ExpandState::DecodingCurrentArchive { archive, cursor } => {
                    let header = cursor.borrow_mut().next_file();
                    let outcome = header.and_then(|found| {
                        let Some((member, size)) = found else {
                            return Ok(None);
                        };
                        let body = match self.options.members {
                            MemberMode::Streamed => MemberBody::Streamed {
                                generation: cursor.borrow().generation,
                                cursor: Rc::clone(cursor),
                            },
                            MemberMode::Buffered => {
                                MemberBody::Buffered(Cursor::new(cursor.borrow_mut().read_to_vec()?))
                            }
                        };
                        let path = archive.join(member);
                        Ok(Some(TarMember { path, size, body }))
                    });

                    match outcome {
                        Ok(Some(member)) => {
                            trace!(member = %member.path.display(), size = member.size, "yielding archive member");
                            return Some(Ok((member.path.clone(), member)));
                        }
                        Ok(None) => {
                            debug!(archive = %archive.display(), "archive exhausted");
                            self.state = ExpandState::AwaitingNextUpstreamPair;
                        }
                        Err(e) => {
                            let err = DataError::corrupt_archive(archive.clone(), e);
                            self.state = ExpandState::Exhausted;
                            return Some(Err(err.into()));
                        }
                    }
                }
                ExpandState::Exhausted => return None,
            }
        }
    }
}

impl<D, P, R> Dataset for ReadTarMembers<D>
where
    D: Dataset<Item = (P, R)>,
    P: AsRef<Path>,
    R: Read + 'static,
{
    type Item = (PathBuf, TarMember);
    type Iter<'a> = ReadTarIter<D::Iter<'a>>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        ReadTarIter {
            upstream: self.upstream.iter(),
            options: self.options,
            state: ExpandState::AwaitingNextUpstreamPair,
        }
    }
}
