//! Composable, lazy dataset stages.
//!
//! A pipeline is built by wrapping one [`Dataset`] in another:
//!
//! ```ignore
//! use data_pipes::{DatasetExt, ListDirFiles};
//!
//! let members = ListDirFiles::new("./shards", "*.tar.gz")?
//!     .load_files()
//!     .read_tar();
//! ```
//!
//! Nothing is read until the pipeline is iterated, and every stage pulls one
//! upstream element at a time.

pub mod batch;
pub mod collate;
pub mod dataset;
pub mod error;
pub mod readers;
pub mod sampler;

pub use batch::BatchStage;
pub use collate::{CollateStage, DefaultCollate, ToArray};
pub use dataset::{Dataset, DatasetExt, InMemoryDataset, IterableDataset};
pub use error::{error_kind, DataError, ErrorKind};
pub use readers::{
    Compression, ListDirFiles, ListFilesOptions, LoadFiles, MemberMode, ReadTarMembers,
    TarMember, TarOptions,
};
pub use sampler::{
    RandomSampler, Sampler, SamplerStage, SamplingStrategy, SequentialSampler,
    SubsetRandomSampler, WeightedRandomSampler,
};
