pub mod archive;
pub mod list_files;
pub mod load_files;

pub use archive::{Compression, MemberMode, ReadTarMembers, TarMember, TarOptions, TarOptionsBuilder};
pub use list_files::{ListDirFiles, ListFilesOptions, ListFilesOptionsBuilder};
pub use load_files::{FileHandle, LoadFiles};
