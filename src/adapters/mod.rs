//! Collaborators the runner talks to: shell, object store, archiver,
//! downloader and package naming.

pub mod archive;
pub mod download;
pub mod executor;
pub mod names;
pub mod store;

pub use archive::{ArchiveSummary, zip_directory};
pub use download::download_file;
pub use executor::{CommandExecutor, CommandOutput, ExecError, ExecOptions, ShellExecutor};
pub use names::unique_name;
pub use store::{
    FsObjectStore, HttpObjectStore, MemoryObjectStore, ObjectStore, UploadProgress, create_store,
    put_json,
};
