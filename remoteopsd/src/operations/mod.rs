//! Concrete remote operations run by the dispatch engine.

mod account;
mod files;
mod folder;
mod shares;

pub use account::{CheckCredentials, GetServerInfo, GetUserName};
pub use files::{CreateFolder, RemoveFile, RenameFile, RestoreVersion, SyncFile, Transfer, TransferFile};
pub use folder::SynchronizeFolder;
pub use shares::{
    CREATE_PERMISSION, CreateShare, ShareOptions, Unshare, UpdateDownloadLimit, UpdateKind,
    UpdateShare,
};
