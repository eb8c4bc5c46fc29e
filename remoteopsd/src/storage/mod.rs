mod credentials;

pub use credentials::{
    CredentialStore, DEFAULT_SERVICE_NAME, KeyringCredentialStore, MemoryCredentialStore,
    StorageError,
};
