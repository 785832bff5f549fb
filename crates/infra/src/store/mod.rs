//! Credential store adapters

mod keychain;
mod memory;

pub use keychain::KeyringCredentialStore;
pub use memory::MemoryCredentialStore;
