//! Encrypted OAuth credential storage

pub mod cipher;
pub mod credential_vault;

pub use cipher::TokenCipher;
pub use credential_vault::EncryptedCredentialVault;
