//! apiwatch-auth: credential resolution for outgoing probes.
//!
//! # Architecture
//!
//! ```text
//! AuthResolver
//!   ├── merge(endpoint auth, profile)        field-by-field, endpoint wins
//!   ├── SecretResolver                       env:NAME / kv:name#version / literal
//!   │   └── VaultClient (KeyVaultClient)     cached per reference
//!   └── TokenCache                           client-credentials grant,
//!                                            refreshed 2 minutes before expiry
//! ```
//!
//! The secret and token caches are shared by every endpoint loop. Neither
//! holds a map-wide lock across network I/O, so a slow refresh for one
//! credential set never stalls lookups for another.

pub mod error;
pub mod resolver;
pub mod secrets;
pub mod token;
pub mod vault;

pub use error::{AuthError, AuthResult};
pub use resolver::{AuthKind, AuthResolver, merge};
pub use secrets::{SecretResolver, VaultClient};
pub use token::TokenCache;
pub use vault::KeyVaultClient;
