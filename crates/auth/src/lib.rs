//! `genflow-auth`: API-key authentication and scope authorization.
//!
//! Decoupled from HTTP and storage: the resolver talks to a
//! [`CredentialStore`] and an [`AuditSink`], both implemented elsewhere.

pub mod audit;
pub mod context;
pub mod error;
pub mod key;
pub mod resolver;
pub mod scope;
pub mod tenant;

pub use audit::{AuditAction, AuditLogEntry};
pub use context::AuthContext;
pub use error::AuthError;
pub use key::{generate_api_key, ApiKey, GeneratedKey, KeyHasher, KeyRejection, KEY_PREFIX};
pub use resolver::{AuditSink, AuthResolver, CredentialStore, RequestMeta};
pub use scope::Scope;
pub use tenant::{ApiUser, Tenant};
