//! AWS request plumbing shared by the DynamoDB store and the management API relay.
//!
//! # Security Constraints
//! - Credentials ONLY from the runtime environment (or injected by tests)
//! - Never log secret keys or session tokens

pub mod credentials;
pub mod sigv4;

pub use credentials::{Credentials, MissingCredentials};
