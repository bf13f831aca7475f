pub mod audit;
pub mod config;
pub mod crypto;
pub mod directive;
pub mod error;
pub mod value;

pub use audit::{AuditEntry, AuditTrail};
pub use config::BarkConfig;
pub use directive::{Directive, DirectiveAuthority, DirectiveContent, DirectiveType};
pub use error::{BarkError, CryptoError, SignatureFault};
