//! Directives: data model, authority state machine, handlers and persistence.

pub mod authority;
pub mod handlers;
pub mod store;
pub mod types;

pub use authority::{AuthorityPolicy, DirectiveAuthority};
pub use handlers::{DirectiveHandler, LoggingHandler};
pub use store::DirectiveStore;
pub use types::{
    AuditRequest, Directive, DirectiveContent, DirectiveType, EnforcementOrder, ProtocolDefinition,
    StateTransition,
};
