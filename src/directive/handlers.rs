//! Execution handlers.
//!
//! Handlers carry out a validated directive's effect. They run to completion
//! or fail as a unit; the authority writes `DIRECTIVE_EXECUTED` only when the
//! handler returns `Ok`.

use anyhow::Result;
use tracing::info;

use super::types::{AuditRequest, Directive, EnforcementOrder, ProtocolDefinition, StateTransition};

pub trait DirectiveHandler: Send + Sync {
    fn protocol_definition(&self, directive: &Directive, definition: &ProtocolDefinition) -> Result<()>;

    fn enforcement_order(&self, directive: &Directive, order: &EnforcementOrder) -> Result<()>;

    fn state_transition(&self, directive: &Directive, transition: &StateTransition) -> Result<()>;

    fn audit_request(&self, directive: &Directive, request: &AuditRequest) -> Result<()>;
}

/// Handler that records the effect in the process log and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl DirectiveHandler for LoggingHandler {
    fn protocol_definition(&self, directive: &Directive, definition: &ProtocolDefinition) -> Result<()> {
        info!(
            directive = %directive.id,
            "Executing protocol definition {} v{} ({} endpoints)",
            definition.name,
            definition.version,
            definition.endpoints.len()
        );
        Ok(())
    }

    fn enforcement_order(&self, directive: &Directive, order: &EnforcementOrder) -> Result<()> {
        info!(
            directive = %directive.id,
            "Executing enforcement order: {} on {} ({})",
            order.action,
            order.target,
            order.reason
        );
        Ok(())
    }

    fn state_transition(&self, directive: &Directive, transition: &StateTransition) -> Result<()> {
        info!(
            directive = %directive.id,
            "Executing state transition {} -> {}",
            transition.from_state,
            transition.to_state
        );
        Ok(())
    }

    fn audit_request(&self, directive: &Directive, request: &AuditRequest) -> Result<()> {
        info!(
            directive = %directive.id,
            "Executing audit request for scope {} from {}",
            request.scope,
            request.start_date
        );
        Ok(())
    }
}
