//! Operation routing
//!
//! Decides which controllers an operation touches and whether it needs the
//! two-phase protocol. An empty target set means every controller in the domain.

use crate::common::{Error, Result};
use crate::model::address::WILDCARD;
use crate::model::registry;
use crate::model::Operation;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    /// Controllers that must execute the operation; empty means all of them
    pub targets: BTreeSet<String>,
    pub two_phase: bool,
}

impl RoutingDecision {
    /// Every controller, two-phase
    pub fn global() -> Self {
        Self {
            targets: BTreeSet::new(),
            two_phase: true,
        }
    }

    fn single(name: &str, two_phase: bool) -> Self {
        Self {
            targets: BTreeSet::from([name.to_string()]),
            two_phase,
        }
    }

    pub fn is_global(&self) -> bool {
        self.targets.is_empty()
    }

    /// The only target, when there is exactly one
    pub fn sole_target(&self) -> Option<&str> {
        match self.targets.len() {
            1 => self.targets.iter().next().map(String::as_str),
            _ => None,
        }
    }
}

/// What the router knows about the controller it runs on
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    pub local: &'a str,
    /// Name of the primary when the local controller is subordinate
    pub primary: Option<&'a str>,
    /// Every controller currently registered, including the local one
    pub known: &'a BTreeSet<String>,
}

impl RouteContext<'_> {
    fn is_primary(&self) -> bool {
        self.primary.is_none()
    }
}

fn is_read_only(op: &Operation) -> bool {
    registry::is_read_only(op.name()) && !op.headers().push_to_workers
}

/// Route `op` from the controller described by `ctx`
pub fn route(op: &Operation, ctx: &RouteContext<'_>) -> Result<RoutingDecision> {
    match op {
        Operation::Composite(_) => route_composite(op, ctx),
        Operation::Simple(_) => route_simple(op, ctx),
    }
}

fn route_composite(op: &Operation, ctx: &RouteContext<'_>) -> Result<RoutingDecision> {
    if op.steps().is_empty() {
        return Ok(RoutingDecision::single(ctx.local, false));
    }
    let mut targets = BTreeSet::new();
    let mut two_phase = false;
    for step in op.steps() {
        let decision = route(step, ctx)?;
        if decision.is_global() {
            return Ok(RoutingDecision::global());
        }
        two_phase |= decision.two_phase;
        targets.extend(decision.targets);
    }
    two_phase |= targets.len() > 1;
    Ok(RoutingDecision { targets, two_phase })
}

fn route_simple(op: &Operation, ctx: &RouteContext<'_>) -> Result<RoutingDecision> {
    let address = op.address();
    let read_only = is_read_only(op);

    if let Some(host) = address.host() {
        if host == WILDCARD {
            return Ok(RoutingDecision::global());
        }
        if host != ctx.local && !ctx.known.contains(host) {
            return Err(Error::UnknownController(host.to_string()));
        }
        let direct = read_only || address.is_worker_scoped();
        return Ok(RoutingDecision::single(host, !direct));
    }

    if read_only {
        return Ok(RoutingDecision::single(ctx.local, false));
    }
    if !ctx.is_primary() {
        return Err(Error::DelegationDisallowed {
            operation: op.to_string(),
            primary: ctx.primary.unwrap_or_default().to_string(),
        });
    }
    Ok(RoutingDecision::global())
}
