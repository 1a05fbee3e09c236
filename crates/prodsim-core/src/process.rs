//! The process catalogue.
//!
//! A process is a named unit of work with a duration model. Production
//! processes run on production resources; transport processes move products
//! between locations, optionally restricted to a link network. Processes
//! sharing a capability are interchangeable for routing purposes.

use crate::id::{ProcessId, TimeModelId};
use crate::path::LinkGraph;

/// What kind of work a process describes.
#[derive(Debug, Clone)]
pub enum ProcessKind {
    Production,
    Transport,
    /// Transport confined to the given link network.
    LinkTransport { links: LinkGraph },
}

/// An entry in the process catalogue.
#[derive(Debug, Clone)]
pub struct ProcessDef {
    pub id: ProcessId,
    pub name: String,
    pub kind: ProcessKind,
    pub time_model: TimeModelId,
    /// Processes with the same capability can stand in for each other.
    pub capability: Option<String>,
}

impl ProcessDef {
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            ProcessKind::Transport | ProcessKind::LinkTransport { .. }
        )
    }

    pub fn links(&self) -> Option<&LinkGraph> {
        match &self.kind {
            ProcessKind::LinkTransport { links } => Some(links),
            _ => None,
        }
    }

    /// Whether this process can perform work that asks for `required`:
    /// the same process, or one of the same class with a matching
    /// capability.
    pub fn satisfies(&self, required: &ProcessDef) -> bool {
        if self.id == required.id {
            return true;
        }
        match (&self.capability, &required.capability) {
            (Some(offered), Some(wanted)) => {
                offered == wanted && self.is_transport() == required.is_transport()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: u32, kind: ProcessKind, capability: Option<&str>) -> ProcessDef {
        ProcessDef {
            id: ProcessId(id),
            name: format!("p{id}"),
            kind,
            time_model: TimeModelId(0),
            capability: capability.map(str::to_string),
        }
    }

    #[test]
    fn same_process_satisfies() {
        let p = def(0, ProcessKind::Production, None);
        assert!(p.satisfies(&p));
    }

    #[test]
    fn capability_match() {
        let drill_a = def(0, ProcessKind::Production, Some("drill"));
        let drill_b = def(1, ProcessKind::Production, Some("drill"));
        let mill = def(2, ProcessKind::Production, Some("mill"));
        let plain = def(3, ProcessKind::Production, None);
        assert!(drill_a.satisfies(&drill_b));
        assert!(!drill_a.satisfies(&mill));
        assert!(!plain.satisfies(&drill_a));
        assert!(!drill_a.satisfies(&plain));
    }

    #[test]
    fn capability_does_not_cross_classes() {
        let prod = def(0, ProcessKind::Production, Some("move"));
        let transport = def(1, ProcessKind::Transport, Some("move"));
        assert!(!prod.satisfies(&transport));
        assert!(transport.is_transport());
        assert!(!prod.is_transport());
    }

    #[test]
    fn link_transport_exposes_links() {
        let p = def(0, ProcessKind::LinkTransport { links: LinkGraph::default() }, None);
        assert!(p.is_transport());
        assert!(p.links().is_some());
        assert!(def(1, ProcessKind::Transport, None).links().is_none());
    }
}
