//! Capability gating for the host bridge.
//!
//! Every bridge function is refused unless the owning context's gate is
//! open. Only the context itself opens it, and only for the dynamic extent
//! of one user-triggered handler.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A host function reachable from guest code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Dispatch,
    Log,
    EncodeCall,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Self::Dispatch, Self::Log, Self::EncodeCall];

    /// Name of the function inside the `bridge` module.
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Log => "log",
            Self::EncodeCall => "encode_call",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

/// Shared open/closed flag. Starts closed; readable by anyone holding a
/// clone, but only openable from inside this crate.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGate {
    open: Rc<Cell<bool>>,
}

impl CapabilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    /// Opens the gate until the returned guard drops.
    pub(crate) fn open(&self) -> GateGuard {
        self.open.set(true);
        GateGuard {
            open: Rc::clone(&self.open),
        }
    }
}

/// Closes the gate on drop, including during unwinding.
#[must_use = "the gate closes as soon as the guard is dropped"]
pub(crate) struct GateGuard {
    open: Rc<Cell<bool>>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.open.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_closed() {
        assert!(!CapabilityGate::new().is_open());
    }

    #[test]
    fn guard_scopes_the_open_window() {
        let gate = CapabilityGate::new();
        let observer = gate.clone();
        {
            let _guard = gate.open();
            assert!(observer.is_open());
        }
        assert!(!observer.is_open());
    }

    #[test]
    fn gate_closes_when_handler_panics() {
        let gate = CapabilityGate::new();
        let inner = gate.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.open();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert!(!gate.is_open());
    }

    #[test]
    fn capability_names_match_bridge_functions() {
        let names: Vec<&str> = Capability::ALL.iter().map(Capability::function_name).collect();
        assert_eq!(names, ["dispatch", "log", "encode_call"]);
        assert_eq!(
            serde_json::to_string(&Capability::EncodeCall).unwrap(),
            "\"encode_call\""
        );
    }
}
