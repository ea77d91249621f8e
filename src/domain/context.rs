//! Execution contexts: the privileged program and its sandboxes.

/// Display name of the privileged context, also accepted as a send
/// destination.
pub const PRIVILEGED_CONTEXT_NAME: &str = "<privileged>";

/// Opaque handle to a sandbox in a sandbox model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SandboxId(pub u32);

/// The trust context a call site executes in.
///
/// `Privileged` orders before every sandbox, so maps keyed by context list
/// the privileged program first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Context {
    Privileged,
    Sandboxed(SandboxId),
}

impl Context {
    pub fn sandbox(&self) -> Option<SandboxId> {
        match self {
            Context::Privileged => None,
            Context::Sandboxed(id) => Some(*id),
        }
    }
}

impl From<SandboxId> for Context {
    fn from(id: SandboxId) -> Self {
        Context::Sandboxed(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_privileged_sorts_first() {
        let mut map = BTreeMap::new();
        map.insert(Context::Sandboxed(SandboxId(1)), "b");
        map.insert(Context::Sandboxed(SandboxId(0)), "a");
        map.insert(Context::Privileged, "p");

        let order: Vec<_> = map.values().copied().collect();
        assert_eq!(order, vec!["p", "a", "b"]);
    }

    #[test]
    fn test_sandbox_accessor() {
        assert_eq!(Context::Privileged.sandbox(), None);
        assert_eq!(Context::from(SandboxId(3)).sandbox(), Some(SandboxId(3)));
    }
}
