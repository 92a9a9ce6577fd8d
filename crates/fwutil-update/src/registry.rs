//! The component registry.
//!
//! Built once at startup from an ordered list of entries and read-only
//! afterwards. Registration order is the order `version all` prints in.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::component::{Component, ComponentId};

/// Directory holding the per-FRU update lock files.
pub const LOCK_DIR: &str = "/var/run";

/// Filter value matching every FRU or component.
pub const ALL: &str = "all";

/// One registration.
pub enum ComponentEntry {
    /// A real component
    Component(Box<dyn Component>),
    /// Another name for a real component
    Alias {
        /// Name the alias is registered under
        id: ComponentId,
        /// Component it forwards to
        target: ComponentId,
    },
}

impl ComponentEntry {
    /// Entry for a real component.
    pub fn component(component: impl Component + 'static) -> Self {
        Self::Component(Box::new(component))
    }
}

/// Components keyed by `(fru, board, name)`, with aliases resolved.
#[derive(Default)]
pub struct ComponentRegistry {
    components: Vec<Box<dyn Component>>,
    index: HashMap<ComponentId, usize>,
    aliases: HashMap<ComponentId, ComponentId>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.components.iter().map(|c| c.id()).collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl ComponentRegistry {
    /// Build from `entries`.
    ///
    /// A duplicate key keeps the first registration. An alias whose target
    /// is not a registered component, or whose name is already taken, is
    /// dropped. Both are logged as warnings.
    pub fn build(entries: impl IntoIterator<Item = ComponentEntry>) -> Self {
        let mut registry = Self::default();
        let mut aliases = Vec::new();

        for entry in entries {
            match entry {
                ComponentEntry::Component(component) => registry.insert(component),
                ComponentEntry::Alias { id, target } => aliases.push((id, target)),
            }
        }
        for (id, target) in aliases {
            registry.insert_alias(id, target);
        }

        debug!(
            components = registry.components.len(),
            aliases = registry.aliases.len(),
            "component registry built"
        );
        registry
    }

    fn insert(&mut self, component: Box<dyn Component>) {
        let id = component.id().clone();
        if self.index.contains_key(&id) {
            warn!(component = %id, "duplicate component ignored");
            return;
        }
        self.index.insert(id, self.components.len());
        self.components.push(component);
    }

    fn insert_alias(&mut self, id: ComponentId, target: ComponentId) {
        if self.index.contains_key(&id) || self.aliases.contains_key(&id) {
            warn!(alias = %id, "alias name already registered, ignored");
            return;
        }
        if !self.index.contains_key(&target) {
            warn!(alias = %id, target = %target, "alias target is not a component, ignored");
            return;
        }
        self.aliases.insert(id, target);
    }

    /// Canonical id of `id`, following an alias.
    #[must_use]
    pub fn resolve<'a>(&'a self, id: &'a ComponentId) -> Option<&'a ComponentId> {
        if self.index.contains_key(id) {
            return Some(id);
        }
        self.aliases.get(id)
    }

    /// Component registered under `id` or an alias of it.
    #[must_use]
    pub fn get(&self, id: &ComponentId) -> Option<&dyn Component> {
        let canonical = self.resolve(id)?;
        let slot = *self.index.get(canonical)?;
        self.components.get(slot).map(|c| &**c)
    }

    /// Components in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Component> {
        self.components.iter().map(|c| &**c)
    }

    /// Aliases and their targets.
    pub fn aliases(&self) -> impl Iterator<Item = (&ComponentId, &ComponentId)> {
        self.aliases.iter()
    }

    /// Number of real components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Components matching a command-line selection.
    ///
    /// `fru` and `component` are names or [`ALL`]. A component may be given
    /// as `board/name`. Explicit names go through alias resolution; wildcards
    /// only list real components, in registration order.
    #[must_use]
    pub fn select(&self, fru: &str, component: &str) -> Vec<&dyn Component> {
        if fru != ALL && component != ALL {
            let id = parse_component(fru, component);
            return self.get(&id).into_iter().collect();
        }
        self.iter()
            .filter(|c| fru == ALL || c.id().fru == fru)
            .filter(|c| component == ALL || matches_name(c.id(), component))
            .collect()
    }
}

fn parse_component(fru: &str, component: &str) -> ComponentId {
    match component.split_once('/') {
        Some((board, name)) => ComponentId::new(fru, name).on_board(board),
        None => ComponentId::new(fru, component),
    }
}

fn matches_name(id: &ComponentId, component: &str) -> bool {
    match (component.split_once('/'), &id.board) {
        (Some((board, name)), Some(id_board)) => board == id_board && name == id.name,
        (Some(_), None) => false,
        (None, _) => component == id.name,
    }
}

/// Advisory lock file serializing updates of one FRU.
#[must_use]
pub fn lock_path(fru: &str) -> PathBuf {
    lock_path_in(Path::new(LOCK_DIR), fru)
}

/// [`lock_path`] under another directory.
#[must_use]
pub fn lock_path_in(dir: &Path, fru: &str) -> PathBuf {
    dir.join(format!("fw-util-{fru}.lock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use tracing_test::traced_test;

    struct Stub(ComponentId);

    impl Component for Stub {
        fn id(&self) -> &ComponentId {
            &self.0
        }

        fn kind(&self) -> ComponentKind {
            ComponentKind::Tpm
        }
    }

    fn stub(fru: &str, name: &str) -> ComponentEntry {
        ComponentEntry::component(Stub(ComponentId::new(fru, name)))
    }

    fn alias(fru: &str, name: &str, target_fru: &str, target_name: &str) -> ComponentEntry {
        ComponentEntry::Alias {
            id: ComponentId::new(fru, name),
            target: ComponentId::new(target_fru, target_name),
        }
    }

    #[test]
    fn test_alias_resolves_to_target() {
        let registry = ComponentRegistry::build([alias("bmc", "rom", "bmc", "bmc"), stub("bmc", "bmc")]);
        let found = registry.get(&ComponentId::new("bmc", "rom")).map(|c| c.id().clone());
        assert_eq!(found, Some(ComponentId::new("bmc", "bmc")));
        assert_eq!(registry.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_dangling_alias_is_rejected_with_warning() {
        let registry = ComponentRegistry::build([stub("bmc", "bmc"), alias("bmc", "rom", "bmc", "flash")]);
        assert!(registry.get(&ComponentId::new("bmc", "rom")).is_none());
        assert_eq!(registry.aliases().count(), 0);
        assert!(logs_contain("alias target is not a component"));
    }

    #[traced_test]
    #[test]
    fn test_duplicate_keeps_first() {
        let registry = ComponentRegistry::build([stub("slot1", "bios"), stub("slot1", "bios")]);
        assert_eq!(registry.len(), 1);
        assert!(logs_contain("duplicate component ignored"));
    }

    #[test]
    fn test_alias_cannot_shadow_component() {
        let registry = ComponentRegistry::build([
            stub("bmc", "bmc"),
            stub("bmc", "rom"),
            alias("bmc", "rom", "bmc", "bmc"),
        ]);
        let found = registry.get(&ComponentId::new("bmc", "rom")).map(|c| c.id().clone());
        assert_eq!(found, Some(ComponentId::new("bmc", "rom")));
    }

    #[test]
    fn test_select_wildcards_keep_order() {
        let registry = ComponentRegistry::build([
            stub("slot1", "bios"),
            stub("bmc", "bmc"),
            stub("slot1", "cpld"),
            ComponentEntry::component(Stub(ComponentId::new("slot1", "vr").on_board("1ou"))),
        ]);
        let names = |fru, component| {
            registry
                .select(fru, component)
                .iter()
                .map(|c| c.id().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names("slot1", ALL), ["slot1/bios", "slot1/cpld", "slot1/1ou/vr"]);
        assert_eq!(names(ALL, "bmc"), ["bmc/bmc"]);
        assert_eq!(names(ALL, "1ou/vr"), ["slot1/1ou/vr"]);
        assert_eq!(names("slot1", "1ou/vr"), ["slot1/1ou/vr"]);
        assert_eq!(names(ALL, ALL).len(), 4);
        assert!(names("slot2", "bios").is_empty());
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(lock_path("slot1"), PathBuf::from("/var/run/fw-util-slot1.lock"));
        assert_eq!(
            lock_path_in(Path::new("/tmp"), "bmc"),
            PathBuf::from("/tmp/fw-util-bmc.lock")
        );
    }
}
