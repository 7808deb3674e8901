//! Keeps track of all cache groups of a process and of the peer-picker bootstrap hook.
//!
//! A [Registry](Registry) is an explicit handle rather than a hidden global: tests can create
//! as many isolated registries as they like. Production code will usually stick to the single
//! process-wide instance returned by [Registry::global](Registry::global) - which is also where
//! the HTTP transport resolves group names received over the wire.
//!
//! Groups are registered once and never removed. Registering the same name twice - just like
//! registering two peer-picker factories - violates a process invariant and is therefore fatal.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use callisto::group::FnLoader;
//! # use callisto::registry::Registry;
//! let registry = Registry::new();
//! let group = registry.create_group(
//!     "scores",
//!     1024 * 1024,
//!     Arc::new(FnLoader(|key: &str| -> anyhow::Result<Vec<u8>> {
//!         Ok(key.as_bytes().to_vec())
//!     })),
//! );
//!
//! assert_eq!(group.name(), "scores");
//! assert!(registry.lookup("scores").is_some());
//! assert!(registry.lookup("nonsense").is_none());
//! ```
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::group::{Group, Loader};
use crate::peers::PeerPicker;

/// Produces the peer picker a group should use.
///
/// The factory is registered once by the transport during its construction and invoked lazily
/// by each group's first lookup (unless a picker was registered on the group explicitly).
pub type PickerFactory = Box<dyn Fn() -> Arc<dyn PeerPicker> + Send + Sync>;

lazy_static::lazy_static! {
    static ref GLOBAL: Arc<Registry> = Registry::new();
}

/// Maps group names to groups and holds the process' peer-picker bootstrap hook.
///
/// Reads vastly outnumber writes (a group is created once, then looked up on every remote
/// request), hence the reader-writer lock.
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    picker_factory: Mutex<Option<PickerFactory>>,
}

impl Registry {
    /// Creates a new, empty registry.
    ///
    /// This is mainly interesting for tests - production code normally uses
    /// [Registry::global](Registry::global).
    pub fn new() -> Arc<Registry> {
        Arc::new(Registry {
            groups: RwLock::new(HashMap::new()),
            picker_factory: Mutex::new(None),
        })
    }

    /// Returns the process-wide default registry.
    pub fn global() -> Arc<Registry> {
        GLOBAL.clone()
    }

    /// Creates a cache group with the given name, byte budget and backing loader and registers
    /// it in this registry.
    ///
    /// A budget of zero (or less) disables caching entirely: the group then degenerates to a
    /// deduplicating pass-through to its loader.
    ///
    /// # Panics
    /// Panics if a group with the same name has already been registered, as two groups fighting
    /// over one name would corrupt peer routing for both.
    pub fn create_group(
        self: &Arc<Self>,
        name: &str,
        cache_bytes: i64,
        loader: Arc<dyn Loader>,
    ) -> Arc<Group> {
        let mut groups = self.groups.write().unwrap();

        if groups.contains_key(name) {
            panic!("Duplicate registration of group '{}'!", name);
        }

        let group = Group::new(name, cache_bytes, loader, Arc::downgrade(self));
        let _ = groups.insert(name.to_owned(), group.clone());

        group
    }

    /// Looks up a previously created group by its name.
    pub fn lookup(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(name).cloned()
    }

    /// Registers the factory which supplies groups with their peer picker.
    ///
    /// This is invoked by the transport (e.g. [HttpPool](crate::http::HttpPool)) while it is
    /// being constructed. Each group consults the factory lazily on its first lookup, unless a
    /// picker was explicitly registered on that group beforehand.
    ///
    /// # Panics
    /// Panics if a factory has already been registered - constructing two transports for one
    /// registry violates a process invariant.
    pub fn register_peer_picker(&self, factory: PickerFactory) {
        let mut current = self.picker_factory.lock().unwrap();

        if current.is_some() {
            panic!("A peer picker factory has already been registered!");
        }

        *current = Some(factory);
    }

    /// Invokes the registered factory, if any.
    pub(crate) fn make_picker(&self) -> Option<Arc<dyn PeerPicker>> {
        self.picker_factory
            .lock()
            .unwrap()
            .as_ref()
            .map(|factory| factory())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::group::FnLoader;
    use crate::registry::Registry;

    fn noop_loader() -> Arc<FnLoader<fn(&str) -> anyhow::Result<Vec<u8>>>> {
        Arc::new(FnLoader(|key: &str| Ok(key.as_bytes().to_vec())))
    }

    #[test]
    fn groups_can_be_looked_up_by_name() {
        let registry = Registry::new();
        let group = registry.create_group("first", 1024, noop_loader());

        assert_eq!(group.name(), "first");
        assert!(Arc::ptr_eq(&registry.lookup("first").unwrap(), &group));
        assert!(registry.lookup("second").is_none());
    }

    #[test]
    #[should_panic(expected = "Duplicate registration")]
    fn duplicate_group_names_are_fatal() {
        let registry = Registry::new();
        let _first = registry.create_group("twice", 1024, noop_loader());
        let _second = registry.create_group("twice", 1024, noop_loader());
    }

    #[test]
    #[should_panic(expected = "already been registered")]
    fn duplicate_picker_factories_are_fatal() {
        use crate::peers::{PeerGetter, PeerPicker};

        struct LocalOnly;
        impl PeerPicker for LocalOnly {
            fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
                None
            }
        }

        fn factory() -> Arc<dyn PeerPicker> {
            Arc::new(LocalOnly)
        }

        let registry = Registry::new();
        registry.register_peer_picker(Box::new(factory));
        registry.register_peer_picker(Box::new(factory));
    }

    #[test]
    fn registries_are_isolated() {
        let first = Registry::new();
        let second = Registry::new();

        let _group = first.create_group("shared-name", 1024, noop_loader());
        // The same name is perfectly fine in a different registry...
        let _group = second.create_group("shared-name", 1024, noop_loader());
    }
}
