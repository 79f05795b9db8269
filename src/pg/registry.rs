//! Type registry: text and binary mappings from type id to caster.
//!
//! The process-wide registry is built from the built-in table the first
//! time it is touched and replaced wholesale on registration, so readers
//! holding an `Arc` to the previous snapshot are never disturbed.
//! Connections and cursors may carry private registries that shadow it.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::builtins;
use super::caster::{Caster, CasterGroup};
use super::protocol::Format;
use super::types::Oid;
use crate::error::{Error, Result};

/// Text and binary caster mappings plus the default caster.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    text_casters: HashMap<Oid, Arc<Caster>>,
    binary_casters: HashMap<Oid, Arc<Caster>>,
    /// Display name -> caster, for every caster this registry has seen.
    named: HashMap<String, Arc<Caster>>,
    default_caster: Arc<Caster>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// An empty registry; every lookup falls to the default caster.
    pub fn new() -> Self {
        Self {
            text_casters: HashMap::new(),
            binary_casters: HashMap::new(),
            named: HashMap::new(),
            default_caster: builtins::default_caster(),
        }
    }

    /// A registry holding every built-in caster.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for caster in builtins::text_casters() {
            registry.bind(caster, Format::Text);
        }
        for caster in builtins::binary_casters() {
            registry.bind(caster, Format::Binary);
        }
        // the ISO-text temporal casters are reachable by name only
        for caster in builtins::temporal_iso_group().members() {
            if let Some(name) = caster.name() {
                registry
                    .named
                    .entry(format!("{name}_ISO"))
                    .or_insert_with(|| Arc::clone(caster));
            }
        }
        tracing::debug!(
            text = registry.text_casters.len(),
            binary = registry.binary_casters.len(),
            "Built-in type registry initialised"
        );
        registry
    }

    fn mapping(&self, format: Format) -> &HashMap<Oid, Arc<Caster>> {
        match format {
            Format::Text => &self.text_casters,
            Format::Binary => &self.binary_casters,
        }
    }

    fn mapping_mut(&mut self, format: Format) -> &mut HashMap<Oid, Arc<Caster>> {
        match format {
            Format::Text => &mut self.text_casters,
            Format::Binary => &mut self.binary_casters,
        }
    }

    fn bind(&mut self, caster: Arc<Caster>, format: Format) {
        let mapping = self.mapping_mut(format);
        for &oid in caster.type_ids() {
            mapping.insert(oid, Arc::clone(&caster));
        }
        // text casters own the name; binary ones only fill gaps
        if let Some(name) = caster.name() {
            if format == Format::Text || !self.named.contains_key(name) {
                self.named.insert(name.to_string(), caster);
            }
        }
    }

    /// Bind every id of `caster` in the `format` mapping; last registration wins.
    pub fn register(&mut self, caster: Arc<Caster>, format: Format) -> Result<()> {
        if caster.type_ids().is_empty() {
            return Err(Error::programming("caster must be bound to at least one type id"));
        }
        tracing::debug!(
            name = caster.name().unwrap_or("<anonymous>"),
            ids = ?caster.type_ids(),
            ?format,
            "Registering caster"
        );
        self.bind(caster, format);
        Ok(())
    }

    /// Register a caster family as one unit.
    ///
    /// Every member is checked before anything is bound, so a rejected
    /// group leaves the registry untouched. Ids claimed by several members
    /// go to the member [`CasterGroup::resolve`] picks.
    pub fn register_group(&mut self, group: &CasterGroup, format: Format) -> Result<()> {
        if let Some(bad) = group.members().iter().find(|c| c.type_ids().is_empty()) {
            return Err(Error::programming(format!(
                "caster must be bound to at least one type id (group {:?}, member {:?})",
                group.name(),
                bad.name()
            )));
        }
        tracing::debug!(group = group.name(), ?format, "Registering caster group");

        let mapping = self.mapping_mut(format);
        for (oid, caster) in group.bindings() {
            mapping.insert(oid, caster);
        }
        for member in group.members() {
            if let Some(name) = member.name() {
                self.named.insert(name.to_string(), Arc::clone(member));
            }
        }
        Ok(())
    }

    /// The caster bound to `oid` in `format`, if any.
    pub fn get(&self, oid: Oid, format: Format) -> Option<&Arc<Caster>> {
        self.mapping(format).get(&oid)
    }

    /// The caster bound to `oid` in `format`, else the default caster.
    ///
    /// The other format's mapping is never consulted.
    pub fn lookup(&self, oid: Oid, format: Format) -> Arc<Caster> {
        self.get(oid, format)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_caster))
    }

    pub fn default_caster(&self) -> &Arc<Caster> {
        &self.default_caster
    }

    /// A caster by display name, bound or not (e.g. `"DATE"`).
    pub fn by_name(&self, name: &str) -> Option<&Arc<Caster>> {
        self.named.get(name)
    }

    /// Number of ids bound in `format`.
    pub fn len(&self, format: Format) -> usize {
        self.mapping(format).len()
    }

    pub fn is_empty(&self) -> bool {
        self.text_casters.is_empty() && self.binary_casters.is_empty()
    }
}

// ============================================================================
// Process-wide registry
// ============================================================================

static GLOBAL: Lazy<RwLock<Arc<TypeRegistry>>> =
    Lazy::new(|| RwLock::new(Arc::new(TypeRegistry::with_builtins())));

/// Snapshot of the process-wide registry.
pub fn global() -> Arc<TypeRegistry> {
    Arc::clone(&GLOBAL.read())
}

/// Register a caster in the process-wide registry.
pub fn register_global(caster: Arc<Caster>, format: Format) -> Result<()> {
    let mut guard = GLOBAL.write();
    let mut next = TypeRegistry::clone(&guard);
    next.register(caster, format)?;
    *guard = Arc::new(next);
    Ok(())
}

/// Register a caster group in the process-wide registry.
pub fn register_global_group(group: &CasterGroup, format: Format) -> Result<()> {
    let mut guard = GLOBAL.write();
    let mut next = TypeRegistry::clone(&guard);
    next.register_group(group, format)?;
    *guard = Arc::new(next);
    Ok(())
}

/// Walk `overrides` in order, then the process-wide registry, then the default caster.
pub fn resolve(oid: Oid, format: Format, overrides: &[&TypeRegistry]) -> Arc<Caster> {
    for registry in overrides {
        if let Some(caster) = registry.get(oid, format) {
            return Arc::clone(caster);
        }
    }
    global().lookup(oid, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::caster::{CastContext, CastFn};
    use crate::pg::decode::cast_string;
    use crate::pg::types::Value;

    fn caster(name: &str, ids: &[Oid]) -> Arc<Caster> {
        Arc::new(Caster::native(name, ids, cast_string))
    }

    #[test]
    fn test_unregistered_falls_to_default() {
        let registry = TypeRegistry::with_builtins();
        for format in [Format::Text, Format::Binary] {
            let c = registry.lookup(Oid(424242), format);
            assert!(Arc::ptr_eq(&c, registry.default_caster()));
        }
    }

    #[test]
    fn test_register_binds_every_id() {
        let mut registry = TypeRegistry::new();
        let c = caster("PAIR", &[Oid(9000), Oid(9001)]);
        registry.register(Arc::clone(&c), Format::Text).unwrap();
        assert!(Arc::ptr_eq(&registry.lookup(Oid(9000), Format::Text), &c));
        assert!(Arc::ptr_eq(&registry.lookup(Oid(9001), Format::Text), &c));
        assert_eq!(registry.len(Format::Text), 2);
    }

    #[test]
    fn test_last_registration_wins_per_id() {
        let mut registry = TypeRegistry::new();
        let c1 = caster("C1", &[Oid(1), Oid(2)]);
        let c2 = caster("C2", &[Oid(2), Oid(3)]);
        registry.register(Arc::clone(&c1), Format::Text).unwrap();
        registry.register(Arc::clone(&c2), Format::Text).unwrap();
        assert!(Arc::ptr_eq(&registry.lookup(Oid(1), Format::Text), &c1));
        assert!(Arc::ptr_eq(&registry.lookup(Oid(2), Format::Text), &c2));
        assert!(Arc::ptr_eq(&registry.lookup(Oid(3), Format::Text), &c2));
    }

    #[test]
    fn test_formats_are_independent() {
        let mut registry = TypeRegistry::new();
        let c = caster("TEXT_ONLY", &[Oid(7000)]);
        registry.register(Arc::clone(&c), Format::Text).unwrap();
        let binary = registry.lookup(Oid(7000), Format::Binary);
        assert!(Arc::ptr_eq(&binary, registry.default_caster()));
    }

    #[test]
    fn test_empty_ids_rejected() {
        let mut registry = TypeRegistry::new();
        let empty = Arc::new(Caster::new(Some("EMPTY"), std::iter::empty(), CastFn::Absent));
        let err = registry.register(empty, Format::Text).unwrap_err();
        assert!(matches!(err, Error::ProgrammingError(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_group_is_all_or_nothing() {
        let mut registry = TypeRegistry::new();
        let good = caster("GOOD", &[Oid(1)]);
        let bad = Arc::new(Caster::new(Some("BAD"), std::iter::empty(), CastFn::Absent));
        let group = CasterGroup::new("broken", vec![good, bad]);
        assert!(registry.register_group(&group, Format::Text).is_err());
        assert!(registry.get(Oid(1), Format::Text).is_none());
    }

    #[test]
    fn test_temporal_group_swap() {
        let mut registry = TypeRegistry::with_builtins();
        let ctx = CastContext::detached(Oid::DATE, Format::Text);
        let before = registry.lookup(Oid::DATE, Format::Text).cast(Some(b"2024-02-29"), &ctx).unwrap();
        assert!(matches!(before, Value::Date(_)));

        registry
            .register_group(&builtins::temporal_iso_group(), Format::Text)
            .unwrap();
        let after = registry.lookup(Oid::DATE, Format::Text).cast(Some(b"2024-02-29"), &ctx).unwrap();
        assert_eq!(after, Value::Text("2024-02-29".into()));
    }

    #[test]
    fn test_by_name() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.by_name("DATE").unwrap().accepts(Oid::DATE));
        assert!(registry.by_name("INTEGERARRAY").unwrap().accepts(Oid::INT4_ARRAY));
        assert!(registry.by_name("DATE_ISO").is_some());
        assert!(registry.by_name("NOPE").is_none());
    }

    #[test]
    fn test_resolve_prefers_overrides() {
        let mut local = TypeRegistry::new();
        let c = caster("LOCAL_INT", &[Oid::INT4]);
        local.register(Arc::clone(&c), Format::Text).unwrap();

        assert!(Arc::ptr_eq(&resolve(Oid::INT4, Format::Text, &[&local]), &c));
        let fallback = resolve(Oid::INT8, Format::Text, &[&local]);
        assert_eq!(fallback.name(), Some("LONGINTEGER"));
    }

    #[test]
    fn test_global_registration_is_visible() {
        let c = caster("GLOBAL_TEST", &[Oid(880_001)]);
        register_global(Arc::clone(&c), Format::Text).unwrap();
        assert!(Arc::ptr_eq(&global().lookup(Oid(880_001), Format::Text), &c));
    }
}
