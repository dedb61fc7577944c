//! Per-module parameter definitions and routing.

use std::collections::HashMap;

use super::pattern::{validate_template, WirePattern};
use super::{ParameterKey, ParameterMode, ParameterType, ParameterValue, RegisteredParameter};
use crate::error::{HostError, HostResult};

/// One declared parameter.
#[derive(Debug, Clone)]
pub struct ParameterDefinition {
    /// Logical key, unique within the module.
    pub key: ParameterKey,
    /// Wire name the module shipped with.
    pub default_name: String,
    /// Wire name currently in effect (may be user-edited).
    pub wire_name: String,
    /// Direction relative to the external protocol.
    pub mode: ParameterMode,
    /// Declared value type.
    pub value_type: ParameterType,
    /// Display title.
    pub title: String,
    /// Display description.
    pub description: String,
}

impl ParameterDefinition {
    /// Whether the wire name differs from the module's default.
    pub fn is_renamed(&self) -> bool {
        self.wire_name != self.default_name
    }
}

/// Result of routing one inbound message through a registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// No readable definition matched the address.
    Unhandled,
    /// A definition matched but the value had the wrong type.
    Rejected {
        /// Key of the matched definition.
        key: ParameterKey,
        /// Type the definition declares.
        expected: ParameterType,
        /// Type that arrived.
        received: ParameterType,
    },
    /// The message should be delivered to the module.
    Dispatched(RegisteredParameter),
}

/// Maps logical keys to wire names and routes traffic between them.
///
/// Definitions are kept in registration order; inbound routing picks the
/// first definition whose compiled pattern matches. The match caches are only
/// populated by [`rebuild_cache`](Self::rebuild_cache), which the module
/// wrapper calls on every start.
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    definitions: Vec<ParameterDefinition>,
    /// wire name -> logical key
    name_to_key: HashMap<String, ParameterKey>,
    /// wire name -> compiled pattern
    name_to_pattern: HashMap<String, WirePattern>,
}

impl ParameterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter.
    ///
    /// Fails with [`HostError::DuplicateKey`] if `key` is already registered,
    /// leaving the existing definition untouched.
    pub fn register(
        &mut self,
        key: impl Into<ParameterKey>,
        default_name: impl Into<String>,
        mode: ParameterMode,
        value_type: ParameterType,
    ) -> HostResult<&mut ParameterDefinition> {
        let key = key.into();
        let default_name = default_name.into();

        if self.contains(&key) {
            return Err(HostError::DuplicateKey(key.to_string()));
        }
        validate_template(&default_name)?;

        self.definitions.push(ParameterDefinition {
            title: key.to_string(),
            description: String::new(),
            key,
            wire_name: default_name.clone(),
            default_name,
            mode,
            value_type,
        });
        let index = self.definitions.len() - 1;
        Ok(&mut self.definitions[index])
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &ParameterKey) -> bool {
        self.get(key).is_some()
    }

    /// Look up a definition.
    pub fn get(&self, key: &ParameterKey) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|d| &d.key == key)
    }

    /// Look up a definition by the string form of its key.
    pub fn get_by_name(&self, key: &str) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|d| d.key.as_str() == key)
    }

    /// All definitions in registration order.
    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Change the wire name of `key`. The match caches are rebuilt.
    pub fn set_wire_name(&mut self, key: &str, wire_name: impl Into<String>) -> HostResult<()> {
        let wire_name = wire_name.into();
        validate_template(&wire_name)?;

        let definition = self
            .definitions
            .iter_mut()
            .find(|d| d.key.as_str() == key)
            .ok_or_else(|| HostError::UnregisteredKey(key.to_string()))?;
        definition.wire_name = wire_name;

        if !self.name_to_pattern.is_empty() {
            self.rebuild_cache()?;
        }
        Ok(())
    }

    /// Restore the default wire name of `key`.
    pub fn reset_wire_name(&mut self, key: &str) -> HostResult<()> {
        let default = self
            .get_by_name(key)
            .map(|d| d.default_name.clone())
            .ok_or_else(|| HostError::UnregisteredKey(key.to_string()))?;
        self.set_wire_name(key, default)
    }

    /// Recompile every definition's current wire name.
    ///
    /// If two definitions share the same wire name, the later one owns the
    /// name-to-key entry; which key such a collision resolves to is not part
    /// of the routing contract.
    pub fn rebuild_cache(&mut self) -> HostResult<()> {
        self.name_to_key.clear();
        self.name_to_pattern.clear();

        for definition in &self.definitions {
            let pattern = WirePattern::compile(&definition.wire_name)?;
            self.name_to_key
                .insert(definition.wire_name.clone(), definition.key.clone());
            self.name_to_pattern
                .insert(definition.wire_name.clone(), pattern);
        }
        Ok(())
    }

    /// Route an inbound message.
    ///
    /// Unmatched addresses and write-only definitions are `Unhandled`; a type
    /// mismatch is `Rejected`. Nothing here fires module callbacks.
    pub fn route_inbound(&self, address: &str, value: &ParameterValue) -> RouteOutcome {
        let matched = self.definitions.iter().find(|d| {
            self.name_to_pattern
                .get(&d.wire_name)
                .is_some_and(|p| p.is_match(address))
        });
        let Some(matched) = matched else {
            return RouteOutcome::Unhandled;
        };

        let Some(key) = self.name_to_key.get(&matched.wire_name) else {
            return RouteOutcome::Unhandled;
        };
        let Some(definition) = self.get(key) else {
            return RouteOutcome::Unhandled;
        };

        if !definition.mode.can_read() {
            return RouteOutcome::Unhandled;
        }

        if !value.is_type(definition.value_type) {
            return RouteOutcome::Rejected {
                key: definition.key.clone(),
                expected: definition.value_type,
                received: value.value_type(),
            };
        }

        RouteOutcome::Dispatched(RegisteredParameter {
            key: definition.key.clone(),
            value: value.clone(),
            address: address.to_string(),
        })
    }

    /// Resolve the wire name to send `value` on.
    ///
    /// The configured name is returned verbatim: a wildcard in an outbound
    /// name is not expanded.
    pub fn resolve_outbound(
        &self,
        key: &ParameterKey,
        value: ParameterValue,
    ) -> HostResult<(String, ParameterValue)> {
        let definition = self
            .get(key)
            .ok_or_else(|| HostError::UnregisteredKey(key.to_string()))?;
        Ok((definition.wire_name.clone(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOGGLE: ParameterKey = ParameterKey::from_static("Toggle");
    const FACE: ParameterKey = ParameterKey::from_static("Face");

    fn started(mut registry: ParameterRegistry) -> ParameterRegistry {
        registry.rebuild_cache().unwrap();
        registry
    }

    #[test]
    fn test_duplicate_key_keeps_first_registration() {
        let mut r = ParameterRegistry::new();
        r.register(TOGGLE, "switch", ParameterMode::Write, ParameterType::Bool)
            .unwrap();

        let err = r
            .register(TOGGLE, "other", ParameterMode::Read, ParameterType::Int)
            .unwrap_err();
        assert!(matches!(err, HostError::DuplicateKey(k) if k == "Toggle"));

        assert_eq!(r.len(), 1);
        let d = r.get(&TOGGLE).unwrap();
        assert_eq!(d.wire_name, "switch");
        assert_eq!(d.mode, ParameterMode::Write);
        assert_eq!(d.value_type, ParameterType::Bool);
    }

    #[test]
    fn test_resolve_outbound_returns_configured_name_verbatim() {
        let mut r = ParameterRegistry::new();
        r.register(TOGGLE, "switch", ParameterMode::Write, ParameterType::Bool)
            .unwrap();

        let (name, value) = r.resolve_outbound(&TOGGLE, true.into()).unwrap();
        assert_eq!(name, "switch");
        assert_eq!(value, ParameterValue::Bool(true));

        r.set_wire_name("Toggle", "sw/*").unwrap();
        let (name, _) = r.resolve_outbound(&TOGGLE, true.into()).unwrap();
        assert_eq!(name, "sw/*");
    }

    #[test]
    fn test_resolve_outbound_unregistered() {
        let r = ParameterRegistry::new();
        let err = r.resolve_outbound(&TOGGLE, true.into()).unwrap_err();
        assert!(matches!(err, HostError::UnregisteredKey(_)));
    }

    #[test]
    fn test_route_before_cache_build_is_unhandled() {
        let mut r = ParameterRegistry::new();
        r.register(FACE, "avatar/parameters/*", ParameterMode::Read, ParameterType::Float)
            .unwrap();
        let outcome = r.route_inbound("avatar/parameters/FaceFree", &0.5f32.into());
        assert_eq!(outcome, RouteOutcome::Unhandled);
    }

    #[test]
    fn test_route_dispatches_matching_readable_definition() {
        let mut r = ParameterRegistry::new();
        r.register(FACE, "avatar/parameters/*", ParameterMode::Read, ParameterType::Float)
            .unwrap();
        let r = started(r);

        match r.route_inbound("avatar/parameters/FaceFree", &0.5f32.into()) {
            RouteOutcome::Dispatched(p) => {
                assert_eq!(p.key, FACE);
                assert_eq!(p.address, "avatar/parameters/FaceFree");
                assert_eq!(p.as_float(), Some(0.5));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            r.route_inbound("avatar/parameters/Face/Free", &0.5f32.into()),
            RouteOutcome::Unhandled
        );
    }

    #[test]
    fn test_route_type_mismatch_is_rejected() {
        let mut r = ParameterRegistry::new();
        r.register(FACE, "face", ParameterMode::ReadWrite, ParameterType::Float)
            .unwrap();
        let r = started(r);

        assert_eq!(
            r.route_inbound("face", &ParameterValue::Int(1)),
            RouteOutcome::Rejected {
                key: FACE,
                expected: ParameterType::Float,
                received: ParameterType::Int,
            }
        );
    }

    #[test]
    fn test_route_write_only_is_unhandled() {
        let mut r = ParameterRegistry::new();
        r.register(TOGGLE, "switch", ParameterMode::Write, ParameterType::Bool)
            .unwrap();
        let r = started(r);
        assert_eq!(r.route_inbound("switch", &true.into()), RouteOutcome::Unhandled);
    }

    #[test]
    fn test_first_matching_definition_wins() {
        let mut r = ParameterRegistry::new();
        r.register("Wildcard", "avatar/parameters/*", ParameterMode::Read, ParameterType::Bool)
            .unwrap();
        r.register("Exact", "avatar/parameters/Mute", ParameterMode::Read, ParameterType::Bool)
            .unwrap();
        let r = started(r);

        match r.route_inbound("avatar/parameters/Mute", &true.into()) {
            RouteOutcome::Dispatched(p) => assert_eq!(p.key.as_str(), "Wildcard"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_colliding_literal_names_resolve_to_a_single_key() {
        // Two definitions configured to the same literal name: only one of them
        // ever receives the traffic, never both.
        let mut r = ParameterRegistry::new();
        r.register("A", "same", ParameterMode::Read, ParameterType::Bool)
            .unwrap();
        r.register("B", "same", ParameterMode::Read, ParameterType::Bool)
            .unwrap();
        let r = started(r);

        let outcome = r.route_inbound("same", &true.into());
        let RouteOutcome::Dispatched(p) = outcome else {
            panic!("expected a dispatch");
        };
        assert!(p.key.as_str() == "A" || p.key.as_str() == "B");
    }

    #[test]
    fn test_rename_rebuilds_cache_after_start() {
        let mut r = ParameterRegistry::new();
        r.register(TOGGLE, "switch", ParameterMode::Read, ParameterType::Bool)
            .unwrap();
        let mut r = started(r);

        r.set_wire_name("Toggle", "controls/*").unwrap();
        assert_eq!(r.route_inbound("switch", &true.into()), RouteOutcome::Unhandled);
        assert!(matches!(
            r.route_inbound("controls/power", &true.into()),
            RouteOutcome::Dispatched(_)
        ));

        r.reset_wire_name("Toggle").unwrap();
        assert!(!r.get(&TOGGLE).unwrap().is_renamed());
        assert!(matches!(
            r.route_inbound("switch", &true.into()),
            RouteOutcome::Dispatched(_)
        ));
    }

    #[test]
    fn test_rename_rejects_bad_templates() {
        let mut r = ParameterRegistry::new();
        r.register(TOGGLE, "switch", ParameterMode::Read, ParameterType::Bool)
            .unwrap();
        assert!(matches!(
            r.set_wire_name("Toggle", "*/*"),
            Err(HostError::InvalidWireName { .. })
        ));
        assert!(matches!(
            r.set_wire_name("Missing", "x"),
            Err(HostError::UnregisteredKey(_))
        ));
        assert_eq!(r.get(&TOGGLE).unwrap().wire_name, "switch");
    }
}
