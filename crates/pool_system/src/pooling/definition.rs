//! Pool definitions and override resolution
//!
//! A [`PoolDefinition`] can inherit any of its eight setting categories from a
//! shared base ([`DefinitionAsset`]). Each category whose bit is clear in the
//! definition's [`Overrides`] mask is copied from the base's own resolved
//! value, so chains of any finite depth resolve transitively:
//!
//! ```text
//! Bullet ──base──▶ Projectile ──base──▶ Default
//!  overrides:        overrides:          overrides:
//!   TEMPLATE          INSTANCES           ALL
//! ```
//!
//! Base chains must be acyclic. [`DefinitionAsset::update`] refuses any edit
//! that would close a cycle and resolution reports
//! [`PoolError::InvalidDefinition`] if one is found anyway.

use super::error::{PoolError, PoolResult};
use crate::host::ObjectHandle;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Default spawn notification name
pub const DEFAULT_SPAWN_NOTIFICATION: &str = "OnSpawn";

/// Default despawn notification name
pub const DEFAULT_DESPAWN_NOTIFICATION: &str = "OnDespawn";

bitflags! {
    /// Setting categories a definition customizes away from its base
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Overrides: u8 {
        /// Template reference
        const TEMPLATE = 1 << 0;
        /// Preload count, max capacity and infinite capacity
        const INSTANCES = 1 << 1;
        /// Spawn fallback policy
        const SPAWN_FALLBACK = 1 << 2;
        /// Advanced option flags
        const ADVANCED_OPTIONS = 1 << 3;
        /// Notification mode
        const NOTIFICATION_MODE = 1 << 4;
        /// Whether notifications require a receiver
        const NOTIFICATION_OPTION = 1 << 5;
        /// Spawn notification name
        const SPAWN_NOTIFICATION = 1 << 6;
        /// Despawn notification name
        const DESPAWN_NOTIFICATION = 1 << 7;
    }
}

bitflags! {
    /// Optional per-instance behaviors
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AdvancedOptions: u8 {
        /// Build the component cache as soon as an instance is created
        const BUILD_COMPONENT_CACHE = 1 << 0;
        /// Rename instances to `"<template> (Pool Instance #n)"`
        const RENAME_ON_CREATE = 1 << 1;
        /// Restore the template's local scale on every spawn
        const RESET_SCALE_ON_SPAWN = 1 << 2;
        /// Reparent despawned instances back under the pool container
        const RETURN_TO_CONTAINER = 1 << 3;
    }
}

/// What spawn does when free instances are exhausted and capacity is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpawnFallback {
    /// Create a new instance anyway
    #[default]
    CreateNew,
    /// Produce no instance, silently
    ReturnNothing,
    /// Produce no instance and report [`PoolError::CapacityExceeded`]
    ReportError,
}

/// How spawn/despawn notifications reach an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NotificationMode {
    /// No notifications
    None,
    /// The single best-matching receiver
    #[default]
    Direct,
    /// Every receiver in the instance's component graph
    Broadcast,
}

/// Where a definition is being resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveContext {
    /// Authoring tools: base references always survive resolution
    Authoring,
    /// Running game: a one-shot resolution drops the base reference
    Runtime,
}

/// Pool configuration record
#[derive(Debug, Clone)]
pub struct PoolDefinition {
    template: Option<ObjectHandle>,
    preload_count: usize,
    max_capacity: usize,
    infinite_capacity: bool,
    spawn_fallback: SpawnFallback,
    advanced_options: AdvancedOptions,
    notification_mode: NotificationMode,
    require_receiver: bool,
    spawn_notification: String,
    despawn_notification: String,
    overrides: Overrides,
    base: Option<Arc<DefinitionAsset>>,
}

impl Default for PoolDefinition {
    fn default() -> Self {
        Self {
            template: None,
            preload_count: 1,
            max_capacity: 1,
            infinite_capacity: false,
            spawn_fallback: SpawnFallback::default(),
            advanced_options: AdvancedOptions::all(),
            notification_mode: NotificationMode::default(),
            require_receiver: false,
            spawn_notification: DEFAULT_SPAWN_NOTIFICATION.to_string(),
            despawn_notification: DEFAULT_DESPAWN_NOTIFICATION.to_string(),
            overrides: Overrides::all(),
            base: None,
        }
    }
}

impl PoolDefinition {
    /// Definition for a template with default settings
    pub fn new(template: ObjectHandle) -> Self {
        Self {
            template: Some(template),
            ..Self::default()
        }
    }

    /// Definition that inherits every category from `base`
    pub fn inheriting(base: Arc<DefinitionAsset>) -> Self {
        Self {
            overrides: Overrides::empty(),
            base: Some(base),
            ..Self::default()
        }
    }

    /// Template reference
    pub const fn template(&self) -> Option<ObjectHandle> {
        self.template
    }

    /// Instances created on activation
    pub const fn preload_count(&self) -> usize {
        self.preload_count
    }

    /// Maximum live instances, ignored with infinite capacity
    pub const fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Whether capacity is unbounded
    pub const fn infinite_capacity(&self) -> bool {
        self.infinite_capacity
    }

    /// Exhaustion policy
    pub const fn spawn_fallback(&self) -> SpawnFallback {
        self.spawn_fallback
    }

    /// Advanced option flags
    pub const fn advanced_options(&self) -> AdvancedOptions {
        self.advanced_options
    }

    /// Whether an advanced option is set
    pub const fn has_option(&self, option: AdvancedOptions) -> bool {
        self.advanced_options.contains(option)
    }

    /// Notification mode
    pub const fn notification_mode(&self) -> NotificationMode {
        self.notification_mode
    }

    /// Whether notifications require a receiver
    pub const fn require_receiver(&self) -> bool {
        self.require_receiver
    }

    /// Spawn notification name
    pub fn spawn_notification(&self) -> &str {
        &self.spawn_notification
    }

    /// Despawn notification name
    pub fn despawn_notification(&self) -> &str {
        &self.despawn_notification
    }

    /// Categories customized away from the base
    pub const fn overrides(&self) -> Overrides {
        self.overrides
    }

    /// Base definition, if any
    pub const fn base(&self) -> Option<&Arc<DefinitionAsset>> {
        self.base.as_ref()
    }

    /// Number of instances to create on activation
    pub fn effective_preload(&self) -> usize {
        if self.infinite_capacity {
            self.preload_count
        } else {
            self.preload_count.min(self.max_capacity)
        }
    }

    /// Set the template and mark it overridden
    pub fn set_template(&mut self, template: Option<ObjectHandle>) {
        self.template = template;
        self.overrides |= Overrides::TEMPLATE;
    }

    /// Set the preload count and mark instance limits overridden
    pub fn set_preload_count(&mut self, count: usize) {
        self.preload_count = count;
        self.overrides |= Overrides::INSTANCES;
    }

    /// Set the max capacity and mark instance limits overridden
    pub fn set_max_capacity(&mut self, capacity: usize) {
        self.max_capacity = capacity;
        self.overrides |= Overrides::INSTANCES;
    }

    /// Toggle infinite capacity and mark instance limits overridden
    pub fn set_infinite_capacity(&mut self, infinite: bool) {
        self.infinite_capacity = infinite;
        self.overrides |= Overrides::INSTANCES;
    }

    /// Set the exhaustion policy
    pub fn set_spawn_fallback(&mut self, fallback: SpawnFallback) {
        self.spawn_fallback = fallback;
        self.overrides |= Overrides::SPAWN_FALLBACK;
    }

    /// Replace every advanced option
    pub fn set_advanced_options(&mut self, options: AdvancedOptions) {
        self.advanced_options = options;
        self.overrides |= Overrides::ADVANCED_OPTIONS;
    }

    /// Set or clear one advanced option
    pub fn set_option(&mut self, option: AdvancedOptions, enabled: bool) {
        self.advanced_options.set(option, enabled);
        self.overrides |= Overrides::ADVANCED_OPTIONS;
    }

    /// Set the notification mode
    pub fn set_notification_mode(&mut self, mode: NotificationMode) {
        self.notification_mode = mode;
        self.overrides |= Overrides::NOTIFICATION_MODE;
    }

    /// Require or tolerate a missing receiver
    pub fn set_require_receiver(&mut self, require: bool) {
        self.require_receiver = require;
        self.overrides |= Overrides::NOTIFICATION_OPTION;
    }

    /// Set the spawn notification name; empty restores the default
    pub fn set_spawn_notification(&mut self, name: &str) {
        self.spawn_notification = if name.is_empty() { DEFAULT_SPAWN_NOTIFICATION } else { name }.to_string();
        self.overrides |= Overrides::SPAWN_NOTIFICATION;
    }

    /// Set the despawn notification name; empty restores the default
    pub fn set_despawn_notification(&mut self, name: &str) {
        self.despawn_notification = if name.is_empty() { DEFAULT_DESPAWN_NOTIFICATION } else { name }.to_string();
        self.overrides |= Overrides::DESPAWN_NOTIFICATION;
    }

    /// Replace the override mask
    pub fn set_overrides(&mut self, overrides: Overrides) {
        self.overrides = overrides;
    }

    /// Replace the base definition
    ///
    /// A definition held outside any asset cannot be part of a cycle; use
    /// [`DefinitionAsset::update`] to change an asset's base.
    pub fn set_base(&mut self, base: Option<Arc<DefinitionAsset>>) {
        self.base = base;
    }

    /// Copy every non-overridden category from the resolved base
    ///
    /// With `once` in [`ResolveContext::Runtime`] the base reference is
    /// dropped afterwards, so later calls cost nothing. On failure the
    /// definition is left unchanged.
    pub fn resolve(&mut self, once: bool, context: ResolveContext) -> PoolResult<()> {
        let Some(base) = self.base.clone() else {
            return Ok(());
        };

        if !self.overrides.is_all() {
            let resolved = base.resolved_from(&mut Vec::new())?;
            self.apply(&resolved);
        }

        if once && context == ResolveContext::Runtime {
            self.base = None;
        }
        Ok(())
    }

    /// Resolved copy of this definition, leaving `self` untouched
    pub fn resolved(&self) -> PoolResult<Self> {
        let mut copy = self.clone();
        copy.resolve(false, ResolveContext::Authoring)?;
        Ok(copy)
    }

    fn apply(&mut self, base: &Self) {
        let inherited = !self.overrides;

        if inherited.contains(Overrides::TEMPLATE) {
            self.template = base.template;
        }
        if inherited.contains(Overrides::INSTANCES) {
            self.preload_count = base.preload_count;
            self.max_capacity = base.max_capacity;
            self.infinite_capacity = base.infinite_capacity;
        }
        if inherited.contains(Overrides::SPAWN_FALLBACK) {
            self.spawn_fallback = base.spawn_fallback;
        }
        if inherited.contains(Overrides::ADVANCED_OPTIONS) {
            self.advanced_options = base.advanced_options;
        }
        if inherited.contains(Overrides::NOTIFICATION_MODE) {
            self.notification_mode = base.notification_mode;
        }
        if inherited.contains(Overrides::NOTIFICATION_OPTION) {
            self.require_receiver = base.require_receiver;
        }
        if inherited.contains(Overrides::SPAWN_NOTIFICATION) {
            self.spawn_notification.clone_from(&base.spawn_notification);
        }
        if inherited.contains(Overrides::DESPAWN_NOTIFICATION) {
            self.despawn_notification.clone_from(&base.despawn_notification);
        }
    }
}

/// A named, shareable definition other definitions can inherit from
#[derive(Debug)]
pub struct DefinitionAsset {
    name: String,
    definition: RwLock<PoolDefinition>,
}

impl DefinitionAsset {
    /// Wrap a definition as a shared asset
    pub fn new(name: impl Into<String>, definition: PoolDefinition) -> PoolResult<Arc<Self>> {
        let asset = Arc::new(Self {
            name: name.into(),
            definition: RwLock::new(PoolDefinition::default()),
        });
        asset.update(|current| *current = definition)?;
        Ok(asset)
    }

    /// Asset name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the stored (unresolved) definition
    pub fn definition(&self) -> PoolDefinition {
        self.definition.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Fully resolved copy of the stored definition
    pub fn resolved(&self) -> PoolResult<PoolDefinition> {
        self.resolved_from(&mut Vec::new())
    }

    /// Edit the stored definition
    ///
    /// The edit is rejected with [`PoolError::InvalidDefinition`] if the
    /// resulting base chain would lead back to this asset.
    pub fn update(&self, edit: impl FnOnce(&mut PoolDefinition)) -> PoolResult<()> {
        let mut candidate = self.definition();
        edit(&mut candidate);

        let mut next = candidate.base.clone();
        let mut hops = Vec::new();
        while let Some(asset) = next {
            if std::ptr::eq(Arc::as_ptr(&asset), self) || hops.contains(&Arc::as_ptr(&asset)) {
                log::error!("Rejected base definition for '{}': cycle through '{}'", self.name, asset.name);
                return Err(PoolError::InvalidDefinition(format!(
                    "base definition cycle through '{}'",
                    asset.name
                )));
            }
            hops.push(Arc::as_ptr(&asset));
            next = asset.definition().base;
        }

        *self.definition.write().unwrap_or_else(PoisonError::into_inner) = candidate;
        Ok(())
    }

    fn resolved_from(&self, visited: &mut Vec<*const Self>) -> PoolResult<PoolDefinition> {
        let this: *const Self = self;
        if visited.contains(&this) {
            return Err(PoolError::InvalidDefinition(format!(
                "base definition cycle through '{}'",
                self.name
            )));
        }
        visited.push(this);

        let mut definition = self.definition();
        if let Some(base) = definition.base.clone() {
            if !definition.overrides.is_all() {
                let resolved = base.resolved_from(visited)?;
                definition.apply(&resolved);
            }
        }
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u64) -> ObjectHandle {
        ObjectHandle::from_raw(raw)
    }

    #[test]
    fn test_defaults() {
        let definition = PoolDefinition::default();

        assert_eq!(definition.preload_count(), 1);
        assert_eq!(definition.max_capacity(), 1);
        assert_eq!(definition.spawn_fallback(), SpawnFallback::CreateNew);
        assert_eq!(definition.notification_mode(), NotificationMode::Direct);
        assert_eq!(definition.spawn_notification(), "OnSpawn");
        assert_eq!(definition.despawn_notification(), "OnDespawn");
        assert!(definition.overrides().is_all());
        assert!(definition.advanced_options().is_all());
    }

    #[test]
    fn test_inherits_cleared_categories_only() {
        let mut shared = PoolDefinition::new(handle(1));
        shared.set_max_capacity(8);
        shared.set_preload_count(4);
        shared.set_spawn_fallback(SpawnFallback::ReportError);
        let base = DefinitionAsset::new("Shared", shared).unwrap();

        let mut definition = PoolDefinition::inheriting(base);
        definition.set_template(Some(handle(2)));
        definition.resolve(false, ResolveContext::Runtime).unwrap();

        assert_eq!(definition.template(), Some(handle(2)));
        assert_eq!(definition.max_capacity(), 8);
        assert_eq!(definition.preload_count(), 4);
        assert_eq!(definition.spawn_fallback(), SpawnFallback::ReportError);
        assert!(definition.base().is_some());
    }

    #[test]
    fn test_resolution_is_transitive() {
        let mut root = PoolDefinition::new(handle(1));
        root.set_notification_mode(NotificationMode::Broadcast);
        root.set_despawn_notification("Recycle");
        let root = DefinitionAsset::new("Root", root).unwrap();

        let mut middle = PoolDefinition::inheriting(root);
        middle.set_max_capacity(3);
        let middle = DefinitionAsset::new("Middle", middle).unwrap();

        let leaf = PoolDefinition::inheriting(middle).resolved().unwrap();

        assert_eq!(leaf.template(), Some(handle(1)));
        assert_eq!(leaf.max_capacity(), 3);
        assert_eq!(leaf.notification_mode(), NotificationMode::Broadcast);
        assert_eq!(leaf.despawn_notification(), "Recycle");
    }

    #[test]
    fn test_instance_limits_are_one_category() {
        let mut shared = PoolDefinition::new(handle(1));
        shared.set_max_capacity(10);
        shared.set_infinite_capacity(true);
        let base = DefinitionAsset::new("Shared", shared).unwrap();

        let mut definition = PoolDefinition::inheriting(base);
        definition.set_preload_count(2);
        definition.resolve(false, ResolveContext::Runtime).unwrap();

        // overriding preload takes the whole category away from the base
        assert_eq!(definition.max_capacity(), 1);
        assert!(!definition.infinite_capacity());
    }

    #[test]
    fn test_resolve_once_drops_base_at_runtime_only() {
        let base = DefinitionAsset::new("Shared", PoolDefinition::new(handle(1))).unwrap();

        let mut authoring = PoolDefinition::inheriting(base.clone());
        authoring.resolve(true, ResolveContext::Authoring).unwrap();
        assert!(authoring.base().is_some());

        let mut runtime = PoolDefinition::inheriting(base);
        runtime.resolve(true, ResolveContext::Runtime).unwrap();
        assert!(runtime.base().is_none());
        assert_eq!(runtime.template(), Some(handle(1)));
    }

    #[test]
    fn test_cycle_is_rejected_on_update() {
        let a = DefinitionAsset::new("A", PoolDefinition::default()).unwrap();
        let b = DefinitionAsset::new("B", PoolDefinition::inheriting(a.clone())).unwrap();

        let result = a.update(|definition| definition.set_base(Some(b.clone())));
        assert!(matches!(result, Err(PoolError::InvalidDefinition(_))));
        assert!(a.definition().base().is_none());

        let result = a.update(|definition| definition.set_base(Some(a.clone())));
        assert!(matches!(result, Err(PoolError::InvalidDefinition(_))));
    }

    #[test]
    fn test_empty_notification_name_restores_default() {
        let mut definition = PoolDefinition::default();
        definition.set_spawn_notification("Wake");
        definition.set_spawn_notification("");

        assert_eq!(definition.spawn_notification(), DEFAULT_SPAWN_NOTIFICATION);
    }

    #[test]
    fn test_effective_preload_respects_capacity() {
        let mut definition = PoolDefinition::new(handle(1));
        definition.set_preload_count(5);
        definition.set_max_capacity(2);
        assert_eq!(definition.effective_preload(), 2);

        definition.set_infinite_capacity(true);
        assert_eq!(definition.effective_preload(), 5);
    }
}
