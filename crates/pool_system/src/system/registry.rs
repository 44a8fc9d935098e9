//! Pool System - owner of every registered pool
//!
//! The pool system:
//! 1. Maps templates to their pool and instances to their template
//! 2. Registers persistent pools once at start
//! 3. Registers scene pools on scene load and reference-counts them per scene
//! 4. Tears down non-persistent pools once no loaded scene needs them
//!
//! Templates without a pool are still served: spawn instantiates directly and
//! despawn destroys.

use super::resolver::SceneId;
use super::settings::PoolSystemSettings;
use crate::host::{ObjectHandle, ObjectHost, Placement};
use crate::pooling::{ContainerMode, DespawnResult, ObserverId, Pool, PoolDefinition, PoolEventKind, PoolResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Registry-side bookkeeping of a pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolInfo {
    /// Never torn down by scene unloads
    pub persistent: bool,
    /// Loaded scenes that need the pool
    pub scenes: HashSet<SceneId>,
}

impl PoolInfo {
    /// Info of a pool kept for the whole process lifetime
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            scenes: HashSet::new(),
        }
    }

    /// Info of a pool needed by one scene
    pub fn for_scene(scene: SceneId) -> Self {
        Self {
            persistent: false,
            scenes: HashSet::from([scene]),
        }
    }
}

/// How a scene was loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Replaced every loaded scene
    Single,
    /// Loaded next to the scenes already loaded
    Additive,
}

struct Registered {
    pool: Pool,
    info: PoolInfo,
    observer: ObserverId,
}

/// Instance → template index shared with the pools' observers
type InstanceIndex = Arc<Mutex<HashMap<ObjectHandle, ObjectHandle>>>;

/// Registry of active pools
pub struct PoolSystem {
    settings: PoolSystemSettings,
    root: Option<ObjectHandle>,
    pools: HashMap<ObjectHandle, Registered>,
    /// Templates in registration order
    order: Vec<ObjectHandle>,
    instances: InstanceIndex,
    started: bool,
}

impl PoolSystem {
    /// Create an empty pool system
    pub fn new(settings: PoolSystemSettings) -> Self {
        Self {
            settings,
            root: None,
            pools: HashMap::new(),
            order: Vec::new(),
            instances: Arc::new(Mutex::new(HashMap::new())),
            started: false,
        }
    }

    /// Register the persistent definitions
    ///
    /// Runs once; later calls do nothing.
    pub fn start<H: ObjectHost + ?Sized>(&mut self, host: &mut H) {
        if self.started {
            return;
        }
        self.started = true;

        let definitions = self.settings.persistent_definitions().to_vec();
        log::info!("Starting pool system with {} persistent definitions", definitions.len());

        for definition in definitions {
            let Some(template) = template_of_definition(&definition) else {
                log::warn!("Skipping persistent pool definition without a template");
                continue;
            };
            if let Some(entry) = self.pools.get_mut(&template) {
                entry.info.persistent = true;
                continue;
            }
            // rejection is already logged
            let _ = self.register(host, Pool::new(definition), PoolInfo::persistent());
        }
    }

    /// Register a pool
    ///
    /// Rejected, handing the pool back, if it is already active, has no
    /// template, a pool for its template exists or it fails to activate.
    pub fn add_pool<H: ObjectHost + ?Sized>(
        &mut self,
        host: &mut H,
        pool: Pool,
        persistent: bool,
    ) -> Result<ObjectHandle, Box<Pool>> {
        let info = PoolInfo {
            persistent,
            scenes: HashSet::new(),
        };
        self.register(host, pool, info)
    }

    /// Deactivate and unregister the pool of `template`
    ///
    /// Works regardless of how many scenes still reference the pool.
    pub fn remove_pool<H: ObjectHost + ?Sized>(&mut self, host: &mut H, template: ObjectHandle) -> Option<Pool> {
        let Registered { mut pool, observer, .. } = self.pools.remove(&template)?;
        self.order.retain(|registered| *registered != template);

        pool.set_registered(false);
        pool.deactivate(host);
        pool.unsubscribe(observer);
        self.lock_instances().retain(|_, owner| *owner != template);

        log::info!("Removed pool '{}'", pool.label());
        Some(pool)
    }

    /// Spawn an instance of `template`, unpooled if it has no pool
    pub fn spawn<H: ObjectHost + ?Sized>(
        &mut self,
        host: &mut H,
        template: ObjectHandle,
        parent: Option<ObjectHandle>,
        placement: Placement,
    ) -> PoolResult<Option<ObjectHandle>> {
        match self.pools.get_mut(&template) {
            Some(entry) => entry.pool.spawn(host, parent, placement),
            None => Ok(Some(host.instantiate(template, parent, placement))),
        }
    }

    /// Return an instance to its pool
    ///
    /// Returns true only if the instance is now free in a pool. Instances
    /// with no pool, or whose pool no longer knows them, are destroyed.
    pub fn despawn<H: ObjectHost + ?Sized>(&mut self, host: &mut H, instance: ObjectHandle) -> bool {
        if let Some(entry) = self.template_of(instance).and_then(|template| self.pools.get_mut(&template)) {
            match entry.pool.despawn(host, instance) {
                DespawnResult::Despawned => return true,
                DespawnResult::Destroyed => return false,
                DespawnResult::Aborted => {}
            }
        }

        if host.is_alive(instance) {
            host.destroy(instance);
        }
        false
    }

    /// Mark a pool persistent or scene-bound; false if no pool exists
    pub fn set_persistent(&mut self, template: ObjectHandle, persistent: bool) -> bool {
        match self.pools.get_mut(&template) {
            Some(entry) => {
                entry.info.persistent = persistent;
                true
            }
            None => false,
        }
    }

    /// Template of a pooled instance
    pub fn template_of(&self, instance: ObjectHandle) -> Option<ObjectHandle> {
        self.lock_instances().get(&instance).copied()
    }

    /// Whether a pool exists for `template`
    pub fn contains_pool(&self, template: ObjectHandle) -> bool {
        self.pools.contains_key(&template)
    }

    /// Pool of `template`
    pub fn pool(&self, template: ObjectHandle) -> Option<&Pool> {
        self.pools.get(&template).map(|entry| &entry.pool)
    }

    /// Mutable pool of `template`
    pub fn pool_mut(&mut self, template: ObjectHandle) -> Option<&mut Pool> {
        self.pools.get_mut(&template).map(|entry| &mut entry.pool)
    }

    /// Registered pools in registration order
    pub fn pools(&self) -> impl Iterator<Item = &Pool> + '_ {
        self.order
            .iter()
            .filter_map(|template| self.pools.get(template))
            .map(|entry| &entry.pool)
    }

    /// Number of registered pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Bookkeeping of the pool of `template`
    pub fn pool_info(&self, template: ObjectHandle) -> Option<&PoolInfo> {
        self.pools.get(&template).map(|entry| &entry.info)
    }

    /// Drop the component caches of every pool
    pub fn clear_component_cache(&mut self) {
        for entry in self.pools.values_mut() {
            entry.pool.clear_component_cache();
        }
    }

    /// Settings in use
    pub const fn settings(&self) -> &PoolSystemSettings {
        &self.settings
    }

    /// Node every pool container is parented under
    pub const fn root(&self) -> Option<ObjectHandle> {
        self.root
    }

    /// Register or reference the pools a freshly loaded scene needs
    pub fn on_scene_loaded<H: ObjectHost + ?Sized>(&mut self, host: &mut H, scene: &SceneId, mode: LoadMode) {
        let definitions = self.settings.temporary_definitions(scene);
        log::info!("Scene '{scene}' loaded ({mode:?}) with {} pool definitions", definitions.len());

        for definition in definitions {
            let Some(template) = template_of_definition(&definition) else {
                log::debug!("Skipping pool definition without a template for scene '{scene}'");
                continue;
            };

            if let Some(entry) = self.pools.get_mut(&template) {
                entry.info.scenes.insert(scene.clone());
                continue;
            }
            let _ = self.register(host, Pool::new(definition), PoolInfo::for_scene(scene.clone()));
        }
    }

    /// Release the unloaded scene's references and remove orphaned pools
    pub fn on_scene_unloaded<H: ObjectHost + ?Sized>(&mut self, host: &mut H, scene: &SceneId) {
        let mut orphaned = Vec::new();
        for template in &self.order {
            let Some(entry) = self.pools.get_mut(template) else {
                continue;
            };
            if entry.info.scenes.remove(scene) && !entry.info.persistent && entry.info.scenes.is_empty() {
                orphaned.push(*template);
            }
        }

        log::info!("Scene '{scene}' unloaded, removing {} pools", orphaned.len());
        for template in orphaned {
            self.remove_pool(host, template);
        }
    }

    /// Remove every pool and the root node
    pub fn shutdown<H: ObjectHost + ?Sized>(&mut self, host: &mut H) {
        while let Some(template) = self.order.last().copied() {
            self.remove_pool(host, template);
        }
        if let Some(root) = self.root.take() {
            host.destroy(root);
        }
        self.started = false;
        log::info!("Pool system shut down");
    }

    fn register<H: ObjectHost + ?Sized>(
        &mut self,
        host: &mut H,
        mut pool: Pool,
        info: PoolInfo,
    ) -> Result<ObjectHandle, Box<Pool>> {
        if pool.is_active() {
            log::warn!("Rejected pool '{}': already active", pool.label());
            return Err(Box::new(pool));
        }
        let Some(template) = pool.template() else {
            log::warn!("Rejected pool without a template");
            return Err(Box::new(pool));
        };
        if self.pools.contains_key(&template) {
            log::warn!("Rejected pool '{}': template {template} already has a pool", pool.label());
            return Err(Box::new(pool));
        }

        let index = Arc::clone(&self.instances);
        let observer = pool.subscribe(Box::new(move |event| {
            let mut instances = index.lock().unwrap_or_else(PoisonError::into_inner);
            match event.kind {
                PoolEventKind::Instantiated => {
                    instances.insert(event.instance, event.template);
                }
                PoolEventKind::Destroyed | PoolEventKind::Expired => {
                    instances.remove(&event.instance);
                }
                PoolEventKind::Spawned | PoolEventKind::Despawned => {}
            }
        }));

        pool.set_container_mode(host, ContainerMode::Automatic, None);
        if let Err(err) = pool.activate(host) {
            log::warn!("Rejected pool for template {template}: {err}");
            pool.unsubscribe(observer);
            return Err(Box::new(pool));
        }

        let root = self.ensure_root(host);
        if let Some(container) = pool.container() {
            host.set_parent(container, Some(root), false);
        }
        pool.set_registered(true);

        log::info!(
            "Registered pool '{}' ({})",
            pool.label(),
            if info.persistent { "persistent" } else { "scene" }
        );
        self.pools.insert(template, Registered { pool, info, observer });
        self.order.push(template);
        Ok(template)
    }

    fn ensure_root<H: ObjectHost + ?Sized>(&mut self, host: &mut H) -> ObjectHandle {
        match self.root.filter(|root| host.is_alive(*root)) {
            Some(root) => root,
            None => {
                let root = host.create_container("Pool System");
                self.root = Some(root);
                root
            }
        }
    }

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectHandle, ObjectHandle>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PoolSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSystem")
            .field("pools", &self.order)
            .field("root", &self.root)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

fn template_of_definition(definition: &PoolDefinition) -> Option<ObjectHandle> {
    definition.resolved().ok().and_then(|resolved| resolved.template())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;
    use crate::pooling::SpawnFallback;
    use crate::system::resolver::{DefinitionMapping, DefinitionResolver};

    fn definition(template: ObjectHandle, preload: usize, max: usize) -> PoolDefinition {
        let mut definition = PoolDefinition::new(template);
        definition.set_preload_count(preload);
        definition.set_max_capacity(max);
        definition
    }

    fn scene_system(host: &mut MemoryHost) -> (PoolSystem, ObjectHandle) {
        let template = host.create_object("Crate");
        let settings = PoolSystemSettings {
            persistent: Vec::new(),
            resolver: DefinitionResolver {
                scenes: vec![DefinitionMapping::new(
                    ["Levels/A.scene", "Levels/B.scene"],
                    vec![definition(template, 2, 4)],
                )],
                ..DefinitionResolver::default()
            },
        };
        (PoolSystem::new(settings), template)
    }

    #[test]
    fn test_pool_survives_until_last_scene_unloads() {
        let mut host = MemoryHost::new();
        let (mut system, template) = scene_system(&mut host);
        let a = SceneId::from("Levels/A.scene");
        let b = SceneId::from("Levels/B.scene");

        system.on_scene_loaded(&mut host, &a, LoadMode::Single);
        system.on_scene_loaded(&mut host, &b, LoadMode::Additive);
        assert_eq!(system.pool_count(), 1);
        assert_eq!(system.pool_info(template).unwrap().scenes.len(), 2);

        system.on_scene_unloaded(&mut host, &a);
        assert!(system.pool(template).unwrap().is_active());

        let container = system.pool(template).unwrap().container().unwrap();
        system.on_scene_unloaded(&mut host, &b);
        assert!(!system.contains_pool(template));
        assert!(!host.is_alive(container));
    }

    #[test]
    fn test_unrelated_scene_unload_keeps_pool() {
        let mut host = MemoryHost::new();
        let (mut system, template) = scene_system(&mut host);

        system.on_scene_loaded(&mut host, &"Levels/A.scene".into(), LoadMode::Single);
        system.on_scene_unloaded(&mut host, &"Levels/C.scene".into());

        assert!(system.contains_pool(template));
    }

    #[test]
    fn test_persistent_pools_ignore_scene_unloads() {
        let mut host = MemoryHost::new();
        let (mut system, template) = scene_system(&mut host);
        let a = SceneId::from("Levels/A.scene");

        system.on_scene_loaded(&mut host, &a, LoadMode::Single);
        assert!(system.set_persistent(template, true));
        system.on_scene_unloaded(&mut host, &a);

        assert!(system.contains_pool(template));
        assert!(system.pool_info(template).unwrap().scenes.is_empty());
    }

    #[test]
    fn test_start_registers_persistent_definitions() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Bullet");
        let settings = PoolSystemSettings {
            persistent: vec![definition(template, 3, 3), PoolDefinition::default()],
            ..PoolSystemSettings::default()
        };
        let mut system = PoolSystem::new(settings);

        system.start(&mut host);
        system.start(&mut host);

        assert_eq!(system.pool_count(), 1);
        assert!(system.pool_info(template).unwrap().persistent);
        let container = system.pool(template).unwrap().container().unwrap();
        assert_eq!(host.parent(container), system.root());
    }

    #[test]
    fn test_add_pool_rejections() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Mine");
        let mut system = PoolSystem::new(PoolSystemSettings::default());

        assert_eq!(system.add_pool(&mut host, Pool::new(definition(template, 1, 1)), false).ok(), Some(template));
        assert!(system.add_pool(&mut host, Pool::new(definition(template, 1, 1)), false).is_err());
        assert!(system.add_pool(&mut host, Pool::new(PoolDefinition::default()), false).is_err());

        let other = host.create_object("Flare");
        let mut active = Pool::new(definition(other, 1, 1));
        active.activate(&mut host).unwrap();
        let rejected = system.add_pool(&mut host, active, false).unwrap_err();
        assert!(rejected.is_active());
        assert!(!system.contains_pool(other));
    }

    #[test]
    fn test_registered_pool_cannot_deactivate_itself() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Mine");
        let mut system = PoolSystem::new(PoolSystemSettings::default());
        system.add_pool(&mut host, Pool::new(definition(template, 1, 1)), false).unwrap();

        assert!(!system.pool_mut(template).unwrap().deactivate(&mut host));

        let pool = system.remove_pool(&mut host, template).unwrap();
        assert!(!pool.is_active());
        assert!(!pool.is_registered());
    }

    #[test]
    fn test_spawn_and_despawn_through_pool() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Mine");
        let mut system = PoolSystem::new(PoolSystemSettings::default());
        system.add_pool(&mut host, Pool::new(definition(template, 1, 1)), false).unwrap();

        let instance = system.spawn(&mut host, template, None, Placement::world()).unwrap().unwrap();
        assert_eq!(system.template_of(instance), Some(template));

        assert!(system.despawn(&mut host, instance));
        assert_eq!(system.pool(template).unwrap().free_count(), 1);
    }

    #[test]
    fn test_over_capacity_despawn_forgets_instance() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Mine");
        let mut pooled = definition(template, 0, 1);
        pooled.set_spawn_fallback(SpawnFallback::CreateNew);
        let mut system = PoolSystem::new(PoolSystemSettings::default());
        system.add_pool(&mut host, Pool::new(pooled), false).unwrap();

        let first = system.spawn(&mut host, template, None, Placement::world()).unwrap().unwrap();
        let second = system.spawn(&mut host, template, None, Placement::world()).unwrap().unwrap();

        assert!(!system.despawn(&mut host, second));
        assert!(!host.is_alive(second));
        assert_eq!(system.template_of(second), None);
        assert!(system.despawn(&mut host, first));
    }

    #[test]
    fn test_unpooled_templates_fall_back_to_host() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Debris");
        let mut system = PoolSystem::new(PoolSystemSettings::default());

        let instance = system.spawn(&mut host, template, None, Placement::world()).unwrap().unwrap();
        assert!(host.is_alive(instance));
        assert_eq!(system.template_of(instance), None);

        assert!(!system.despawn(&mut host, instance));
        assert!(!host.is_alive(instance));
    }

    #[test]
    fn test_remove_pool_forgets_instances_in_use() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Mine");
        let mut system = PoolSystem::new(PoolSystemSettings::default());
        system.add_pool(&mut host, Pool::new(definition(template, 2, 2)), false).unwrap();
        let instance = system.spawn(&mut host, template, None, Placement::world()).unwrap().unwrap();

        system.remove_pool(&mut host, template);

        assert_eq!(system.template_of(instance), None);
        assert!(host.is_alive(instance));
        assert!(!system.despawn(&mut host, instance));
        assert!(!host.is_alive(instance));
    }

    #[test]
    fn test_shutdown_removes_everything() {
        let mut host = MemoryHost::new();
        let (mut system, template) = scene_system(&mut host);
        system.on_scene_loaded(&mut host, &"Levels/A.scene".into(), LoadMode::Single);
        let root = system.root().unwrap();

        system.shutdown(&mut host);

        assert_eq!(system.pool_count(), 0);
        assert!(!system.contains_pool(template));
        assert!(!host.is_alive(root));
    }
}
