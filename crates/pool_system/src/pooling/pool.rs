//! Pool state machine
//!
//! A [`Pool`] owns the reusable instances of one template:
//!
//! ```text
//!             activate()                      spawn()
//!  Inactive ────────────▶ Active   free stack ───────▶ in use
//!     ▲                     │          ▲                  │
//!     └──── deactivate() ───┘          └──── despawn() ───┘
//! ```
//!
//! Capacity counts every live instance, free or in use. Spawn creates a new
//! instance when the free stack is empty and the pool is below capacity (or
//! has infinite capacity, or falls back to [`SpawnFallback::CreateNew`]).
//! Despawn keeps an instance only while the live count fits the capacity and
//! destroys it otherwise.
//!
//! Instances destroyed behind the pool's back are detected lazily: spawn skips
//! and forgets dead free instances, and [`Pool::clear_dead_references`] purges
//! them on demand.

use super::definition::{
    AdvancedOptions, NotificationMode, PoolDefinition, ResolveContext, SpawnFallback,
};
use super::error::{PoolError, PoolResult};
use super::events::{Observer, ObserverId, Observers, PoolEvent, PoolEventKind};
use crate::foundation::math::Vec3;
use crate::host::{ComponentId, Notification, NotificationTarget, ObjectHandle, ObjectHost, Placement};
use std::collections::{HashMap, HashSet};

/// Outcome of returning an instance to a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DespawnResult {
    /// The instance is (now) a free instance of the pool
    Despawned,
    /// The pool was over capacity and destroyed the instance
    Destroyed,
    /// The pool does not know the instance; nothing changed
    Aborted,
}

/// Who owns the node free instances are parented under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerMode {
    /// The pool creates and destroys its own container
    #[default]
    Automatic,
    /// The caller supplies the container (or none)
    Manual,
}

/// Lifetime totals of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances created
    pub instantiated: usize,
    /// Instances destroyed by the pool
    pub destroyed: usize,
    /// Successful spawns
    pub spawned: usize,
    /// Instances returned to the free stack
    pub despawned: usize,
    /// Instances found destroyed externally
    pub expired: usize,
    /// Highest live instance count
    pub peak_live: usize,
}

/// Template component → instance component
type ComponentCache = Option<HashMap<ComponentId, ComponentId>>;

/// Reusable instances of one template
#[derive(Debug)]
pub struct Pool {
    definition: PoolDefinition,
    bound_template: Option<ObjectHandle>,
    active: bool,
    registered: bool,
    container_mode: ContainerMode,
    container: Option<ObjectHandle>,
    label: String,
    default_scale: Vec3,
    free: Vec<ObjectHandle>,
    free_ids: HashSet<ObjectHandle>,
    live: HashMap<ObjectHandle, ComponentCache>,
    next_instance: usize,
    stats: PoolStats,
    observers: Observers,
}

impl Pool {
    /// Create an inactive pool
    ///
    /// The definition is resolved right away. A definition without a template
    /// is reported but still yields a pool; it just never activates.
    pub fn new(mut definition: PoolDefinition) -> Self {
        if let Err(err) = definition.resolve(true, ResolveContext::Runtime) {
            log::error!("Failed to resolve pool definition: {err}");
        }
        if definition.template().is_none() {
            log::error!("{}", PoolError::NullTemplate);
        }

        let label = definition
            .template()
            .map_or_else(|| String::from("<no template>"), |template| template.to_string());

        Self {
            definition,
            bound_template: None,
            active: false,
            registered: false,
            container_mode: ContainerMode::Automatic,
            container: None,
            label,
            default_scale: Vec3::new(1.0, 1.0, 1.0),
            free: Vec::new(),
            free_ids: HashSet::new(),
            live: HashMap::new(),
            next_instance: 0,
            stats: PoolStats::default(),
            observers: Observers::default(),
        }
    }

    /// Allocate the container and preload instances
    ///
    /// Returns `Ok(false)` if the pool is already active.
    pub fn activate<H: ObjectHost + ?Sized>(&mut self, host: &mut H) -> PoolResult<bool> {
        if self.active {
            return Ok(false);
        }

        self.definition.resolve(true, ResolveContext::Runtime).map_err(|err| {
            log::error!("Cannot activate pool {}: {err}", self.label);
            err
        })?;

        let Some(template) = self.definition.template().filter(|template| host.is_alive(*template)) else {
            log::error!("Cannot activate pool {}: {}", self.label, PoolError::NullTemplate);
            return Err(PoolError::NullTemplate);
        };

        self.bound_template = Some(template);
        self.label = host.name(template);
        self.default_scale = host.local_scale(template);
        self.next_instance = 0;

        if self.container_mode == ContainerMode::Automatic {
            self.container = Some(host.create_container(&format!("{} (Pool Container)", self.label)));
        }

        let preload = self.definition.effective_preload();
        for _ in 0..preload {
            let instance = self.instantiate(host, template, self.container, Placement::local());
            host.set_active(instance, false);
            self.push_free(instance);
        }

        self.active = true;
        log::info!("Activated pool '{}' with {preload} instances", self.label);
        Ok(true)
    }

    /// Destroy free instances and release runtime state
    ///
    /// Rejected while the pool is registered with a pool system; remove it
    /// from the system instead. Instances in use stay alive but untracked.
    pub fn deactivate<H: ObjectHost + ?Sized>(&mut self, host: &mut H) -> bool {
        if !self.active {
            return false;
        }
        if self.registered {
            log::warn!("Pool '{}' is registered; remove it from the pool system to deactivate it", self.label);
            return false;
        }

        while self.pop_and_destroy(host) {}

        if self.container_mode == ContainerMode::Automatic {
            if let Some(container) = self.container.take() {
                host.destroy(container);
            }
        }

        self.free_ids.clear();
        self.live.clear();
        self.active = false;
        log::info!("Deactivated pool '{}'", self.label);
        true
    }

    /// Take an instance out of the pool
    ///
    /// Returns `Ok(None)` when the pool is exhausted under
    /// [`SpawnFallback::ReturnNothing`].
    pub fn spawn<H: ObjectHost + ?Sized>(
        &mut self,
        host: &mut H,
        parent: Option<ObjectHandle>,
        placement: Placement,
    ) -> PoolResult<Option<ObjectHandle>> {
        if !self.active {
            log::warn!("Spawn on inactive pool '{}'", self.label);
            return Err(PoolError::InactivePool);
        }

        while let Some(instance) = self.free.pop() {
            self.free_ids.remove(&instance);

            if !host.is_alive(instance) {
                self.expire(instance);
                continue;
            }

            self.place(host, instance, parent, placement);
            self.finish_spawn(host, instance);
            return Ok(Some(instance));
        }

        let Some(template) = self.bound_template else {
            return Err(PoolError::NullTemplate);
        };

        if self.has_room() || self.definition.spawn_fallback() == SpawnFallback::CreateNew {
            let instance = self.instantiate(host, template, parent, placement);
            self.finish_spawn(host, instance);
            return Ok(Some(instance));
        }

        if self.definition.spawn_fallback() == SpawnFallback::ReportError {
            log::error!("Pool '{}' reached its capacity of {}", self.label, self.definition.max_capacity());
            return Err(PoolError::CapacityExceeded { template });
        }
        Ok(None)
    }

    /// Spawn an instance and return its counterpart of `template_component`
    pub fn spawn_component<H: ObjectHost + ?Sized>(
        &mut self,
        host: &mut H,
        template_component: ComponentId,
        parent: Option<ObjectHandle>,
        placement: Placement,
    ) -> PoolResult<Option<ComponentId>> {
        let Some(instance) = self.spawn(host, parent, placement)? else {
            return Ok(None);
        };
        Ok(self.component(host, instance, template_component))
    }

    /// Return an instance to the pool
    pub fn despawn<H: ObjectHost + ?Sized>(&mut self, host: &mut H, instance: ObjectHandle) -> DespawnResult {
        if self.free_ids.contains(&instance) {
            return DespawnResult::Despawned;
        }
        if !self.active || !self.live.contains_key(&instance) {
            return DespawnResult::Aborted;
        }
        if !host.is_alive(instance) {
            self.expire(instance);
            return DespawnResult::Destroyed;
        }

        self.publish(PoolEventKind::Despawned, instance);
        self.dispatch(host, instance, self.definition.despawn_notification());

        if self.definition.infinite_capacity() || self.live.len() <= self.definition.max_capacity() {
            host.set_active(instance, false);
            if self.definition.has_option(AdvancedOptions::RETURN_TO_CONTAINER) {
                host.set_parent(instance, self.container, false);
            }
            self.push_free(instance);
            self.stats.despawned += 1;
            return DespawnResult::Despawned;
        }

        self.destroy(host, instance);
        DespawnResult::Destroyed
    }

    /// Set the max capacity, trimming free instances while active
    pub fn set_max_capacity<H: ObjectHost + ?Sized>(&mut self, host: &mut H, capacity: usize) {
        self.definition.set_max_capacity(capacity);
        self.trim_excess(host);
    }

    /// Toggle infinite capacity, trimming free instances while active
    pub fn set_infinite_capacity<H: ObjectHost + ?Sized>(&mut self, host: &mut H, infinite: bool) {
        self.definition.set_infinite_capacity(infinite);
        self.trim_excess(host);
    }

    /// Set the preload count
    ///
    /// While active the free stack is filled up to the new count as far as
    /// capacity allows, and with `trim` excess free instances are destroyed.
    pub fn set_preload_count<H: ObjectHost + ?Sized>(&mut self, host: &mut H, count: usize, trim: bool) {
        self.definition.set_preload_count(count);
        if !self.active {
            return;
        }

        if let Some(template) = self.bound_template {
            while self.free.len() < count && self.has_room() {
                let instance = self.instantiate(host, template, self.container, Placement::local());
                host.set_active(instance, false);
                self.push_free(instance);
            }
        }

        if trim {
            while self.free.len() > count {
                self.pop_and_destroy(host);
            }
        }
    }

    /// Set the exhaustion policy
    pub fn set_spawn_fallback(&mut self, fallback: SpawnFallback) {
        self.definition.set_spawn_fallback(fallback);
    }

    /// Set or clear an advanced option
    pub fn set_option(&mut self, option: AdvancedOptions, enabled: bool) {
        self.definition.set_option(option, enabled);
    }

    /// Set the notification mode
    pub fn set_notification_mode(&mut self, mode: NotificationMode) {
        self.definition.set_notification_mode(mode);
    }

    /// Require or tolerate a missing notification receiver
    pub fn set_require_receiver(&mut self, require: bool) {
        self.definition.set_require_receiver(require);
    }

    /// Set the spawn notification name; empty restores the default
    pub fn set_spawn_notification(&mut self, name: &str) {
        self.definition.set_spawn_notification(name);
    }

    /// Set the despawn notification name; empty restores the default
    pub fn set_despawn_notification(&mut self, name: &str) {
        self.definition.set_despawn_notification(name);
    }

    /// Change who owns the container
    ///
    /// `container` is ignored for [`ContainerMode::Automatic`]. Ignored while
    /// the pool is registered with a pool system, or when `container` is one
    /// of the pool's own instances.
    pub fn set_container_mode<H: ObjectHost + ?Sized>(
        &mut self,
        host: &mut H,
        mode: ContainerMode,
        container: Option<ObjectHandle>,
    ) {
        if !self.active {
            self.container_mode = mode;
            self.container = match mode {
                ContainerMode::Automatic => None,
                ContainerMode::Manual => container,
            };
            return;
        }
        if self.registered {
            log::warn!("Pool '{}' is registered; its container is managed by the pool system", self.label);
            return;
        }
        if mode == ContainerMode::Manual && container.is_some_and(|container| self.live.contains_key(&container)) {
            log::warn!("Pool '{}' cannot use one of its own instances as container", self.label);
            return;
        }

        let return_to_container = self.definition.has_option(AdvancedOptions::RETURN_TO_CONTAINER);
        match (self.container_mode, mode) {
            (ContainerMode::Manual, ContainerMode::Automatic) => {
                let created = host.create_container(&format!("{} (Pool Container)", self.label));
                for instance in &self.free {
                    host.set_parent(*instance, Some(created), false);
                }
                self.container = Some(created);
            }
            (ContainerMode::Automatic, ContainerMode::Manual) => {
                if self.container != container {
                    // free instances must leave the old container before it is destroyed
                    let target = if return_to_container { container } else { None };
                    for instance in &self.free {
                        host.set_parent(*instance, target, false);
                    }
                    if let Some(previous) = self.container {
                        host.destroy(previous);
                    }
                }
                self.container = container;
            }
            (ContainerMode::Manual, ContainerMode::Manual) => {
                if self.container != container {
                    self.container = container;
                    if return_to_container {
                        for instance in &self.free {
                            host.set_parent(*instance, container, false);
                        }
                    }
                }
            }
            (ContainerMode::Automatic, ContainerMode::Automatic) => {}
        }
        self.container_mode = mode;
    }

    /// Component of `instance` matching `template_component` on the template
    ///
    /// Builds the instance's component cache on first use.
    pub fn component<H: ObjectHost + ?Sized>(
        &mut self,
        host: &H,
        instance: ObjectHandle,
        template_component: ComponentId,
    ) -> Option<ComponentId> {
        let template = self.bound_template?;
        let cache = self.live.get_mut(&instance)?;
        let table = cache.get_or_insert_with(|| build_component_cache(host, template, instance));
        table.get(&template_component).copied()
    }

    /// Drop every cached component table
    pub fn clear_component_cache(&mut self) {
        for cache in self.live.values_mut() {
            *cache = None;
        }
    }

    /// Drop the cached component table of one instance
    pub fn clear_component_cache_for(&mut self, instance: ObjectHandle) {
        if let Some(cache) = self.live.get_mut(&instance) {
            *cache = None;
        }
    }

    /// Forget every instance the host no longer knows
    pub fn clear_dead_references<H: ObjectHost + ?Sized>(&mut self, host: &H) {
        if !self.active {
            return;
        }

        let dead: Vec<ObjectHandle> = self.live.keys().copied().filter(|instance| !host.is_alive(*instance)).collect();
        if dead.is_empty() {
            return;
        }

        self.free.retain(|instance| host.is_alive(*instance));
        self.free_ids.retain(|instance| host.is_alive(*instance));
        for instance in dead {
            self.expire(instance);
        }
    }

    /// Register a lifecycle observer
    pub fn subscribe(&mut self, observer: Observer) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Remove a lifecycle observer
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// The (resolved) definition
    pub const fn definition(&self) -> &PoolDefinition {
        &self.definition
    }

    /// Template this pool clones
    pub const fn template(&self) -> Option<ObjectHandle> {
        self.definition.template()
    }

    /// Display name, the template's name once activated
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the pool is active
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a pool system owns this pool
    pub const fn is_registered(&self) -> bool {
        self.registered
    }

    pub(crate) fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    /// Container ownership
    pub const fn container_mode(&self) -> ContainerMode {
        self.container_mode
    }

    /// Node free instances are parented under
    pub const fn container(&self) -> Option<ObjectHandle> {
        self.container
    }

    /// Free instances, most recently returned last
    pub fn free_instances(&self) -> &[ObjectHandle] {
        &self.free
    }

    /// Number of free instances
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of live instances, free or in use
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of instances currently spawned
    pub fn in_use_count(&self) -> usize {
        self.live.len() - self.free.len()
    }

    /// Whether the pool tracks `instance`
    pub fn contains(&self, instance: ObjectHandle) -> bool {
        self.live.contains_key(&instance)
    }

    /// Lifetime totals
    pub const fn stats(&self) -> PoolStats {
        self.stats
    }

    fn has_room(&self) -> bool {
        self.definition.infinite_capacity() || self.live.len() < self.definition.max_capacity()
    }

    fn publish(&mut self, kind: PoolEventKind, instance: ObjectHandle) {
        if let Some(template) = self.bound_template {
            self.observers.publish(&PoolEvent { kind, template, instance });
        }
    }

    fn instantiate<H: ObjectHost + ?Sized>(
        &mut self,
        host: &mut H,
        template: ObjectHandle,
        parent: Option<ObjectHandle>,
        placement: Placement,
    ) -> ObjectHandle {
        let instance = host.instantiate(template, parent, placement);

        if self.definition.has_option(AdvancedOptions::RENAME_ON_CREATE) {
            self.next_instance += 1;
            host.set_name(instance, &format!("{} (Pool Instance #{})", self.label, self.next_instance));
        }

        let cache = self
            .definition
            .has_option(AdvancedOptions::BUILD_COMPONENT_CACHE)
            .then(|| build_component_cache(host, template, instance));
        self.live.insert(instance, cache);

        self.stats.instantiated += 1;
        self.stats.peak_live = self.stats.peak_live.max(self.live.len());
        log::debug!("Pool '{}' instantiated {instance}", self.label);
        self.publish(PoolEventKind::Instantiated, instance);
        instance
    }

    fn destroy<H: ObjectHost + ?Sized>(&mut self, host: &mut H, instance: ObjectHandle) {
        host.destroy(instance);
        self.live.remove(&instance);
        self.free_ids.remove(&instance);
        self.stats.destroyed += 1;
        log::debug!("Pool '{}' destroyed {instance}", self.label);
        self.publish(PoolEventKind::Destroyed, instance);
    }

    fn expire(&mut self, instance: ObjectHandle) {
        self.live.remove(&instance);
        self.free_ids.remove(&instance);
        self.stats.expired += 1;
        log::debug!("Pool '{}' dropped externally destroyed {instance}", self.label);
        self.publish(PoolEventKind::Expired, instance);
    }

    fn push_free(&mut self, instance: ObjectHandle) {
        self.free.push(instance);
        self.free_ids.insert(instance);
    }

    fn pop_and_destroy<H: ObjectHost + ?Sized>(&mut self, host: &mut H) -> bool {
        let Some(instance) = self.free.pop() else {
            return false;
        };
        if host.is_alive(instance) {
            self.destroy(host, instance);
        } else {
            self.expire(instance);
        }
        true
    }

    fn trim_excess<H: ObjectHost + ?Sized>(&mut self, host: &mut H) {
        if !self.active || self.definition.infinite_capacity() {
            return;
        }

        let before = self.free.len();
        while self.live.len() > self.definition.max_capacity() && self.pop_and_destroy(host) {}

        if before != self.free.len() {
            log::debug!("Trimmed pool '{}' from {before} to {} free instances", self.label, self.free.len());
        }
    }

    fn place<H: ObjectHost + ?Sized>(
        &self,
        host: &mut H,
        instance: ObjectHandle,
        parent: Option<ObjectHandle>,
        placement: Placement,
    ) {
        if self.definition.has_option(AdvancedOptions::RESET_SCALE_ON_SPAWN) {
            host.set_parent(instance, None, false);
            host.set_local_scale(instance, self.default_scale);
        }

        match placement {
            Placement::Attach { world_space } => host.set_parent(instance, parent, world_space),
            Placement::Pose { position, rotation } => {
                host.set_parent(instance, parent, true);
                host.set_world_pose(instance, position, rotation);
            }
        }
    }

    fn finish_spawn<H: ObjectHost + ?Sized>(&mut self, host: &mut H, instance: ObjectHandle) {
        host.set_active(instance, true);
        self.stats.spawned += 1;
        self.publish(PoolEventKind::Spawned, instance);
        self.dispatch(host, instance, self.definition.spawn_notification());
    }

    fn dispatch<H: ObjectHost + ?Sized>(&self, host: &mut H, instance: ObjectHandle, name: &str) {
        let target = match self.definition.notification_mode() {
            NotificationMode::None => return,
            NotificationMode::Direct => NotificationTarget::Single,
            NotificationMode::Broadcast => NotificationTarget::All,
        };

        let notification = Notification {
            target,
            name,
            require_receiver: self.definition.require_receiver(),
        };
        if let Err(err) = host.notify(instance, &notification) {
            log::warn!("Pool '{}': {err}", self.label);
        }
    }
}

fn build_component_cache<H: ObjectHost + ?Sized>(
    host: &H,
    template: ObjectHandle,
    instance: ObjectHandle,
) -> HashMap<ComponentId, ComponentId> {
    host.components(template)
        .into_iter()
        .zip(host.components(instance))
        .collect()
}
