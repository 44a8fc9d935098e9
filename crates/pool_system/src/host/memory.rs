//! Headless in-memory host
//!
//! A small scene graph backed by a generation-checked [`SlotMap`]: handles of
//! destroyed objects never alias new ones, so [`ObjectHost::is_alive`] is an
//! O(1) lookup. Used by the demo binary, by tests, and by servers that pool
//! objects without a rendering engine.

use super::{
    ComponentId, Notification, NotificationTarget, Notifier, NotifyError, ObjectHandle, ObjectHost, Placement,
};
use crate::foundation::math::{Quat, Transform, Vec3};
use crate::system::settings::TemplateCatalog;
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use std::collections::{HashMap, HashSet};

new_key_type! {
    struct NodeKey;
}

fn key_of(handle: ObjectHandle) -> NodeKey {
    NodeKey::from(KeyData::from_ffi(handle.raw()))
}

fn handle_of(key: NodeKey) -> ObjectHandle {
    ObjectHandle::from_raw(key.data().as_ffi())
}

#[derive(Debug, Clone)]
struct ComponentSlot {
    id: ComponentId,
    /// Notification names this component responds to
    receives: HashSet<String>,
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    active: bool,
    local: Transform,
    components: Vec<ComponentSlot>,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            active: true,
            local: Transform::identity(),
            components: Vec::new(),
        }
    }
}

/// A notification the host delivered to a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredNotification {
    /// Object the notification was sent to
    pub object: ObjectHandle,
    /// Component that handled it
    pub component: ComponentId,
    /// Message name
    pub name: String,
}

/// In-memory [`ObjectHost`] implementation
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: SlotMap<NodeKey, Node>,
    component_owners: HashMap<ComponentId, NodeKey>,
    next_component: u64,
    delivered: Vec<DeliveredNotification>,
    instantiated: usize,
    destroyed: usize,
}

impl MemoryHost {
    /// Create an empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root object, usable as a template or a parent
    pub fn create_object(&mut self, name: &str) -> ObjectHandle {
        handle_of(self.nodes.insert(Node::new(name.to_string())))
    }

    /// Attach a component that responds to the given notification names
    pub fn add_component(&mut self, object: ObjectHandle, receives: &[&str]) -> Option<ComponentId> {
        let key = key_of(object);
        if !self.nodes.contains_key(key) {
            return None;
        }
        let id = self.allocate_component(key);
        let node = &mut self.nodes[key];
        node.components.push(ComponentSlot {
            id,
            receives: receives.iter().map(|name| (*name).to_string()).collect(),
        });
        Some(id)
    }

    /// Create a child object under `parent`
    pub fn create_child(&mut self, parent: ObjectHandle, name: &str) -> Option<ObjectHandle> {
        let parent_key = key_of(parent);
        if !self.nodes.contains_key(parent_key) {
            return None;
        }
        let child = self.nodes.insert(Node::new(name.to_string()));
        self.attach(child, Some(parent_key));
        Some(handle_of(child))
    }

    /// Find a root object by name
    pub fn find_root(&self, name: &str) -> Option<ObjectHandle> {
        self.nodes
            .iter()
            .find(|(_, node)| node.parent.is_none() && node.name == name)
            .map(|(key, _)| handle_of(key))
    }

    /// Whether the object is active
    pub fn is_active(&self, object: ObjectHandle) -> bool {
        self.nodes.get(key_of(object)).is_some_and(|node| node.active)
    }

    /// Parent of an object
    pub fn parent(&self, object: ObjectHandle) -> Option<ObjectHandle> {
        self.nodes.get(key_of(object))?.parent.map(handle_of)
    }

    /// Children of an object
    pub fn children(&self, object: ObjectHandle) -> Vec<ObjectHandle> {
        self.nodes
            .get(key_of(object))
            .map(|node| node.children.iter().copied().map(handle_of).collect())
            .unwrap_or_default()
    }

    /// World transform of an object
    pub fn world_transform(&self, object: ObjectHandle) -> Option<Transform> {
        self.world_of(key_of(object))
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total objects created through [`ObjectHost::instantiate`]
    pub fn instantiated_count(&self) -> usize {
        self.instantiated
    }

    /// Total objects removed through [`ObjectHost::destroy`]
    pub fn destroyed_count(&self) -> usize {
        self.destroyed
    }

    /// Every notification delivered so far
    pub fn delivered(&self) -> &[DeliveredNotification] {
        &self.delivered
    }

    /// Forget delivered notifications
    pub fn clear_delivered(&mut self) {
        self.delivered.clear();
    }

    fn allocate_component(&mut self, owner: NodeKey) -> ComponentId {
        self.next_component += 1;
        let id = ComponentId::from_raw(self.next_component);
        self.component_owners.insert(id, owner);
        id
    }

    fn world_of(&self, key: NodeKey) -> Option<Transform> {
        let node = self.nodes.get(key)?;
        match node.parent {
            Some(parent) => Some(self.world_of(parent)?.combine(&node.local)),
            None => Some(node.local),
        }
    }

    /// Whether `key` is `ancestor` or sits below it
    fn is_within(&self, key: NodeKey, ancestor: NodeKey) -> bool {
        let mut current = Some(key);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes.get(node).and_then(|node| node.parent);
        }
        false
    }

    fn detach(&mut self, key: NodeKey) {
        let Some(parent) = self.nodes.get(key).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|child| *child != key);
        }
        if let Some(node) = self.nodes.get_mut(key) {
            node.parent = None;
        }
    }

    fn attach(&mut self, key: NodeKey, parent: Option<NodeKey>) {
        self.detach(key);
        let parent = parent.filter(|parent| self.nodes.contains_key(*parent));
        if let Some(parent) = parent {
            self.nodes[parent].children.push(key);
        }
        self.nodes[key].parent = parent;
    }

    /// Clone a node and its subtree, returning the new root (unparented)
    fn clone_subtree(&mut self, source: NodeKey) -> Option<NodeKey> {
        let original = self.nodes.get(source)?.clone();
        let clone = self.nodes.insert(Node {
            name: original.name.clone(),
            parent: None,
            children: Vec::new(),
            active: original.active,
            local: original.local,
            components: Vec::new(),
        });
        for slot in &original.components {
            let id = self.allocate_component(clone);
            self.nodes[clone].components.push(ComponentSlot {
                id,
                receives: slot.receives.clone(),
            });
        }
        for child in original.children {
            if let Some(child_clone) = self.clone_subtree(child) {
                self.attach(child_clone, Some(clone));
            }
        }
        Some(clone)
    }

    fn remove_subtree(&mut self, key: NodeKey) {
        if let Some(node) = self.nodes.remove(key) {
            for slot in &node.components {
                self.component_owners.remove(&slot.id);
            }
            for child in node.children {
                self.remove_subtree(child);
            }
        }
    }

    /// Receivers for a message in depth-first order
    fn collect_receivers(&self, key: NodeKey, name: &str, recurse: bool, out: &mut Vec<ComponentId>) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        out.extend(
            node.components
                .iter()
                .filter(|slot| slot.receives.contains(name))
                .map(|slot| slot.id),
        );
        if recurse {
            for child in &node.children {
                self.collect_receivers(*child, name, true, out);
            }
        }
    }
}

impl Notifier for MemoryHost {
    fn notify(&mut self, object: ObjectHandle, notification: &Notification<'_>) -> Result<(), NotifyError> {
        let key = key_of(object);
        if !self.nodes.contains_key(key) {
            return Err(NotifyError::Destroyed(object));
        }

        let mut receivers = Vec::new();
        match notification.target {
            NotificationTarget::Single => {
                self.collect_receivers(key, notification.name, false, &mut receivers);
                receivers.truncate(1);
            }
            NotificationTarget::All => self.collect_receivers(key, notification.name, true, &mut receivers),
        }

        if receivers.is_empty() && notification.require_receiver {
            return Err(NotifyError::MissingReceiver {
                name: notification.name.to_string(),
                object,
            });
        }

        self.delivered.extend(receivers.into_iter().map(|component| DeliveredNotification {
            object,
            component,
            name: notification.name.to_string(),
        }));
        Ok(())
    }
}

impl ObjectHost for MemoryHost {
    fn instantiate(&mut self, template: ObjectHandle, parent: Option<ObjectHandle>, placement: Placement) -> ObjectHandle {
        let template_key = key_of(template);
        let template_world = self.world_of(template_key).unwrap_or_default();
        let key = match self.clone_subtree(template_key) {
            Some(key) => key,
            // Cloning a destroyed template yields an empty object, like a missing prefab
            None => self.nodes.insert(Node::new(String::from("(Missing Template)"))),
        };
        let clone_name = format!("{}(Clone)", self.nodes[key].name);
        self.nodes[key].name = clone_name;
        self.instantiated += 1;

        let parent_key = parent.map(key_of).filter(|parent| self.nodes.contains_key(*parent));
        self.attach(key, parent_key);

        let parent_world = parent_key.and_then(|parent| self.world_of(parent));
        match (placement, parent_world) {
            (Placement::Attach { world_space: true }, Some(parent_world)) => {
                self.nodes[key].local = template_world.relative_to(&parent_world);
            }
            (Placement::Attach { .. }, _) => {}
            (Placement::Pose { position, rotation }, _) => {
                let scale = self.nodes[key].local.scale;
                let world = Transform { position, rotation, scale };
                if let Some(parent_world) = parent_world {
                    let mut local = world.relative_to(&parent_world);
                    local.scale = scale;
                    self.nodes[key].local = local;
                } else {
                    self.nodes[key].local = world;
                }
            }
        }

        handle_of(key)
    }

    fn create_container(&mut self, name: &str) -> ObjectHandle {
        self.create_object(name)
    }

    fn destroy(&mut self, object: ObjectHandle) {
        let key = key_of(object);
        if self.nodes.contains_key(key) {
            self.detach(key);
            self.remove_subtree(key);
            self.destroyed += 1;
        }
    }

    fn is_alive(&self, object: ObjectHandle) -> bool {
        self.nodes.contains_key(key_of(object))
    }

    fn set_active(&mut self, object: ObjectHandle, active: bool) {
        if let Some(node) = self.nodes.get_mut(key_of(object)) {
            node.active = active;
        }
    }

    fn set_parent(&mut self, object: ObjectHandle, parent: Option<ObjectHandle>, keep_world: bool) {
        let key = key_of(object);
        let Some(world) = self.world_of(key) else {
            return;
        };
        let parent_key = parent.map(key_of).filter(|parent| self.nodes.contains_key(*parent));
        if parent_key.is_some_and(|parent| self.is_within(parent, key)) {
            log::warn!("Refusing to parent {object} under itself or its own subtree");
            return;
        }
        self.attach(key, parent_key);

        if keep_world {
            let local = match parent_key.and_then(|parent| self.world_of(parent)) {
                Some(parent_world) => world.relative_to(&parent_world),
                None => world,
            };
            self.nodes[key].local = local;
        }
    }

    fn set_world_pose(&mut self, object: ObjectHandle, position: Vec3, rotation: Quat) {
        let key = key_of(object);
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        let scale = node.local.scale;
        let parent_world = node.parent.and_then(|parent| self.world_of(parent));
        let world = Transform { position, rotation, scale };
        self.nodes[key].local = match parent_world {
            Some(parent_world) => {
                let mut local = world.relative_to(&parent_world);
                local.scale = scale;
                local
            }
            None => world,
        };
    }

    fn local_scale(&self, object: ObjectHandle) -> Vec3 {
        self.nodes
            .get(key_of(object))
            .map_or_else(|| Vec3::new(1.0, 1.0, 1.0), |node| node.local.scale)
    }

    fn set_local_scale(&mut self, object: ObjectHandle, scale: Vec3) {
        if let Some(node) = self.nodes.get_mut(key_of(object)) {
            node.local.scale = scale;
        }
    }

    fn name(&self, object: ObjectHandle) -> String {
        self.nodes
            .get(key_of(object))
            .map(|node| node.name.clone())
            .unwrap_or_default()
    }

    fn set_name(&mut self, object: ObjectHandle, name: &str) {
        if let Some(node) = self.nodes.get_mut(key_of(object)) {
            node.name = name.to_string();
        }
    }

    fn components(&self, object: ObjectHandle) -> Vec<ComponentId> {
        self.nodes
            .get(key_of(object))
            .map(|node| node.components.iter().map(|slot| slot.id).collect())
            .unwrap_or_default()
    }

    fn component_owner(&self, component: ComponentId) -> Option<ObjectHandle> {
        self.component_owners.get(&component).copied().map(handle_of)
    }
}

impl TemplateCatalog for MemoryHost {
    fn find_template(&self, name: &str) -> Option<ObjectHandle> {
        self.find_root(name)
    }
}
