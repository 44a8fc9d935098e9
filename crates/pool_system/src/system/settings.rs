//! Pool system settings
//!
//! [`PoolSystemSettings`] is what the pool system consumes: the persistent
//! definitions and a [`DefinitionResolver`] for scene-specific ones.
//!
//! [`SettingsDocument`] is its persisted form. Definitions are named, may
//! name a base definition to inherit from, and reference templates by name.
//! Collections group definitions and are what scene mappings, defaults and
//! the persistent set refer to:
//!
//! ```text
//! definitions ──▶ collections ──▶ persistent / defaults / folders / scenes
//!      │
//!      └── template names, bound through a TemplateCatalog
//! ```
//!
//! A definition with a base inherits every setting it leaves out. Setting any
//! of `preload_count`, `max_capacity` or `infinite_capacity` overrides all
//! three; the ones left out take their default values.

use super::resolver::{DefinitionMapping, DefinitionResolver, SceneId, SearchMode, SearchPriority};
use crate::config::Config;
use crate::host::ObjectHandle;
use crate::pooling::{
    AdvancedOptions, DefinitionAsset, NotificationMode, Overrides, PoolDefinition, PoolError, PoolResult,
    SpawnFallback,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Looks up templates by name
pub trait TemplateCatalog {
    /// Template registered under `name`
    fn find_template(&self, name: &str) -> Option<ObjectHandle>;
}

impl TemplateCatalog for HashMap<String, ObjectHandle> {
    fn find_template(&self, name: &str) -> Option<ObjectHandle> {
        self.get(name).copied()
    }
}

/// Runtime settings of a pool system
#[derive(Debug, Clone, Default)]
pub struct PoolSystemSettings {
    /// Definitions registered at start and never torn down by scene unloads
    pub persistent: Vec<PoolDefinition>,
    /// Scene-specific definition lookup
    pub resolver: DefinitionResolver,
}

impl PoolSystemSettings {
    /// Load a settings document and bind its templates
    pub fn load(path: impl AsRef<Path>, catalog: &impl TemplateCatalog) -> PoolResult<Self> {
        SettingsDocument::load_from_file(path)?.build(catalog)
    }

    /// Definitions registered for the whole process lifetime
    pub fn persistent_definitions(&self) -> &[PoolDefinition] {
        &self.persistent
    }

    /// Definitions a newly loaded scene needs
    pub fn temporary_definitions(&self, scene: &SceneId) -> Vec<PoolDefinition> {
        self.resolver.resolve(scene)
    }
}

/// Persisted pool definition
///
/// Every field left out is inherited from `base`, or takes its default value
/// when there is no base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionEntry {
    /// Unique definition name
    pub name: String,
    /// Name of the definition to inherit from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Template name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Instances created on activation; negative values count as zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preload_count: Option<i64>,
    /// Maximum live instances; negative values count as zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<i64>,
    /// Unbounded capacity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infinite_capacity: Option<bool>,
    /// Exhaustion policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_fallback: Option<SpawnFallback>,
    /// Advanced option flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_options: Option<AdvancedOptions>,
    /// Notification mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_mode: Option<NotificationMode>,
    /// Whether notifications require a receiver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_receiver: Option<bool>,
    /// Spawn notification name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_notification: Option<String>,
    /// Despawn notification name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub despawn_notification: Option<String>,
}

/// Named group of definitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionEntry {
    /// Unique collection name
    pub name: String,
    /// Definition names, in order
    pub definitions: Vec<String>,
}

/// Folder prefixes or scene ids mapped to collections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingEntry {
    /// Folder prefixes or scene ids
    pub keys: Vec<String>,
    /// Collection names, in order
    pub collections: Vec<String>,
}

/// Persisted pool system settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDocument {
    /// Named definitions
    pub definitions: Vec<DefinitionEntry>,
    /// Named collections of definitions
    pub collections: Vec<CollectionEntry>,
    /// Collections registered for the whole process lifetime
    pub persistent: Vec<String>,
    /// Search run first
    pub priority: SearchPriority,
    /// First hit or every hit
    pub mode: SearchMode,
    /// Folder-prefix mappings
    pub folders: Vec<MappingEntry>,
    /// Exact-scene mappings
    pub scenes: Vec<MappingEntry>,
    /// Collections used when no mapping matches
    pub defaults: Vec<String>,
}

impl Config for SettingsDocument {}

impl SettingsDocument {
    /// Bind templates and build runtime settings
    pub fn build(&self, catalog: &impl TemplateCatalog) -> PoolResult<PoolSystemSettings> {
        let mut builder = AssetBuilder {
            entries: HashMap::new(),
            assets: HashMap::new(),
            in_progress: Vec::new(),
            catalog,
        };
        for entry in &self.definitions {
            if builder.entries.insert(entry.name.as_str(), entry).is_some() {
                return Err(invalid(format!("duplicate definition '{}'", entry.name)));
            }
        }
        for entry in &self.definitions {
            builder.asset(&entry.name)?;
        }

        let mut collections: HashMap<&str, Vec<PoolDefinition>> = HashMap::new();
        for collection in &self.collections {
            let definitions = collection
                .definitions
                .iter()
                .map(|name| builder.asset(name).map(PoolDefinition::inheriting))
                .collect::<PoolResult<Vec<_>>>()?;
            if collections.insert(collection.name.as_str(), definitions).is_some() {
                return Err(invalid(format!("duplicate collection '{}'", collection.name)));
            }
        }

        let gather = |names: &[String]| -> PoolResult<Vec<PoolDefinition>> {
            let mut definitions = Vec::new();
            for name in names {
                let collection = collections
                    .get(name.as_str())
                    .ok_or_else(|| invalid(format!("unknown collection '{name}'")))?;
                definitions.extend(collection.iter().cloned());
            }
            Ok(definitions)
        };
        let mappings = |entries: &[MappingEntry]| -> PoolResult<Vec<DefinitionMapping>> {
            entries
                .iter()
                .map(|entry| -> PoolResult<DefinitionMapping> {
                    Ok(DefinitionMapping::new(entry.keys.iter().cloned(), gather(&entry.collections)?))
                })
                .collect()
        };

        let settings = PoolSystemSettings {
            persistent: gather(&self.persistent)?,
            resolver: DefinitionResolver {
                priority: self.priority,
                mode: self.mode,
                folders: mappings(&self.folders)?,
                scenes: mappings(&self.scenes)?,
                defaults: gather(&self.defaults)?,
            },
        };

        log::info!(
            "Built pool settings: {} definitions, {} persistent, {} folder and {} scene mappings",
            self.definitions.len(),
            settings.persistent.len(),
            settings.resolver.folders.len(),
            settings.resolver.scenes.len()
        );
        Ok(settings)
    }
}

fn invalid(message: String) -> PoolError {
    log::error!("Invalid pool settings: {message}");
    PoolError::InvalidDefinition(message)
}

fn clamp_count(value: i64) -> usize {
    usize::try_from(value.max(0)).unwrap_or(usize::MAX)
}

struct AssetBuilder<'a, C: TemplateCatalog> {
    entries: HashMap<&'a str, &'a DefinitionEntry>,
    assets: HashMap<&'a str, Arc<DefinitionAsset>>,
    in_progress: Vec<&'a str>,
    catalog: &'a C,
}

impl<'a, C: TemplateCatalog> AssetBuilder<'a, C> {
    fn asset(&mut self, name: &str) -> PoolResult<Arc<DefinitionAsset>> {
        if let Some(asset) = self.assets.get(name) {
            return Ok(Arc::clone(asset));
        }
        let Some(&entry) = self.entries.get(name) else {
            return Err(invalid(format!("unknown definition '{name}'")));
        };
        if self.in_progress.contains(&entry.name.as_str()) {
            return Err(invalid(format!("base definition cycle through '{name}'")));
        }

        self.in_progress.push(entry.name.as_str());
        let base = entry.base.as_deref().map(|base| self.asset(base)).transpose();
        self.in_progress.pop();

        let definition = self.definition(entry, base?)?;
        let asset = DefinitionAsset::new(entry.name.clone(), definition)?;
        self.assets.insert(entry.name.as_str(), Arc::clone(&asset));
        Ok(asset)
    }

    fn definition(&self, entry: &DefinitionEntry, base: Option<Arc<DefinitionAsset>>) -> PoolResult<PoolDefinition> {
        let mut definition = match base {
            Some(base) => PoolDefinition::inheriting(base),
            None => PoolDefinition::default(),
        };
        let inherits = definition.base().is_some();

        if let Some(name) = &entry.template {
            let template = self
                .catalog
                .find_template(name)
                .ok_or_else(|| invalid(format!("unknown template '{name}' in definition '{}'", entry.name)))?;
            definition.set_template(Some(template));
        }

        if entry.preload_count.is_some() || entry.max_capacity.is_some() || entry.infinite_capacity.is_some() {
            let defaults = PoolDefinition::default();
            definition.set_preload_count(entry.preload_count.map_or(defaults.preload_count(), clamp_count));
            definition.set_max_capacity(entry.max_capacity.map_or(defaults.max_capacity(), clamp_count));
            definition.set_infinite_capacity(entry.infinite_capacity.unwrap_or(defaults.infinite_capacity()));
        }
        if let Some(fallback) = entry.spawn_fallback {
            definition.set_spawn_fallback(fallback);
        }
        if let Some(options) = entry.advanced_options {
            definition.set_advanced_options(options);
        }
        if let Some(mode) = entry.notification_mode {
            definition.set_notification_mode(mode);
        }
        if let Some(require) = entry.require_receiver {
            definition.set_require_receiver(require);
        }
        if let Some(name) = &entry.spawn_notification {
            definition.set_spawn_notification(name);
        }
        if let Some(name) = &entry.despawn_notification {
            definition.set_despawn_notification(name);
        }

        if !inherits {
            definition.set_overrides(Overrides::all());
        }
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    const LEVELS: &str = r#"
#![enable(implicit_some)]
(
    definitions: [
        (name: "Projectile", max_capacity: 16, spawn_fallback: ReturnNothing),
        (name: "Bullet", base: "Projectile", template: "Bullet", preload_count: 8),
        (name: "Spark", base: "Projectile", template: "Spark", notification_mode: Broadcast),
        (name: "Boss", template: "BossShield", max_capacity: -3, advanced_options: "RESET_SCALE_ON_SPAWN | RETURN_TO_CONTAINER"),
    ],
    collections: [
        (name: "Weapons", definitions: ["Bullet", "Spark"]),
        (name: "Boss", definitions: ["Boss"]),
    ],
    persistent: ["Weapons"],
    priority: Folders,
    mode: FirstMatch,
    folders: [(keys: ["Assets/Levels"], collections: ["Weapons"])],
    scenes: [(keys: ["Assets/Levels/Boss.scene"], collections: ["Boss"])],
    defaults: [],
)
"#;

    fn catalog() -> HashMap<String, ObjectHandle> {
        ["Bullet", "Spark", "BossShield"]
            .into_iter()
            .enumerate()
            .map(|(index, name)| (name.to_string(), ObjectHandle::from_raw(index as u64 + 1)))
            .collect()
    }

    fn build(text: &str, format: ConfigFormat) -> PoolResult<PoolSystemSettings> {
        SettingsDocument::from_str_with(text, format)?.build(&catalog())
    }

    #[test]
    fn test_build_from_ron() {
        let settings = build(LEVELS, ConfigFormat::Ron).unwrap();

        let persistent: Vec<PoolDefinition> = settings
            .persistent_definitions()
            .iter()
            .map(|definition| definition.resolved().unwrap())
            .collect();
        assert_eq!(persistent.len(), 2);

        let bullet = &persistent[0];
        assert_eq!(bullet.template(), Some(ObjectHandle::from_raw(1)));
        assert_eq!(bullet.preload_count(), 8);
        assert_eq!(bullet.max_capacity(), 1);
        assert_eq!(bullet.spawn_fallback(), SpawnFallback::ReturnNothing);

        let spark = &persistent[1];
        assert_eq!(spark.max_capacity(), 16);
        assert_eq!(spark.notification_mode(), NotificationMode::Broadcast);
    }

    #[test]
    fn test_scene_lookup_goes_through_collections() {
        let settings = build(LEVELS, ConfigFormat::Ron).unwrap();

        let weapons = settings.temporary_definitions(&"Assets/Levels/Boss.scene".into());
        assert_eq!(weapons.len(), 2);
        assert!(settings.temporary_definitions(&"Other/Boss.scene".into()).is_empty());
    }

    #[test]
    fn test_negative_counts_clamp_to_zero() {
        let document = SettingsDocument {
            priority: SearchPriority::Scenes,
            ..SettingsDocument::from_str_with(LEVELS, ConfigFormat::Ron).unwrap()
        };
        let settings = document.build(&catalog()).unwrap();

        let found = settings.temporary_definitions(&"Assets/Levels/Boss.scene".into());
        let boss = found[0].resolved().unwrap();

        assert_eq!(boss.max_capacity(), 0);
        assert_eq!(boss.preload_count(), 1);
        assert_eq!(
            boss.advanced_options(),
            AdvancedOptions::RESET_SCALE_ON_SPAWN | AdvancedOptions::RETURN_TO_CONTAINER
        );
    }

    #[test]
    fn test_build_from_toml() {
        let text = r#"
            persistent = ["Main"]

            [[definitions]]
            name = "Rock"
            template = "Bullet"
            infinite_capacity = true
            preload_count = 4

            [[collections]]
            name = "Main"
            definitions = ["Rock"]
        "#;

        let settings = build(text, ConfigFormat::Toml).unwrap();
        let rock = settings.persistent_definitions()[0].resolved().unwrap();

        assert!(rock.infinite_capacity());
        assert_eq!(rock.effective_preload(), 4);
    }

    #[test]
    fn test_document_survives_save_format() {
        let document = SettingsDocument::from_str_with(LEVELS, ConfigFormat::Ron).unwrap();

        let toml = document.to_string_with(ConfigFormat::Toml).unwrap();
        let reloaded = SettingsDocument::from_str_with(&toml, ConfigFormat::Toml).unwrap();

        assert_eq!(reloaded, document);
    }

    #[test]
    fn test_unknown_template_is_invalid() {
        let text = r#"(definitions: [(name: "Ghost", template: Some("Missing"))])"#;
        assert!(matches!(build(text, ConfigFormat::Ron), Err(PoolError::InvalidDefinition(_))));
    }

    #[test]
    fn test_unknown_collection_is_invalid() {
        let text = r#"(defaults: ["Nowhere"])"#;
        assert!(matches!(build(text, ConfigFormat::Ron), Err(PoolError::InvalidDefinition(_))));
    }

    #[test]
    fn test_base_cycle_is_invalid() {
        let text = r#"(definitions: [
            (name: "A", base: Some("B")),
            (name: "B", base: Some("A")),
        ])"#;
        assert!(matches!(build(text, ConfigFormat::Ron), Err(PoolError::InvalidDefinition(_))));
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(matches!(build("(definitions: [", ConfigFormat::Ron), Err(PoolError::Settings(_))));
    }
}
