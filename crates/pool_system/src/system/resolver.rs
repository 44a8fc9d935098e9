//! Scene → pool definition lookup
//!
//! Decides which definitions a freshly loaded scene needs. Two searches run
//! in priority order:
//! - Folders: the scene id starts with one of a mapping's (non-empty) prefixes
//! - Scenes: the scene id equals one of a mapping's scene ids
//!
//! Under [`SearchMode::FirstMatch`] the first matching mapping ends a search
//! and a successful first search skips the second one. Under
//! [`SearchMode::AllMatches`] every matching mapping of both searches
//! contributes, in declaration order and without de-duplication. If nothing
//! matched at all, the default definitions apply.

use crate::pooling::PoolDefinition;
use serde::{Deserialize, Serialize};

/// Path-like identifier of a loaded scene
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneId(String);

impl SceneId {
    /// Wrap a scene path
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The scene path
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SceneId {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which search runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchPriority {
    /// Folder prefixes first
    #[default]
    Folders,
    /// Exact scene ids first
    Scenes,
}

/// Whether matching stops at the first hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// Stop at the first matching mapping
    #[default]
    FirstMatch,
    /// Collect every matching mapping
    AllMatches,
}

/// Keys (folder prefixes or scene ids) and the definitions they select
#[derive(Debug, Clone, Default)]
pub struct DefinitionMapping {
    /// Folder prefixes or scene ids
    pub keys: Vec<String>,
    /// Definitions selected when a key matches
    pub definitions: Vec<PoolDefinition>,
}

impl DefinitionMapping {
    /// Create a mapping
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>, definitions: Vec<PoolDefinition>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            definitions,
        }
    }

    fn matches_folder(&self, scene: &SceneId) -> bool {
        self.keys
            .iter()
            .any(|prefix| !prefix.is_empty() && scene.as_str().starts_with(prefix.as_str()))
    }

    fn matches_scene(&self, scene: &SceneId) -> bool {
        self.keys.iter().any(|path| path == scene.as_str())
    }
}

/// Scene-driven definition lookup
#[derive(Debug, Clone, Default)]
pub struct DefinitionResolver {
    /// Search run first
    pub priority: SearchPriority,
    /// First hit or every hit
    pub mode: SearchMode,
    /// Folder-prefix mappings, in declaration order
    pub folders: Vec<DefinitionMapping>,
    /// Exact-scene mappings, in declaration order
    pub scenes: Vec<DefinitionMapping>,
    /// Definitions used when nothing matched
    pub defaults: Vec<PoolDefinition>,
}

impl DefinitionResolver {
    /// Definitions that apply to `scene`
    pub fn resolve(&self, scene: &SceneId) -> Vec<PoolDefinition> {
        let mut found = Vec::new();

        match self.priority {
            SearchPriority::Folders => {
                self.search(&self.folders, |mapping| mapping.matches_folder(scene), &mut found);
                if found.is_empty() || self.mode == SearchMode::AllMatches {
                    self.search(&self.scenes, |mapping| mapping.matches_scene(scene), &mut found);
                }
            }
            SearchPriority::Scenes => {
                self.search(&self.scenes, |mapping| mapping.matches_scene(scene), &mut found);
                if found.is_empty() || self.mode == SearchMode::AllMatches {
                    self.search(&self.folders, |mapping| mapping.matches_folder(scene), &mut found);
                }
            }
        }

        if found.is_empty() {
            log::debug!("No pool definitions matched scene '{scene}', using defaults");
            found.extend(self.defaults.iter().cloned());
        }
        found
    }

    fn search(
        &self,
        mappings: &[DefinitionMapping],
        matches: impl Fn(&DefinitionMapping) -> bool,
        found: &mut Vec<PoolDefinition>,
    ) {
        for mapping in mappings.iter().filter(|mapping| matches(mapping)) {
            found.extend(mapping.definitions.iter().cloned());
            if self.mode == SearchMode::FirstMatch {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ObjectHandle;

    fn definition(raw: u64) -> PoolDefinition {
        PoolDefinition::new(ObjectHandle::from_raw(raw))
    }

    fn templates(definitions: &[PoolDefinition]) -> Vec<u64> {
        definitions
            .iter()
            .filter_map(PoolDefinition::template)
            .map(ObjectHandle::raw)
            .collect()
    }

    fn levels_resolver() -> DefinitionResolver {
        DefinitionResolver {
            folders: vec![DefinitionMapping::new(["Assets/Levels"], vec![definition(1)])],
            scenes: vec![DefinitionMapping::new(["Assets/Levels/Boss.scene"], vec![definition(2)])],
            defaults: vec![definition(9)],
            ..DefinitionResolver::default()
        }
    }

    #[test]
    fn test_folder_priority_first_match_stops() {
        let resolver = levels_resolver();

        let found = resolver.resolve(&SceneId::from("Assets/Levels/Boss.scene"));

        assert_eq!(templates(&found), [1]);
    }

    #[test]
    fn test_scene_priority_first_match() {
        let resolver = DefinitionResolver {
            priority: SearchPriority::Scenes,
            ..levels_resolver()
        };

        assert_eq!(templates(&resolver.resolve(&"Assets/Levels/Boss.scene".into())), [2]);
        assert_eq!(templates(&resolver.resolve(&"Assets/Levels/Cave.scene".into())), [1]);
    }

    #[test]
    fn test_all_matches_concatenates_in_order() {
        let mut resolver = DefinitionResolver {
            mode: SearchMode::AllMatches,
            ..levels_resolver()
        };
        resolver
            .folders
            .push(DefinitionMapping::new(["Assets"], vec![definition(3), definition(1)]));

        let found = resolver.resolve(&SceneId::from("Assets/Levels/Boss.scene"));

        assert_eq!(templates(&found), [1, 3, 1, 2]);
    }

    #[test]
    fn test_defaults_when_nothing_matches() {
        let resolver = levels_resolver();

        assert_eq!(templates(&resolver.resolve(&"Menus/Main.scene".into())), [9]);
    }

    #[test]
    fn test_empty_prefix_never_matches() {
        let resolver = DefinitionResolver {
            folders: vec![DefinitionMapping::new([""], vec![definition(1)])],
            ..DefinitionResolver::default()
        };

        assert!(resolver.resolve(&"Anything.scene".into()).is_empty());
    }
}
