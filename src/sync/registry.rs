//! Fixed table → remote storage mapping.
//!
//! Every syncable table is declared once here with its scheduling class and
//! remote layout. Call sites never compute collection names themselves; they
//! ask the [`TableSpec`] for a path. The registry is checked when it is built,
//! so a bad entry fails at startup rather than in the middle of a run.

use std::collections::HashSet;

use thiserror::Error;

use super::error::RecordError;
use super::record::{is_valid_segment, SyncRecord};

/// Bumped whenever a table is added, removed or remapped.
pub const REGISTRY_VERSION: u32 = 3;

/// Placeholder substituted with the user id in singleton paths.
const USER_PLACEHOLDER: &str = "{uid}";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("duplicate table name: {0}")]
    DuplicateTable(String),

    #[error("invalid storage mapping for table {table}: {reason}")]
    InvalidMapping { table: String, reason: String },

    #[error("registry has no tables")]
    Empty,
}

/// Scheduling class of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableClass {
    /// Synced concurrently with other independent tables.
    Independent,
    /// One document per user; synced sequentially after independent tables.
    Singleton,
    /// Server-originated; pulled only, after singletons.
    PullOnly,
}

/// Where a table's records live in the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLayout {
    /// `users/{uid}/{collection}/{id}`
    UserCollection { collection: &'static str },
    /// Records with `isCustom: true` go to `users/{uid}/{custom}/{id}`,
    /// the rest to the shared `{shared}/{id}`.
    Bifurcated {
        custom: &'static str,
        shared: &'static str,
    },
    /// A single document at `path`, with `{uid}` replaced by the user id.
    SingletonDocument { path: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub class: TableClass,
    pub layout: StorageLayout,
}

impl TableSpec {
    pub const fn independent(name: &'static str, collection: &'static str) -> Self {
        Self {
            name,
            class: TableClass::Independent,
            layout: StorageLayout::UserCollection { collection },
        }
    }

    pub const fn bifurcated(name: &'static str, custom: &'static str, shared: &'static str) -> Self {
        Self {
            name,
            class: TableClass::Independent,
            layout: StorageLayout::Bifurcated { custom, shared },
        }
    }

    pub const fn singleton(name: &'static str, path: &'static str) -> Self {
        Self {
            name,
            class: TableClass::Singleton,
            layout: StorageLayout::SingletonDocument { path },
        }
    }

    pub const fn pull_only(name: &'static str, collection: &'static str) -> Self {
        Self {
            name,
            class: TableClass::PullOnly,
            layout: StorageLayout::UserCollection { collection },
        }
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self.layout, StorageLayout::SingletonDocument { .. })
    }

    /// Collections to query on pull. Empty for singleton tables.
    pub fn collection_paths(&self, user_id: &str) -> Vec<String> {
        match self.layout {
            StorageLayout::UserCollection { collection } => {
                vec![format!("users/{}/{}", user_id, collection)]
            }
            StorageLayout::Bifurcated { custom, shared } => {
                vec![format!("users/{}/{}", user_id, custom), shared.to_string()]
            }
            StorageLayout::SingletonDocument { .. } => Vec::new(),
        }
    }

    /// The single document path of a singleton table.
    pub fn singleton_path(&self, user_id: &str) -> Option<String> {
        match self.layout {
            StorageLayout::SingletonDocument { path } => {
                Some(path.replace(USER_PLACEHOLDER, user_id))
            }
            _ => None,
        }
    }

    /// Remote document path for a record being pushed.
    pub fn document_path(&self, user_id: &str, record: &SyncRecord) -> Result<String, RecordError> {
        if !is_valid_segment(user_id) {
            return Err(RecordError::InvalidPathSegment(user_id.to_string()));
        }
        match self.layout {
            StorageLayout::SingletonDocument { path } => Ok(path.replace(USER_PLACEHOLDER, user_id)),
            StorageLayout::UserCollection { collection } => {
                let id = record.require_id()?;
                Ok(format!("users/{}/{}/{}", user_id, collection, id))
            }
            StorageLayout::Bifurcated { custom, shared } => {
                let id = record.require_id()?;
                if record.is_custom() {
                    Ok(format!("users/{}/{}/{}", user_id, custom, id))
                } else {
                    Ok(format!("{}/{}", shared, id))
                }
            }
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidMapping {
            table: self.name.to_string(),
            reason: reason.to_string(),
        };

        if !is_valid_segment(self.name) {
            return Err(invalid("table name must be a plain identifier"));
        }

        match self.layout {
            StorageLayout::UserCollection { collection } => {
                if !is_valid_segment(collection) {
                    return Err(invalid("collection must be a single path segment"));
                }
            }
            StorageLayout::Bifurcated { custom, shared } => {
                if !is_valid_segment(custom) || !is_valid_segment(shared) {
                    return Err(invalid("collections must be single path segments"));
                }
                if custom == shared {
                    return Err(invalid("custom and shared collections must differ"));
                }
            }
            StorageLayout::SingletonDocument { path } => {
                let segments: Vec<&str> = path.split('/').collect();
                if !path.contains(USER_PLACEHOLDER) {
                    return Err(invalid("singleton path must contain {uid}"));
                }
                if segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
                    return Err(invalid("singleton path must name a document"));
                }
            }
        }

        match (self.class, self.is_singleton()) {
            (TableClass::Singleton, false) => {
                Err(invalid("singleton tables need a singleton document layout"))
            }
            (TableClass::Independent | TableClass::PullOnly, true) => {
                Err(invalid("singleton document layout requires the singleton class"))
            }
            _ => Ok(()),
        }
    }
}

/// Default tables, in scheduling order within each class.
pub const DEFAULT_TABLES: &[TableSpec] = &[
    TableSpec::independent("workouts", "workouts"),
    TableSpec::bifurcated("exercises", "custom_exercises", "exercises"),
    TableSpec::bifurcated("templates", "custom_templates", "templates"),
    TableSpec::independent("planned_workouts", "planned_workouts"),
    TableSpec::independent("exercise_status", "exercise_status"),
    TableSpec::singleton("user_profile", "users/{uid}/profile/main"),
    TableSpec::singleton("app_settings", "users/{uid}/settings/app"),
    TableSpec::pull_only("notifications", "notifications"),
];

/// Validated lookup table of syncable tables.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: Vec<TableSpec>,
}

impl TableRegistry {
    pub fn new(tables: Vec<TableSpec>) -> Result<Self, RegistryError> {
        if tables.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for table in &tables {
            table.validate()?;
            if !seen.insert(table.name) {
                return Err(RegistryError::DuplicateTable(table.name.to_string()));
            }
        }
        Ok(Self { tables })
    }

    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.to_string()).collect()
    }

    pub fn version(&self) -> u32 {
        REGISTRY_VERSION
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self {
            tables: DEFAULT_TABLES.to_vec(),
        }
    }
}
