// Address naming store
// Persistent label overlay for raw Modbus addresses, keyed by category and address

use crate::config::NamesConfig;
use crate::types::RegisterSpace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Addresses labeled by default in each category
pub const DEFAULT_NAME_COUNT: u16 = 16;

#[derive(Error, Debug)]
pub enum NamesError {
    #[error("Invalid category '{0}' (expected inputs, coils or registers)")]
    InvalidCategory(String),
    #[error("Failed to save names to {}: {source}", .path.display())]
    Persistence { path: PathBuf, source: io::Error },
    #[error("Failed to export names to {}: {source}", .path.display())]
    Export { path: PathBuf, source: io::Error },
    #[error("Failed to read import file {}: {source}", .path.display())]
    Import { path: PathBuf, source: io::Error },
    #[error("Invalid names document: {0}")]
    ImportValidation(String),
}

/// Label category, one per register space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Inputs,
    Coils,
    Registers,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Inputs, Category::Coils, Category::Registers];

    /// Key used in the snapshot and in the external API
    pub fn key(self) -> &'static str {
        match self {
            Category::Inputs => "inputs",
            Category::Coils => "coils",
            Category::Registers => "registers",
        }
    }

    fn label_prefix(self) -> &'static str {
        match self {
            Category::Inputs => "Input",
            Category::Coils => "Coil",
            Category::Registers => "Register",
        }
    }

    /// Label used when no explicit entry exists, e.g. `Coil_3`
    pub fn default_name(self, address: u16) -> String {
        format!("{}_{}", self.label_prefix(), address)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = NamesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.key() == s)
            .ok_or_else(|| NamesError::InvalidCategory(s.to_string()))
    }
}

impl From<RegisterSpace> for Category {
    fn from(space: RegisterSpace) -> Self {
        match space {
            RegisterSpace::DiscreteInput => Category::Inputs,
            RegisterSpace::Coil => Category::Coils,
            RegisterSpace::HoldingRegister => Category::Registers,
        }
    }
}

/// Full label table; also the snapshot and export document shape.
///
/// Every category key is required when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NameTable {
    pub inputs: BTreeMap<u16, String>,
    pub coils: BTreeMap<u16, String>,
    pub registers: BTreeMap<u16, String>,
}

impl NameTable {
    /// `Input_0..Input_15`, `Coil_0..Coil_15`, `Register_0..Register_15`
    pub fn defaults() -> Self {
        let mut table = NameTable::default();
        for category in Category::ALL {
            let names = table.category_mut(category);
            for address in 0..DEFAULT_NAME_COUNT {
                names.insert(address, category.default_name(address));
            }
        }
        table
    }

    /// Labels of one category
    pub fn category(&self, category: Category) -> &BTreeMap<u16, String> {
        match category {
            Category::Inputs => &self.inputs,
            Category::Coils => &self.coils,
            Category::Registers => &self.registers,
        }
    }

    /// Mutable labels of one category
    pub fn category_mut(&mut self, category: Category) -> &mut BTreeMap<u16, String> {
        match category {
            Category::Inputs => &mut self.inputs,
            Category::Coils => &mut self.coils,
            Category::Registers => &mut self.registers,
        }
    }

    /// Stored label, or the synthesized default
    pub fn name(&self, category: Category, address: u16) -> String {
        self.category(category)
            .get(&address)
            .cloned()
            .unwrap_or_else(|| category.default_name(address))
    }

    fn parse(text: &str) -> Result<Self, NamesError> {
        serde_json::from_str(text).map_err(|e| NamesError::ImportValidation(e.to_string()))
    }
}

/// Writes `table` to `path` through a uniquely named sibling temp file.
///
/// The temp file is synced and then renamed over `path`, so readers see the
/// old document or the new one. A failed write drops the temp file, which
/// deletes it, and leaves `path` untouched.
fn write_document(path: &Path, table: &NameTable, pretty: bool) -> io::Result<()> {
    let data = if pretty {
        serde_json::to_vec_pretty(table)?
    } else {
        serde_json::to_vec(table)?
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Reads the snapshot at `path`; `None` when it is missing or unusable.
fn load_snapshot(path: &Path) -> Option<NameTable> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::info!("No names file at {}, using defaults", path.display());
            return None;
        }
        Err(e) => {
            log::warn!("Failed to read names file {}: {}; using defaults", path.display(), e);
            return None;
        }
    };
    match NameTable::parse(&text) {
        Ok(table) => Some(table),
        Err(e) => {
            log::warn!("Names file {} is corrupt ({}); using defaults", path.display(), e);
            None
        }
    }
}

/// Address naming store
///
/// Every mutation rewrites the whole snapshot before returning. The table is
/// locked across mutate + persist, so concurrent edits never lose updates.
#[derive(Debug)]
pub struct NamesManager {
    path: PathBuf,
    table: Mutex<NameTable>,
}

impl NamesManager {
    /// Open the store backed by `path`
    ///
    /// A missing or unreadable snapshot falls back to the default labels; this never fails.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = load_snapshot(&path).unwrap_or_else(NameTable::defaults);
        Self {
            path,
            table: Mutex::new(table),
        }
    }

    /// Open the store at the configured snapshot path
    pub fn with_config(config: &NamesConfig) -> Self {
        Self::open(config.path.clone())
    }

    /// Snapshot location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, NameTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, table: &NameTable) -> Result<(), NamesError> {
        write_document(&self.path, table, false).map_err(|source| {
            log::error!("Failed to save names to {}: {}", self.path.display(), source);
            NamesError::Persistence {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Label for `address`, synthesized as `Category_N` when none is stored
    pub fn get_name(&self, category: &str, address: u16) -> Result<String, NamesError> {
        let category = category.parse()?;
        Ok(self.label(category, address))
    }

    /// Typed form of [`NamesManager::get_name`]
    pub fn label(&self, category: Category, address: u16) -> String {
        self.lock().name(category, address)
    }

    /// Set the label for `address` and persist
    ///
    /// On a persistence error the new label stays in memory.
    pub fn set_name(&self, category: &str, address: u16, label: &str) -> Result<(), NamesError> {
        let category: Category = category.parse()?;
        let mut table = self.lock();
        table.category_mut(category).insert(address, label.to_string());
        log::info!("Name for {} {} set to {:?}", category, address, label);
        self.persist(&table)
    }

    /// Add an address, labeled `Category_N` unless a label is given
    pub fn add_address(&self, category: &str, address: u16, label: Option<&str>) -> Result<(), NamesError> {
        let category: Category = category.parse()?;
        let label = label
            .map(str::to_string)
            .unwrap_or_else(|| category.default_name(address));
        let mut table = self.lock();
        table.category_mut(category).insert(address, label);
        self.persist(&table)
    }

    /// Remove the explicit label for `address`
    ///
    /// # Returns
    /// Ok(true) if an entry was removed and persisted, Ok(false) if none existed
    pub fn remove_name(&self, category: &str, address: u16) -> Result<bool, NamesError> {
        let category: Category = category.parse()?;
        let mut table = self.lock();
        if table.category_mut(category).remove(&address).is_none() {
            return Ok(false);
        }
        log::info!("Name for {} {} removed", category, address);
        self.persist(&table).map(|_| true)
    }

    /// Deep copy of every label
    pub fn get_all_names(&self) -> NameTable {
        self.lock().clone()
    }

    /// Replace every label and persist
    pub fn set_all_names(&self, names: NameTable) -> Result<(), NamesError> {
        let mut table = self.lock();
        *table = names;
        self.persist(&table)
    }

    /// Discard all labels, regenerate the defaults and persist
    pub fn reset_to_defaults(&self) -> Result<(), NamesError> {
        let mut table = self.lock();
        *table = NameTable::defaults();
        log::info!("Names reset to defaults");
        self.persist(&table)
    }

    /// Write the current table to the snapshot
    pub fn save(&self) -> Result<(), NamesError> {
        let table = self.lock();
        self.persist(&table)
    }

    /// Re-read the snapshot from disk
    ///
    /// # Returns
    /// false when the file existed but could not be used; defaults are loaded in that case
    pub fn reload(&self) -> bool {
        let mut table = self.lock();
        let present = self.path.exists();
        match load_snapshot(&self.path) {
            Some(loaded) => {
                *table = loaded;
                true
            }
            None => {
                *table = NameTable::defaults();
                !present
            }
        }
    }

    /// Write every label to `path` as pretty-printed JSON
    ///
    /// The table stays locked until the file is in place, so an export to the
    /// snapshot path cannot overwrite a newer edit.
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> Result<(), NamesError> {
        let path = path.as_ref();
        let table = self.lock();
        write_document(path, &table, true).map_err(|source| {
            log::error!("Failed to export names to {}: {}", path.display(), source);
            NamesError::Export {
                path: path.to_path_buf(),
                source,
            }
        })?;
        log::info!("Names exported to {}", path.display());
        Ok(())
    }

    /// Replace every label with the contents of `path` and persist
    ///
    /// The document must contain `inputs`, `coils` and `registers`; anything
    /// less is rejected and the store is left as it was.
    pub fn import_from_file(&self, path: impl AsRef<Path>) -> Result<(), NamesError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| NamesError::Import {
            path: path.to_path_buf(),
            source,
        })?;
        let imported = NameTable::parse(&text).map_err(|e| {
            log::warn!("Rejected names import from {}: {}", path.display(), e);
            e
        })?;

        let mut table = self.lock();
        *table = imported;
        log::info!("Names imported from {}", path.display());
        self.persist(&table)
    }
}
