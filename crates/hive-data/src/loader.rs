//! Reads a colony data directory into a [`Registry`] and an [`EngineConfig`].
//!
//! A data directory holds `goods`, `facilities` and an optional `config`
//! file. Each may be RON, TOML or JSON; the extension decides. Goods are
//! registered first so facility definitions can name them.

use crate::schema::{FacilityData, GoodData, RoleData, StorageData};
use hive_core::engine::EngineConfig;
use hive_core::facility::Role;
use hive_core::id::{FacilityKindId, GoodType};
use hive_core::registry::{Registry, RegistryBuilder, RegistryError};
use hive_core::storage::CapacityPolicy;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// No `{file}.ron`, `.toml` or `.json` in the directory.
    #[error("no '{file}' data file in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("{file}: expected a .ron, .toml or .json extension")]
    UnsupportedFormat { file: PathBuf },

    /// The same data file exists in two formats.
    #[error("both {a} and {b} exist; keep one")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("{file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error("{file}: no {kind} named '{name}'")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        kind: &'static str,
    },

    #[error("{file}: '{name}' is defined twice")]
    DuplicateName { file: PathBuf, name: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Data files
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    /// Probe order when looking for a data file.
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }

    pub fn from_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?;
        Format::ALL.into_iter().find(|f| f.extension() == ext)
    }
}

pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    Format::from_path(path).ok_or_else(|| DataLoadError::UnsupportedFormat {
        file: path.to_path_buf(),
    })
}

/// A data file on disk and the format it is written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub path: PathBuf,
    pub format: Format,
}

impl DataFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DataLoadError> {
        let path = path.into();
        let format = detect_format(&path)?;
        Ok(Self { path, format })
    }

    fn parse_error(&self, detail: impl ToString) -> DataLoadError {
        DataLoadError::Parse {
            file: self.path.clone(),
            detail: detail.to_string(),
        }
    }

    /// Deserialize the whole file as one `T`.
    pub fn read<T: DeserializeOwned>(&self) -> Result<T, DataLoadError> {
        let content = std::fs::read_to_string(&self.path)?;
        match self.format {
            Format::Ron => ron::from_str(&content).map_err(|e| self.parse_error(e)),
            Format::Toml => toml::from_str(&content).map_err(|e| self.parse_error(e)),
            Format::Json => serde_json::from_str(&content).map_err(|e| self.parse_error(e)),
        }
    }

    /// Deserialize a list of definitions. TOML cannot hold a bare array at
    /// the top level, so TOML files nest it under `toml_key`.
    pub fn read_list<T: DeserializeOwned>(&self, toml_key: &str) -> Result<Vec<T>, DataLoadError> {
        if self.format != Format::Toml {
            return self.read();
        }
        let mut table: toml::Table = self.read()?;
        let Some(list) = table.remove(toml_key) else {
            return Err(self.parse_error(format!("missing top-level key '{toml_key}'")));
        };
        list.try_into().map_err(|e: toml::de::Error| self.parse_error(e))
    }
}

/// Look for `{base_name}` with any supported extension in `dir`.
///
/// Two matches are a [`DataLoadError::ConflictingFormats`].
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<DataFile>, DataLoadError> {
    let mut present = Format::ALL.into_iter().filter_map(|format| {
        let path = dir.join(format!("{base_name}.{}", format.extension()));
        path.exists().then_some(DataFile { path, format })
    });
    let Some(first) = present.next() else {
        return Ok(None);
    };
    match present.next() {
        Some(second) => Err(DataLoadError::ConflictingFormats {
            a: first.path,
            b: second.path,
        }),
        None => Ok(Some(first)),
    }
}

pub fn require_data_file(dir: &Path, base_name: &str) -> Result<DataFile, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Name tables
// ===========================================================================

/// Names defined by one data file, mapped to the ids they registered as.
#[derive(Debug)]
pub struct NameTable<'f, V> {
    file: &'f Path,
    kind: &'static str,
    ids: HashMap<String, V>,
}

impl<'f, V: Copy> NameTable<'f, V> {
    pub fn new(file: &'f Path, kind: &'static str) -> Self {
        Self {
            file,
            kind,
            ids: HashMap::new(),
        }
    }

    /// Fails if `name` was already defined.
    pub fn claim(&self, name: &str) -> Result<(), DataLoadError> {
        if self.ids.contains_key(name) {
            return Err(DataLoadError::DuplicateName {
                file: self.file.to_path_buf(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, name: &str, id: V) {
        self.ids.insert(name.to_string(), id);
    }

    /// Resolve a reference to `name` made from `from`.
    pub fn resolve(&self, name: &str, from: &Path) -> Result<V, DataLoadError> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| DataLoadError::UnresolvedRef {
                file: from.to_path_buf(),
                name: name.to_string(),
                kind: self.kind,
            })
    }
}

// ===========================================================================
// Loading
// ===========================================================================

/// The content of a data directory.
#[derive(Debug)]
pub struct GameData {
    pub registry: Registry,
    pub config: EngineConfig,
}

fn storage_policy(
    data: &StorageData,
    goods: &NameTable<'_, GoodType>,
    from: &Path,
) -> Result<CapacityPolicy, DataLoadError> {
    Ok(match data {
        StorageData::Slotted { slots, slot_size } => CapacityPolicy::Slotted {
            slots: *slots,
            slot_size: *slot_size,
        },
        StorageData::Specific { limits } => {
            CapacityPolicy::Specific(good_amounts(limits, goods, from)?)
        }
    })
}

fn role_of(
    data: &RoleData,
    goods: &NameTable<'_, GoodType>,
    from: &Path,
) -> Result<Role, DataLoadError> {
    Ok(match data {
        RoleData::Source { good } => Role::Source {
            good: goods.resolve(good, from)?,
        },
        RoleData::Sink { good, target } => Role::Sink {
            good: goods.resolve(good, from)?,
            target: *target,
        },
        RoleData::Warehouse { buffers } => Role::Warehouse {
            buffers: good_amounts(buffers, goods, from)?,
        },
        RoleData::Manual => Role::Manual,
    })
}

fn good_amounts(
    entries: &[(String, u32)],
    goods: &NameTable<'_, GoodType>,
    from: &Path,
) -> Result<BTreeMap<GoodType, u32>, DataLoadError> {
    entries
        .iter()
        .map(|(name, amount)| Ok((goods.resolve(name, from)?, *amount)))
        .collect()
}

/// Load `goods`, `facilities` and the optional `config` from `dir`.
pub fn load_game_data(dir: &Path) -> Result<GameData, DataLoadError> {
    let mut builder = RegistryBuilder::new();

    let goods_file = require_data_file(dir, "goods")?;
    let mut goods = NameTable::<GoodType>::new(&goods_file.path, "good");
    for good in goods_file.read_list::<GoodData>("goods")? {
        goods.claim(&good.name)?;
        let id = builder.register_good(&good.name);
        goods.insert(&good.name, id);
    }

    let facilities_file = require_data_file(dir, "facilities")?;
    let from = facilities_file.path.as_path();
    let mut kinds = NameTable::<FacilityKindId>::new(from, "facility");
    for facility in facilities_file.read_list::<FacilityData>("facilities")? {
        kinds.claim(&facility.name)?;
        let storage = storage_policy(&facility.storage, &goods, from)?;
        let role = role_of(&facility.role, &goods, from)?;
        let id = builder.register_facility(&facility.name, storage, role);
        kinds.insert(&facility.name, id);
    }

    let config = match find_data_file(dir, "config")? {
        Some(file) => file.read()?,
        None => EngineConfig::default(),
    };

    let registry = builder.build()?;
    tracing::debug!(
        dir = %dir.display(),
        goods = registry.good_count(),
        facilities = registry.facility_count(),
        "colony data loaded"
    );
    Ok(GameData { registry, config })
}

// ===========================================================================
