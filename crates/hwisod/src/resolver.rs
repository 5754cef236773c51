//! Entity-path / inventory-path resolution.
//!
//! The real mapping comes from a device-tree traversal owned by a
//! separate component; the daemon consumes a snapshot of it. Cores in
//! the eco sub-mode carry an alternate inventory path that is
//! selected when the caller passes the eco hint.

use anyhow::{bail, Context, Result};
use hwiso_common::EntityPath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Hardware class of an isolatable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareClass {
    Processor,
    Core,
    Dimm,
    Other,
}

impl HardwareClass {
    /// DIMM-class hardware may carry several simultaneous valid
    /// records per parent; everything else is single-fault.
    pub fn multi_record(&self) -> bool {
        matches!(self, HardwareClass::Dimm)
    }
}

/// Resolution result for one entity path.
#[derive(Debug, Clone)]
pub struct ResolvedHardware {
    pub inventory_path: String,
    pub class: HardwareClass,
    /// Whether the device tree reports this core in the eco sub-mode.
    pub eco_core: bool,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no device-tree node for entity path {0}")]
    UnknownEntityPath(EntityPath),

    #[error("no entity path for inventory path {0}")]
    UnknownInventoryPath(String),
}

/// Mapping service between entity paths and inventory paths.
pub trait HardwareResolver {
    /// Resolve an entity path to its consumer-facing inventory path.
    /// `eco_hint` forces the eco-mode inventory path for cores that
    /// have one, regardless of what the live tree reports.
    fn resolve(
        &self,
        entity_path: &EntityPath,
        eco_hint: bool,
    ) -> Result<ResolvedHardware, ResolveError>;

    fn entity_path_for(&self, inventory_path: &str) -> Option<EntityPath>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevTreeNode {
    /// Entity path rendered as hex.
    pub entity_path: String,
    pub inventory_path: String,
    pub class: HardwareClass,
    #[serde(default)]
    pub eco_inventory_path: Option<String>,
    #[serde(default)]
    pub eco_mode: bool,
}

const DEVTREE_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DevTreeFile {
    version: u32,
    nodes: Vec<DevTreeNode>,
}

/// Resolver backed by a device-tree snapshot file.
pub struct TableResolver {
    nodes: HashMap<EntityPath, DevTreeNode>,
    by_inventory: HashMap<String, EntityPath>,
}

impl TableResolver {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read device-tree snapshot {}", path.display()))?;
        let file: DevTreeFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse device-tree snapshot {}", path.display()))?;
        if file.version != DEVTREE_FILE_VERSION {
            bail!("unsupported device-tree snapshot version {}", file.version);
        }
        Self::from_nodes(file.nodes)
    }

    pub fn from_nodes(nodes: Vec<DevTreeNode>) -> Result<Self> {
        let mut by_entity = HashMap::new();
        let mut by_inventory = HashMap::new();
        for node in nodes {
            let entity: EntityPath = node
                .entity_path
                .parse()
                .map_err(|e| anyhow::anyhow!("bad entity path in device tree: {e}"))?;
            by_inventory.insert(node.inventory_path.clone(), entity);
            if let Some(eco) = &node.eco_inventory_path {
                by_inventory.insert(eco.clone(), entity);
            }
            by_entity.insert(entity, node);
        }
        Ok(Self {
            nodes: by_entity,
            by_inventory,
        })
    }
}

impl HardwareResolver for TableResolver {
    fn resolve(
        &self,
        entity_path: &EntityPath,
        eco_hint: bool,
    ) -> Result<ResolvedHardware, ResolveError> {
        let node = self
            .nodes
            .get(entity_path)
            .ok_or(ResolveError::UnknownEntityPath(*entity_path))?;

        let want_eco = eco_hint || node.eco_mode;
        let inventory_path = match (&node.eco_inventory_path, want_eco) {
            (Some(eco_path), true) => eco_path.clone(),
            _ => node.inventory_path.clone(),
        };

        Ok(ResolvedHardware {
            inventory_path,
            class: node.class,
            eco_core: node.eco_mode,
        })
    }

    fn entity_path_for(&self, inventory_path: &str) -> Option<EntityPath> {
        self.by_inventory.get(inventory_path).copied()
    }
}
