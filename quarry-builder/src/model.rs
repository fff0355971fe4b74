//! Branch descriptor loaded from `<root>/branch.yaml`.
//!
//! ```yaml
//! layers:
//!   - uri: org.base
//!     read_only: true
//!     modules:
//!       - id: mdlCore
//!         name: Core
//!         bundle: bdlCore
//!         definitions:
//!           - { id: clsUser, name: User, kind: class, environments: [server] }
//!           - { id: bdlCore, name: CoreStrings, kind: localizing_bundle }
//!   - uri: org.app
//!     modules: [...]
//! ```
//!
//! Layers are ordered oldest first; a module overrides the module with the
//! same id in an earlier layer.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use quarry_core::RuntimeEnvironment;

use crate::error::{io_err, BuildError};

pub const BRANCH_FILE: &str = "branch.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Class,
    Enumeration,
    Presentation,
    LocalizingBundle,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Definition {
    pub id: String,
    pub name: String,
    pub kind: DefinitionKind,
    /// Environments the definition compiles for; `common` when omitted.
    #[serde(default)]
    pub environments: BTreeSet<RuntimeEnvironment>,
    /// Id of the localizing bundle that carries this definition's strings.
    #[serde(default)]
    pub bundle: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Source file relative to the branch root.
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl Definition {
    pub fn targets(&self, env: RuntimeEnvironment) -> bool {
        if self.environments.is_empty() {
            env == RuntimeEnvironment::Common
        } else {
            self.environments.contains(&env)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Module {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub under_construction: bool,
    /// Id of the module-level localizing bundle.
    #[serde(default)]
    pub bundle: Option<String>,
    #[serde(default)]
    pub definitions: Vec<Definition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Layer {
    pub uri: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub localizing: bool,
    #[serde(default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Deserialize)]
struct BranchFile {
    #[serde(default)]
    layers: Vec<Layer>,
}

/// Position of a module inside the branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleRef {
    pub layer: usize,
    pub module: usize,
}

/// Position of a definition inside the branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefRef {
    pub module: ModuleRef,
    pub index: usize,
}

/// A loaded branch with a definition index.
#[derive(Debug, Clone)]
pub struct Branch {
    root: PathBuf,
    layers: Vec<Layer>,
    /// Definition id → newest definition carrying it.
    by_id: HashMap<String, DefRef>,
}

impl Branch {
    /// Load `<root>/branch.yaml`.
    pub fn load(root: &Path) -> Result<Self, BuildError> {
        let path = root.join(BRANCH_FILE);
        if !path.exists() {
            return Err(BuildError::BranchNotFound { path });
        }
        let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let file: BranchFile =
            serde_yaml::from_str(&contents).map_err(|source| BuildError::Parse { path, source })?;
        Ok(Self::new(root, file.layers))
    }

    pub fn new(root: impl Into<PathBuf>, layers: Vec<Layer>) -> Self {
        let mut by_id = HashMap::new();
        for (layer_index, layer) in layers.iter().enumerate() {
            for (module_index, module) in layer.modules.iter().enumerate() {
                for (index, def) in module.definitions.iter().enumerate() {
                    let at = DefRef {
                        module: ModuleRef {
                            layer: layer_index,
                            module: module_index,
                        },
                        index,
                    };
                    by_id.insert(def.id.clone(), at);
                }
            }
        }
        Self {
            root: root.into(),
            layers,
            by_id,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, at: ModuleRef) -> &Layer {
        &self.layers[at.layer]
    }

    pub fn module(&self, at: ModuleRef) -> &Module {
        &self.layers[at.layer].modules[at.module]
    }

    pub fn definition(&self, at: DefRef) -> &Definition {
        &self.module(at.module).definitions[at.index]
    }

    pub fn find_definition(&self, id: &str) -> Option<DefRef> {
        self.by_id.get(id).copied()
    }

    /// `<layer uri>::<module name>`
    pub fn qualified_name(&self, at: ModuleRef) -> String {
        format!("{}::{}", self.layer(at).uri, self.module(at).name)
    }

    /// Directory holding a module's sources: `<root>/<layer uri>/<module name>`.
    pub fn module_dir(&self, at: ModuleRef) -> PathBuf {
        self.root
            .join(&self.layer(at).uri)
            .join(&self.module(at).name)
    }

    /// Module with the same id in the nearest earlier layer.
    pub fn find_overwritten(&self, at: ModuleRef) -> Option<ModuleRef> {
        let id = &self.module(at).id;
        (0..at.layer).rev().find_map(|layer| {
            self.layers[layer]
                .modules
                .iter()
                .position(|m| &m.id == id)
                .map(|module| ModuleRef { layer, module })
        })
    }

    /// Existing localizing bundle named by `id`.
    pub fn find_bundle(&self, id: Option<&str>) -> Option<DefRef> {
        let at = self.find_definition(id?)?;
        (self.definition(at).kind == DefinitionKind::LocalizingBundle).then_some(at)
    }
}
