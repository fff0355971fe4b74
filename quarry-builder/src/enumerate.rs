//! Compileable-unit enumeration: which definitions a build touches and how
//! many modules that spans per runtime environment.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use quarry_core::RuntimeEnvironment;

use crate::model::{Branch, DefRef, DefinitionKind, ModuleRef};

/// Definitions grouped by owning module, per environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// Definitions gathered from every buildable module and its override chain.
    pub definitions: Vec<DefRef>,
    pub environments: BTreeMap<RuntimeEnvironment, BTreeMap<ModuleRef, Vec<DefRef>>>,
}

impl Enumeration {
    /// Distinct modules summed over all environments.
    pub fn total_modules(&self) -> usize {
        self.environments.values().map(BTreeMap::len).sum()
    }

    /// Progress denominator; never zero.
    pub fn progress_denominator(&self) -> usize {
        self.total_modules().max(1)
    }
}

pub fn enumerate(branch: &Branch, environments: &BTreeSet<RuntimeEnvironment>) -> Enumeration {
    let definitions = collect_definitions(branch);
    let environments = environments
        .iter()
        .map(|env| (*env, collect_compileable(branch, &definitions, *env)))
        .collect();
    let enumeration = Enumeration {
        definitions,
        environments,
    };
    tracing::info!(
        definitions = enumeration.definitions.len(),
        modules = enumeration.total_modules(),
        "definitions enumerated",
    );
    enumeration
}

/// Walk every buildable module of every writable layer down its override
/// chain, collecting definitions and their localizing bundles once by id.
pub fn collect_definitions(branch: &Branch) -> Vec<DefRef> {
    let mut collected = Collected::default();

    for (layer_index, layer) in branch.layers().iter().enumerate() {
        if layer.read_only {
            continue;
        }

        let mut module_ids = HashSet::new();
        let modules: Vec<ModuleRef> = layer
            .modules
            .iter()
            .enumerate()
            .filter(|(_, module)| !module.under_construction)
            .filter(|(_, module)| module_ids.insert(module.id.as_str()))
            .map(|(module, _)| ModuleRef {
                layer: layer_index,
                module,
            })
            .collect();

        for start in modules {
            let module_bundle = branch.find_bundle(branch.module(start).bundle.as_deref());
            let mut current = Some(start);
            while let Some(at) = current {
                let owner = branch.layer(at);
                if !owner.read_only && !owner.localizing {
                    if let Some(bundle) = module_bundle {
                        collected.push(branch, bundle);
                    }
                    for (index, def) in branch.module(at).definitions.iter().enumerate() {
                        collected.push(branch, DefRef { module: at, index });
                        if def.kind != DefinitionKind::LocalizingBundle {
                            if let Some(bundle) = branch.find_bundle(def.bundle.as_deref()) {
                                collected.push(branch, bundle);
                            }
                        }
                    }
                }
                current = branch.find_overwritten(at);
            }
        }
    }

    collected.defs
}

#[derive(Default)]
struct Collected {
    ids: HashSet<String>,
    defs: Vec<DefRef>,
}

impl Collected {
    fn push(&mut self, branch: &Branch, at: DefRef) {
        if self.ids.insert(branch.definition(at).id.clone()) {
            self.defs.push(at);
        }
    }
}

/// Transitive closure of definitions compileable for `env`, by owning module.
fn collect_compileable(
    branch: &Branch,
    roots: &[DefRef],
    env: RuntimeEnvironment,
) -> BTreeMap<ModuleRef, Vec<DefRef>> {
    let mut visited = HashSet::new();
    let mut modules: BTreeMap<ModuleRef, Vec<DefRef>> = BTreeMap::new();
    let mut stack: Vec<DefRef> = roots.iter().rev().copied().collect();

    while let Some(at) = stack.pop() {
        if !visited.insert(at) {
            continue;
        }
        let def = branch.definition(at);
        if !def.targets(env) {
            continue;
        }
        modules.entry(at.module).or_default().push(at);
        stack.extend(
            def.depends_on
                .iter()
                .filter_map(|id| branch.find_definition(id)),
        );
    }
    modules
}
