//! Dependency graph validation and tier planning
//!
//! The validator runs three independent checks over a [`UnitRegistry`]
//! (cycles, dangling references, priority consistency) and accumulates every
//! finding into a single [`ValidationReport`]. The graph also provides the
//! tier plan the lifecycle orchestrator walks.

use crate::config::UnitRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// How serious a validation issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Reported but never blocks execution by default
    Warning,
    /// Blocks every orchestration action
    Error,
}

/// A single finding of the validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// Traversal from `unit` came back to `unit`
    CycleFound {
        /// Unit the traversal started from
        unit: String,
        /// Path from the unit back to itself
        path: Vec<String>,
    },
    /// `unit` depends on an id that is not in the registry
    MissingRef {
        /// Unit declaring the dependency
        unit: String,
        /// Unknown dependency id
        dependency: String,
    },
    /// `unit` depends on something scheduled in a later tier
    PriorityInversion {
        /// Dependent unit
        unit: String,
        /// Its tier
        unit_tier: u32,
        /// Dependency scheduled later
        dependency: String,
        /// Tier of the dependency
        dependency_tier: u32,
    },
}

impl ValidationIssue {
    /// Default severity of this issue
    pub fn severity(&self) -> Severity {
        match self {
            ValidationIssue::CycleFound { .. } | ValidationIssue::MissingRef { .. } => {
                Severity::Error
            }
            ValidationIssue::PriorityInversion { .. } => Severity::Warning,
        }
    }

    /// Unit the issue is reported against
    pub fn unit(&self) -> &str {
        match self {
            ValidationIssue::CycleFound { unit, .. }
            | ValidationIssue::MissingRef { unit, .. }
            | ValidationIssue::PriorityInversion { unit, .. } => unit,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::CycleFound { unit, path } => {
                write!(f, "dependency cycle at '{}': {}", unit, path.join(" -> "))
            }
            ValidationIssue::MissingRef { unit, dependency } => {
                write!(f, "'{}' depends on unknown unit '{}'", unit, dependency)
            }
            ValidationIssue::PriorityInversion {
                unit,
                unit_tier,
                dependency,
                dependency_tier,
            } => write!(
                f,
                "'{}' (tier {}) depends on '{}' scheduled in later tier {}",
                unit, unit_tier, dependency, dependency_tier
            ),
        }
    }
}

/// Accumulated outcome of a validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// All issues, ordered by unit then kind
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Whether the registry passed without any finding
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues with error severity
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == Severity::Error)
    }

    /// Issues with warning severity
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == Severity::Warning)
    }

    /// Whether the report blocks execution
    ///
    /// In strict mode warnings are fatal as well.
    pub fn is_fatal(&self, strict: bool) -> bool {
        if strict {
            !self.issues.is_empty()
        } else {
            self.errors().next().is_some()
        }
    }

    /// Cycle issues only
    pub fn cycles(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, ValidationIssue::CycleFound { .. }))
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return write!(f, "no issues");
        }
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let label = match issue.severity() {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            write!(f, "{}: {}", label, issue)?;
        }
        Ok(())
    }
}

/// Adjacency view over the registry
pub struct DependencyGraph<'a> {
    registry: &'a UnitRegistry,
    /// unit -> units it depends on
    edges: HashMap<&'a str, Vec<&'a str>>,
    /// unit -> units depending on it
    reverse_edges: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph for a registry
    pub fn new(registry: &'a UnitRegistry) -> Self {
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut reverse_edges: HashMap<&str, Vec<&str>> = HashMap::new();

        for unit in registry.units() {
            let deps = edges.entry(unit.id.as_str()).or_default();
            for dep in &unit.dependencies {
                deps.push(dep.as_str());
                reverse_edges
                    .entry(dep.as_str())
                    .or_default()
                    .push(unit.id.as_str());
            }
        }

        Self {
            registry,
            edges,
            reverse_edges,
        }
    }

    /// Run every check and collect the findings
    pub fn validate(&self) -> ValidationReport {
        let registry: &'a UnitRegistry = self.registry;
        let mut issues = Vec::new();

        for unit in registry.units() {
            if let Some(path) = self.find_cycle(&unit.id) {
                issues.push(ValidationIssue::CycleFound {
                    unit: unit.id.clone(),
                    path,
                });
            }

            for dep in &unit.dependencies {
                match registry.get(dep) {
                    None => issues.push(ValidationIssue::MissingRef {
                        unit: unit.id.clone(),
                        dependency: dep.clone(),
                    }),
                    Some(dep_spec) if dep_spec.priority_tier > unit.priority_tier => {
                        issues.push(ValidationIssue::PriorityInversion {
                            unit: unit.id.clone(),
                            unit_tier: unit.priority_tier,
                            dependency: dep.clone(),
                            dependency_tier: dep_spec.priority_tier,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        ValidationReport { issues }
    }

    /// Depth-first search from `root` looking for a path back to `root`
    ///
    /// Each traversal keeps its own visited set; unknown dependencies are
    /// skipped here and reported by the dangling-reference check.
    fn find_cycle(&self, root: &'a str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = vec![root];
        if self.dfs(root, root, &mut visited, &mut path) {
            Some(path.into_iter().map(str::to_string).collect())
        } else {
            None
        }
    }

    fn dfs(
        &self,
        root: &str,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> bool {
        let Some(deps) = self.edges.get(node) else {
            return false;
        };

        for &dep in deps {
            if dep == root {
                path.push(dep);
                return true;
            }
            if !self.registry.contains(dep) || !visited.insert(dep) {
                continue;
            }
            path.push(dep);
            if self.dfs(root, dep, visited, path) {
                return true;
            }
            path.pop();
        }

        false
    }

    /// Units grouped by tier, ascending, ids sorted within a tier
    pub fn tiers_ascending(&self) -> Vec<(u32, Vec<String>)> {
        let mut tiers: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for unit in self.registry.units() {
            tiers
                .entry(unit.priority_tier)
                .or_default()
                .push(unit.id.clone());
        }
        // registry iteration is already ordered by id
        tiers.into_iter().collect()
    }

    /// Units grouped by tier, descending (shutdown order)
    pub fn tiers_descending(&self) -> Vec<(u32, Vec<String>)> {
        let mut tiers = self.tiers_ascending();
        tiers.reverse();
        tiers
    }

    /// Units that declare `id` as a dependency, sorted
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .reverse_edges
            .get(id)
            .map(|v| v.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }
}

/// Validate a registry
pub fn validate(registry: &UnitRegistry) -> ValidationReport {
    DependencyGraph::new(registry).validate()
}
