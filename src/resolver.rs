// src/resolver.rs

//! Dependency resolver
//!
//! Turns a request (names to install, possibly version-constrained, and
//! names to remove) plus the package index and the installed-state store
//! into an ordered [`TransactionPlan`], or fails before anything is
//! touched. Resolution is pure and deterministic for a given index and
//! store snapshot: version ties prefer the highest version, ordering
//! ties between unrelated packages fall back to lexical name order.
//!
//! Constraints accumulate monotonically as the graph expands; when two
//! requirers impose predicates no available version satisfies, resolution
//! fails fast with `ConstraintConflict` instead of searching for an
//! alternative assignment.

use crate::error::{Error, Result};
use crate::index::{Package, PackageIndex};
use crate::plan::{Step, TransactionPlan};
use crate::store::InstalledStore;
use crate::version::{self, VersionReq};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Requirer name used for constraints coming from the request itself
const REQUEST: &str = "(request)";

/// One install goal: a package name with an optional version predicate
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub name: String,
    pub predicate: Option<VersionReq>,
}

impl InstallTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predicate: None,
        }
    }

    pub fn with_predicate(name: impl Into<String>, predicate: VersionReq) -> Self {
        Self {
            name: name.into(),
            predicate: Some(predicate),
        }
    }

    /// Parse a command-line spec such as `nginx` or `libssl>=3.0`
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        for (i, ch) in spec.char_indices() {
            if matches!(ch, '<' | '>' | '=' | '^' | '~') {
                let (name, predicate) = spec.split_at(i);
                if name.is_empty() {
                    return Err(Error::Parse(format!("missing package name in '{}'", spec)));
                }
                return Ok(Self::with_predicate(name, version::parse_predicate(predicate)?));
            }
        }
        if spec.is_empty() {
            return Err(Error::Parse("empty package spec".to_string()));
        }
        Ok(Self::new(spec))
    }
}

/// A resolution request: packages to install and/or remove
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub install: Vec<InstallTarget>,
    pub remove: Vec<String>,
}

impl Request {
    pub fn install(targets: Vec<InstallTarget>) -> Self {
        Self {
            install: targets,
            remove: Vec::new(),
        }
    }

    pub fn remove(names: Vec<String>) -> Self {
        Self {
            install: Vec::new(),
            remove: names,
        }
    }
}

/// One accumulated constraint on a package name
#[derive(Debug, Clone)]
struct Constraint {
    predicate: Option<VersionReq>,
    required_by: String,
}

/// Outcome of evaluating a name against its current constraint set
#[derive(Debug, Clone)]
enum Decision<'a> {
    /// Installed version already satisfies everything; no step emitted
    Keep,
    /// Install or upgrade to this candidate
    Pick(&'a Package),
}

impl Decision<'_> {
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Decision::Keep, Decision::Keep) => true,
            (Decision::Pick(a), Decision::Pick(b)) => {
                a.name == b.name && a.version == b.version
            }
            _ => false,
        }
    }
}

struct Resolution<'a> {
    index: &'a PackageIndex,
    store: &'a InstalledStore,
    removing: BTreeSet<String>,
    constraints: BTreeMap<String, Vec<Constraint>>,
    decided: BTreeMap<String, Decision<'a>>,
}

/// Resolve a request into an ordered transaction plan
pub fn resolve(
    index: &PackageIndex,
    store: &InstalledStore,
    request: &Request,
) -> Result<TransactionPlan> {
    let install_names: BTreeSet<String> =
        request.install.iter().map(|t| t.name.clone()).collect();

    // A name in both sets resolves as an install (reinstall/upgrade
    // semantics win over removal).
    let removing: BTreeSet<String> = request
        .remove
        .iter()
        .filter(|name| !install_names.contains(*name))
        .cloned()
        .collect();

    for name in &removing {
        if !store.contains(name) {
            return Err(Error::PackageNotFound(name.clone()));
        }
    }
    check_removal_closure(store, &removing)?;

    let mut resolution = Resolution {
        index,
        store,
        removing,
        constraints: BTreeMap::new(),
        decided: BTreeMap::new(),
    };

    resolution.expand(&request.install)?;

    let mut steps = removal_steps(store, &resolution.removing);
    steps.extend(resolution.ordered_change_steps()?);

    let plan = TransactionPlan::new(steps);
    check_declared_conflicts(store, &plan)?;

    debug!("Resolved plan with {} step(s)", plan.len());
    Ok(plan)
}

/// Fail with `BlockedByDependents` unless every installed package that
/// transitively depends on a removal target is itself being removed
fn check_removal_closure(store: &InstalledStore, removing: &BTreeSet<String>) -> Result<()> {
    for name in removing {
        let mut blocked = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name.as_str()]);
        let mut seen: BTreeSet<&str> = BTreeSet::from([name.as_str()]);

        while let Some(current) = queue.pop_front() {
            for dependent in store.direct_dependents(current) {
                if !seen.insert(&dependent.name) {
                    continue;
                }
                if !removing.contains(&dependent.name) {
                    blocked.insert(dependent.name.clone());
                }
                queue.push_back(&dependent.name);
            }
        }

        if !blocked.is_empty() {
            return Err(Error::BlockedByDependents {
                name: name.clone(),
                dependents: blocked.into_iter().collect(),
            });
        }
    }
    Ok(())
}

/// Removal steps ordered so dependents leave before their dependencies
fn removal_steps(store: &InstalledStore, removing: &BTreeSet<String>) -> Vec<Step> {
    // Reverse topological order of the dependency graph restricted to
    // the removal set: emit a package once no other pending removal
    // still depends on it. Mutual-dependency knots fall back to lexical
    // order; removing both sides violates nothing.
    let mut pending: BTreeSet<&str> = removing.iter().map(String::as_str).collect();
    let mut steps = Vec::new();

    while !pending.is_empty() {
        let next = pending
            .iter()
            .find(|name| {
                !pending.iter().any(|other| {
                    other != *name
                        && store
                            .get(other)
                            .is_some_and(|r| r.requires.iter().any(|d| d.name == **name))
                })
            })
            .copied()
            .unwrap_or_else(|| *pending.iter().next().unwrap());

        pending.remove(next);
        if let Some(record) = store.get(next) {
            steps.push(Step::Remove {
                record: record.clone(),
            });
        }
    }
    steps
}

impl<'a> Resolution<'a> {
    /// Expand install goals to a fixpoint of constraints and decisions
    fn expand(&mut self, targets: &[InstallTarget]) -> Result<()> {
        let mut queue: VecDeque<String> = VecDeque::new();

        for target in targets {
            self.add_constraint(
                &target.name,
                target.predicate.clone(),
                REQUEST,
                &mut queue,
            );
        }

        while let Some(name) = queue.pop_front() {
            let decision = self.evaluate(&name)?;
            let changed = !self
                .decided
                .get(&name)
                .is_some_and(|previous| previous.same_as(&decision));
            if !changed {
                continue;
            }

            if let Decision::Pick(package) = &decision {
                for dep in &package.requires {
                    if self.removing.contains(&dep.name) {
                        // The request removes a package something in the
                        // plan still needs.
                        return Err(Error::BlockedByDependents {
                            name: dep.name.clone(),
                            dependents: vec![package.name.clone()],
                        });
                    }
                    self.add_constraint(
                        &dep.name,
                        dep.version.clone(),
                        &package.name.clone(),
                        &mut queue,
                    );
                }
            }
            self.decided.insert(name, decision);
        }
        Ok(())
    }

    /// Record a constraint; enqueue the name for (re)evaluation if the
    /// constraint is new
    fn add_constraint(
        &mut self,
        name: &str,
        predicate: Option<VersionReq>,
        required_by: &str,
        queue: &mut VecDeque<String>,
    ) {
        let entry = self.constraints.entry(name.to_string()).or_default();
        let display = predicate.as_ref().map(VersionReq::to_string);
        let duplicate = entry.iter().any(|c| {
            c.required_by == required_by
                && c.predicate.as_ref().map(VersionReq::to_string) == display
        });
        if duplicate {
            return;
        }
        entry.push(Constraint {
            predicate,
            required_by: required_by.to_string(),
        });
        queue.push_back(name.to_string());
    }

    /// Decide what to do with `name` under its accumulated constraints
    fn evaluate(&self, name: &str) -> Result<Decision<'a>> {
        let mut constraints: Vec<Constraint> =
            self.constraints.get(name).cloned().unwrap_or_default();

        // Installed packages that will survive this transaction keep
        // their recorded constraints binding.
        for dependent in self.store.direct_dependents(name) {
            let departing = self.removing.contains(&dependent.name)
                || matches!(self.decided.get(&dependent.name), Some(Decision::Pick(_)));
            if departing {
                continue;
            }
            for dep in dependent.requires.iter().filter(|d| d.name == name) {
                constraints.push(Constraint {
                    predicate: dep.version.clone(),
                    required_by: dependent.name.clone(),
                });
            }
        }

        let predicates: Vec<&VersionReq> =
            constraints.iter().filter_map(|c| c.predicate.as_ref()).collect();

        if let Some(installed) = self.store.get(name) {
            if !self.removing.contains(name)
                && predicates.iter().all(|req| req.matches(&installed.version))
            {
                return Ok(Decision::Keep);
            }
        }

        if !self.index.contains(name) {
            return Err(Error::PackageNotFound(name.to_string()));
        }

        match self.index.best_match(name, &predicates) {
            Some(package) => Ok(Decision::Pick(package)),
            None => Err(self.constraint_conflict(name, &constraints)),
        }
    }

    /// Identify the constraint that made the candidate set empty and the
    /// earlier requirer it clashes with
    fn constraint_conflict(&self, name: &str, constraints: &[Constraint]) -> Error {
        let mut surviving: Vec<&Package> = self.index.candidates(name).iter().collect();
        let mut prior_requirer = REQUEST.to_string();

        for constraint in constraints {
            let Some(predicate) = &constraint.predicate else {
                continue;
            };
            let next: Vec<&Package> = surviving
                .iter()
                .filter(|p| predicate.matches(&p.version))
                .copied()
                .collect();
            if next.is_empty() {
                return Error::ConstraintConflict {
                    name: name.to_string(),
                    predicate: predicate.to_string(),
                    required_by: constraint.required_by.clone(),
                    conflicts_with: prior_requirer,
                };
            }
            surviving = next;
            prior_requirer = constraint.required_by.clone();
        }

        // No single pair is unsatisfiable, so the index simply has no
        // candidate at all (all versions filtered by the combination).
        Error::ConstraintConflict {
            name: name.to_string(),
            predicate: constraints
                .iter()
                .filter_map(|c| c.predicate.as_ref())
                .map(VersionReq::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            required_by: constraints
                .last()
                .map(|c| c.required_by.clone())
                .unwrap_or_else(|| REQUEST.to_string()),
            conflicts_with: REQUEST.to_string(),
        }
    }

    /// Install/upgrade steps in dependency order (dependencies first,
    /// lexical tie-break), or `DependencyCycle` if no order exists
    fn ordered_change_steps(&self) -> Result<Vec<Step>> {
        let picks: BTreeMap<&str, &Package> = self
            .decided
            .iter()
            .filter_map(|(name, decision)| match decision {
                Decision::Pick(package) => Some((name.as_str(), *package)),
                Decision::Keep => None,
            })
            .collect();

        // Edges only between packages that actually change; dependencies
        // satisfied by kept installs impose no ordering.
        let mut indegree: BTreeMap<&str, usize> =
            picks.keys().map(|name| (*name, 0)).collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, package) in &picks {
            for dep in &package.requires {
                if picks.contains_key(dep.name.as_str()) {
                    *indegree.get_mut(name).unwrap() += 1;
                    dependents
                        .entry(dep.name.as_str())
                        .or_default()
                        .push(*name);
                }
            }
        }

        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut ordered = Vec::new();

        while let Some(&name) = ready.iter().next() {
            ready.remove(name);
            ordered.push(name);
            for dependent in dependents.get(name).into_iter().flatten() {
                let degree = indegree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }

        if ordered.len() < picks.len() {
            let remaining: BTreeSet<&str> = picks
                .keys()
                .filter(|name| !ordered.contains(name))
                .copied()
                .collect();
            return Err(Error::DependencyCycle(find_cycle(&picks, &remaining)));
        }

        Ok(ordered
            .into_iter()
            .map(|name| {
                let package = picks[name];
                match self.store.get(name) {
                    Some(record) => Step::Upgrade {
                        from: record.clone(),
                        to: package.clone(),
                    },
                    None => Step::Install {
                        package: package.clone(),
                    },
                }
            })
            .collect())
    }
}

/// Walk the leftover strongly-connected portion of the pick graph and
/// name one concrete cycle
fn find_cycle(picks: &BTreeMap<&str, &Package>, remaining: &BTreeSet<&str>) -> Vec<String> {
    let start = *remaining.iter().next().expect("cycle set is non-empty");
    let mut path: Vec<&str> = vec![start];
    let mut on_path: BTreeSet<&str> = BTreeSet::from([start]);

    loop {
        let current = *path.last().expect("path is non-empty");
        let next = picks[current]
            .requires
            .iter()
            .map(|d| d.name.as_str())
            .find(|dep| remaining.contains(dep));
        let Some(next) = next else {
            // Dead end inside the remaining set cannot happen: every
            // remaining node has an unresolved dependency edge.
            return path.iter().map(|s| s.to_string()).collect();
        };
        if on_path.contains(next) {
            let entry = path.iter().position(|n| *n == next).unwrap_or(0);
            let mut cycle: Vec<String> =
                path[entry..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        on_path.insert(next);
        path.push(next);
    }
}

/// Fail with `PackageConflict` if two packages that would coexist at
/// plan completion declare a conflict with each other. Surviving
/// installed packages are judged by the conflicts recorded at their
/// install time; the index may no longer carry them at all.
fn check_declared_conflicts(store: &InstalledStore, plan: &TransactionPlan) -> Result<()> {
    // Final state: installed survivors plus incoming packages.
    let mut final_state: BTreeMap<&str, &crate::version::Version> = store
        .records()
        .filter(|record| !plan.departs(&record.name))
        .map(|record| (record.name.as_str(), &record.version))
        .collect();
    for step in &plan.steps {
        if let Some(package) = step.incoming() {
            final_state.insert(package.name.as_str(), &package.version);
        }
    }

    for step in &plan.steps {
        let Some(package) = step.incoming() else {
            continue;
        };
        for conflict in &package.conflicts {
            if let Some(version) = final_state.get(conflict.name.as_str()) {
                if conflict.applies_to(&conflict.name, version) {
                    return Err(Error::PackageConflict {
                        package: package.name.clone(),
                        conflicts_with: conflict.name.clone(),
                    });
                }
            }
        }

        // Surviving installed packages enforce their recorded conflicts
        // against the incoming one.
        for record in store.records() {
            if record.name == package.name || plan.departs(&record.name) {
                continue;
            }
            for conflict in &record.conflicts {
                if conflict.applies_to(&package.name, &package.version) {
                    return Err(Error::PackageConflict {
                        package: record.name.clone(),
                        conflicts_with: package.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
