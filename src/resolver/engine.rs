// src/resolver/engine.rs

//! Generic backtracking dependency resolution
//!
//! The search is parameterized over a [`ResolveContext`] that supplies
//! candidate sets and dependency edges; the engine itself only knows
//! about packages, candidates and constraints. Candidates are tried in
//! the order the context returns them, so preference policies (pinned
//! selections, pre-release ordering) are entirely the context's business.

use crate::dependency::{Dependency, DependencySpec};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// A package with a chosen candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub pack: String,
    pub config: Dependency,
}

impl TreeNode {
    pub fn new(pack: impl Into<String>, config: Dependency) -> Self {
        Self {
            pack: pack.into(),
            config,
        }
    }
}

/// A dependency edge from a chosen node to a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDependency {
    pub pack: String,
    pub dep: Dependency,
}

/// Supplies the package universe to the resolution engine
pub trait ResolveContext {
    /// Candidate configurations for a package, most preferred first
    fn all_candidates(&mut self, pack: &str) -> Result<Vec<Dependency>>;

    /// Candidates forced by the referring node, or `None` for the normal
    /// candidate set (used for path-pinned children: a loadable target
    /// yields exactly one candidate, an unloadable one yields none)
    fn specific_candidates(
        &mut self,
        _pack: &str,
        _parent: &TreeNode,
    ) -> Result<Option<Vec<Dependency>>> {
        Ok(None)
    }

    /// Dependency edges of a chosen node, sorted by package name
    fn children(&mut self, node: &TreeNode) -> Result<Vec<ChildDependency>>;

    /// Whether a candidate for `pack` satisfies a constraint
    ///
    /// Contexts may be lenient here, e.g. to let an authoritative pinned
    /// selection pass a range check it technically fails.
    fn matches(&self, _pack: &str, candidate: &Dependency, constraint: &Dependency) -> bool {
        match (&candidate.spec, &constraint.spec) {
            (DependencySpec::Path(a), DependencySpec::Path(b)) => a == b,
            // A path-pinned candidate overrides version constraints
            (DependencySpec::Path(_), _) => true,
            (_, DependencySpec::Path(_)) => false,
            _ => match candidate.exact_version() {
                Some(v) => constraint.matches(&v),
                None => false,
            },
        }
    }

    /// Whether a prior selection state pins this package
    fn is_selected(&self, _pack: &str) -> bool {
        false
    }

    /// Whether a prior selection state existed at all (used to decide if
    /// an absent optional-default dependency counts as deselected)
    fn had_selections(&self) -> bool {
        false
    }
}

/// Outcome of trying one assignment subtree: a conflict rewinds the
/// search, everything else aborts it
enum Failure {
    Conflict,
    Fatal(Error),
}

/// One unsatisfied dependency edge on the work agenda, together with the
/// ancestor path that led to it (for cycle reporting)
#[derive(Debug, Clone)]
struct Edge {
    parent: String,
    path: Vec<String>,
    child: ChildDependency,
}

struct Search<'a, C: ResolveContext> {
    ctx: &'a mut C,
    assignments: BTreeMap<String, Dependency>,
    /// Human-readable trail of rejected constraints
    conflicts: Vec<String>,
    failed_pack: String,
}

/// Resolve the dependency tree rooted at `root`
///
/// Returns a package-name to candidate map (including the root) whose
/// assignments jointly satisfy every edge the context reports, or
/// [`Error::UnresolvableConflict`] when no such map exists.
pub fn resolve<C: ResolveContext>(
    ctx: &mut C,
    root: TreeNode,
) -> Result<BTreeMap<String, Dependency>> {
    let mut search = Search {
        ctx,
        assignments: BTreeMap::new(),
        conflicts: Vec::new(),
        failed_pack: root.pack.clone(),
    };
    search
        .assignments
        .insert(root.pack.clone(), root.config.clone());

    let agenda: Vec<Edge> = search
        .ctx
        .children(&root)?
        .into_iter()
        .map(|child| Edge {
            parent: root.pack.clone(),
            path: vec![root.pack.clone()],
            child,
        })
        .collect();

    match search.satisfy(&agenda) {
        Ok(()) => Ok(search.assignments),
        Err(Failure::Fatal(e)) => Err(e),
        Err(Failure::Conflict) => {
            search.conflicts.dedup();
            Err(Error::UnresolvableConflict {
                package: search.failed_pack,
                conflicts: search.conflicts,
            })
        }
    }
}

impl<C: ResolveContext> Search<'_, C> {
    /// Satisfy every edge on the agenda, depth-first
    ///
    /// When a candidate is chosen for the first edge, the children it
    /// introduces are prepended to the remaining agenda and the whole
    /// rest of the search runs inside that choice. A conflict anywhere
    /// downstream therefore rewinds to the most recent open choice, no
    /// matter how far apart the two packages are in the graph.
    fn satisfy(&mut self, agenda: &[Edge]) -> std::result::Result<(), Failure> {
        let Some((edge, rest)) = agenda.split_first() else {
            return Ok(());
        };
        let pack = &edge.child.pack;

        if edge.path.contains(pack) {
            let mut cycle = edge.path.clone();
            cycle.push(pack.clone());
            return Err(Failure::Fatal(Error::DependencyCycle(cycle)));
        }

        // Optional edges are only followed when the prior selection
        // state wants them: plain optional needs an explicit selection,
        // optional-default is followed unless previously deselected
        if edge.child.dep.optional && !self.assignments.contains_key(pack) {
            let follow = if edge.child.dep.enabled_by_default {
                !self.ctx.had_selections() || self.ctx.is_selected(pack)
            } else {
                self.ctx.is_selected(pack)
            };
            if !follow {
                return self.satisfy(rest);
            }
        }

        if let Some(assigned) = self.assignments.get(pack).cloned() {
            if self.ctx.matches(pack, &assigned, &edge.child.dep) {
                return self.satisfy(rest);
            }
            let message = format!(
                "'{}' requires {} but {} is already chosen",
                edge.parent, edge.child.dep, assigned
            );
            self.note_conflict(pack, &message);
            return Err(Failure::Conflict);
        }

        // The parent of an agenda edge is always assigned already
        let parent_node = TreeNode::new(
            edge.parent.clone(),
            self.assignments
                .get(&edge.parent)
                .cloned()
                .unwrap_or_else(Dependency::any),
        );
        let candidates = match self.ctx.specific_candidates(pack, &parent_node) {
            Ok(Some(candidates)) => candidates,
            Ok(None) => {
                let all = self.ctx.all_candidates(pack).map_err(Failure::Fatal)?;
                all.into_iter()
                    .filter(|c| self.ctx.matches(pack, c, &edge.child.dep))
                    .collect()
            }
            Err(e) => return Err(Failure::Fatal(e)),
        };

        if candidates.is_empty() {
            if edge.child.dep.optional {
                return self.satisfy(rest);
            }
            let message = format!(
                "no candidate of '{}' satisfies {} (required by '{}')",
                pack, edge.child.dep, edge.parent
            );
            self.note_conflict(pack, &message);
            return Err(Failure::Conflict);
        }

        for candidate in candidates {
            let snapshot = self.assignments.clone();
            self.assignments.insert(pack.clone(), candidate.clone());
            let child_node = TreeNode::new(pack.clone(), candidate);

            let grandchildren = match self.ctx.children(&child_node) {
                Ok(grandchildren) => grandchildren,
                Err(Error::DependencyCycle(cycle)) => {
                    return Err(Failure::Fatal(Error::DependencyCycle(cycle)));
                }
                Err(e) => {
                    // An unloadable recipe rejects this candidate
                    let message = format!("{}", e);
                    self.note_conflict(pack, &message);
                    self.assignments = snapshot;
                    continue;
                }
            };

            let mut child_path = edge.path.clone();
            child_path.push(pack.clone());
            let mut next: Vec<Edge> = grandchildren
                .into_iter()
                .map(|child| Edge {
                    parent: pack.clone(),
                    path: child_path.clone(),
                    child,
                })
                .collect();
            next.extend_from_slice(rest);

            match self.satisfy(&next) {
                Ok(()) => return Ok(()),
                Err(Failure::Fatal(e)) => return Err(Failure::Fatal(e)),
                Err(Failure::Conflict) => self.assignments = snapshot,
            }
        }
        let message = format!(
            "every candidate of '{}' was rejected under {}",
            pack, edge.child.dep
        );
        self.note_conflict(pack, &message);
        Err(Failure::Conflict)
    }

    fn note_conflict(&mut self, pack: &str, message: &str) {
        // The first rejection is the deepest and carries the most
        // specific constraint; keep its package for the error report
        if self.conflicts.is_empty() {
            self.failed_pack = pack.to_string();
        }
        self.conflicts.push(message.to_string());
        if self.conflicts.len() > 32 {
            self.conflicts.truncate(32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use std::collections::HashMap;

    /// A fixed in-memory package universe
    struct MockContext {
        /// pack -> candidate versions, most preferred first
        universe: HashMap<String, Vec<&'static str>>,
        /// (pack, version) -> [(dep pack, dep spec)]
        edges: HashMap<(String, String), Vec<(&'static str, &'static str)>>,
        selected: Vec<String>,
        had_selections: bool,
    }

    impl MockContext {
        fn new() -> Self {
            Self {
                universe: HashMap::new(),
                edges: HashMap::new(),
                selected: Vec::new(),
                had_selections: false,
            }
        }

        fn package(mut self, pack: &str, versions: &[&'static str]) -> Self {
            self.universe.insert(pack.to_string(), versions.to_vec());
            self
        }

        fn edge(mut self, pack: &str, version: &str, deps: &[(&'static str, &'static str)]) -> Self {
            self.edges
                .insert((pack.to_string(), version.to_string()), deps.to_vec());
            self
        }
    }

    impl ResolveContext for MockContext {
        fn all_candidates(&mut self, pack: &str) -> Result<Vec<Dependency>> {
            Ok(self
                .universe
                .get(pack)
                .map(|versions| {
                    versions
                        .iter()
                        .map(|v| Dependency::exact(&Version::parse(v).unwrap()))
                        .collect()
                })
                .unwrap_or_default())
        }

        fn children(&mut self, node: &TreeNode) -> Result<Vec<ChildDependency>> {
            let version = node
                .config
                .exact_version()
                .map(|v| v.to_string())
                .unwrap_or_default();
            Ok(self
                .edges
                .get(&(node.pack.clone(), version))
                .map(|deps| {
                    deps.iter()
                        .map(|(pack, spec)| ChildDependency {
                            pack: pack.to_string(),
                            dep: Dependency::parse(spec).unwrap(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        fn is_selected(&self, pack: &str) -> bool {
            self.selected.iter().any(|s| s == pack)
        }

        fn had_selections(&self) -> bool {
            self.had_selections
        }
    }

    fn root() -> TreeNode {
        TreeNode::new("root", Dependency::exact(&Version::parse("0.0.0").unwrap()))
    }

    fn assert_version(result: &BTreeMap<String, Dependency>, pack: &str, version: &str) {
        assert_eq!(
            result.get(pack).and_then(|d| d.exact_version()),
            Some(Version::parse(version).unwrap()),
            "package {} should resolve to {}",
            pack,
            version
        );
    }

    #[test]
    fn test_picks_most_preferred_candidate() {
        let mut ctx = MockContext::new()
            .package("a", &["2.0.0", "1.0.0"])
            .edge("root", "0.0.0", &[("a", "*")]);
        let result = resolve(&mut ctx, root()).unwrap();
        assert_version(&result, "a", "2.0.0");
    }

    #[test]
    fn test_constraint_filters_candidates() {
        let mut ctx = MockContext::new()
            .package("a", &["2.0.0", "1.5.0", "1.0.0"])
            .edge("root", "0.0.0", &[("a", "^1.0.0")]);
        let result = resolve(&mut ctx, root()).unwrap();
        assert_version(&result, "a", "1.5.0");
    }

    #[test]
    fn test_diamond_agrees_on_one_version() {
        let mut ctx = MockContext::new()
            .package("left", &["1.0.0"])
            .package("right", &["1.0.0"])
            .package("shared", &["2.1.0", "2.0.0", "1.0.0"])
            .edge("root", "0.0.0", &[("left", "*"), ("right", "*")])
            .edge("left", "1.0.0", &[("shared", "^2.0.0")])
            .edge("right", "1.0.0", &[("shared", ">=1.0.0 <2.1.0")]);
        let result = resolve(&mut ctx, root()).unwrap();
        assert_version(&result, "shared", "2.0.0");
    }

    #[test]
    fn test_backtracks_across_siblings() {
        // first's preferred 2.0.0 forces shared 2.0.0, but second only
        // accepts shared 1.x, so the search must fall back to first 1.0.0
        let mut ctx = MockContext::new()
            .package("first", &["2.0.0", "1.0.0"])
            .package("second", &["1.0.0"])
            .package("shared", &["2.0.0", "1.0.0"])
            .edge("root", "0.0.0", &[("first", "*"), ("second", "*")])
            .edge("first", "2.0.0", &[("shared", "^2.0.0")])
            .edge("first", "1.0.0", &[("shared", "^1.0.0")])
            .edge("second", "1.0.0", &[("shared", "^1.0.0")]);
        let result = resolve(&mut ctx, root()).unwrap();
        assert_version(&result, "first", "1.0.0");
        assert_version(&result, "shared", "1.0.0");
    }

    #[test]
    fn test_unresolvable_conflict() {
        let mut ctx = MockContext::new()
            .package("a", &["1.0.0"])
            .package("b", &["1.0.0"])
            .package("shared", &["2.0.0", "1.0.0"])
            .edge("root", "0.0.0", &[("a", "*"), ("b", "*")])
            .edge("a", "1.0.0", &[("shared", "^1.0.0")])
            .edge("b", "1.0.0", &[("shared", "^2.0.0")]);
        match resolve(&mut ctx, root()) {
            Err(Error::UnresolvableConflict { package, conflicts }) => {
                assert_eq!(package, "shared");
                assert!(!conflicts.is_empty());
            }
            other => panic!("expected UnresolvableConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_detection() {
        let mut ctx = MockContext::new()
            .package("p", &["1.0.0"])
            .package("q", &["1.0.0"])
            .edge("root", "0.0.0", &[("p", "*")])
            .edge("p", "1.0.0", &[("q", "*")])
            .edge("q", "1.0.0", &[("p", "*")]);
        match resolve(&mut ctx, root()) {
            Err(Error::DependencyCycle(cycle)) => {
                assert!(cycle.contains(&"p".to_string()));
                assert!(cycle.contains(&"q".to_string()));
            }
            other => panic!("expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_dependency() {
        let mut ctx = MockContext::new().edge("root", "0.0.0", &[("ghost", "*")]);
        assert!(matches!(
            resolve(&mut ctx, root()),
            Err(Error::UnresolvableConflict { .. })
        ));
    }

    #[test]
    fn test_optional_dependency_stays_unselected() {
        // Wrapper injecting the optional/default flags on the root edge;
        // the second field is enabled_by_default, the third had_selections
        struct Optional(MockContext, bool, bool);
        impl ResolveContext for Optional {
            fn all_candidates(&mut self, pack: &str) -> Result<Vec<Dependency>> {
                self.0.all_candidates(pack)
            }
            fn children(&mut self, node: &TreeNode) -> Result<Vec<ChildDependency>> {
                if node.pack == "root" {
                    let mut dep = Dependency::parse("*").unwrap();
                    dep.optional = true;
                    dep.enabled_by_default = self.1;
                    Ok(vec![ChildDependency {
                        pack: "opt".to_string(),
                        dep,
                    }])
                } else {
                    Ok(vec![])
                }
            }
            fn is_selected(&self, pack: &str) -> bool {
                self.0.is_selected(pack)
            }
            fn had_selections(&self) -> bool {
                self.2
            }
        }

        // Plain optional without a prior selection: not selected
        let mut ctx = Optional(MockContext::new().package("opt", &["1.0.0"]), false, false);
        let result = resolve(&mut ctx, root()).unwrap();
        assert!(!result.contains_key("opt"));

        // Plain optional with a prior selection: selected
        let mut inner = MockContext::new().package("opt", &["1.0.0"]);
        inner.selected.push("opt".to_string());
        let mut ctx = Optional(inner, false, true);
        let result = resolve(&mut ctx, root()).unwrap();
        assert!(result.contains_key("opt"));

        // Optional default on a fresh project: selected
        let mut ctx = Optional(MockContext::new().package("opt", &["1.0.0"]), true, false);
        let result = resolve(&mut ctx, root()).unwrap();
        assert!(result.contains_key("opt"));

        // Optional default deselected in the prior state: skipped
        let mut ctx = Optional(MockContext::new().package("opt", &["1.0.0"]), true, true);
        let result = resolve(&mut ctx, root()).unwrap();
        assert!(!result.contains_key("opt"));
    }

    #[test]
    fn test_deterministic_result() {
        let build = || {
            MockContext::new()
                .package("a", &["1.1.0", "1.0.0"])
                .package("b", &["2.0.0"])
                .edge("root", "0.0.0", &[("a", "*"), ("b", "*")])
                .edge("a", "1.1.0", &[("b", "^2.0.0")])
        };
        let first = resolve(&mut build(), root()).unwrap();
        let second = resolve(&mut build(), root()).unwrap();
        assert_eq!(first, second);
    }
}
