//! Advisory dependency analysis over registered modules.
//!
//! Nothing here gates initialization or changes its order; the runtime only
//! logs what it finds.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::lifecycle::ModuleRecord;

/// A declared dependency that no module, capability or service satisfies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    pub module: String,
    pub dependency: String,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    /// `adj[a]` lists the modules `a` depends on.
    adj: Vec<Vec<usize>>,
    missing: Vec<MissingDependency>,
}

impl DependencyGraph {
    /// Build from module records. A dependency resolves to module B when it
    /// names B or one of B's capability tags; names in `services` are
    /// satisfied without contributing an edge.
    pub fn build(records: &[ModuleRecord], services: &[String]) -> Self {
        let names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
        let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, r) in records.iter().enumerate() {
            providers.entry(r.name.as_str()).or_default().push(i);
            for cap in &r.provides {
                providers.entry(cap.as_str()).or_default().push(i);
            }
        }

        let mut adj = vec![Vec::new(); records.len()];
        let mut missing = Vec::new();
        for (i, r) in records.iter().enumerate() {
            for dep in &r.dependencies {
                match providers.get(dep.as_str()) {
                    Some(targets) => {
                        for &t in targets {
                            if t != i && !adj[i].contains(&t) {
                                adj[i].push(t);
                            }
                        }
                    }
                    None if services.iter().any(|s| s == dep) => {}
                    None => missing.push(MissingDependency {
                        module: r.name.clone(),
                        dependency: dep.clone(),
                    }),
                }
            }
        }

        Self {
            names,
            adj,
            missing,
        }
    }

    /// Direct dependencies of `module` among the registered modules.
    pub fn dependencies_of(&self, module: &str) -> Vec<&str> {
        let Some(i) = self.names.iter().position(|n| n == module) else {
            return Vec::new();
        };
        let deps: BTreeSet<&str> = self.adj[i].iter().map(|&j| self.names[j].as_str()).collect();
        deps.into_iter().collect()
    }

    pub fn missing(&self) -> &[MissingDependency] {
        &self.missing
    }

    /// First cycle found, as a closed path (`a -> b -> a`).
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            node: usize,
            adj: &[Vec<usize>],
            colors: &mut [Color],
            path: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            colors[node] = Color::Gray;
            path.push(node);

            for &next in &adj[node] {
                match colors[next] {
                    Color::Gray => {
                        // back edge: the cycle is the path suffix starting at `next`
                        if let Some(start) = path.iter().position(|&n| n == next) {
                            let mut cycle = path[start..].to_vec();
                            cycle.push(next);
                            return Some(cycle);
                        }
                    }
                    Color::White => {
                        if let Some(cycle) = dfs(next, adj, colors, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }

            path.pop();
            colors[node] = Color::Black;
            None
        }

        let mut colors = vec![Color::White; self.names.len()];
        let mut path = Vec::new();
        for i in 0..self.names.len() {
            if colors[i] == Color::White {
                if let Some(cycle) = dfs(i, &self.adj, &mut colors, &mut path) {
                    return Some(cycle.into_iter().map(|j| self.names[j].clone()).collect());
                }
            }
        }
        None
    }

    /// Log cycles and unmet dependencies at `warn`.
    pub fn report(&self) {
        if let Some(cycle) = self.find_cycle() {
            tracing::warn!(cycle = %cycle.join(" -> "), "Circular module dependency detected (advisory)");
        }
        for m in &self.missing {
            tracing::warn!(module = %m.module, dependency = %m.dependency, "Declared dependency is not provided by any module or service");
        }
    }
}
