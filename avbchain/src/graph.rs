use std::collections::{BTreeMap, BTreeSet};

use crate::{
    avb::AvbInfo,
    error::{Error, Result},
};

/// Which partitions each partition references through its descriptors.
///
/// A partition has to be packed after everything it references, because
/// packing recomputes the digests and keys its parent embeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    deps: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build<'a, I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a AvbInfo)>,
    {
        let mut graph = Self::new();

        for (name, info) in records {
            let refs = info
                .header
                .descriptors
                .iter()
                .filter_map(|d| d.partition_name());
            graph.insert(name, refs);
        }

        graph.validate()?;
        debug!("AVB dependency graph: {:?}", graph.deps);
        Ok(graph)
    }

    /// Adds `name` with the given references. Self references are dropped.
    pub fn insert<I, S>(&mut self, name: &str, refs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.deps.entry(name.to_string()).or_default();
        for r in refs {
            let r = r.as_ref();
            if r != name {
                entry.insert(r.to_string());
            }
        }
    }

    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.deps.get(name)
    }

    fn validate(&self) -> Result<()> {
        for (name, deps) in &self.deps {
            if let Some(missing) = deps.iter().find(|d| !self.deps.contains_key(*d)) {
                return Err(Error::Parse(format!(
                    "{name} references unknown partition {missing}"
                )));
            }
        }
        Ok(())
    }

    /// Orders partitions so that every partition comes after the ones it
    /// references. Partitions that become ready at the same time are emitted
    /// by name, so the same graph always gives the same order.
    pub fn pack_order(&self) -> Result<Vec<String>> {
        self.validate()?;

        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut ready = BTreeSet::new();

        for (name, deps) in &self.deps {
            if deps.is_empty() {
                ready.insert(name.as_str());
            } else {
                pending.insert(name.as_str(), deps.iter().map(String::as_str).collect());
            }
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut order = Vec::with_capacity(self.deps.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());

            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(deps) = pending.get_mut(dependent) {
                    deps.remove(name);
                    if deps.is_empty() {
                        pending.remove(dependent);
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if !pending.is_empty() {
            return Err(Error::Cycle(find_cycle(&pending)));
        }

        Ok(order)
    }
}

/// Every node left in `pending` still waits on another pending node, so
/// following any edge from any node must eventually revisit a node.
fn find_cycle(pending: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<String> {
    let mut path: Vec<&str> = Vec::new();
    let mut node = pending.keys().next().copied();

    while let Some(current) = node {
        if let Some(start) = path.iter().position(|n| *n == current) {
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(current.to_string());
            return cycle;
        }
        path.push(current);
        node = pending.get(current).and_then(|deps| deps.first().copied());
    }

    path.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (name, deps) in edges {
            g.insert(name, deps.iter());
        }
        g
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_first() {
        let g = graph(&[
            ("vbmeta", &["vbmeta_system", "boot", "dtbo"]),
            ("vbmeta_system", &["system", "product"]),
            ("boot", &[]),
            ("dtbo", &[]),
            ("system", &[]),
            ("product", &[]),
        ]);

        let order = g.pack_order().unwrap();
        assert_eq!(order.len(), 6);
        for (name, deps) in &g.deps {
            for dep in deps {
                assert!(position(&order, dep) < position(&order, name), "{dep} after {name}");
            }
        }
    }

    #[test]
    fn test_order_is_deterministic() {
        let g = graph(&[
            ("vbmeta", &["vbmeta_system", "boot"]),
            ("vbmeta_system", &["system"]),
            ("system", &[]),
            ("boot", &[]),
        ]);

        let first = g.pack_order().unwrap();
        assert_eq!(first, ["boot", "system", "vbmeta_system", "vbmeta"]);
        for _ in 0..10 {
            assert_eq!(g.clone().pack_order().unwrap(), first);
        }
    }

    #[test]
    fn test_self_reference_ignored() {
        let g = graph(&[("boot", &["boot"])]);
        assert!(g.dependencies("boot").unwrap().is_empty());
        assert_eq!(g.pack_order().unwrap(), ["boot"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        match g.pack_order() {
            Err(Error::Cycle(cycle)) => assert_eq!(cycle, ["a", "b", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_behind_ready_nodes() {
        let g = graph(&[
            ("boot", &[]),
            ("vbmeta", &["x", "boot"]),
            ("x", &["y"]),
            ("y", &["z"]),
            ("z", &["x"]),
        ]);
        let Err(Error::Cycle(cycle)) = g.pack_order() else {
            panic!("cycle not detected");
        };
        assert_eq!(cycle, ["x", "y", "z", "x"]);
    }

    #[test]
    fn test_unknown_reference() {
        let g = graph(&[("vbmeta", &["odm"])]);
        assert!(matches!(g.pack_order(), Err(Error::Parse(_))));
    }
}
