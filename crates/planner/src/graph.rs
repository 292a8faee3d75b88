use crate::error::ConfigError;
use model::{catalog::table::TableDescriptor, core::identifiers::QualifiedName};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Result of ordering a dependency graph into levels.
///
/// A cycle is not an error: `Cyclic` still carries a usable best-effort
/// order together with the tables that could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopoOrder {
    Ordered(Vec<Vec<QualifiedName>>),
    Cyclic {
        levels: Vec<Vec<QualifiedName>>,
        cycles: Vec<Vec<QualifiedName>>,
    },
}

impl TopoOrder {
    pub fn levels(&self) -> &[Vec<QualifiedName>] {
        match self {
            TopoOrder::Ordered(levels) => levels,
            TopoOrder::Cyclic { levels, .. } => levels,
        }
    }

    pub fn cycles(&self) -> &[Vec<QualifiedName>] {
        match self {
            TopoOrder::Ordered(_) => &[],
            TopoOrder::Cyclic { cycles, .. } => cycles,
        }
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(self, TopoOrder::Cyclic { .. })
    }

    pub fn into_parts(self) -> (Vec<Vec<QualifiedName>>, Vec<Vec<QualifiedName>>) {
        match self {
            TopoOrder::Ordered(levels) => (levels, Vec::new()),
            TopoOrder::Cyclic { levels, cycles } => (levels, cycles),
        }
    }
}

/// Tables plus their foreign-key edges (child -> referenced parent).
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    tables: BTreeMap<QualifiedName, TableDescriptor>,
    parents: BTreeMap<QualifiedName, BTreeSet<QualifiedName>>,
    self_referencing: BTreeSet<QualifiedName>,
}

impl DependencyGraph {
    /// Builds the graph, rejecting dangling foreign keys, duplicate tables
    /// and destination collisions.
    pub fn build(descriptors: &[TableDescriptor]) -> Result<Self, ConfigError> {
        let mut tables = BTreeMap::new();
        let mut destinations: HashMap<QualifiedName, QualifiedName> = HashMap::new();

        for descriptor in descriptors {
            if tables
                .insert(descriptor.name.clone(), descriptor.clone())
                .is_some()
            {
                return Err(ConfigError::DuplicateTable(descriptor.name.clone()));
            }

            let destination = descriptor.destination_name();
            if let Some(first) = destinations.insert(destination.clone(), descriptor.name.clone()) {
                return Err(ConfigError::DuplicateDestination {
                    destination,
                    first,
                    second: descriptor.name.clone(),
                });
            }
        }

        let mut parents: BTreeMap<QualifiedName, BTreeSet<QualifiedName>> = BTreeMap::new();
        let mut self_referencing = BTreeSet::new();

        for descriptor in descriptors {
            let edges = parents.entry(descriptor.name.clone()).or_default();

            for target in descriptor.dependencies() {
                if !tables.contains_key(target) {
                    return Err(ConfigError::DanglingForeignKey {
                        table: descriptor.name.clone(),
                        references: target.clone(),
                    });
                }
                edges.insert(target.clone());
            }

            if descriptor.is_self_referencing() {
                self_referencing.insert(descriptor.name.clone());
            }
        }

        Ok(Self {
            tables,
            parents,
            self_referencing,
        })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &QualifiedName) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> &BTreeMap<QualifiedName, TableDescriptor> {
        &self.tables
    }

    pub fn parents_of(&self, name: &QualifiedName) -> impl Iterator<Item = &QualifiedName> {
        self.parents.get(name).into_iter().flatten()
    }

    /// Tables whose foreign keys point at themselves.
    pub fn self_referencing(&self) -> &BTreeSet<QualifiedName> {
        &self.self_referencing
    }

    /// Orders tables into topological generations with Kahn's algorithm.
    ///
    /// Ties inside a level are broken by qualified name. Tables left over
    /// once no zero in-degree node remains are grouped into strongly
    /// connected components; every cycle lands in a single level and the
    /// tables depending on it follow in later levels.
    pub fn order(&self) -> TopoOrder {
        let names: Vec<&QualifiedName> = self.tables.keys().collect();
        let ids: HashMap<&QualifiedName, usize> =
            names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        for (child, targets) in &self.parents {
            let Some(&c) = ids.get(child) else { continue };
            for target in targets {
                if let Some(&p) = ids.get(target) {
                    parents[c].push(p);
                    children[p].push(c);
                }
            }
        }

        let mut in_degree: Vec<usize> = parents.iter().map(Vec::len).collect();
        let mut placed = vec![false; names.len()];
        let mut levels: Vec<Vec<QualifiedName>> = Vec::new();

        // Ids follow name order, so a sorted id list is a sorted name list.
        let mut ready: Vec<usize> = (0..names.len()).filter(|&i| in_degree[i] == 0).collect();
        while !ready.is_empty() {
            ready.sort_unstable();
            let mut next = Vec::new();
            for &node in &ready {
                placed[node] = true;
                for &child in &children[node] {
                    in_degree[child] -= 1;
                    if in_degree[child] == 0 {
                        next.push(child);
                    }
                }
            }
            levels.push(ready.iter().map(|&i| names[i].clone()).collect());
            ready = next;
        }

        if placed.iter().all(|p| *p) {
            return TopoOrder::Ordered(levels);
        }

        let residual: Vec<usize> = (0..names.len()).filter(|&i| !placed[i]).collect();
        let components = strongly_connected(&residual, &parents, &placed);

        let mut component_of = vec![usize::MAX; names.len()];
        for (cid, members) in components.iter().enumerate() {
            for &m in members {
                component_of[m] = cid;
            }
        }

        // Condense the residual graph and keep peeling generations off it.
        let mut comp_in_degree = vec![0usize; components.len()];
        let mut comp_children: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
        for &node in &residual {
            let cid = component_of[node];
            for &parent in &parents[node] {
                if placed[parent] {
                    continue;
                }
                let pid = component_of[parent];
                if pid != cid && comp_children[pid].insert(cid) {
                    comp_in_degree[cid] += 1;
                }
            }
        }

        let mut ready: Vec<usize> = (0..components.len())
            .filter(|&c| comp_in_degree[c] == 0)
            .collect();
        while !ready.is_empty() {
            let mut level: Vec<usize> = Vec::new();
            let mut next = Vec::new();
            for &cid in &ready {
                level.extend(&components[cid]);
                for &child in &comp_children[cid] {
                    comp_in_degree[child] -= 1;
                    if comp_in_degree[child] == 0 {
                        next.push(child);
                    }
                }
            }
            level.sort_unstable();
            levels.push(level.iter().map(|&i| names[i].clone()).collect());
            ready = next;
        }

        let mut cycles: Vec<Vec<QualifiedName>> = components
            .iter()
            .filter(|members| members.len() > 1)
            .map(|members| {
                let mut members = members.clone();
                members.sort_unstable();
                members.iter().map(|&i| names[i].clone()).collect()
            })
            .collect();
        cycles.sort();

        TopoOrder::Cyclic { levels, cycles }
    }
}

/// Tarjan's algorithm restricted to the nodes not yet placed.
fn strongly_connected(nodes: &[usize], parents: &[Vec<usize>], placed: &[bool]) -> Vec<Vec<usize>> {
    struct Tarjan<'a> {
        parents: &'a [Vec<usize>],
        placed: &'a [bool],
        counter: usize,
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        stack: Vec<usize>,
        on_stack: Vec<bool>,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.counter);
            self.lowlink[v] = self.counter;
            self.counter += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            let parents = self.parents;
            for &w in &parents[v] {
                if self.placed[w] {
                    continue;
                }
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    let size = parents.len();
    let mut tarjan = Tarjan {
        parents,
        placed,
        counter: 0,
        index: vec![None; size],
        lowlink: vec![0; size],
        stack: Vec::new(),
        on_stack: vec![false; size],
        components: Vec::new(),
    };

    for &node in nodes {
        if tarjan.index[node].is_none() {
            tarjan.visit(node);
        }
    }

    tarjan.components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> QualifiedName {
        s.parse().unwrap()
    }

    fn table(n: &str, deps: &[&str]) -> TableDescriptor {
        deps.iter().fold(
            TableDescriptor::new(name(n)).with_primary_key(["ID"]),
            |t, dep| t.with_foreign_key(format!("{}_ID", dep.replace('.', "_")), name(dep), "ID"),
        )
    }

    fn rendered(levels: &[Vec<QualifiedName>]) -> Vec<Vec<String>> {
        levels
            .iter()
            .map(|l| l.iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn orders_acyclic_graph_into_generations() {
        let graph = DependencyGraph::build(&[
            table("SALES.ORDER_ITEMS", &["SALES.ORDERS"]),
            table("HR.EMPLOYEES", &["HR.DEPARTMENTS", "HR.JOBS"]),
            table("SALES.ORDERS", &["SALES.CUSTOMERS"]),
            table("HR.JOBS", &[]),
            table("SALES.CUSTOMERS", &[]),
            table("HR.DEPARTMENTS", &[]),
        ])
        .unwrap();

        let order = graph.order();
        assert!(!order.is_cyclic());
        assert_eq!(
            rendered(order.levels()),
            vec![
                vec!["HR.DEPARTMENTS", "HR.JOBS", "SALES.CUSTOMERS"],
                vec!["HR.EMPLOYEES", "SALES.ORDERS"],
                vec!["SALES.ORDER_ITEMS"],
            ]
        );
    }

    #[test]
    fn every_parent_lands_in_a_strictly_earlier_level() {
        let graph = DependencyGraph::build(&[
            table("S.E", &["S.C", "S.D"]),
            table("S.D", &["S.A"]),
            table("S.C", &["S.A", "S.B"]),
            table("S.B", &[]),
            table("S.A", &[]),
            table("S.F", &["S.E", "S.A"]),
        ])
        .unwrap();

        let order = graph.order();
        let level_of: HashMap<QualifiedName, usize> = order
            .levels()
            .iter()
            .enumerate()
            .flat_map(|(i, l)| l.iter().map(move |t| (t.clone(), i)))
            .collect();

        assert_eq!(level_of.len(), graph.len());
        for (child, level) in &level_of {
            for parent in graph.parents_of(child) {
                assert!(level_of[parent] < *level, "{parent} must precede {child}");
            }
        }
    }

    #[test]
    fn two_table_cycle_is_reported_and_kept_in_one_level() {
        let graph = DependencyGraph::build(&[
            table("S.A", &["S.B"]),
            table("S.B", &["S.A"]),
            table("S.ROOT", &[]),
        ])
        .unwrap();

        let order = graph.order();
        assert!(order.is_cyclic());
        assert_eq!(order.cycles(), &[vec![name("S.A"), name("S.B")]]);

        let levels = rendered(order.levels());
        assert_eq!(levels, vec![vec!["S.ROOT"], vec!["S.A", "S.B"]]);
    }

    #[test]
    fn dependents_of_a_cycle_follow_it() {
        let graph = DependencyGraph::build(&[
            table("S.A", &["S.B", "S.ROOT"]),
            table("S.B", &["S.A"]),
            table("S.CHILD", &["S.B"]),
            table("S.GRANDCHILD", &["S.CHILD"]),
            table("S.ROOT", &[]),
        ])
        .unwrap();

        let (levels, cycles) = graph.order().into_parts();
        assert_eq!(cycles, vec![vec![name("S.A"), name("S.B")]]);
        assert_eq!(
            rendered(&levels),
            vec![
                vec!["S.ROOT"],
                vec!["S.A", "S.B"],
                vec!["S.CHILD"],
                vec!["S.GRANDCHILD"],
            ]
        );
    }

    #[test]
    fn separate_cycles_are_reported_separately() {
        let graph = DependencyGraph::build(&[
            table("S.A", &["S.B"]),
            table("S.B", &["S.A"]),
            table("T.X", &["T.Y"]),
            table("T.Y", &["T.Z"]),
            table("T.Z", &["T.X"]),
        ])
        .unwrap();

        let order = graph.order();
        assert_eq!(order.cycles().len(), 2);
        assert_eq!(order.cycles()[1].len(), 3);
        assert_eq!(order.levels().len(), 1);
    }

    #[test]
    fn self_references_do_not_create_cycles() {
        let graph = DependencyGraph::build(&[TableDescriptor::new(name("HR.EMPLOYEES"))
            .with_primary_key(["EMPLOYEE_ID"])
            .with_foreign_key("MANAGER_ID", name("HR.EMPLOYEES"), "EMPLOYEE_ID")])
        .unwrap();

        assert!(!graph.order().is_cyclic());
        assert!(graph.self_referencing().contains(&name("HR.EMPLOYEES")));
    }

    #[test]
    fn dangling_foreign_key_is_a_config_error() {
        let err = DependencyGraph::build(&[table("HR.EMPLOYEES", &["HR.DEPARTMENTS"])])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DanglingForeignKey {
                table: name("HR.EMPLOYEES"),
                references: name("HR.DEPARTMENTS"),
            }
        );
    }

    #[test]
    fn duplicate_tables_and_destinations_are_rejected() {
        let err = DependencyGraph::build(&[table("S.A", &[]), table("S.A", &[])]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateTable(name("S.A")));

        let err = DependencyGraph::build(&[
            table("S.A", &[]),
            table("S.B", &[]).with_destination(name("S.A")),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDestination { .. }));
    }

    #[test]
    fn ordering_is_deterministic_regardless_of_input_order() {
        let tables = vec![
            table("S.D", &["S.B"]),
            table("S.C", &[]),
            table("S.B", &[]),
            table("S.A", &["S.C"]),
        ];
        let mut reversed = tables.clone();
        reversed.reverse();

        let first = DependencyGraph::build(&tables).unwrap().order();
        let second = DependencyGraph::build(&reversed).unwrap().order();
        assert_eq!(first, second);
    }
}
