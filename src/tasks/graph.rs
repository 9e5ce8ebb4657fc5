//! Named tasks with prerequisites, executed depth-first.
//!
//! A run visits the requested task's prerequisites in declared order, each
//! one's own prerequisites first, and executes every node at most once even
//! when several paths reach it. Execution is sequential and fail-fast.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone)]
pub struct TaskNode<A> {
    pub name: String,
    pub description: String,
    pub prerequisites: Vec<String>,
    pub action: A,
}

impl<A> TaskNode<A> {
    pub fn new(name: impl Into<String>, description: impl Into<String>, action: A) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prerequisites: Vec::new(),
            action,
        }
    }

    pub fn after(mut self, prerequisite: impl Into<String>) -> Self {
        self.prerequisites.push(prerequisite.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TaskGraph<A> {
    nodes: Vec<TaskNode<A>>,
    index: BTreeMap<String, usize>,
}

impl<A> Default for TaskGraph<A> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl<A> TaskGraph<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node. Prerequisites may be registered later; call
    /// [`TaskGraph::validate`] once the graph is complete.
    pub fn add(&mut self, node: TaskNode<A>) -> Result<()> {
        if node.name.trim().is_empty() {
            return Err(ProvisionError::Graph("task name must not be empty".to_string()));
        }
        if self.index.contains_key(&node.name) {
            return Err(ProvisionError::Graph(format!(
                "task '{}' is defined twice",
                node.name
            )));
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Checks that every prerequisite exists and the graph has no cycle.
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            for prerequisite in &node.prerequisites {
                if !self.index.contains_key(prerequisite) {
                    return Err(ProvisionError::Graph(format!(
                        "task '{}' depends on undefined task '{}'",
                        node.name, prerequisite
                    )));
                }
            }
        }

        let mut marks = vec![None; self.nodes.len()];
        for start in 0..self.nodes.len() {
            let mut path = Vec::new();
            self.visit_for_cycles(start, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit_for_cycles(
        &self,
        idx: usize,
        marks: &mut [Option<Mark>],
        path: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[idx] {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let from = path.iter().position(|&i| i == idx).unwrap_or(0);
                let mut cycle: Vec<&str> =
                    path[from..].iter().map(|&i| self.nodes[i].name.as_str()).collect();
                cycle.push(self.nodes[idx].name.as_str());
                return Err(ProvisionError::Graph(format!(
                    "dependency cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            None => {}
        }

        marks[idx] = Some(Mark::Visiting);
        path.push(idx);
        for prerequisite in &self.nodes[idx].prerequisites {
            if let Some(&next) = self.index.get(prerequisite) {
                self.visit_for_cycles(next, marks, path)?;
            }
        }
        path.pop();
        marks[idx] = Some(Mark::Done);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TaskNode<A>> {
        self.index.get(name).map(|&idx| &self.nodes[idx])
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode<A>> {
        self.nodes.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Execution order for `name`: prerequisites first, each node once.
    pub fn plan(&self, name: &str) -> Result<Vec<&TaskNode<A>>> {
        let &root = self.index.get(name).ok_or_else(|| ProvisionError::UnknownTask {
            name: name.to_string(),
            available: self.names().join(", "),
        })?;

        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut on_path = BTreeSet::new();
        self.collect(root, &mut visited, &mut on_path, &mut order)?;
        Ok(order.into_iter().map(|idx| &self.nodes[idx]).collect())
    }

    fn collect(
        &self,
        idx: usize,
        visited: &mut BTreeSet<usize>,
        on_path: &mut BTreeSet<usize>,
        order: &mut Vec<usize>,
    ) -> Result<()> {
        if visited.contains(&idx) {
            return Ok(());
        }
        if !on_path.insert(idx) {
            return Err(ProvisionError::Graph(format!(
                "dependency cycle through '{}'",
                self.nodes[idx].name
            )));
        }
        for prerequisite in &self.nodes[idx].prerequisites {
            let &next = self.index.get(prerequisite).ok_or_else(|| {
                ProvisionError::Graph(format!(
                    "task '{}' depends on undefined task '{}'",
                    self.nodes[idx].name, prerequisite
                ))
            })?;
            self.collect(next, visited, on_path, order)?;
        }
        on_path.remove(&idx);
        visited.insert(idx);
        order.push(idx);
        Ok(())
    }

    /// Runs `name` and its prerequisites through `exec`, stopping at the first
    /// error. Errors are wrapped with the failing task's name. Returns the
    /// names of the tasks that ran.
    pub fn run<F>(&self, name: &str, mut exec: F) -> Result<Vec<String>>
    where
        F: FnMut(&TaskNode<A>) -> Result<()>,
    {
        let plan = self.plan(name)?;
        let mut ran = Vec::with_capacity(plan.len());
        for node in plan {
            exec(node).map_err(|source| ProvisionError::Task {
                task: node.name.clone(),
                source: Box::new(source),
            })?;
            ran.push(node.name.clone());
        }
        Ok(ran)
    }
}
