/// Task Graph
///
/// Named tasks with optional dependencies, ordered with Kahn's algorithm.
/// Ready tasks are released in insertion order, so a graph without edges
/// yields its tasks exactly as they were added.
use crate::error::{IngestError, Result};
use indexmap::IndexMap;
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct TaskGraph<T> {
    tasks: IndexMap<String, T>,
    /// For each task (by insertion index), the tasks it depends on
    dependencies: Vec<Vec<usize>>,
}

impl<T> Default for TaskGraph<T> {
    fn default() -> Self {
        Self { tasks: IndexMap::new(), dependencies: Vec::new() }
    }
}

impl<T> TaskGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn add_task(&mut self, name: impl Into<String>, task: T) -> Result<()> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(IngestError::Config(format!("duplicate task [{}]", name)));
        }
        self.tasks.insert(name, task);
        self.dependencies.push(Vec::new());
        Ok(())
    }

    /// Declare that `task` must run after `depends_on`
    #[cfg(test)]
    pub fn add_dependency(&mut self, task: &str, depends_on: &str) -> Result<()> {
        let task_index = self.index_of(task)?;
        let dependency_index = self.index_of(depends_on)?;
        self.dependencies[task_index].push(dependency_index);
        Ok(())
    }

    #[cfg(test)]
    fn index_of(&self, name: &str) -> Result<usize> {
        self.tasks.get_index_of(name).ok_or_else(|| IngestError::Config(format!("unknown task [{}]", name)))
    }

    /// Consume the graph, returning `(name, task)` pairs in a valid execution order
    pub fn into_sorted(self) -> Result<Vec<(String, T)>> {
        let count = self.tasks.len();
        let mut pending = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (task, deps) in self.dependencies.iter().enumerate() {
            for &dep in deps {
                pending[task] += 1;
                dependents[dep].push(task);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let stuck: Vec<&str> = self
                .tasks
                .keys()
                .enumerate()
                .filter(|(i, _)| pending[*i] > 0)
                .map(|(_, name)| name.as_str())
                .collect();
            return Err(IngestError::Config(format!("dependency cycle between tasks [{}]", stuck.join(", "))));
        }

        let mut slots: Vec<Option<(String, T)>> = self.tasks.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}
