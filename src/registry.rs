//! Department registry
//!
//! Immutable lookup from department id to its configuration. A missing id is
//! a routine `None` driven by user input, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Department;

pub struct DepartmentRegistry {
    by_id: HashMap<String, usize>,
    departments: Vec<Arc<Department>>,
}

impl DepartmentRegistry {
    pub fn new(departments: Vec<Department>) -> Self {
        let departments: Vec<Arc<Department>> = departments.into_iter().map(Arc::new).collect();
        let by_id = departments
            .iter()
            .enumerate()
            .map(|(index, dept)| (dept.id.clone(), index))
            .collect();
        Self { by_id, departments }
    }

    /// O(1) lookup by department id
    pub fn lookup(&self, id: &str) -> Option<Arc<Department>> {
        self.by_id
            .get(id)
            .map(|&index| Arc::clone(&self.departments[index]))
    }

    /// Departments in config order, for menu rendering
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Department>> {
        self.departments.iter()
    }

    pub fn len(&self) -> usize {
        self.departments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }
}
