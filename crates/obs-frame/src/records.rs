//! Record numbering: grouping surviving locations into logical records.

use std::collections::HashMap;

use obs_store::{Element, ElementValues, ElementVisitor};

/// Run-scoped record number generator.
///
/// Numbers start at `start` and advance by `increment`, so ranks reading
/// separate observations can interleave without collisions. Grouping keys
/// keep the number given on first sight for the rest of the run.
#[derive(Debug, Clone)]
pub struct RecordNumbering {
    next: usize,
    increment: usize,
    keys: HashMap<String, usize>,
}

impl Default for RecordNumbering {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl RecordNumbering {
    pub fn new(start: usize, increment: usize) -> Self {
        Self {
            next: start,
            increment: increment.max(1),
            keys: HashMap::new(),
        }
    }

    /// Restart numbering and forget every key.
    pub fn reset(&mut self, start: usize, increment: usize) {
        *self = Self::new(start, increment);
    }

    /// Number the next record would receive.
    pub fn next(&self) -> usize {
        self.next
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    /// Number of distinct grouping keys seen so far.
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    fn take(&mut self) -> usize {
        let n = self.next;
        self.next += self.increment;
        n
    }

    /// One fresh record per location.
    pub fn ungrouped(&mut self, count: usize) -> Vec<usize> {
        (0..count).map(|_| self.take()).collect()
    }

    /// Records by grouping key.
    pub fn grouped(&mut self, keys: &[String]) -> Vec<usize> {
        keys.iter()
            .map(|key| match self.keys.get(key) {
                Some(&n) => n,
                None => {
                    let n = self.take();
                    self.keys.insert(key.clone(), n);
                    n
                }
            })
            .collect()
    }
}

struct KeySegments<'a> {
    frame_index: &'a [usize],
}

impl ElementVisitor for KeySegments<'_> {
    type Output = Vec<String>;

    fn visit<T: Element>(self, values: &[T]) -> Vec<String> {
        self.frame_index
            .iter()
            .map(|&i| {
                values
                    .get(i)
                    .map(|v| v.to_value().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// Grouping keys for the locations at `frame_index`: the value of each
/// column stringified and joined with `:` in column order.
pub fn grouping_keys(columns: &[ElementValues], frame_index: &[usize]) -> Vec<String> {
    let mut keys = vec![String::new(); frame_index.len()];
    for (n, column) in columns.iter().enumerate() {
        let segments = column.visit(KeySegments { frame_index });
        for (key, segment) in keys.iter_mut().zip(segments) {
            if n > 0 {
                key.push(':');
            }
            key.push_str(&segment);
        }
    }
    keys
}
