//! Hyperslab-style selections over N-dimensional variables.
//!
//! A [`Selection`] is an extent shape plus an ordered list of
//! `(operator, action)` pairs. Every supported action composes to a product
//! set, so a selection resolves to one coordinate list per dimension and is
//! enumerated in row-major order.

use crate::error::{Result, StoreError};

/// How an action combines with the selection built so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionOperator {
    /// Replace the current selection.
    Set,
    /// Intersect with the current selection.
    And,
}

/// A single selection step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectAction {
    /// Contiguous block over every dimension.
    Hyperslab { start: Vec<u64>, count: Vec<u64> },
    /// Listed indices on one dimension.
    Indices { dim: usize, indices: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selection {
    extent: Vec<u64>,
    actions: Vec<(SelectionOperator, SelectAction)>,
}

impl Selection {
    /// An empty action list over `extent`, which selects everything.
    pub fn new(extent: Vec<u64>) -> Self {
        Self {
            extent,
            actions: Vec::new(),
        }
    }

    /// Select the whole extent.
    pub fn all(extent: Vec<u64>) -> Self {
        Self::new(extent)
    }

    pub fn select(mut self, op: SelectionOperator, action: SelectAction) -> Self {
        self.actions.push((op, action));
        self
    }

    pub fn hyperslab(self, op: SelectionOperator, start: Vec<u64>, count: Vec<u64>) -> Self {
        self.select(op, SelectAction::Hyperslab { start, count })
    }

    pub fn indices(self, op: SelectionOperator, dim: usize, indices: Vec<u64>) -> Self {
        self.select(op, SelectAction::Indices { dim, indices })
    }

    pub fn extent(&self) -> &[u64] {
        &self.extent
    }

    pub fn actions(&self) -> &[(SelectionOperator, SelectAction)] {
        &self.actions
    }

    /// Number of elements covered by the extent.
    pub fn extent_len(&self) -> usize {
        self.extent.iter().product::<u64>() as usize
    }

    /// Resolve the action list into per-dimension coordinate lists.
    pub fn resolve(&self) -> Result<ResolvedSelection> {
        let rank = self.extent.len();
        let full = |d: usize| (0..self.extent[d]).collect::<Vec<u64>>();
        let mut coords: Vec<Option<Vec<u64>>> = vec![None; rank];

        for (op, action) in &self.actions {
            match action {
                SelectAction::Hyperslab { start, count } => {
                    if start.len() != rank || count.len() != rank {
                        return Err(StoreError::invalid(format!(
                            "hyperslab rank {}/{} does not match extent rank {}",
                            start.len(),
                            count.len(),
                            rank
                        )));
                    }
                    for d in 0..rank {
                        let range: Vec<u64> = (start[d]..start[d] + count[d]).collect();
                        coords[d] = Some(match (op, coords[d].take()) {
                            (SelectionOperator::And, Some(current)) => intersect(current, &range),
                            _ => range,
                        });
                    }
                }
                SelectAction::Indices { dim, indices } => {
                    if *dim >= rank {
                        return Err(StoreError::invalid(format!(
                            "index selection on dimension {} of a rank {} extent",
                            dim, rank
                        )));
                    }
                    match op {
                        SelectionOperator::Set => {
                            for (d, c) in coords.iter_mut().enumerate() {
                                *c = Some(if d == *dim { indices.clone() } else { full(d) });
                            }
                        }
                        SelectionOperator::And => {
                            let current = coords[*dim].take().unwrap_or_else(|| full(*dim));
                            coords[*dim] = Some(intersect(current, indices));
                        }
                    }
                }
            }
        }

        let coords: Vec<Vec<u64>> = coords
            .into_iter()
            .enumerate()
            .map(|(d, c)| c.unwrap_or_else(|| full(d)))
            .collect();

        for (d, c) in coords.iter().enumerate() {
            if let Some(&bad) = c.iter().find(|&&i| i >= self.extent[d]) {
                return Err(StoreError::invalid(format!(
                    "index {} outside extent {} on dimension {}",
                    bad, self.extent[d], d
                )));
            }
        }

        Ok(ResolvedSelection { coords })
    }
}

fn intersect(current: Vec<u64>, with: &[u64]) -> Vec<u64> {
    current.into_iter().filter(|i| with.contains(i)).collect()
}

/// A selection reduced to one coordinate list per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelection {
    coords: Vec<Vec<u64>>,
}

impl ResolvedSelection {
    /// Select every element of `shape`.
    pub fn full(shape: &[u64]) -> Self {
        Self {
            coords: shape.iter().map(|&n| (0..n).collect()).collect(),
        }
    }

    pub fn coords(&self) -> &[Vec<u64>] {
        &self.coords
    }

    pub fn rank(&self) -> usize {
        self.coords.len()
    }

    /// Number of selected elements.
    pub fn count(&self) -> usize {
        self.coords.iter().map(Vec::len).product()
    }

    /// Row-major linear offsets of the selected elements within `shape`.
    pub fn offsets(&self, name: &str, shape: &[u64]) -> Result<Vec<usize>> {
        self.offsets_within(name, &vec![0; shape.len()], shape)
    }

    /// Row-major linear offsets relative to the block `origin..origin+shape`.
    pub fn offsets_within(&self, name: &str, origin: &[u64], shape: &[u64]) -> Result<Vec<usize>> {
        if shape.len() != self.rank() || origin.len() != self.rank() {
            return Err(StoreError::out_of_bounds(
                name,
                format!("selection rank {} against shape {:?}", self.rank(), shape),
            ));
        }
        for (d, c) in self.coords.iter().enumerate() {
            if let Some(&bad) = c.iter().find(|&&i| i < origin[d] || i >= origin[d] + shape[d]) {
                return Err(StoreError::out_of_bounds(
                    name,
                    format!("index {} on dimension {} outside shape {:?}", bad, d, shape),
                ));
            }
        }

        let mut strides = vec![1usize; shape.len()];
        for d in (0..shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * shape[d + 1] as usize;
        }

        let mut offsets = Vec::with_capacity(self.count());
        if self.count() == 0 {
            return Ok(offsets);
        }
        let mut cursor = vec![0usize; self.rank()];
        loop {
            let offset = cursor
                .iter()
                .enumerate()
                .map(|(d, &k)| (self.coords[d][k] - origin[d]) as usize * strides[d])
                .sum();
            offsets.push(offset);

            let mut d = self.rank();
            loop {
                if d == 0 {
                    return Ok(offsets);
                }
                d -= 1;
                cursor[d] += 1;
                if cursor[d] < self.coords[d].len() {
                    break;
                }
                cursor[d] = 0;
            }
        }
    }

    /// Smallest block `(start, shape)` containing every selected element.
    pub fn bounding_box(&self) -> (Vec<u64>, Vec<u64>) {
        self.coords
            .iter()
            .map(|c| match (c.iter().min(), c.iter().max()) {
                (Some(&lo), Some(&hi)) => (lo, hi - lo + 1),
                _ => (0, 0),
            })
            .unzip()
    }

    /// True when every dimension is an ascending run of consecutive indices,
    /// so the selection is exactly its bounding box.
    pub fn is_block(&self) -> bool {
        self.coords
            .iter()
            .all(|c| c.windows(2).all(|w| w[1] == w[0] + 1))
    }
}

/// Check that a memory/storage pair describes the same number of elements.
pub fn check_transfer(
    name: &str,
    memory: &ResolvedSelection,
    storage: &ResolvedSelection,
) -> Result<()> {
    if memory.count() != storage.count() {
        return Err(StoreError::SelectionMismatch {
            name: name.to_string(),
            memory: memory.count(),
            storage: storage.count(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_action_list_selects_all() {
        let sel = Selection::all(vec![3, 2]).resolve().unwrap();
        assert_eq!(sel.count(), 6);
        assert_eq!(sel.offsets("v", &[3, 2]).unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_hyperslab_offsets_in_larger_shape() {
        let sel = Selection::new(vec![10, 3])
            .hyperslab(SelectionOperator::Set, vec![2, 0], vec![2, 3])
            .resolve()
            .unwrap();
        assert_eq!(sel.count(), 6);
        assert_eq!(sel.offsets("v", &[10, 3]).unwrap(), vec![6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_indexed_selection() {
        let sel = Selection::new(vec![5, 2])
            .indices(SelectionOperator::Set, 0, vec![4, 1])
            .indices(SelectionOperator::And, 1, vec![0, 1])
            .resolve()
            .unwrap();
        assert_eq!(sel.coords()[0], vec![4, 1]);
        assert_eq!(sel.offsets("v", &[5, 2]).unwrap(), vec![8, 9, 2, 3]);
        assert!(!sel.is_block());
    }

    #[test]
    fn test_and_intersects() {
        let sel = Selection::new(vec![10])
            .hyperslab(SelectionOperator::Set, vec![0], vec![6])
            .indices(SelectionOperator::And, 0, vec![1, 5, 8])
            .resolve()
            .unwrap();
        assert_eq!(sel.coords()[0], vec![1, 5]);
    }

    #[test]
    fn test_out_of_extent_rejected() {
        let sel = Selection::new(vec![4]).hyperslab(SelectionOperator::Set, vec![2], vec![3]);
        assert!(sel.resolve().is_err());

        let sel = Selection::new(vec![4]).indices(SelectionOperator::Set, 1, vec![0]);
        assert!(sel.resolve().is_err());
    }

    #[test]
    fn test_offsets_against_smaller_shape_rejected() {
        let sel = Selection::all(vec![4, 2]).resolve().unwrap();
        assert!(matches!(
            sel.offsets("v", &[3, 2]),
            Err(StoreError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_bounding_box() {
        let sel = Selection::new(vec![10, 4])
            .indices(SelectionOperator::Set, 0, vec![7, 3, 5])
            .resolve()
            .unwrap();
        assert_eq!(sel.bounding_box(), (vec![3, 0], vec![5, 4]));
        assert_eq!(
            sel.offsets_within("v", &[3, 0], &[5, 4]).unwrap()[..4],
            [16, 17, 18, 19]
        );
    }

    #[test]
    fn test_transfer_count_mismatch() {
        let mem = Selection::all(vec![4]).resolve().unwrap();
        let store = Selection::all(vec![5]).resolve().unwrap();
        assert!(matches!(
            check_transfer("v", &mem, &store),
            Err(StoreError::SelectionMismatch { memory: 4, storage: 5, .. })
        ));
    }
}
