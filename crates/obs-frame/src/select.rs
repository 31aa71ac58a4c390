//! Selections for moving one frame between the three index spaces.
//!
//! ```text
//!   backend variable        memory buffer           frame variable
//!   shape [T, C]            extent [count*C]        shape [count, C]
//!   ┌───────────┐           ┌─────────────┐         ┌───────────┐
//!   │           │           │             │         │ 0         │
//!   │ start ... │──source──►│ 0 .. n      │──frame─►│ ...       │
//!   │ +count    │           └─────────────┘         │ count-1   │
//!   └───────────┘                                   └───────────┘
//! ```
//!
//! All functions take the unmodified current shape of the source variable
//! and touch no shared state.

use obs_store::{Selection, SelectionOperator};

fn row_len(shape: &[u64]) -> u64 {
    shape.iter().skip(1).product()
}

/// Flat 0-based buffer holding `count` rows of a variable of `shape`.
pub fn memory_selection(shape: &[u64], count: u64) -> Selection {
    let n = count * row_len(shape);
    Selection::new(vec![n]).hyperslab(SelectionOperator::Set, vec![0], vec![n])
}

/// Rows `[0, count)` of a frame variable whose first dimension is `count`.
pub fn frame_selection(shape: &[u64], count: u64) -> Selection {
    let mut frame_shape = shape.to_vec();
    if let Some(first) = frame_shape.first_mut() {
        *first = count;
    }
    let start = vec![0; frame_shape.len()];
    Selection::new(frame_shape.clone()).hyperslab(SelectionOperator::Set, start, frame_shape)
}

/// Rows `[start, start + count)` of the full backend variable.
pub fn source_selection(shape: &[u64], start: u64, count: u64) -> Selection {
    let mut starts = vec![0; shape.len()];
    let mut counts = shape.to_vec();
    if let (Some(s), Some(c)) = (starts.first_mut(), counts.first_mut()) {
        *s = start;
        *c = count;
    }
    Selection::new(shape.to_vec()).hyperslab(SelectionOperator::Set, starts, counts)
}

/// Listed rows of a variable of `shape`, every index of the other dimensions.
pub fn indexed_selection(shape: &[u64], indices: &[u64]) -> Selection {
    let mut selection =
        Selection::new(shape.to_vec()).indices(SelectionOperator::Set, 0, indices.to_vec());
    for (dim, &size) in shape.iter().enumerate().skip(1) {
        selection = selection.indices(SelectionOperator::And, dim, (0..size).collect());
    }
    selection
}

/// The three aligned selections for one window of one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionTriple {
    pub source: Selection,
    pub memory: Selection,
    pub frame: Selection,
}

impl SelectionTriple {
    pub fn for_window(shape: &[u64], start: u64, count: u64) -> Self {
        Self {
            source: source_selection(shape, start, count),
            memory: memory_selection(shape, count),
            frame: frame_selection(shape, count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_store::{ElementKind, MemoryStore, ObsStore, VariableSpec};
    use test_utils::create_channel_grid;

    #[test]
    fn test_memory_selection_is_flat() {
        let sel = memory_selection(&[25, 3], 10);
        assert_eq!(sel.extent(), &[30]);
        assert_eq!(sel.resolve().unwrap().count(), 30);
    }

    #[test]
    fn test_frame_selection_covers_count_rows() {
        let sel = frame_selection(&[25, 3], 5);
        assert_eq!(sel.extent(), &[5, 3]);
        let resolved = sel.resolve().unwrap();
        assert_eq!(resolved.count(), 15);
        assert_eq!(resolved.coords()[0], vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_source_selection_offsets() {
        let sel = source_selection(&[25, 3], 20, 5);
        assert_eq!(sel.extent(), &[25, 3]);
        let resolved = sel.resolve().unwrap();
        assert_eq!(resolved.coords()[0], vec![20, 21, 22, 23, 24]);
        assert_eq!(resolved.coords()[1], vec![0, 1, 2]);
    }

    #[test]
    fn test_indexed_selection() {
        let sel = indexed_selection(&[6, 2], &[4, 1]);
        let resolved = sel.resolve().unwrap();
        assert_eq!(resolved.coords()[0], vec![4, 1]);
        assert_eq!(resolved.coords()[1], vec![0, 1]);
        assert_eq!(resolved.count(), 4);
    }

    #[test]
    fn test_triple_counts_agree() {
        for (shape, start, count) in [(vec![25u64], 20, 5), (vec![25, 4], 10, 10), (vec![7, 2, 3], 0, 7)] {
            let t = SelectionTriple::for_window(&shape, start, count);
            let n = t.memory.resolve().unwrap().count();
            assert_eq!(t.source.resolve().unwrap().count(), n);
            assert_eq!(t.frame.resolve().unwrap().count(), n);
        }
    }

    #[test]
    fn test_channel_window_round_trip() {
        let (nlocs, nchans) = (25u64, 3u64);
        let mut source = MemoryStore::new();
        source.create_dimension("Location", ElementKind::Int32, nlocs, None).unwrap();
        source.create_dimension("Channel", ElementKind::Int32, nchans, None).unwrap();
        source
            .create_variable(VariableSpec::new("ObsValue/bt", ElementKind::Float32, &["Location", "Channel"]))
            .unwrap();
        let grid = create_channel_grid(nlocs as usize, nchans as usize);
        source.write_all("ObsValue/bt", &grid.clone().into()).unwrap();

        let mut frame = MemoryStore::new();
        frame.create_dimension("Location", ElementKind::Int32, 10, None).unwrap();
        frame.create_dimension("Channel", ElementKind::Int32, nchans, None).unwrap();
        frame
            .create_variable(VariableSpec::new("ObsValue/bt", ElementKind::Float32, &["Location", "Channel"]))
            .unwrap();

        frame.resize_dimension("Location", 5).unwrap();
        let t = SelectionTriple::for_window(&[nlocs, nchans], 20, 5);
        let values = source.read("ObsValue/bt", &t.memory, &t.source).unwrap();
        frame.write("ObsValue/bt", &values, &t.memory, &t.frame).unwrap();

        let back = frame.read_all("ObsValue/bt").unwrap();
        assert_eq!(back.as_slice::<f32>().unwrap(), &grid[60..75]);
    }
}
