//! Record index construction and in-record sorting.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use obs_store::{ElementValue, ElementValues};

use crate::config::{MissingSortTreatment, SortOrder};

/// Local location indices of every record, in keep order.
pub fn build_record_index(recnums: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut index: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (loc, &rec) in recnums.iter().enumerate() {
        index.entry(rec).or_default().push(loc);
    }
    index
}

fn compare(values: &ElementValues, a: usize, b: usize, order: SortOrder) -> Ordering {
    let ord = values
        .get(a)
        .partial_cmp(&values.get(b))
        .unwrap_or(Ordering::Equal);
    match order {
        SortOrder::Ascending => ord,
        SortOrder::Descending => ord.reverse(),
    }
}

/// Reorder the locations of one record by `values`.
///
/// Sorting is stable. `missing` decides how locations whose value equals
/// `fill` are handled:
/// - `Sort`: ordered like any other value
/// - `DoNotSort`: if any location is missing the record keeps file order
/// - `IgnoreMissing`: present values sorted, missing ones appended in file order
pub fn sort_record_locations(
    locs: &mut Vec<usize>,
    values: &ElementValues,
    fill: &ElementValue,
    order: SortOrder,
    missing: MissingSortTreatment,
) {
    match missing {
        MissingSortTreatment::Sort => {
            locs.sort_by(|&a, &b| compare(values, a, b, order));
        }
        MissingSortTreatment::DoNotSort => {
            if !locs.iter().any(|&i| values.is_missing(i, fill)) {
                locs.sort_by(|&a, &b| compare(values, a, b, order));
            }
        }
        MissingSortTreatment::IgnoreMissing => {
            let (mut present, absent): (Vec<usize>, Vec<usize>) =
                locs.iter().partition(|&&i| !values.is_missing(i, fill));
            present.sort_by(|&a, &b| compare(values, a, b, order));
            present.extend(absent);
            *locs = present;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_store::ElementKind;

    const M: f32 = -3.368_795_3e38;

    fn pressures() -> (ElementValues, ElementValue) {
        (
            vec![500.0f32, M, 850.0, 300.0, M].into(),
            ElementKind::Float32.missing_value(),
        )
    }

    #[test]
    fn test_build_record_index() {
        let index = build_record_index(&[4, 1, 4, 2, 1]);
        assert_eq!(index.keys().copied().collect::<Vec<_>>(), vec![1, 2, 4]);
        assert_eq!(index[&4], vec![0, 2]);
        assert_eq!(index[&1], vec![1, 4]);
    }

    #[test]
    fn test_sort_descending() {
        let values: ElementValues = vec![500.0f32, 850.0, 300.0].into();
        let fill = ElementKind::Float32.missing_value();
        let mut locs = vec![0, 1, 2];
        sort_record_locations(&mut locs, &values, &fill, SortOrder::Descending, MissingSortTreatment::Sort);
        assert_eq!(locs, vec![1, 0, 2]);
    }

    #[test]
    fn test_missing_sorted_as_values() {
        let (values, fill) = pressures();
        let mut locs = vec![0, 1, 2, 3, 4];
        sort_record_locations(&mut locs, &values, &fill, SortOrder::Ascending, MissingSortTreatment::Sort);
        assert_eq!(locs, vec![1, 4, 3, 0, 2]);
    }

    #[test]
    fn test_missing_do_not_sort() {
        let (values, fill) = pressures();
        let mut locs = vec![0, 1, 2, 3, 4];
        sort_record_locations(&mut locs, &values, &fill, SortOrder::Ascending, MissingSortTreatment::DoNotSort);
        assert_eq!(locs, vec![0, 1, 2, 3, 4]);

        let mut complete = vec![0, 2, 3];
        sort_record_locations(&mut complete, &values, &fill, SortOrder::Ascending, MissingSortTreatment::DoNotSort);
        assert_eq!(complete, vec![3, 0, 2]);
    }

    #[test]
    fn test_missing_ignored_and_appended() {
        let (values, fill) = pressures();
        let mut locs = vec![0, 1, 2, 3, 4];
        sort_record_locations(&mut locs, &values, &fill, SortOrder::Descending, MissingSortTreatment::IgnoreMissing);
        assert_eq!(locs, vec![2, 0, 3, 1, 4]);
    }

    #[test]
    fn test_sort_is_stable() {
        let values: ElementValues = vec![1i32, 0, 1, 0].into();
        let fill = ElementKind::Int32.missing_value();
        let mut locs = vec![0, 1, 2, 3];
        sort_record_locations(&mut locs, &values, &fill, SortOrder::Ascending, MissingSortTreatment::Sort);
        assert_eq!(locs, vec![1, 3, 0, 2]);
    }
}
