//! Orderings over history items.
//!
//! Sorting never touches storage order; callers get a sorted view. Every
//! order is built on a stable sort, so items with equal keys keep their
//! insertion order after the documented tie-break.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::item::HistoryItem;
use crate::label::LabelProvider;

/// Result count used for items that have none, so they sort as "least".
const NO_RESULT_COUNT: i64 = -1;

/// Display order for history items.
///
/// Name orders compare lowercased labels by code point, not by locale
/// collation: accented letters sort after `z` (`"émile"` > `"zed"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    NameAsc,
    NameDesc,
    #[default]
    DateAsc,
    DateDesc,
    CountAsc,
    CountDesc,
}

impl SortOrder {
    /// `NameAsc` flips to `NameDesc`; anything else becomes `NameAsc`.
    pub fn toggle_name(self) -> Self {
        match self {
            SortOrder::NameAsc => SortOrder::NameDesc,
            _ => SortOrder::NameAsc,
        }
    }

    pub fn toggle_date(self) -> Self {
        match self {
            SortOrder::DateAsc => SortOrder::DateDesc,
            _ => SortOrder::DateAsc,
        }
    }

    pub fn toggle_count(self) -> Self {
        match self {
            SortOrder::CountAsc => SortOrder::CountDesc,
            _ => SortOrder::CountAsc,
        }
    }
}

/// Precomputed sort keys, so labels are rendered once per item rather than
/// once per comparison.
struct SortKey {
    label: String,
    date: i64,
    count: i64,
}

impl SortKey {
    fn new(item: &HistoryItem, labels: &LabelProvider) -> Self {
        SortKey {
            label: labels.label(item).to_lowercase(),
            date: item.start_time().timestamp_millis(),
            count: item
                .result_count()
                .map(|c| i64::try_from(c).unwrap_or(i64::MAX))
                .unwrap_or(NO_RESULT_COUNT),
        }
    }
}

fn compare_keys(a: &SortKey, b: &SortKey, order: SortOrder) -> Ordering {
    match order {
        SortOrder::NameAsc => a.label.cmp(&b.label),
        SortOrder::NameDesc => b.label.cmp(&a.label),
        SortOrder::DateAsc => a.date.cmp(&b.date),
        SortOrder::DateDesc => b.date.cmp(&a.date),
        SortOrder::CountAsc => a.count.cmp(&b.count).then_with(|| a.label.cmp(&b.label)),
        SortOrder::CountDesc => b.count.cmp(&a.count).then_with(|| b.label.cmp(&a.label)),
    }
}

/// Compares two items under `order`, including the count tie-break.
pub fn compare(
    a: &HistoryItem,
    b: &HistoryItem,
    order: SortOrder,
    labels: &LabelProvider,
) -> Ordering {
    compare_keys(&SortKey::new(a, labels), &SortKey::new(b, labels), order)
}

/// Returns `items` reordered under `order`. The input is left as is.
pub fn sorted<'a, T, F>(items: &'a [T], order: SortOrder, labels: &LabelProvider, item_of: F) -> Vec<&'a T>
where
    F: Fn(&T) -> &HistoryItem,
{
    let mut keyed: Vec<(SortKey, &T)> = items
        .iter()
        .map(|entry| (SortKey::new(item_of(entry), labels), entry))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, order));
    keyed.into_iter().map(|(_, entry)| entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::test_support::*;
    use crate::status::QueryStatus;

    fn labels() -> LabelProvider {
        LabelProvider::new("%q")
    }

    fn ids(items: &[&HistoryItem]) -> Vec<String> {
        items.iter().map(|i| i.id().to_string()).collect()
    }

    fn sample() -> Vec<HistoryItem> {
        vec![
            completed_local("a", "beta", "db", 30, 5),
            completed_local("b", "Alpha", "db", 10, 20),
            local("c", "gamma", "db", 20),
            completed_local("d", "delta", "db", 40, 5),
        ]
    }

    fn run(order: SortOrder) -> Vec<String> {
        let items = sample();
        ids(&sorted(&items, order, &labels(), |i| i))
    }

    #[test]
    fn test_name_orders_are_case_insensitive() {
        assert_eq!(run(SortOrder::NameAsc), vec!["b", "a", "d", "c"]);
        assert_eq!(run(SortOrder::NameDesc), vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn test_accented_names_sort_by_code_point() {
        let items = vec![local("e", "Émile", "db", 0), local("z", "zed", "db", 1)];
        assert_eq!(
            ids(&sorted(&items, SortOrder::NameAsc, &labels(), |i| i)),
            vec!["z", "e"]
        );
    }

    #[test]
    fn test_date_orders() {
        assert_eq!(run(SortOrder::DateAsc), vec!["b", "c", "a", "d"]);
        assert_eq!(run(SortOrder::DateDesc), vec!["d", "a", "c", "b"]);
    }

    #[test]
    fn test_count_orders_put_missing_counts_last_ascending_first() {
        // c has no result count and sorts as least.
        assert_eq!(run(SortOrder::CountAsc), vec!["c", "a", "d", "b"]);
        assert_eq!(run(SortOrder::CountDesc), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_count_ties_fall_back_to_name_direction() {
        // a (beta) and d (delta) both have 5 results.
        let asc = run(SortOrder::CountAsc);
        let pos = |v: &Vec<String>, id: &str| v.iter().position(|x| x == id).unwrap();
        assert!(pos(&asc, "a") < pos(&asc, "d"));
        let desc = run(SortOrder::CountDesc);
        assert!(pos(&desc, "d") < pos(&desc, "a"));
    }

    #[test]
    fn test_resorting_is_idempotent() {
        let items = sample();
        for order in [
            SortOrder::NameAsc,
            SortOrder::NameDesc,
            SortOrder::DateAsc,
            SortOrder::DateDesc,
            SortOrder::CountAsc,
            SortOrder::CountDesc,
        ] {
            let once: Vec<HistoryItem> = sorted(&items, order, &labels(), |i| i)
                .into_iter()
                .cloned()
                .collect();
            let twice = sorted(&once, order, &labels(), |i| i);
            assert_eq!(ids(&twice), once.iter().map(|i| i.id().to_string()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_equal_keys_keep_insertion_order() {
        let items = vec![
            local("first", "same", "db", 0),
            local("second", "same", "db", 0),
            local("third", "same", "db", 0),
        ];
        for order in [SortOrder::NameDesc, SortOrder::DateDesc, SortOrder::CountDesc] {
            assert_eq!(
                ids(&sorted(&items, order, &labels(), |i| i)),
                vec!["first", "second", "third"]
            );
        }
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        let a = completed_local("a", "beta", "db", 30, 5);
        let mut b = local("b", "alpha", "db", 10);
        b.apply_status(QueryStatus::Failed, None, None).unwrap();
        for order in [SortOrder::NameAsc, SortOrder::CountAsc, SortOrder::DateDesc] {
            assert_eq!(
                compare(&a, &b, order, &labels()),
                compare(&b, &a, order, &labels()).reverse()
            );
        }
    }

    #[test]
    fn test_toggles() {
        assert_eq!(SortOrder::NameAsc.toggle_name(), SortOrder::NameDesc);
        assert_eq!(SortOrder::NameDesc.toggle_name(), SortOrder::NameAsc);
        assert_eq!(SortOrder::DateAsc.toggle_count(), SortOrder::CountAsc);
        assert_eq!(SortOrder::CountAsc.toggle_count(), SortOrder::CountDesc);
        assert_eq!(SortOrder::default().toggle_date(), SortOrder::DateDesc);
    }
}
