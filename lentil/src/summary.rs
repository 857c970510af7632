use crate::common::*;
use crate::table::DataTable;
use fnv::FnvHashMap;
use regex::Regex;

#[derive(Clone, Debug, PartialEq)]
pub struct ValueProportion {
    pub value: Box<str>,
    pub count: usize,
    /// share of counted rows, in [0, 100]
    pub percent: f64,
}

/// Distinct non-missing values of `column` with their counts, most
/// frequent first; ties keep the order of first appearance. Values
/// matching `exclude` are not counted.
pub fn value_proportions(
    table: &DataTable,
    column: &str,
    exclude: Option<&Regex>,
) -> Result<Vec<ValueProportion>> {
    let j = table.require_column(column)?;

    let mut order: Vec<Box<str>> = vec![];
    let mut counts: FnvHashMap<Box<str>, usize> = FnvHashMap::default();

    for row in table.rows() {
        let Some(text) = row[j].key_text() else {
            continue;
        };
        if exclude.is_some_and(|re| re.is_match(&text)) {
            continue;
        }
        let text: Box<str> = text.into();
        match counts.get_mut(&text) {
            Some(c) => *c += 1,
            None => {
                counts.insert(text.clone(), 1);
                order.push(text);
            }
        }
    }

    let total: usize = counts.values().sum();

    let mut ret: Vec<ValueProportion> = order
        .into_iter()
        .map(|value| {
            let count = counts.get(&value).copied().unwrap_or(0);
            ValueProportion {
                value,
                count,
                percent: 100.0 * count as f64 / total as f64,
            }
        })
        .collect();

    // stable: ties stay in order of appearance
    ret.sort_by(|a, b| b.count.cmp(&a.count));

    debug!("{}: {} distinct values in {} rows", column, ret.len(), total);
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use approx::assert_abs_diff_eq;

    fn meta() -> DataTable {
        let genotype = ["WT", "KO", "Unknown", "KO", "", "Het", "KO", "WT"];
        DataTable::new(
            vec!["Genotype".into()],
            genotype
                .iter()
                .map(|&g| {
                    vec![if g.is_empty() {
                        Cell::Missing
                    } else {
                        Cell::Text(g.into())
                    }]
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_counts_and_order() {
        let props = value_proportions(&meta(), "Genotype", None).unwrap();
        let values: Vec<(&str, usize)> =
            props.iter().map(|p| (p.value.as_ref(), p.count)).collect();
        assert_eq!(values, vec![("KO", 3), ("WT", 2), ("Unknown", 1), ("Het", 1)]);
        assert_abs_diff_eq!(props[0].percent, 300.0 / 7.0, epsilon = 1e-9);
        assert_abs_diff_eq!(props.iter().map(|p| p.percent).sum::<f64>(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_exclude_pattern() {
        let re = Regex::new("Unknown").unwrap();
        let props = value_proportions(&meta(), "Genotype", Some(&re)).unwrap();
        assert_eq!(props.len(), 3);
        assert_abs_diff_eq!(props[0].percent, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unknown_column() {
        let err = value_proportions(&meta(), "Sex", None).unwrap_err();
        assert!(matches!(err, LentilError::Schema { .. }));
    }
}
