use crate::common::*;
use crate::table::{Cell, DataTable};
use crate::umap::EmbeddingCoordinates;
use fnv::FnvHashMap;

/// Inner join on column `key`; rows present on one side only are
/// dropped.
///
/// Output rows follow `left`'s order. Columns are `left`'s non-key
/// columns followed by every column of `right`, the key included.
pub fn inner_join(left: &DataTable, right: &DataTable, key: &str) -> Result<DataTable> {
    let left_key = left.require_column(key)?;
    let right_key = right.require_column(key)?;

    for (j, c) in left.columns().iter().enumerate() {
        if j != left_key && right.column_index(c).is_some() {
            return Err(LentilError::schema(
                c.as_ref(),
                "column present on both sides of the join",
            ));
        }
    }

    let right_rows = index_rows(right, right_key, key)?;
    // duplicates on the left are as ambiguous as on the right
    index_rows(left, left_key, key)?;

    let columns: Vec<Box<str>> = left
        .columns()
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != left_key)
        .map(|(_, c)| c.clone())
        .chain(right.columns().iter().cloned())
        .collect();

    let rows: Vec<Vec<Cell>> = left
        .rows()
        .iter()
        .filter_map(|lrow| {
            let k = lrow[left_key].key_text()?;
            let &ri = right_rows.get(&k)?;
            Some(
                lrow.iter()
                    .enumerate()
                    .filter(|&(j, _)| j != left_key)
                    .map(|(_, c)| c.clone())
                    .chain(right.rows()[ri].iter().cloned())
                    .collect(),
            )
        })
        .collect();

    let dropped_left = left.num_rows() - rows.len();
    let dropped_right = right.num_rows() - rows.len();
    info!(
        "joined {} rows on {}; dropped {} unmatched on the left, {} on the right",
        rows.len(),
        key,
        dropped_left,
        dropped_right
    );

    DataTable::new(columns, rows)
}

/// Attach sample metadata to embedding coordinates by the identifier
/// column `key`
pub fn join_metadata(
    coords: &EmbeddingCoordinates,
    metadata: &DataTable,
    key: &str,
) -> Result<DataTable> {
    metadata.require_column(key)?;
    inner_join(&coords.to_table(key)?, metadata, key)
}

/// Key text → row index; rows with a missing key are skipped
fn index_rows(table: &DataTable, key_col: usize, key: &str) -> Result<FnvHashMap<String, usize>> {
    let mut ret = FnvHashMap::default();
    for (i, row) in table.rows().iter().enumerate() {
        let Some(k) = row[key_col].key_text() else {
            continue;
        };
        if let Some(prev) = ret.insert(k, i) {
            return Err(LentilError::schema(
                key,
                format!(
                    "identifier {} appears on rows {} and {}",
                    row[key_col], prev, i
                ),
            ));
        }
    }
    Ok(ret)
}
