use crate::cache::{Fingerprint, FingerprintBuilder};
use crate::common::*;
use fnv::FnvHashSet;
use matrix_util::common_io::{read_delim_table, DelimTable, Delimiter};

/// Cell texts read as a missing value
pub const MISSING_MARKERS: [&str; 6] = ["", "NA", "NaN", "nan", "null", "NULL"];

/// Genes × samples expression matrix (log scale). Missing cells are NaN.
///
/// Immutable once built; the content fingerprint is computed at
/// construction so that cache lookups do not rescan the values.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    gene_ids: Vec<Box<str>>,
    sample_ids: Vec<Box<str>>,
    values: Mat,
    fingerprint: Fingerprint,
}

impl ExpressionMatrix {
    /// * `gene_ids` - one unique key per row of `values`
    /// * `sample_ids` - one unique key per column of `values`
    /// * `values` - genes × samples, NaN marks a missing cell
    pub fn new(gene_ids: Vec<Box<str>>, sample_ids: Vec<Box<str>>, values: Mat) -> Result<Self> {
        if values.nrows() != gene_ids.len() || values.ncols() != sample_ids.len() {
            return Err(LentilError::invalid_input(format!(
                "{} x {} values for {} genes and {} samples",
                values.nrows(),
                values.ncols(),
                gene_ids.len(),
                sample_ids.len()
            )));
        }

        check_unique_keys(&gene_ids, "gene")?;
        check_unique_keys(&sample_ids, "sample")?;

        if let Some(x) = values.iter().find(|x| x.is_infinite()) {
            return Err(LentilError::invalid_input(format!(
                "non-finite expression value {}",
                x
            )));
        }

        let fingerprint = FingerprintBuilder::new("expression")
            .usize(values.nrows())
            .usize(values.ncols())
            .strs(&gene_ids)
            .strs(&sample_ids)
            .f32s(values.iter())
            .finish();

        Ok(Self {
            gene_ids,
            sample_ids,
            values,
            fingerprint,
        })
    }

    /// Build from row-major gene rows
    pub fn from_gene_rows<S: AsRef<str>>(
        gene_ids: &[S],
        sample_ids: &[S],
        rows: &[Vec<f32>],
    ) -> Result<Self> {
        let ncol = sample_ids.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != ncol) {
            return Err(LentilError::invalid_input(format!(
                "gene row {} has {} values for {} samples",
                bad,
                rows[bad].len(),
                ncol
            )));
        }
        let values = Mat::from_fn(rows.len(), ncol, |i, j| rows[i][j]);
        Self::new(
            gene_ids.iter().map(|x| x.as_ref().into()).collect(),
            sample_ids.iter().map(|x| x.as_ref().into()).collect(),
            values,
        )
    }

    /// Interpret a delimited table: the column named `gene_column` holds
    /// gene keys, every other column is a sample.
    pub fn from_delim_table(table: &DelimTable, gene_column: &str) -> Result<Self> {
        let gene_col = table
            .header
            .iter()
            .position(|x| x.as_ref() == gene_column)
            .ok_or_else(|| LentilError::schema(gene_column, "gene identifier column not found"))?;

        let sample_cols: Vec<usize> = (0..table.header.len())
            .filter(|&j| j != gene_col)
            .collect();
        let sample_ids: Vec<Box<str>> = sample_cols
            .iter()
            .map(|&j| table.header[j].clone())
            .collect();

        let mut gene_ids = Vec::with_capacity(table.rows.len());
        let mut values = Mat::zeros(table.rows.len(), sample_cols.len());

        for (i, row) in table.rows.iter().enumerate() {
            let gene = row[gene_col].trim();
            if gene.is_empty() {
                return Err(LentilError::invalid_input(format!(
                    "empty gene identifier on data row {}",
                    i + 1
                )));
            }
            gene_ids.push(gene.into());

            for (jj, &j) in sample_cols.iter().enumerate() {
                values[(i, jj)] = parse_expression_value(&row[j]).ok_or_else(|| {
                    LentilError::invalid_input(format!(
                        "gene {}, sample {}: cannot parse {:?}",
                        gene, table.header[j], row[j]
                    ))
                })?;
            }
        }

        Self::new(gene_ids, sample_ids, values)
    }

    /// Read a gene × sample table from a `.csv`/`.tsv` file, gzipped or not
    pub fn from_delim_file(file: &str, gene_column: &str) -> anyhow::Result<Self> {
        let table = read_delim_table(file, Delimiter::from_file_name(file))?;
        let ret = Self::from_delim_table(&table, gene_column)?;
        info!(
            "Read {} genes x {} samples from {}",
            ret.num_genes(),
            ret.num_samples(),
            file
        );
        Ok(ret)
    }

    pub fn num_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn gene_ids(&self) -> &[Box<str>] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[Box<str>] {
        &self.sample_ids
    }

    /// genes × samples
    pub fn values(&self) -> &Mat {
        &self.values
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

/// `Some(NaN)` for a missing marker, `Some(x)` for a number, `None` otherwise
pub fn parse_expression_value(text: &str) -> Option<f32> {
    let text = text.trim();
    if MISSING_MARKERS.contains(&text) {
        return Some(f32::NAN);
    }
    text.parse::<f32>().ok()
}

fn check_unique_keys(keys: &[Box<str>], what: &str) -> Result<()> {
    let mut seen = FnvHashSet::default();
    for k in keys {
        if !seen.insert(k.as_ref()) {
            return Err(LentilError::invalid_input(format!(
                "duplicate {} identifier {}",
                what, k
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(header: &[&str], rows: &[&[&str]]) -> DelimTable {
        DelimTable {
            header: header.iter().map(|&x| x.into()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|&x| x.into()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_from_delim_table() {
        let t = table(
            &["S1", "GENE", "S2"],
            &[&["1.5", "TP53", "2"], &["NA", "EPAS1", "3.25"]],
        );
        let xx = ExpressionMatrix::from_delim_table(&t, "GENE").unwrap();
        assert_eq!(xx.num_genes(), 2);
        assert_eq!(xx.num_samples(), 2);
        assert_eq!(xx.gene_ids()[1].as_ref(), "EPAS1");
        assert_eq!(xx.sample_ids()[0].as_ref(), "S1");
        assert_eq!(xx.values()[(0, 1)], 2.0);
        assert!(xx.values()[(1, 0)].is_nan());
    }

    #[test]
    fn test_missing_gene_column() {
        let t = table(&["ID", "S1"], &[&["TP53", "1"]]);
        let err = ExpressionMatrix::from_delim_table(&t, "GENE").unwrap_err();
        assert!(matches!(err, LentilError::Schema { .. }));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let t = table(&["GENE", "S1"], &[&["TP53", "1"], &["TP53", "2"]]);
        let err = ExpressionMatrix::from_delim_table(&t, "GENE").unwrap_err();
        assert!(matches!(err, LentilError::InvalidInput { .. }));

        let err = ExpressionMatrix::from_gene_rows(&["A"], &["S1", "S1"], &[vec![1.0, 2.0]])
            .unwrap_err();
        assert!(matches!(err, LentilError::InvalidInput { .. }));
    }

    #[test]
    fn test_unparseable_and_infinite_values() {
        let t = table(&["GENE", "S1"], &[&["TP53", "high"]]);
        assert!(ExpressionMatrix::from_delim_table(&t, "GENE").is_err());

        let err = ExpressionMatrix::from_gene_rows(&["A"], &["S1"], &[vec![f32::INFINITY]])
            .unwrap_err();
        assert!(matches!(err, LentilError::InvalidInput { .. }));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let matrix = |genes: [&str; 2], last: f32| {
            ExpressionMatrix::from_gene_rows(
                &genes,
                &["S1", "S2"],
                &[vec![1.0, 2.0], vec![3.0, last]],
            )
            .unwrap()
        };
        let a = matrix(["A", "B"], 4.0);
        let b = matrix(["A", "B"], 4.0);
        let c = matrix(["A", "B"], 4.5);
        let d = matrix(["A", "C"], 4.0);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());
    }
}
