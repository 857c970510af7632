use crate::common::*;
use crate::expression::MISSING_MARKERS;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use fnv::FnvHashSet;
use matrix_util::common_io::{read_delim_table, write_delim_table, DelimTable, Delimiter};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Date(NaiveDate),
    Text(Box<str>),
}

impl Cell {
    /// Widen through the shortest decimal form, so `0.1f32` becomes `0.1`
    pub fn from_f32(x: f32) -> Self {
        if x.is_nan() {
            return Cell::Missing;
        }
        Cell::Number(x.to_string().parse::<f64>().unwrap_or(x as f64))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Text form used for matching keys and categories; `None` if missing
    pub fn key_text(&self) -> Option<String> {
        match self {
            Cell::Missing => None,
            _ => Some(self.to_string()),
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Number(x) => write!(f, "{}", x),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Date,
    Text,
}

/// Row-major table of typed cells with unique column names
#[derive(Clone, Debug, PartialEq)]
pub struct DataTable {
    columns: Vec<Box<str>>,
    rows: Vec<Vec<Cell>>,
}

impl DataTable {
    pub fn new(columns: Vec<Box<str>>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut seen = FnvHashSet::default();
        for c in columns.iter() {
            if !seen.insert(c.as_ref()) {
                return Err(LentilError::schema(c.as_ref(), "duplicate column name"));
            }
        }

        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(LentilError::invalid_input(format!(
                "row {} has {} cells for {} columns",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }

        Ok(Self { columns, rows })
    }

    /// Type every column from its text. Columns named in `text_columns`
    /// are kept as text, so identifiers like `007` survive intact.
    pub fn from_delim_table(table: &DelimTable, text_columns: &[&str]) -> Result<Self> {
        let ncol = table.header.len();
        let mut typed: Vec<Vec<Cell>> = Vec::with_capacity(ncol);

        for j in 0..ncol {
            let texts: Vec<&str> = table.rows.iter().map(|r| r[j].as_ref()).collect();
            if text_columns.contains(&table.header[j].as_ref()) {
                typed.push(texts.iter().map(|s| text_cell(s)).collect());
            } else {
                typed.push(infer_column(&texts));
            }
        }

        let rows = (0..table.rows.len())
            .map(|i| {
                typed
                    .iter_mut()
                    .map(|col| std::mem::replace(&mut col[i], Cell::Missing))
                    .collect()
            })
            .collect();

        Self::new(table.header.clone(), rows)
    }

    pub fn from_delim_file(file: &str, text_columns: &[&str]) -> anyhow::Result<Self> {
        let table = read_delim_table(file, Delimiter::from_file_name(file))?;
        let ret = Self::from_delim_table(&table, text_columns)?;
        info!(
            "Read {} rows x {} columns from {}",
            ret.num_rows(),
            ret.num_columns(),
            file
        );
        Ok(ret)
    }

    pub fn write_delim_file(&self, file: &str) -> anyhow::Result<()> {
        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        write_delim_table(&self.columns, &rows, file, Delimiter::from_file_name(file))
    }

    pub fn columns(&self) -> &[Box<str>] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.as_ref() == name)
    }

    /// `SchemaError` if there is no column `name`
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| LentilError::schema(name, "column not found"))
    }

    pub fn column_kind(&self, j: usize) -> ColumnKind {
        let mut observed = self.rows.iter().map(|r| &r[j]).filter(|c| !c.is_missing());
        match observed.next() {
            Some(Cell::Number(_)) => ColumnKind::Numeric,
            Some(Cell::Date(_)) => ColumnKind::Date,
            _ => ColumnKind::Text,
        }
    }

    /// Keep rows for which `keep` holds, in order
    pub fn filter_rows<F>(&self, keep: F) -> DataTable
    where
        F: Fn(&[Cell]) -> bool,
    {
        DataTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

/// Numbers if every observed cell is numeric, else dates if every
/// observed cell is a date, else text
pub fn infer_column(texts: &[&str]) -> Vec<Cell> {
    let observed: Vec<&str> = texts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !is_missing_text(s))
        .collect();

    if observed.iter().all(|s| s.parse::<f64>().is_ok()) {
        texts
            .iter()
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|_| !is_missing_text(s.trim()))
                    .map_or(Cell::Missing, Cell::Number)
            })
            .collect()
    } else if observed.iter().all(|s| parse_date(s).is_some()) {
        texts
            .iter()
            .map(|s| parse_date(s.trim()).map_or(Cell::Missing, Cell::Date))
            .collect()
    } else {
        texts.iter().map(|s| text_cell(s)).collect()
    }
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_local().date())
        })
}

fn is_missing_text(text: &str) -> bool {
    MISSING_MARKERS.contains(&text)
}

fn text_cell(text: &str) -> Cell {
    let text = text.trim();
    if is_missing_text(text) {
        Cell::Missing
    } else {
        Cell::Text(text.into())
    }
}
