use crate::common::*;
use crate::table::{parse_date, Cell, DataTable};
use chrono::NaiveDate;
use regex::Regex;

/// Row predicate on one metadata column
#[derive(Clone, Debug)]
pub enum MetadataFilter {
    /// cell text is one of `values`
    Categories { column: Box<str>, values: Vec<Box<str>> },
    /// numeric cell in `[min, max]`
    NumericRange { column: Box<str>, min: f64, max: f64 },
    /// date cell in `[start, end]`
    DateRange {
        column: Box<str>,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// cell text contains a match of `regex`
    Pattern { column: Box<str>, regex: Regex },
}

impl MetadataFilter {
    pub fn column(&self) -> &str {
        match self {
            MetadataFilter::Categories { column, .. }
            | MetadataFilter::NumericRange { column, .. }
            | MetadataFilter::DateRange { column, .. }
            | MetadataFilter::Pattern { column, .. } => column,
        }
    }

    pub fn accepts(&self, cell: &Cell) -> bool {
        match self {
            MetadataFilter::Categories { values, .. } => cell
                .key_text()
                .is_some_and(|t| values.iter().any(|v| v.as_ref() == t)),
            MetadataFilter::NumericRange { min, max, .. } => cell
                .as_number()
                .is_some_and(|x| *min <= x && x <= *max),
            MetadataFilter::DateRange { start, end, .. } => cell
                .as_date()
                .is_some_and(|d| *start <= d && d <= *end),
            MetadataFilter::Pattern { regex, .. } => {
                cell.key_text().is_some_and(|t| regex.is_match(&t))
            }
        }
    }

    pub fn apply(&self, table: &DataTable) -> Result<DataTable> {
        let j = table.require_column(self.column())?;
        let ret = table.filter_rows(|row| self.accepts(&row[j]));
        debug!(
            "filter on {} kept {} / {} rows",
            self.column(),
            ret.num_rows(),
            table.num_rows()
        );
        Ok(ret)
    }
}

/// Apply `filters` one after another
pub fn apply_filters(table: &DataTable, filters: &[MetadataFilter]) -> Result<DataTable> {
    let mut ret = table.clone();
    for f in filters {
        ret = f.apply(&ret)?;
    }
    if !filters.is_empty() {
        info!(
            "{} filter(s) kept {} / {} rows",
            filters.len(),
            ret.num_rows(),
            table.num_rows()
        );
    }
    Ok(ret)
}

impl std::str::FromStr for MetadataFilter {
    type Err = LentilError;

    /// `col=a,b`, `col:lo..hi`, `col@YYYY-MM-DD..YYYY-MM-DD` or `col~regex`
    fn from_str(expr: &str) -> Result<Self> {
        let Some(pos) = expr.find(['=', ':', '@', '~']) else {
            return Err(bad_filter(expr, "expected one of =, :, @, ~"));
        };

        let column: Box<str> = expr[..pos].trim().into();
        if column.is_empty() {
            return Err(bad_filter(expr, "empty column name"));
        }
        let op = expr[pos..].chars().next().unwrap_or('=');
        let rhs = expr[pos + 1..].trim();

        match op {
            '=' => {
                let values: Vec<Box<str>> = rhs
                    .split(',')
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(|v| v.into())
                    .collect();
                if values.is_empty() {
                    return Err(bad_filter(expr, "no category values"));
                }
                Ok(MetadataFilter::Categories { column, values })
            }
            ':' => {
                let (lo, hi) = split_range(expr, rhs)?;
                let parse = |s: &str| {
                    s.parse::<f64>()
                        .map_err(|_| bad_filter(expr, format!("{:?} is not a number", s)))
                };
                let (min, max) = (parse(lo)?, parse(hi)?);
                if min > max {
                    return Err(bad_filter(expr, "reversed range"));
                }
                Ok(MetadataFilter::NumericRange { column, min, max })
            }
            '@' => {
                let (lo, hi) = split_range(expr, rhs)?;
                let parse = |s: &str| {
                    parse_date(s).ok_or_else(|| bad_filter(expr, format!("{:?} is not a date", s)))
                };
                let (start, end) = (parse(lo)?, parse(hi)?);
                if start > end {
                    return Err(bad_filter(expr, "reversed range"));
                }
                Ok(MetadataFilter::DateRange { column, start, end })
            }
            _ => {
                let regex = Regex::new(rhs).map_err(|e| bad_filter(expr, e.to_string()))?;
                Ok(MetadataFilter::Pattern { column, regex })
            }
        }
    }
}

fn split_range<'a>(expr: &str, rhs: &'a str) -> Result<(&'a str, &'a str)> {
    rhs.split_once("..")
        .map(|(lo, hi)| (lo.trim(), hi.trim()))
        .ok_or_else(|| bad_filter(expr, "expected lo..hi"))
}

fn bad_filter(expr: &str, reason: impl std::fmt::Display) -> LentilError {
    LentilError::configuration("filter", format!("{}: {}", expr, reason))
}
