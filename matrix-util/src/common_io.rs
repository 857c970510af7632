use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::tempdir;

/// Field separator of a delimited text table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    pub fn as_char(&self) -> char {
        match self {
            Delimiter::Tab => '\t',
            Delimiter::Comma => ',',
        }
    }

    /// Guess from the file name: `.csv` and `.csv.gz` are comma
    /// separated, everything else is tab separated.
    pub fn from_file_name(file: &str) -> Self {
        let lower = file.to_ascii_lowercase();
        let stem = lower.strip_suffix(".gz").unwrap_or(&lower);
        if stem.ends_with(".csv") {
            Delimiter::Comma
        } else {
            Delimiter::Tab
        }
    }
}

impl From<char> for Delimiter {
    fn from(c: char) -> Self {
        if c == ',' {
            Delimiter::Comma
        } else {
            Delimiter::Tab
        }
    }
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file_path: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file_path)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

/// A delimited table read as raw words: one header and ragged-checked rows
pub struct DelimTable {
    pub header: Vec<Box<str>>,
    pub rows: Vec<Vec<Box<str>>>,
}

///
/// Read a delimited table with a header line.
///
/// Blank lines and lines starting with `#` are skipped. Double-quoted
/// fields may contain the delimiter and `""` escapes. Every row must have
/// as many fields as the header.
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - field separator
///
pub fn read_delim_table(
    input_file: &str,
    delim: impl Into<Delimiter>,
) -> anyhow::Result<DelimTable> {
    let delim = delim.into().as_char();
    let buf_reader: Box<dyn BufRead> = open_buf_reader(input_file)?;

    let raw: Vec<String> = buf_reader
        .lines()
        .collect::<std::io::Result<_>>()
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", input_file, e))?;

    let lines_raw: Vec<&str> = raw
        .iter()
        .map(|x| x.as_str())
        .filter(|x| !x.trim().is_empty() && !x.starts_with('#'))
        .collect();

    let Some((header_line, body)) = lines_raw.split_first() else {
        return Err(anyhow::anyhow!("no header line in {}", input_file));
    };

    let header = split_quoted(header_line.trim_end_matches('\r'), delim);

    // Parsing takes more time, so split them into parallel jobs
    let rows: Vec<Vec<Box<str>>> = body
        .par_iter()
        .map(|s| split_quoted(s.trim_end_matches('\r'), delim))
        .collect();

    for (i, row) in rows.iter().enumerate() {
        if row.len() != header.len() {
            return Err(anyhow::anyhow!(
                "{}: line {} has {} fields, but the header has {}",
                input_file,
                i + 2,
                row.len(),
                header.len()
            ));
        }
    }

    Ok(DelimTable { header, rows })
}

///
/// Write a delimited table; fields containing the delimiter, quotes or
/// line breaks are double-quoted.
///
/// * `header` - column names
/// * `rows` - row-major fields
/// * `output_file` - file name--either gzipped or not
/// * `delim` - field separator
///
pub fn write_delim_table<S, T>(
    header: &[S],
    rows: &[Vec<T>],
    output_file: &str,
    delim: impl Into<Delimiter>,
) -> anyhow::Result<()>
where
    S: AsRef<str>,
    T: AsRef<str>,
{
    let delim = delim.into().as_char();
    let mut buf = open_buf_writer(output_file)?;

    writeln!(buf, "{}", join_fields(header.iter().map(|x| x.as_ref()), delim))?;
    for row in rows {
        writeln!(buf, "{}", join_fields(row.iter().map(|x| x.as_ref()), delim))?;
    }
    buf.flush()?;
    Ok(())
}

/// Split one line into fields, honouring double quotes
pub fn split_quoted(line: &str, delim: char) -> Vec<Box<str>> {
    let mut fields = vec![];
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delim {
            fields.push(std::mem::take(&mut field).into_boxed_str());
        } else {
            field.push(c);
        }
    }
    fields.push(field.into_boxed_str());
    fields
}

fn join_fields<'a>(fields: impl Iterator<Item = &'a str>, delim: char) -> String {
    fields
        .map(|f| quote_field(f, delim))
        .collect::<Vec<_>>()
        .join(&delim.to_string())
}

fn quote_field(field: &str, delim: char) -> String {
    if field.contains(delim) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn std::io::Write>> {
    // we can simply override with stdout
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(std::io::BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Create a directory if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

///
/// Create a temporary directory and suggest a file name
/// * `suffix` - suffix of the file name
///
pub fn create_temp_dir_file(suffix: &str) -> anyhow::Result<std::path::PathBuf> {
    let temp_dir = tempdir()?.path().to_path_buf();
    std::fs::create_dir_all(&temp_dir)?;
    let temp_file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile_in(temp_dir)?
        .path()
        .to_owned();

    Ok(temp_file)
}
