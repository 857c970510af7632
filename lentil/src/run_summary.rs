use anyhow::Context;
use clap::Args;
use lentil::common::*;
use lentil::filter::{apply_filters, MetadataFilter};
use lentil::summary::{value_proportions, ValueProportion};
use lentil::table::DataTable;
use matrix_util::common_io::{mkdir, write_delim_table, Delimiter};
use rayon::prelude::*;
use regex::Regex;

#[derive(Args, Debug)]
pub struct SummaryArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Sample metadata file",
        long_help = "Sample metadata table, `.tsv` or `.csv`, optionally gzipped."
    )]
    meta: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results.\n\
		     Generates {out}.summary.tsv:\n\
		       Columns: column, value, count, percent"
    )]
    out: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        value_delimiter(','),
        help = "Metadata fields to summarize (comma-separated)"
    )]
    columns: Vec<Box<str>>,

    #[arg(
        long,
        short = 'x',
        help = "Exclude values matching this regex",
        long_help = "Values matching this regular expression are not counted,\n\
		     e.g., `Unknown` to drop unannotated samples."
    )]
    exclude: Option<Box<str>>,

    #[arg(long, default_value = DEFAULT_SAMPLE_COLUMN, help = "Sample identifier column")]
    sample_column: Box<str>,

    #[arg(long, short, help = "Metadata filters, as in `lentil embed`")]
    filter: Vec<Box<str>>,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn run_summary(args: &SummaryArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let meta = DataTable::from_delim_file(&args.meta, &[args.sample_column.as_ref()])
        .with_context(|| format!("reading metadata {}", args.meta))?;

    let filters = args
        .filter
        .iter()
        .map(|f| f.parse::<MetadataFilter>())
        .collect::<lentil::Result<Vec<_>>>()?;
    let meta = apply_filters(&meta, &filters)?;

    let exclude = args
        .exclude
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| LentilError::configuration("exclude", e.to_string()))?;

    let summaries: Vec<(Box<str>, Vec<ValueProportion>)> = args
        .columns
        .par_iter()
        .map(|c| Ok((c.clone(), value_proportions(&meta, c, exclude.as_ref())?)))
        .collect::<lentil::Result<_>>()?;

    let rows: Vec<Vec<String>> = summaries
        .iter()
        .flat_map(|(c, props)| {
            props.iter().map(move |p| {
                vec![
                    c.to_string(),
                    p.value.to_string(),
                    p.count.to_string(),
                    format!("{:.1}", p.percent),
                ]
            })
        })
        .collect();

    for (c, props) in summaries.iter() {
        info!("{}: {} distinct values", c, props.len());
    }

    let out_file = format!("{}.summary.tsv", args.out);
    mkdir(&out_file)?;
    write_delim_table(
        &["column", "value", "count", "percent"],
        &rows,
        &out_file,
        Delimiter::Tab,
    )?;
    info!("wrote {}", out_file);

    Ok(())
}
