use anyhow::Context;
use clap::Args;
use lentil::common::*;
use lentil::dispersion::rank_by_dispersion;
use lentil::expression::ExpressionMatrix;
use lentil::filter::{apply_filters, MetadataFilter};
use lentil::pipeline::{Pipeline, PipelineRequest};
use lentil::table::DataTable;
use lentil::umap::EmbeddingConfig;
use matrix_util::common_io::{mkdir, write_delim_table, write_lines, Delimiter};

#[derive(Args, Debug)]
pub struct EmbedArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Expression file (genes × samples)",
        long_help = "Expression table, `.tsv` or `.csv`, optionally gzipped.\n\
		     One row per gene, one column per sample, plus\n\
		     a gene identifier column (see --gene-column).\n\
		     Empty, NA, NaN, null cells are treated as missing."
    )]
    expr: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Sample metadata file",
        long_help = "Sample metadata table, `.tsv` or `.csv`, optionally gzipped.\n\
		     One row per sample keyed by --sample-column.\n\
		     Column types (number, date, text) are inferred."
    )]
    meta: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results.\n\
		     Generates the following files:\n\n\
		     {out}.joined.tsv.gz:\n\
		       Embedding coordinates joined with metadata\n\
		       Columns: UMAP1, UMAP2, [UMAP3], metadata columns\n\n\
		     {out}.dispersion.tsv.gz (with --save-dispersion):\n\
		       Columns: gene, MAD, rank\n\n\
		     {out}.request.json:\n\
		       Parameters of this run"
    )]
    out: Box<str>,

    #[arg(
        long = "num-genes",
        short = 'k',
        default_value_t = DEFAULT_NUM_GENES,
        help = "Number of most variable genes",
        long_help = "Keep the top {k} genes ranked by median absolute deviation.\n\
		     Must not exceed the number of genes in the expression file."
    )]
    num_genes: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_KNN,
        help = "Nearest neighbours per sample",
        long_help = "Number of nearest neighbours for the UMAP graph.\n\
		     Must be smaller than the number of samples."
    )]
    knn: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_MIN_DIST,
        help = "UMAP minimum distance in [0, 1)"
    )]
    min_dist: f32,

    #[arg(long, default_value_t = DEFAULT_DIMS, help = "Embedding dimensions (2 or 3)")]
    dims: usize,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        help = "Optimization epochs",
        long_help = "Number of UMAP optimization epochs.\n\
		     Default: 500 up to 10,000 samples, 200 beyond."
    )]
    epochs: Option<usize>,

    #[arg(long, default_value = DEFAULT_GENE_COLUMN, help = "Gene identifier column")]
    gene_column: Box<str>,

    #[arg(long, default_value = DEFAULT_SAMPLE_COLUMN, help = "Sample identifier column")]
    sample_column: Box<str>,

    #[arg(
        long,
        help = "Metadata field for coloring",
        long_help = "Metadata field a renderer should color samples by.\n\
		     Recorded in {out}.request.json; must be a joined column."
    )]
    color_by: Option<Box<str>>,

    #[arg(
        long,
        short,
        help = "Metadata filters",
        long_help = "Keep metadata rows passing every filter (repeatable):\n\
		     col=a,b        text in {a, b}\n\
		     col:lo..hi     number in [lo, hi]\n\
		     col@D1..D2     date in [D1, D2], YYYY-MM-DD\n\
		     col~regex      text matches regex"
    )]
    filter: Vec<Box<str>>,

    #[arg(long, default_value_t = false, help = "Save per-gene dispersion")]
    save_dispersion: bool,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

impl EmbedArgs {
    fn request(&self) -> PipelineRequest {
        PipelineRequest {
            num_genes: self.num_genes,
            embedding: EmbeddingConfig {
                target_dimensions: self.dims,
                neighbor_count: self.knn,
                min_distance: self.min_dist,
                seed: self.seed,
                n_epochs: self.epochs,
            },
            color_field: self.color_by.clone(),
        }
    }
}

pub fn run_embed(args: &EmbedArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    // 1. Read the data
    let expr = ExpressionMatrix::from_delim_file(&args.expr, &args.gene_column)
        .with_context(|| format!("reading expression {}", args.expr))?;

    let meta = DataTable::from_delim_file(&args.meta, &[args.sample_column.as_ref()])
        .with_context(|| format!("reading metadata {}", args.meta))?;

    // 2. Filter metadata rows
    let filters = args
        .filter
        .iter()
        .map(|f| f.parse::<MetadataFilter>())
        .collect::<lentil::Result<Vec<_>>>()?;
    let meta = apply_filters(&meta, &filters)?;

    // 3. Select, embed and join
    let request = args.request();
    let pipeline = Pipeline::new();
    let output = pipeline.run(
        &expr,
        &meta,
        &request,
        &args.sample_column,
        &CancelToken::new(),
    )?;

    output.require_color_field()?;

    info!(
        "{} of {} samples joined with metadata",
        output.joined.num_rows(),
        output.embedding.num_samples()
    );

    // 4. Write down the results
    mkdir(&args.out)?;

    let joined_file = format!("{}.joined.tsv.gz", args.out);
    output.joined.write_delim_file(&joined_file)?;
    info!("wrote {}", joined_file);

    if args.save_dispersion {
        let disp = rank_by_dispersion(&expr)?;
        let rows: Vec<Vec<String>> = disp
            .gene_ids
            .iter()
            .zip(disp.scores.iter())
            .zip(disp.ranks())
            .map(|((g, s), r)| vec![g.to_string(), s.to_string(), r.to_string()])
            .collect();

        let disp_file = format!("{}.dispersion.tsv.gz", args.out);
        write_delim_table(&["gene", "MAD", "rank"], &rows, &disp_file, Delimiter::Tab)?;
        info!("wrote {}", disp_file);
    }

    let request_file = format!("{}.request.json", args.out);
    write_lines(&[serde_json::to_string_pretty(&request)?], &request_file)?;

    info!("Done");
    Ok(())
}
