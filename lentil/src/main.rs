mod run_embed;
mod run_summary;

use clap::{Parser, Subcommand};
use run_embed::*;
use run_summary::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Low-dimensional Embedding of the most variable geNes\n\
		  with parameter-keyed memoIzation and metadata Linking.\n\
		  Expression and metadata are `.tsv`/`.csv` files, gzipped or not."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Embed samples using the most variable genes",
        long_about = "Embed samples in the four stages: \n\
		      (1) Rank genes by median absolute deviation across samples\n\
		      (2) Keep the top K genes as a samples × genes table\n\
		      (3) Fit a UMAP embedding with a fixed seed\n\
		      (4) Join the coordinates with (filtered) sample metadata.\n"
    )]
    Embed(EmbedArgs),

    #[command(
        about = "Summarize metadata fields",
        long_about = "Count each distinct value of the selected metadata fields\n\
		      and report its proportion of the (filtered) samples.\n"
    )]
    Summary(SummaryArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Embed(args) => {
            run_embed(args)?;
        }
        Commands::Summary(args) => {
            run_summary(args)?;
        }
    }

    Ok(())
}
