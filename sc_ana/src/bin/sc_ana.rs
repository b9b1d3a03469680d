//! sc_ana

use anyhow::{Context, Result};
use clap::Parser;
use sc_ana::pipeline::{self, AnalysisConfig};
use std::fs::File;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Args {
    /// Annotated-matrix bundle directory (matrix.mtx[.gz], genes.tsv,
    /// cells.tsv)
    #[clap(long, default_value = "data/matrix")]
    matrix: PathBuf,

    /// Cell-cycle gene list: one identifier per line, the first 43 lines
    /// S-phase markers, the remainder G2M
    #[clap(long, default_value = "data/regev_lab_cell_cycle_genes.txt")]
    cell_cycle_genes: PathBuf,

    /// Directory the results folder is created under
    #[clap(long, default_value = "write")]
    out: PathBuf,

    /// JSON file overriding the default analysis parameters
    #[clap(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };

    let out_dir = pipeline::run(&args.matrix, &args.cell_cycle_genes, &args.out, &config)?;
    println!("{}", out_dir.display());
    Ok(())
}
