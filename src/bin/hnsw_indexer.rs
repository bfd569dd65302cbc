use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use papersearch::embeddings::{EmbeddingTable, MetadataTable};
use papersearch::{BuildSettings, IndexBuilder};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "papersearch-hnsw",
    about = "Build the related-article HNSW index from SPECTER embeddings"
)]
struct BuildCli {
    /// Folder holding the metadata and embedding exports.
    #[arg(long, env = "PAPERSEARCH_DATA_DIR", default_value = "index/cord19-hnsw-index")]
    data_dir: PathBuf,

    /// Metadata CSV with a `cord_uid` column, relative to the data folder.
    #[arg(long, default_value = "metadata.csv")]
    metadata: PathBuf,

    /// Embedding file (`uid,v1,...,vD` rows), relative to the data folder.
    #[arg(long, default_value = "specter.csv")]
    embeddings: PathBuf,

    /// Where to write the artifacts; defaults to the data folder.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Artifact stem for `<name>.bin`, `<name>.hnsw.*` and `<name>.txt`.
    #[arg(long, env = "PAPERSEARCH_INDEX_NAME", default_value_t = BuildSettings::default().index_name)]
    index_name: String,

    /// Graph connectivity (M).
    #[arg(long, default_value_t = BuildSettings::default().m)]
    m: usize,

    /// Build-time candidate list size.
    #[arg(long, default_value_t = BuildSettings::default().ef_construction)]
    ef_construction: usize,

    /// Vectors inserted in parallel per batch.
    #[arg(long, default_value_t = BuildSettings::default().batch_size)]
    batch_size: usize,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = BuildCli::parse();
    let started = Instant::now();

    let metadata_path = cli.data_dir.join(&cli.metadata);
    let metadata = MetadataTable::from_csv(&metadata_path)
        .with_context(|| format!("failed to load metadata from {:?}", metadata_path))?;
    info!(records = metadata.len(), "metadata loaded");

    let embeddings_path = cli.data_dir.join(&cli.embeddings);
    let embeddings = EmbeddingTable::from_csv(&embeddings_path)
        .with_context(|| format!("failed to load embeddings from {:?}", embeddings_path))?;
    info!(
        vectors = embeddings.len(),
        dimension = embeddings.dimension(),
        "embeddings loaded"
    );

    let builder = IndexBuilder::new(BuildSettings {
        m: cli.m,
        ef_construction: cli.ef_construction,
        batch_size: cli.batch_size.max(1),
        index_name: cli.index_name,
    });
    let out_dir = cli.out_dir.unwrap_or(cli.data_dir);
    let report = builder.build_and_save(&metadata, &embeddings, &out_dir)?;
    info!(
        count = report.count,
        dimension = report.dimension,
        index = ?report.index_path,
        labels = ?report.labels_path,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "index build complete"
    );
    Ok(())
}
