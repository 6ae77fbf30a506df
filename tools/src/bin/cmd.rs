// Command line utility for running the scan-pipeline analysis on an MTX matrix

use anyhow::{format_err, Context, Error};
use clap::{value_parser, Arg, Command};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::prelude::*;
use scan_pipeline::markers::MarkerReport;
use scan_pipeline::{Pipeline, PipelineConfig, PipelineOutput};
use scan_types::{CellMeta, Dataset, FeatureMeta, PCA, UMAP};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tools::mtx::{load_features, load_lines, load_mtx};

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .init();

    let matches = Command::new("scan-pipeline-cmd")
        .arg(
            Arg::new("INPUT")
                .help("mtx file to use, features x cells")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("FEATURES")
                .help("features.tsv with feature ids and names")
                .long("features")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("BARCODES")
                .help("barcodes.tsv with one barcode per cell")
                .long("barcodes")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("BATCHES")
                .help("Batch label of each cell, one per line")
                .long("batches")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CONFIG")
                .help("JSON pipeline configuration; omitted settings take their defaults")
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let mtx_filename = matches
        .get_one::<PathBuf>("INPUT")
        .ok_or_else(|| format_err!("missing INPUT"))?;
    let out_dir = matches
        .get_one::<PathBuf>("OUT_DIR")
        .ok_or_else(|| format_err!("missing OUT_DIR"))?;

    let config: PipelineConfig = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => {
            let file = File::open(path).with_context(|| path.display().to_string())?;
            serde_json::from_reader(file).with_context(|| format!("reading config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    let counts = load_mtx(mtx_filename)?;
    let features = match matches.get_one::<PathBuf>("FEATURES") {
        Some(path) => load_features(path)?,
        None => (0..counts.rows())
            .map(|i| FeatureMeta::new(format!("F{i}"), format!("F{i}")))
            .collect(),
    };
    let cells = match matches.get_one::<PathBuf>("BARCODES") {
        Some(path) => load_lines(path)?.into_iter().map(CellMeta::new).collect(),
        None => (0..counts.cols()).map(|j| CellMeta::new(format!("C{j}"))).collect(),
    };
    let mut dataset = Dataset::new(counts, features, cells)?;
    if let Some(path) = matches.get_one::<PathBuf>("BATCHES") {
        let labels = load_lines(path)?;
        dataset = dataset.with_batches(&labels[..])?;
    }
    info!("loaded {} features x {} cells", dataset.n_features(), dataset.n_cells());

    let output = Pipeline::new(config).run(&dataset)?;

    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    write_outputs(&output, out_dir)?;
    info!("wrote results to {}", out_dir.display());
    Ok(())
}

fn write_outputs(output: &PipelineOutput, out_dir: &Path) -> Result<(), Error> {
    let ds = &output.dataset;

    let mut clusters = BufWriter::new(File::create(out_dir.join("clusters.csv"))?);
    writeln!(clusters, "barcode,cluster")?;
    for cell in ds.cells() {
        let label = cell.cluster.map_or(String::new(), |c| c.to_string());
        writeln!(clusters, "{},{}", cell.barcode, label)?;
    }
    clusters.flush()?;

    array_to_csv(ds.require(PCA)?.array().view(), out_dir.join("pca.csv.gz"))?;
    if let Some(umap) = ds.derived(UMAP) {
        array_to_csv(umap.array().view(), out_dir.join("umap.csv.gz"))?;
    }
    markers_to_csv(&output.markers, out_dir.join("markers.csv"))?;

    let summary = serde_json::json!({
        "qc": { "thresholds": output.qc.thresholds, "discarded": output.qc.reasons },
        "selected_features": output.variance.selected,
        "batches": output.batches,
        "embedding": output.embedding,
        "clusters": output.clusters,
        "diagnostics": ds.diagnostics().iter().map(|d| d.to_string()).collect::<Vec<_>>(),
    });
    let file = File::create(out_dir.join("summary.json"))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)?;
    Ok(())
}

pub fn array_to_csv(array: ArrayView2<f64>, path: impl AsRef<Path>) -> Result<(), Error> {
    let mut writer = BufWriter::new(GzEncoder::new(File::create(path)?, Compression::default()));
    let num_cols = array.shape()[1];
    for row in array.axis_iter(Axis(0)) {
        for (i, entry) in row.iter().enumerate() {
            write!(writer, "{}", *entry)?;
            if i + 1 < num_cols {
                write!(writer, ",")?;
            }
        }
        writeln!(writer)?;
    }
    writer
        .into_inner()
        .map_err(|e| format_err!("{}", e.error()))?
        .finish()?;
    Ok(())
}

fn markers_to_csv(report: &MarkerReport, path: impl AsRef<Path>) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(
        writer,
        "cluster,other,feature_id,feature_name,auc,u,p_value,adjusted_p_value,log2_fold_change,mean_in,mean_out,direction"
    )?;
    for ((group, other), records) in report {
        let other = other.map_or("rest".to_string(), |o| o.to_string());
        for r in records {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{},{},{},{:?}",
                group,
                other,
                r.id,
                r.name,
                r.auc,
                r.u,
                r.p_value,
                r.adjusted_p_value,
                r.log2_fold_change,
                r.mean_in,
                r.mean_out,
                r.direction
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}
