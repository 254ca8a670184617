use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use terrawatch::{
    AnomalyDetector, DetectorConfig, RasterReader, RasterWriter, SatelliteSource,
    SpectralIndexEngine,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = "detect anomalies in a multi-band satellite raster")]
struct Args {
    /// Input raster (GeoTIFF or any GDAL-readable format)
    image: PathBuf,

    /// JSON detector configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Segmentation model artifact (overrides the configuration)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Satellite source, e.g. sentinel-2 or landsat-8
    #[arg(short, long)]
    source: Option<String>,

    #[arg(short, long)]
    threshold: Option<f64>,

    /// Spectral indices to write next to the output, e.g. ndvi,ndwi
    #[arg(long, value_delimiter = ',')]
    indices: Vec<String>,

    /// Write the JSON result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => DetectorConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model_path = Some(model.clone());
    }
    if let Some(source) = &args.source {
        config.source = source.clone();
    }

    if !args.indices.is_empty() {
        write_indices(&args, &config.source)?;
    }

    let detector = AnomalyDetector::new(config)?;
    let result = detector
        .detect(&args.image, args.threshold, serde_json::Map::new())
        .with_context(|| format!("detecting anomalies in {}", args.image.display()))?;
    let json = result.to_json_pretty()?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            log::info!("Detection result written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn write_indices(args: &Args, source: &str) -> Result<()> {
    let image = RasterReader::open(&args.image)?;
    let names: Vec<&str> = args.indices.iter().map(String::as_str).collect();
    let source = SatelliteSource::parse(source);
    let indices = SpectralIndexEngine::new().compute(&image, &source, &names);

    let dir = args
        .output
        .as_ref()
        .and_then(|p| p.parent())
        .map(PathBuf::from)
        .unwrap_or_default();
    let stem = args
        .image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    for (name, values) in &indices {
        let path = dir.join(format!("{}_{}.tif", stem, name));
        RasterWriter::write_band(&path, values, image.georef())?;
    }
    Ok(())
}
