use std::fs;
use std::path::Path;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use geo::Geometry;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stac_coverage::app::App;
use stac_coverage::config::{ConfigLoader, RegionSettings, ResolvedConfig};
use stac_coverage::directory::{
    CatalogDescriptor, CatalogDirectory, HttpCollectionLister, StacIndexDirectory, StaticDirectory,
};
use stac_coverage::domain::{BoundingBox, CatalogUrl, Region};
use stac_coverage::error::CoverageError;
use stac_coverage::geometry;
use stac_coverage::http::{ResilientClient, ReqwestTransport};
use stac_coverage::output::{JsonOutput, LogSink, ProbeReport};
use stac_coverage::probe::{ProbeOutcome, RegionCollectionProber};
use stac_coverage::regions::GeoJsonRegionSource;
use stac_coverage::store::{CoverageFilter, CoverageStore, JsonCoverageStore};

#[derive(Parser)]
#[command(name = "stac-coverage")]
#[command(about = "Survey STAC catalogs and record which collections are downloadable where")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./stac-coverage.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Probe every catalog, collection and region and update the store")]
    Crawl(CrawlArgs),
    #[command(about = "List stored coverage intersecting an area of interest")]
    Query(QueryArgs),
    #[command(about = "Probe a single collection over a bounding box")]
    Probe(ProbeArgs),
}

#[derive(Args)]
struct CrawlArgs {
    /// GeoJSON FeatureCollection of regions (.geojson or .geojson.gz).
    #[arg(long)]
    regions: Option<String>,

    /// Catalog root URL; repeat to crawl several. Skips the directory lookup.
    #[arg(long = "catalog")]
    catalogs: Vec<String>,

    #[arg(long)]
    store: Option<String>,

    /// Probe without writing the store.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// GeoJSON file, inline GeoJSON, or `minx,miny,maxx,maxy`.
    #[arg(long)]
    aoi: String,

    #[arg(long)]
    store: Option<String>,

    #[arg(long)]
    http_downloadable: Option<bool>,

    #[arg(long)]
    requires_token: Option<bool>,

    #[arg(long)]
    from_mpc: Option<bool>,

    #[arg(long)]
    with_token_url: bool,

    #[arg(long)]
    available_only: bool,
}

#[derive(Args)]
struct ProbeArgs {
    #[arg(long)]
    catalog: String,

    #[arg(long)]
    collection: String,

    /// `minx,miny,maxx,maxy` in WGS84.
    #[arg(long)]
    bbox: String,

    /// Record the result in this store; without it nothing is written.
    #[arg(long)]
    store: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CoverageError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CoverageError) -> u8 {
    match error {
        CoverageError::MissingConfig
        | CoverageError::MissingRegions
        | CoverageError::ConfigRead(_)
        | CoverageError::ConfigParse(_)
        | CoverageError::InvalidUrl(_)
        | CoverageError::InvalidBbox(_) => 2,
        error if error.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolved = ConfigLoader::resolve_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Crawl(args) => run_crawl(args, &resolved),
        Commands::Query(args) => run_query(args, &resolved),
        Commands::Probe(args) => run_probe(args, &resolved),
    }
}

fn client(resolved: &ResolvedConfig) -> Result<ResilientClient<ReqwestTransport>, CoverageError> {
    let transport = ReqwestTransport::new(resolved.http.timeout)?;
    Ok(ResilientClient::new(transport, resolved.http.retry))
}

fn store_path(flag: Option<String>, resolved: &ResolvedConfig) -> Utf8PathBuf {
    flag.map(Utf8PathBuf::from)
        .unwrap_or_else(|| resolved.store.clone())
}

fn run_crawl(args: CrawlArgs, resolved: &ResolvedConfig) -> miette::Result<()> {
    let region_settings = args
        .regions
        .as_deref()
        .map(RegionSettings::from_path)
        .or_else(|| resolved.regions.clone())
        .ok_or(CoverageError::MissingRegions)?;
    let regions = GeoJsonRegionSource::with_properties(
        region_settings.path,
        &region_settings.name_property,
        &region_settings.code_property,
    );

    let client = client(resolved)?;
    let directory: Box<dyn CatalogDirectory> = if !args.catalogs.is_empty() {
        let catalogs = args
            .catalogs
            .iter()
            .map(|url| {
                let catalog: CatalogUrl = url.parse()?;
                Ok(CatalogDescriptor::public_api(catalog.as_str()))
            })
            .collect::<Result<Vec<_>, CoverageError>>()?;
        Box::new(StaticDirectory::new(catalogs))
    } else if let Some(catalogs) = &resolved.catalogs {
        Box::new(StaticDirectory::new(catalogs.clone()))
    } else {
        Box::new(StacIndexDirectory::new(client.clone(), &resolved.directory_url))
    };
    let lister = HttpCollectionLister::new(client.clone());
    let prober = RegionCollectionProber::new(client, resolved.token_provider.clone());
    let app = App::new(directory, lister, regions, prober);

    let mut store = if args.dry_run {
        JsonCoverageStore::in_memory()
    } else {
        JsonCoverageStore::open(store_path(args.store, resolved))?
    };
    if let Some(path) = store.path() {
        info!(store = %path, records = store.len(), "opened coverage store");
    }

    let summary = app.crawl(&mut store, &LogSink)?;
    JsonOutput::print_crawl(&summary).into_diagnostic()?;
    Ok(())
}

fn run_query(args: QueryArgs, resolved: &ResolvedConfig) -> miette::Result<()> {
    let aoi = load_aoi(&args.aoi)?;
    let store = JsonCoverageStore::open_read_only(store_path(args.store, resolved))?;
    let filter = CoverageFilter {
        http_downloadable: args.http_downloadable,
        requires_token: args.requires_token,
        is_from_mpc: args.from_mpc,
        with_token_url: args.with_token_url,
        available_only: args.available_only,
    };
    let hits = store.query(&aoi, &filter);
    info!(hits = hits.len(), records = store.len(), "query finished");
    JsonOutput::print_query(&hits).into_diagnostic()?;
    Ok(())
}

fn run_probe(args: ProbeArgs, resolved: &ResolvedConfig) -> miette::Result<()> {
    let catalog: CatalogUrl = args.catalog.parse()?;
    let bbox: BoundingBox = args.bbox.parse()?;
    let region = Region::from_bbox(&args.bbox, &args.bbox, bbox);

    let prober = RegionCollectionProber::new(client(resolved)?, resolved.token_provider.clone());
    let mut report = ProbeReport {
        catalog_url: catalog.as_str().to_string(),
        collection_id: args.collection.clone(),
        region: region.name.clone(),
        outcome: String::new(),
        classification: None,
        stored: None,
    };

    match prober.probe(&catalog, &args.collection, &region) {
        ProbeOutcome::NoFeatures => report.outcome = "empty".to_string(),
        ProbeOutcome::Failed(err) => report.outcome = format!("failed: {err}"),
        ProbeOutcome::Classified {
            classification,
            extent,
        } => {
            report.outcome = "classified".to_string();
            report.classification = Some(classification.clone());
            if let Some(path) = args.store {
                let mut store = JsonCoverageStore::open(Utf8PathBuf::from(path))?;
                let claim =
                    classification.into_claim(&catalog, &args.collection, &region.code, extent);
                report.stored = Some(store.upsert(&claim)?);
            }
        }
    }

    JsonOutput::print_probe(&report).into_diagnostic()?;
    Ok(())
}

fn load_aoi(value: &str) -> Result<Geometry<f64>, CoverageError> {
    if Path::new(value).is_file() {
        let text = fs::read_to_string(value)
            .map_err(|err| CoverageError::Filesystem(format!("{value}: {err}")))?;
        return geometry::parse_geojson_geometry(&text);
    }
    if value.trim_start().starts_with('{') {
        return geometry::parse_geojson_geometry(value);
    }
    let bbox: BoundingBox = value.parse()?;
    Ok(Geometry::Rect(bbox.to_rect()))
}
