use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gcts_retrieval::catalog::StacCatalogClient;
use gcts_retrieval::config::{ConfigLoader, ResolvedConfig};
use gcts_retrieval::crs::Crs;
use gcts_retrieval::domain::CollectionId;
use gcts_retrieval::error::GctsError;
use gcts_retrieval::fetcher::{CancellationToken, FailurePolicy};
use gcts_retrieval::index::BoundaryRule;
use gcts_retrieval::output::{
    self, ConsoleProgress, JsonOutput, OutputMode, print_query_summary, print_selection_summary,
};
use gcts_retrieval::pipeline::{Pipeline, ProgressSink, Session};
use gcts_retrieval::region::{Bounds, Region};
use gcts_retrieval::storage::StorageClient;

#[derive(Parser)]
#[command(name = "gcts")]
#[command(about = "Retrieve Global Coastal Transect System records for a region of interest")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true, help = "Config file (defaults to ./gcts.json when present)")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch the transects intersecting a region")]
    Query(QueryArgs),
    #[command(about = "List the partitions a query over a region would read")]
    Partitions(RegionArgs),
}

#[derive(Args, Clone)]
struct RegionArgs {
    #[arg(
        long,
        allow_hyphen_values = true,
        conflicts_with = "region_file",
        help = "west,south,east,north in the region CRS"
    )]
    bbox: Option<String>,

    #[arg(long, help = "GeoJSON polygon, feature or feature collection")]
    region_file: Option<String>,

    #[arg(long, help = "CRS of the region, e.g. EPSG:4326")]
    crs: Option<Crs>,

    #[arg(long)]
    catalog: Option<String>,

    #[arg(long)]
    collection: Option<CollectionId>,

    #[arg(long)]
    boundary: Option<BoundaryRule>,
}

#[derive(Args, Clone)]
struct QueryArgs {
    #[command(flatten)]
    region: RegionArgs,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    policy: Option<FailurePolicy>,

    #[arg(long, help = "CRS of the returned geometries (defaults to the region CRS)")]
    target_crs: Option<Crs>,

    #[arg(long, help = "Write the records to this GeoJSON file")]
    output: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(gcts) = report.downcast_ref::<GctsError>() {
            return ExitCode::from(map_exit_code(gcts));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GctsError) -> u8 {
    match error {
        GctsError::InvalidRegion(_)
        | GctsError::UnsupportedCrs(_)
        | GctsError::ConfigRead(_)
        | GctsError::ConfigParse(_)
        | GctsError::InvalidPolicy(_)
        | GctsError::InvalidBoundary(_) => 2,
        GctsError::CatalogResolution(_) | GctsError::PartitionFetch { .. } => 3,
        GctsError::Cancelled => 130,
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
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Query(args) => run_query(args, resolved, output_mode),
        Commands::Partitions(args) => run_partitions(args, resolved, output_mode),
    }
}

fn run_query(
    args: QueryArgs,
    mut resolved: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            return Err(GctsError::ConfigParse("concurrency must be at least 1".to_string()).into());
        }
        resolved.fetch.concurrency = concurrency;
    }
    if let Some(policy) = args.policy {
        resolved.fetch.policy = policy;
    }
    if args.target_crs.is_some() {
        resolved.target_crs = args.target_crs;
    }
    apply_region_overrides(&args.region, &mut resolved);
    let region = build_region(&args.region, resolved.region_crs)?;
    let pipeline = build_pipeline(&resolved)?;

    let cancel = CancellationToken::new();
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &ConsoleProgress,
    };
    let report = pipeline.query(&region, &cancel, sink)?;

    if let Some(path) = &args.output {
        output::export_geojson(&report.result, path)?;
    }
    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_query(&report, args.output.is_none()).into_diagnostic()?;
        }
        OutputMode::Interactive => print_query_summary(&report.summary, args.output.as_deref()),
    }
    Ok(())
}

fn run_partitions(
    args: RegionArgs,
    mut resolved: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    apply_region_overrides(&args, &mut resolved);
    let region = build_region(&args, resolved.region_crs)?;
    let pipeline = build_pipeline(&resolved)?;

    match output_mode {
        OutputMode::NonInteractive => {
            let report = pipeline.partitions(&region, &JsonOutput)?;
            JsonOutput::print_selection(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let report = pipeline.partitions(&region, &ConsoleProgress)?;
            print_selection_summary(&report);
        }
    }
    Ok(())
}

fn apply_region_overrides(args: &RegionArgs, resolved: &mut ResolvedConfig) {
    if let Some(catalog) = &args.catalog {
        resolved.catalog_url = catalog.clone();
    }
    if let Some(collection) = &args.collection {
        resolved.collection = collection.clone();
    }
    if let Some(boundary) = args.boundary {
        resolved.fetch.boundary = boundary;
    }
    if let Some(crs) = args.crs {
        resolved.region_crs = crs;
    }
}

fn build_region(args: &RegionArgs, crs: Crs) -> Result<Region, GctsError> {
    match (&args.bbox, &args.region_file) {
        (Some(bbox), _) => Region::from_bounds(bbox.parse::<Bounds>()?, crs),
        (None, Some(path)) => {
            let text = fs::read_to_string(path)
                .map_err(|err| GctsError::InvalidRegion(format!("{path}: {err}")))?;
            Region::from_geojson(&text, crs)
        }
        (None, None) => Err(GctsError::InvalidRegion(
            "a region is required (--bbox or --region-file)".to_string(),
        )),
    }
}

fn build_pipeline(
    resolved: &ResolvedConfig,
) -> Result<Pipeline<StacCatalogClient<StorageClient>, StorageClient>, GctsError> {
    let storage = StorageClient::new(resolved.credentials.clone())?;
    let catalog = StacCatalogClient::new(storage.clone());
    Ok(Pipeline::new(Session::from_config(resolved), catalog, storage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(map_exit_code(&GctsError::InvalidRegion("x".to_string())), 2);
        assert_eq!(map_exit_code(&GctsError::fetch("a.geojson", "HTTP status 503")), 3);
        assert_eq!(map_exit_code(&GctsError::Cancelled), 130);
        assert_eq!(map_exit_code(&GctsError::Export("disk full".to_string())), 1);
    }

    #[test]
    fn cli_parses_query_flags() {
        let cli = Cli::try_parse_from([
            "gcts",
            "--non-interactive",
            "query",
            "--bbox",
            "-10.5,35,-9,36.2",
            "--policy",
            "fail-fast",
            "--boundary",
            "exclusive",
            "--crs",
            "EPSG:4326",
            "--target-crs",
            "EPSG:3857",
        ])
        .unwrap();
        assert!(cli.non_interactive);
        let Commands::Query(args) = cli.command else {
            panic!("expected query command");
        };
        assert_eq!(args.region.bbox.as_deref(), Some("-10.5,35,-9,36.2"));
        assert_eq!(args.policy, Some(FailurePolicy::FailFast));
        assert_eq!(args.region.boundary, Some(BoundaryRule::Exclusive));
        assert_eq!(args.target_crs, Some(Crs::WebMercator));
    }

    #[test]
    fn region_is_required() {
        let args = RegionArgs {
            bbox: None,
            region_file: None,
            crs: None,
            catalog: None,
            collection: None,
            boundary: None,
        };
        assert!(matches!(
            build_region(&args, Crs::Wgs84),
            Err(GctsError::InvalidRegion(_))
        ));
    }
}
