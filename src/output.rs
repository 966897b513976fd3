use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;

use crate::error::GctsError;
use crate::pipeline::{ProgressEvent, ProgressSink, QueryReport, QuerySummary, SelectionReport};
use crate::record::QueryResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Serialize)]
struct QueryDocument<'a> {
    summary: &'a QuerySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<Value>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_query(report: &QueryReport, include_features: bool) -> io::Result<()> {
        Self::print_json(&QueryDocument {
            summary: &report.summary,
            features: include_features.then(|| report.result.to_feature_collection()),
        })
    }

    pub fn print_selection(report: &SelectionReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn export_geojson(result: &QueryResult, dest: &Utf8Path) -> Result<(), GctsError> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| GctsError::Export(format!("{parent}: {err}")))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".gcts-export")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| GctsError::Export(err.to_string()))?;
    serde_json::to_writer(&mut temp, &result.to_feature_collection())
        .map_err(|err| GctsError::Export(err.to_string()))?;
    temp.write_all(b"\n")
        .and_then(|_| temp.flush())
        .map_err(|err| GctsError::Export(err.to_string()))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| GctsError::Export(format!("{dest}: {}", err.error)))?;
    Ok(())
}

pub fn print_query_summary(summary: &QuerySummary, export: Option<&Utf8Path>) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}GCTS query: {}{reset}", summary.collection);
    println!(
        "{cyan}  region {},{},{},{} ({}) -> output {}{reset}",
        summary.region.west,
        summary.region.south,
        summary.region.east,
        summary.region.north,
        summary.region_crs,
        summary.output_crs
    );
    println!(
        "{green}  partitions: {} selected of {}, {} fetched{reset}",
        summary.partitions_selected.len(),
        summary.partitions_total,
        summary.partitions_fetched
    );
    println!(
        "{green}  records: {} kept of {} scanned{reset}",
        summary.records, summary.records_scanned
    );
    if !summary.columns.is_empty() {
        println!("  columns: {}", summary.columns.join(", "));
    }
    if summary.failures.is_empty() {
        println!("{green}  failures: 0{reset}");
    } else {
        println!("{yellow}  failures: {}{reset}", summary.failures.len());
        for failure in &summary.failures {
            println!(
                "{yellow}    {} {}: {}{reset}",
                failure.partition_id, failure.location, failure.reason
            );
        }
    }
    if let Some(path) = export {
        println!("{cyan}  written: {path}{reset}");
    }
}

pub fn print_selection_summary(report: &SelectionReport) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}GCTS partitions: {} of {} intersect the region{reset}",
        report.selected.len(),
        report.partitions_total
    );
    for partition in &report.selected {
        match partition.row_count {
            Some(rows) => println!(
                "  {} {} ({} rows, {})",
                partition.id, partition.location, rows, partition.crs
            ),
            None => println!(
                "  {} {} ({})",
                partition.id, partition.location, partition.crs
            ),
        }
    }
}
