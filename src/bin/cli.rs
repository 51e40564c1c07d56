// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! citykml CLI

use anyhow::{Context, Result};
use citykml::config::{ExportConfig, DEFAULT_CONFIG_FILE};
use citykml::{DisplayForm, ExportSummary, Exporter, FeatureCategory, LodRequest, ProgressEvent, SqliteConnector};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "citykml")]
#[command(about = "Export 3D city models to KML, COLLADA and glTF", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export city objects
    Export {
        /// Configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// SQLite database
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Export these gml ids instead of a bounding box
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Bounding box min_x,min_y,max_x,max_y in the source CRS
        #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
        bbox: Option<Vec<f64>>,

        /// Display forms (footprint, extruded, geometry, collada)
        #[arg(long, value_delimiter = ',')]
        forms: Vec<DisplayForm>,

        /// Feature categories
        #[arg(long, value_delimiter = ',')]
        categories: Vec<FeatureCategory>,

        /// LOD to export, or "best"
        #[arg(long)]
        lod: Option<LodRequest>,

        /// Package the output as KMZ
        #[arg(long)]
        kmz: bool,
    },

    /// Write a default configuration file
    InitConfig {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Export {
            config,
            db,
            output,
            ids,
            bbox,
            forms,
            categories,
            lod,
            kmz,
        } => {
            let mut export_config = ExportConfig::load(config.as_deref())?;
            if let Some(db) = db {
                export_config.database.path = db;
            }
            if let Some(output) = output {
                export_config.output.directory = output;
            }
            if !ids.is_empty() {
                export_config.selection.gmlids = ids;
            }
            if let Some(bbox) = bbox {
                let [min_x, min_y, max_x, max_y] = bbox.as_slice() else {
                    anyhow::bail!("--bbox needs exactly four values");
                };
                export_config.tiling.bbox = Some([*min_x, *min_y, *max_x, *max_y]);
            }
            if !forms.is_empty() {
                export_config.selection.forms = forms;
            }
            if !categories.is_empty() {
                export_config.selection.categories = categories;
            }
            if let Some(lod) = lod {
                export_config.selection.lod = lod;
            }
            if kmz {
                export_config.output.kmz = true;
            }
            export_command(export_config, cli.verbose)?;
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists, use --force to overwrite", path.display());
            }
            ExportConfig::default().save(&path)?;
            println!("{} {}", "Wrote".green(), path.display());
        }
        Commands::Version => {
            println!("citykml v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,citykml=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn export_command(config: ExportConfig, verbose: bool) -> Result<()> {
    if !config.database.path.exists() {
        anyhow::bail!("database not found: {}", config.database.path.display());
    }
    if verbose {
        println!("{} {}", "Database:".bold(), config.database.path.display());
        println!("{} {}", "Output:".bold(), config.output.directory.display());
    }

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let connector = Arc::new(SqliteConnector::new(config.database.path.clone()));
    let bar = progress.clone();
    let exporter = Exporter::new(config, connector)
        .context("Invalid export configuration")?
        .on_progress(move |event| match event {
            ProgressEvent::Queued => bar.inc_length(1),
            ProgressEvent::Exported { gmlid } => {
                bar.set_message(gmlid);
                bar.inc(1);
            }
            ProgressEvent::Skipped { .. } | ProgressEvent::Failed { .. } => bar.inc(1),
        });

    let summary = exporter.run().context("Export failed")?;
    progress.finish_and_clear();
    print_summary(&summary, verbose);

    if summary.failed > 0 || summary.write_failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &ExportSummary, verbose: bool) {
    println!("\n{}", "═".repeat(60).bright_black());
    println!("{}", "Export Summary".bold());
    println!("{}", "═".repeat(60).bright_black());
    println!("  {} {}", "Tiles:".bright_black(), summary.tiles.to_string().cyan());
    println!("  {} {}", "Queued:".bright_black(), summary.queued.to_string().cyan());
    println!("  {} {}", "Exported:".bright_black(), summary.exported.to_string().green());
    println!("  {} {}", "Skipped:".bright_black(), summary.skipped.to_string().yellow());
    println!(
        "  {} {}",
        "Failed:".bright_black(),
        if summary.failed > 0 {
            summary.failed.to_string().red()
        } else {
            summary.failed.to_string().green()
        }
    );
    if summary.write_failures > 0 {
        println!("  {} {}", "Write failures:".bright_black(), summary.write_failures.to_string().red());
    }
    if summary.cancelled {
        println!("  {}", "Cancelled before completion".yellow());
    }
    println!("  {} {:.2?}", "Elapsed:".bright_black(), summary.elapsed);
    if verbose {
        for file in &summary.files {
            println!("  {} {}", "→".bright_blue(), file.display());
        }
    }
    println!("{}", "═".repeat(60).bright_black());
}
