use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use park_water::{
    kpi_summary, load_reconciled, monthly_series, InvoiceFilter, PipelineConfig, PipelineContext,
};

const USAGE: &str = "usage: park-water [run|summary] [--config FILE] [--park NAME] [--from YYYY-MM] [--to YYYY-MM]";

#[derive(Debug, Default)]
struct Args {
    mode: String,
    config: Option<PathBuf>,
    park: Option<String>,
    from: Option<(i32, u32)>,
    to: Option<(i32, u32)>,
}

fn parse_month(raw: &str) -> Result<(i32, u32)> {
    let (year, month) = raw
        .split_once('-')
        .with_context(|| format!("expected YYYY-MM, got '{}'", raw))?;
    Ok((
        year.parse().with_context(|| format!("bad year in '{}'", raw))?,
        month.parse().with_context(|| format!("bad month in '{}'", raw))?,
    ))
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        mode: "run".to_string(),
        ..Args::default()
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "run" | "summary" => args.mode = arg,
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "--park" => args.park = Some(iter.next().context("--park needs a name")?),
            "--from" => args.from = Some(parse_month(&iter.next().context("--from needs YYYY-MM")?)?),
            "--to" => args.to = Some(parse_month(&iter.next().context("--to needs YYYY-MM")?)?),
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => bail!("unknown argument '{}'\n{}", other, USAGE),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "park_water=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args()?;
    let config = PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.mode.as_str() {
        "summary" => run_summary(&config, &args),
        _ => run_pipeline(config),
    }
}

fn run_pipeline(config: PipelineConfig) -> Result<()> {
    println!("💧 Park Water - Irrigation Reconciliation v{}", park_water::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Green areas: {}", config.paths.green_areas.display());
    println!("📂 Invoices:    {}", config.paths.invoices.display());
    println!(
        "🎯 Threshold:   {} | kc {} | elevation {} m",
        config.matching.similarity_threshold, config.weather.crop_coefficient, config.weather.elevation_m
    );

    let ctx = PipelineContext::from_config(config).context("Failed to set up weather client")?;
    let result = ctx.run_from_files().context("Pipeline run failed")?;
    let outcome = &result.outcome;
    let report = &outcome.reconciliation;

    println!("\n📥 Ingestion");
    println!(
        "✓ Green areas kept: {} (dropped {})",
        result.green_area_report.kept,
        result.green_area_report.dropped()
    );
    println!(
        "✓ Invoices kept:    {} (dropped {})",
        result.invoice_report.kept,
        result.invoice_report.dropped()
    );

    println!("\n🔍 Name matching");
    println!(
        "✓ {} candidates, {} accepted, {} below threshold",
        outcome.matches.all.len(),
        outcome.matches.accepted.len(),
        outcome.matches.rejected_count()
    );

    println!("\n🌦️  Weather");
    println!("✓ {} days of water need estimated", outcome.water_need.len());

    println!("\n⚖️  Reconciliation");
    println!("✓ {}", report.summary());
    let unmatched = report.unmatched_parks();
    if !unmatched.is_empty() {
        println!("⚠️  {} ledger names without a confident match:", unmatched.len());
        for name in unmatched.iter().take(10) {
            println!("   - {}", name);
        }
        if unmatched.len() > 10 {
            println!("   ... and {} more", unmatched.len() - 10);
        }
    }

    let paths = &ctx.config().paths;
    println!("\n💾 Output");
    println!("✓ {}", paths.reconciled_output.display());
    println!("✓ {}", paths.matches_output.display());
    if let (Some(run_id), Some(stats)) = (&result.run_id, &result.store_stats) {
        println!(
            "✓ Run {} stored: {} new, {} revised, {} unchanged",
            run_id, stats.inserted, stats.revised, stats.unchanged
        );
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Done");
    Ok(())
}

fn run_summary(config: &PipelineConfig, args: &Args) -> Result<()> {
    let path = &config.paths.reconciled_output;
    let invoices = load_reconciled(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let filter = match (args.from, args.to) {
        (Some(from), Some(to)) => InvoiceFilter::for_months(args.park.clone(), from, to)
            .context("month out of range")?,
        (None, None) => InvoiceFilter {
            park: args.park.clone(),
            ..InvoiceFilter::all()
        },
        _ => bail!("--from and --to go together"),
    };

    let selected = filter.apply(&invoices);
    let kpi = kpi_summary(&selected);

    println!("📊 Summary - {}", args.park.as_deref().unwrap_or("all parks"));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Invoices:          {}", kpi.invoice_count);
    println!("Actual (m³):       {}", kpi.total_actual_m3);
    println!("Estimated (m³):    {:.1}", kpi.total_estimated_m3);
    println!("Difference (m³):   {:.1}", kpi.total_difference_m3);
    println!("Variance:          {:.1}%", kpi.variance_pct);
    println!("Grass area (m²):   {:.0}", kpi.total_grass_area_m2);

    println!("\nMonth     Actual     Estimated");
    for month in monthly_series(&selected) {
        println!("{}  {:>9.1}  {:>12.1}", month.label(), month.actual_m3, month.estimated_m3);
    }
    Ok(())
}
