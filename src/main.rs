// Voucher Dashboard - command line tool
//
//   voucher-dashboard init
//   voucher-dashboard import <target> <file>
//   voucher-dashboard summary [year]
//   voucher-dashboard report-pdf <id> [out_dir]

use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use voucher_dashboard::{dashboard, db, import, report, AppConfig, ImportTarget};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = AppConfig::load().context("Failed to load configuration")?;

    match args.first().map(String::as_str) {
        Some("init") => run_init(&config),
        Some("import") => match (args.get(1), args.get(2)) {
            (Some(target), Some(file)) => run_import(&config, target, Path::new(file)),
            _ => usage(),
        },
        Some("summary") => {
            let year = match args.get(1) {
                Some(year) => Some(year.parse::<i32>().with_context(|| format!("Invalid year: {}", year))?),
                None => None,
            };
            run_summary(&config, year)
        }
        Some("report-pdf") => match args.get(1) {
            Some(id) => {
                let id = id.parse::<i64>().with_context(|| format!("Invalid report id: {}", id))?;
                let out_dir = args
                    .get(2)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| config.storage.export_dir.clone());
                run_report_pdf(&config, id, &out_dir)
            }
            None => usage(),
        },
        _ => usage(),
    }
}

fn usage() -> Result<()> {
    eprintln!("Usage:");
    eprintln!("  voucher-dashboard init");
    eprintln!("  voucher-dashboard import <target> <file>");
    eprintln!("  voucher-dashboard summary [year]");
    eprintln!("  voucher-dashboard report-pdf <id> [out_dir]");
    eprintln!();
    let targets: Vec<&str> = ImportTarget::ALL.iter().map(|t| t.as_str()).collect();
    eprintln!("Import targets: {}", targets.join(", "));
    std::process::exit(2);
}

fn run_init(config: &AppConfig) -> Result<()> {
    println!("🔧 Setting up database...");
    db::open_database(&config.database.path)?;
    println!("✓ Database ready at {} (WAL mode)", config.database.path.display());
    Ok(())
}

fn run_import(config: &AppConfig, target: &str, file: &Path) -> Result<()> {
    let target: ImportTarget = target.parse()?;
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    println!("📂 Importing {} into {}...", file_name, target);
    let conn = db::open_database(&config.database.path)?;
    let report = import::import_file(&conn, target, &file_name, &bytes, "cli")?;

    println!("\n🔗 Column mapping:");
    for column in &report.column_mapping {
        println!("   {:<28} ← {:<28} ({:?})", column.field, column.header, column.method);
    }
    if !report.unmatched_headers.is_empty() {
        println!("   ignored: {}", report.unmatched_headers.join(", "));
    }

    if !report.errors.is_empty() {
        println!("\n⚠️  Row errors:");
        for error in &report.errors {
            println!("   line {}: {}", error.line, error.messages.join("; "));
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}", report.summary());
    if report.rows_imported == 0 {
        bail!("No rows imported from {}", file_name);
    }
    Ok(())
}

fn run_summary(config: &AppConfig, year: Option<i32>) -> Result<()> {
    let conn = db::open_database(&config.database.path)?;
    let year = match year {
        Some(year) => year,
        None => dashboard::default_year(&conn)?,
    };
    let summary = dashboard::summary(&conn, year)?;

    println!("📊 Voucher Dashboard - FY{}", summary.year);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("HAP budget authority:   ${:>16.2}", summary.hap_budget_authority);
    println!("YTD HAP spent:          ${:>16.2}", summary.ytd_hap_spent);
    println!("Remaining authority:    ${:>16.2}", summary.remaining_authority);
    println!("Budget utilization:      {:>15.2}%", summary.budget_utilization_rate);
    println!("Months reported:         {:>16}", summary.months_reported);

    if let Some(latest) = &summary.latest_utilization {
        println!(
            "Voucher utilization:     {:>15.2}% (month {}, {} of {} leased)",
            latest.utilization_rate, latest.month, latest.leased_vouchers, latest.authorized_vouchers
        );
    }

    if !summary.reserves.is_empty() {
        println!("\n🏦 Reserves");
        for reserve in &summary.reserves {
            println!(
                "   {:<24} ${:>16.2}  (as of {})",
                reserve.reserve_type, reserve.ending_balance, reserve.as_of_date
            );
        }
        println!("   {:<24} ${:>16.2}", "Total", summary.total_reserves);
    }

    println!("\n📝 Commitments");
    for status in &summary.commitments.by_status {
        println!("   {:<24} {:>4}  ${:>16.2}", status.status, status.count, status.amount);
    }
    println!("   {:<24}       ${:>16.2}", "Outstanding", summary.commitments.outstanding);
    Ok(())
}

fn run_report_pdf(config: &AppConfig, id: i64, out_dir: &Path) -> Result<()> {
    let conn = db::open_database(&config.database.path)?;
    let Some(saved) = report::get_report(&conn, id)? else {
        bail!("Report {} not found", id);
    };

    let path = report::export_pdf(&saved, out_dir)?;
    println!("📄 Wrote {}", path.display());
    Ok(())
}
