use clap::{Parser, Subcommand};
use icp_match::{
    compare_sheets, default_report_name, inspect_spreadsheet, normalize_saved_rows,
    write_comparison_report, ComparisonResult, IcpError, SheetStore, SCORER_URL_ENV,
};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "icp-match",
    version,
    about = "Compare uploaded contact spreadsheets against saved ICP sheets"
)]
struct Cli {
    /// Directory holding saved ICP sheets (default: ~/.icp-match)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a spreadsheet as a saved ICP sheet. Only the first worksheet
    /// of an Excel workbook is read.
    Save {
        /// Name for the saved ICP sheet
        name: String,
        /// Spreadsheet to import (csv, tsv, txt, xlsx, xls)
        file: String,
    },
    /// List saved ICP sheets
    List,
    /// Print the rows of a saved ICP sheet
    Show {
        /// Name of the saved ICP sheet
        name: String,
    },
    /// Delete a saved ICP sheet. This cannot be undone.
    Delete {
        /// Name of the saved ICP sheet
        name: String,
    },
    /// Preview a spreadsheet's headers, first rows, and the columns that
    /// would be used for a comparison. Only the first worksheet is read.
    Inspect {
        /// Spreadsheet to preview
        file: String,
    },
    /// Score an uploaded spreadsheet against a saved ICP sheet. Only the
    /// first worksheet of the uploaded workbook is read.
    Compare {
        /// Name of the saved ICP sheet to compare against
        name: String,
        /// Uploaded spreadsheet (xlsx, xls)
        file: String,
        /// Scoring endpoint (env: ICP_SCORER_URL)
        #[arg(long)]
        scorer_url: Option<String>,
        /// Also write an xlsx report, to PATH when given
        #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "")]
        report: Option<String>,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), IcpError> {
    let store = SheetStore::open(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Save { name, file } => {
            let sheet = store.save(&name, &file)?;
            println!(
                "Saved ICP sheet '{}' with {} row{}.",
                sheet.name,
                sheet.rows.len(),
                plural(sheet.rows.len())
            );
        }
        Command::List => {
            let summaries = store.list()?;
            if summaries.is_empty() {
                println!("No saved ICP sheets.");
                return Ok(());
            }
            println!("{:<28} {:>6}  {}", "NAME", "ROWS", "CREATED");
            for summary in summaries {
                println!(
                    "{:<28} {:>6}  {}",
                    summary.name, summary.row_count, summary.created_at
                );
            }
        }
        Command::Show { name } => {
            let sheet = store.load(&name)?;
            println!("{} ({} rows, created {})", sheet.name, sheet.rows.len(), sheet.created_at);
            for record in normalize_saved_rows(&sheet.rows) {
                let priority = record.priority.unwrap_or_default();
                if priority.is_empty() {
                    println!("  {} - {}", record.company_name, record.designations.join(", "));
                } else {
                    println!(
                        "  {} - {} [{}]",
                        record.company_name,
                        record.designations.join(", "),
                        priority
                    );
                }
            }
        }
        Command::Delete { name } => {
            store.delete(&name)?;
            println!("Deleted ICP sheet '{}'.", name.trim());
        }
        Command::Inspect { file } => {
            let preview = inspect_spreadsheet(&file)?;
            println!("Headers: {}", preview.headers.join(" | "));
            print_column("company", preview.company_column, &preview.headers);
            print_column("designation", preview.designation_column, &preview.headers);
            print_column("priority", preview.priority_column, &preview.headers);
            if preview.rows.is_empty() {
                println!("No data rows.");
            } else {
                println!("First {} row{}:", preview.rows.len(), plural(preview.rows.len()));
                for row in &preview.rows {
                    println!("  {}", row.join(" | "));
                }
            }
        }
        Command::Compare {
            name,
            file,
            scorer_url,
            report,
        } => {
            let endpoint = scorer_url
                .or_else(|| std::env::var(SCORER_URL_ENV).ok())
                .unwrap_or_default();
            let result = compare_sheets(&store, &name, &file, &endpoint)?;
            print_result(&result);

            if let Some(report) = report {
                let path = if report.trim().is_empty() {
                    PathBuf::from(default_report_name())
                } else {
                    PathBuf::from(report.trim())
                };
                write_comparison_report(&path, name.trim(), file.trim(), &result)?;
                println!("Report written to {}.", path.display());
            }
        }
    }

    Ok(())
}

fn print_result(result: &ComparisonResult) {
    println!(
        "Score: {} of {} ({})",
        result.score, result.total_score, result.percent
    );
    println!(
        "Matched companies: {}",
        result.data.len()
    );

    if result.data.is_empty() {
        return;
    }

    let width = result
        .data
        .iter()
        .map(|pair| pair.company.chars().count())
        .max()
        .unwrap_or(0)
        .max("COMPANY".len());
    println!("  {:<width$}  {}", "COMPANY", "DESIGNATION", width = width);
    for pair in &result.data {
        println!("  {:<width$}  {}", pair.company, pair.designation, width = width);
    }
}

fn print_column(label: &str, index: Option<usize>, headers: &[String]) {
    match index {
        Some(index) => {
            let header = headers.get(index).map(String::as_str).unwrap_or("");
            println!("Resolved {label} column: {index} ('{header}')");
        }
        None => println!("Resolved {label} column: none"),
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
