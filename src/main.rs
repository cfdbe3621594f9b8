use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use paseu::{
    classify_period, extract_guardian, AppConfig, Backend, ChequeRecord, CsvFileStore,
    DocumentAssembler, Guardian, Ledger, LedgerEntry, LedgerStore, PaseuParser,
    PaymentStageFlags, RowOutcome, SqliteStore, TableParser, TextTemplateRenderer,
};

/// PASEU cheque documents and replacement ledger
#[derive(Parser)]
#[command(name = "paseu")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML config file; defaults are taken from the current directory when absent
    #[arg(short, long, global = true, env = "PASEU_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show guardian and parsed cheques as JSON
    Parse {
        /// Pasted block, or - for stdin
        input: String,
    },
    /// Fill documents (all rows when no index is given)
    Generate {
        /// Pasted block, or - for stdin
        input: String,
        /// Contact phone stored in the ledger
        telefono: String,
        /// Row indices from `parse`
        indices: Vec<usize>,
    },
    /// Print the whole ledger
    History,
    /// Ledger entries of a student
    Search { cedula: String },
    /// Entries still waiting for replacement
    Pending { cedula: String },
    /// Mark replacements as received
    Replace {
        cedula: String,
        #[arg(required = true)]
        cheques: Vec<String>,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Parse { input } => run_parse(&input),
        Command::Generate { input, telefono, indices } => {
            run_generate(&load_config(cli.config)?, &input, &telefono, indices)
        }
        Command::History => run_history(&load_config(cli.config)?),
        Command::Search { cedula } => run_search(&load_config(cli.config)?, &cedula, false),
        Command::Pending { cedula } => run_search(&load_config(cli.config)?, &cedula, true),
        Command::Replace { cedula, cheques } => {
            run_replace(&load_config(cli.config)?, &cedula, &cheques)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paseu=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            AppConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(AppConfig::from_base_dir(
            env::current_dir().context("Failed to resolve current directory")?,
        )),
    }
}

fn open_ledger(config: &AppConfig) -> Result<Ledger<Box<dyn LedgerStore>>> {
    let store: Box<dyn LedgerStore> = match config.backend {
        Backend::Csv => Box::new(CsvFileStore::new(&config.ledger_path)),
        Backend::Sqlite => Box::new(
            SqliteStore::open(&config.ledger_path)
                .with_context(|| format!("Failed to open {}", config.ledger_path.display()))?,
        ),
    };
    Ok(Ledger::new(store, config.error_policy))
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(Path::new(source)).with_context(|| format!("Failed to read {}", source))
}

// ============================================================================
// COMMANDS
// ============================================================================

#[derive(Serialize)]
struct ParsedRow<'a> {
    index: usize,
    #[serde(flatten)]
    record: &'a ChequeRecord,
    stage: PaymentStageFlags,
}

#[derive(Serialize)]
struct ParseOutput<'a> {
    guardian: &'a Guardian,
    header_found: bool,
    skipped_lines: usize,
    rows: Vec<ParsedRow<'a>>,
}

fn run_parse(source: &str) -> Result<()> {
    let text = read_input(source)?;

    let guardian = extract_guardian(&text);
    let report = PaseuParser::new().parse_with_report(&text);

    let output = ParseOutput {
        guardian: &guardian,
        header_found: report.header_found,
        skipped_lines: report.skipped_lines,
        rows: report
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| ParsedRow {
                index,
                record,
                stage: classify_period(&record.period).into(),
            })
            .collect(),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_generate(config: &AppConfig, source: &str, contact: &str, indices: Vec<usize>) -> Result<()> {
    let text = read_input(source)?;

    let records = PaseuParser::new().parse(&text);
    if records.is_empty() {
        println!("⚠️  No se detectaron filas en el texto.");
        return Ok(());
    }
    let guardian = extract_guardian(&text);

    let selection: Vec<usize> = if indices.is_empty() {
        (0..records.len()).collect()
    } else {
        indices
    };

    let assembler = DocumentAssembler::new(
        TextTemplateRenderer::new(&config.template_path, &config.output_dir),
        open_ledger(config)?,
    );

    let outcomes = assembler.generate(&records, &selection, &guardian, contact);
    for outcome in &outcomes {
        match outcome {
            RowOutcome::Generated { index, path } => println!("✓ [{}] {}", index, path.display()),
            RowOutcome::Skipped { index, reason } => println!("- [{}] skipped: {}", index, reason),
            RowOutcome::Failed { index, error } => println!("✗ [{}] failed: {}", index, error),
        }
    }

    if !outcomes.iter().any(|o| o.is_generated()) {
        bail!("No se pudo generar ningún documento.");
    }
    Ok(())
}

fn run_history(config: &AppConfig) -> Result<()> {
    let (header, rows) = open_ledger(config)?.read_all()?;
    if header.is_empty() {
        println!("(historial vacío)");
        return Ok(());
    }

    println!("{}", header.join(" | "));
    for row in &rows {
        println!("{}", row.join(" | "));
    }
    println!("\n✓ {} registros", rows.len());
    Ok(())
}

fn print_entries(entries: &[LedgerEntry]) {
    for e in entries {
        println!(
            "{} | {} | cheque {} | planilla {} | periodo {} | {} | tel {}",
            e.timestamp,
            e.subject_name,
            e.check_number,
            e.form_number,
            e.period,
            e.status.as_str(),
            e.contact_value
        );
    }
}

fn run_search(config: &AppConfig, subject: &str, pending_only: bool) -> Result<()> {
    let subject = subject.trim();
    let ledger = open_ledger(config)?;

    let entries = if pending_only {
        ledger.find_pending_by_subject(subject)?
    } else {
        ledger.find_by_subject(subject)?
    };

    if entries.is_empty() {
        println!("Sin registros para {}", subject);
    } else {
        print_entries(&entries);
    }
    Ok(())
}

fn run_replace(config: &AppConfig, subject: &str, cheques: &[String]) -> Result<()> {
    let subject = subject.trim();
    let checks: HashSet<String> = cheques.iter().map(|c| c.trim().to_string()).collect();

    let ledger = open_ledger(config)?;
    let update = ledger.mark_replacement_received(subject, &checks)?;

    if update.is_empty() {
        println!("No se pudo actualizar.");
    } else {
        println!(
            "Teléfono: {} | Cheques actualizados: {}",
            update.contact_value.unwrap_or_default(),
            update.updated_check_numbers.join(", ")
        );
    }

    let pending = ledger.find_pending_by_subject(subject)?;
    if !pending.is_empty() {
        println!("\nPendientes:");
        print_entries(&pending);
    }
    Ok(())
}
