use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cardprobe_card::session::{CardSession, SessionRecord};
use cardprobe_card::{ReaderSession, ScanMode};
use cardprobe_common::KNOWN_AIDS;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cardprobe")]
#[command(about = "Card Analyzer - probe payment cards through a PC/SC reader")]
#[command(version)]
struct Args {
    /// Label for the card under test
    #[arg(short, long, default_value = "unnamed card")]
    card: String,

    /// Write the session record to this JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Connection attempts while waiting for a card
    #[arg(short, long, default_value_t = 3)]
    retries: u32,

    /// Use the strict TLV walker instead of the lossy substring scan
    #[arg(long)]
    strict: bool,
}

fn main() -> ExitCode {
    // Set RUST_LOG=debug for per-APDU logs. Default: info level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let reader = match ReaderSession::new() {
        Ok(r) => r,
        Err(err) => {
            eprintln!("Failed to establish PC/SC context: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mode = if args.strict {
        ScanMode::Strict
    } else {
        ScanMode::Lossy
    };
    let session = CardSession::new(KNOWN_AIDS).with_mode(mode);

    println!("Please present a card...");
    let record = match reader.connect(args.retries) {
        Ok(channel) => session.run(Box::new(channel), &args.card),
        Err(err) => {
            eprintln!("No connection: {}", err);
            SessionRecord::connection_failed(&args.card, &err)
        }
    };

    print_summary(&record);

    if let Some(path) = &args.output {
        match File::create(path).and_then(|file| {
            serde_json::to_writer_pretty(file, &record).map_err(std::io::Error::from)
        }) {
            Ok(()) => println!("\nSession record written to {}", path.display()),
            Err(err) => {
                eprintln!("Failed to write {}: {}", path.display(), err);
                return ExitCode::FAILURE;
            }
        }
    }

    if record.connected {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_summary(record: &SessionRecord) {
    println!("\n=== Session Summary ===\n");
    println!("Card: {}", record.card_label);

    if let Some(ref atr) = record.atr {
        println!("ATR: {}", atr);
    }

    if record.applications.is_empty() {
        println!("No standard AIDs found");
    } else {
        println!("Applications ({}):", record.applications.len());
        for candidate in &record.applications {
            match candidate.fci.label {
                Some(ref label) => {
                    println!("  - {}: {} ({})", candidate.brand, candidate.aid, label)
                }
                None => println!("  - {}: {}", candidate.brand, candidate.aid),
            }
        }
    }

    for (aid, result) in &record.emv_data {
        println!("\nEMV data for {}:", aid);
        if let Some(pan) = result.get("pan") {
            println!("  PAN: {}", pan);
        }
        if let Some(expiry) = result.get("expiry") {
            println!("  Expiry: {}", expiry);
        }
        if let Some(name) = result.get("cardholder") {
            println!("  Cardholder: {}", name);
        }
        println!("  Fields extracted: {}", result.len());
    }

    if !record.experimental.is_empty() {
        println!("\nExperimental findings: {}", record.experimental.len());
        for key in record.experimental.keys().take(5) {
            println!("  - {}", key);
        }
    }

    if let Some(ref id) = record.fallback_identifier {
        println!("\nSynthetic identifier (low assurance): {}", id);
    }

    if !record.errors.is_empty() {
        println!("\nErrors:");
        for error in &record.errors {
            println!("  - {}", error);
        }
    }

    let total_ms: u64 = record.transcript.iter().map(|e| e.time_ms).sum();
    println!(
        "\nAPDUs sent: {} ({} ms total)",
        record.transcript.len(),
        total_ms
    );
}
