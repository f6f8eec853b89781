#![forbid(unsafe_code)]
//! Local ledger inspection and off-band signing for the star notary.

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};
use starnotary::blockchain::Ledger;
use starnotary::config::load_config_from;
use starnotary::crypto::KeyPair;
use starnotary::node::{init_tracing, open_store};
use starnotary::star;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints the current chain height
    Height,
    /// Shows the block at a height
    Show {
        height: u64,
    },
    /// Appends a plain text block (ungated)
    Add {
        body: String,
    },
    /// Validates every block and link in the chain
    Validate,
    /// Generates a new key pair and prints its address
    Keygen,
    /// Signs a notary challenge message with a secret key
    Sign {
        /// The exact message returned by requestValidation
        message: String,
        /// Hex-encoded secret key
        #[arg(long)]
        secret: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Height => println!("{}", open_ledger(&cli.config)?.get_height()),
        Commands::Show { height } => show(&open_ledger(&cli.config)?, *height)?,
        Commands::Add { body } => add(&open_ledger(&cli.config)?, body)?,
        Commands::Validate => validate(&open_ledger(&cli.config)?)?,
        Commands::Keygen => keygen(),
        Commands::Sign { message, secret } => sign(message, secret)?,
    }

    Ok(())
}

fn open_ledger(config_path: &str) -> Result<Ledger, Box<dyn std::error::Error>> {
    let config = load_config_from(config_path)?;
    init_tracing("warn");
    Ok(Ledger::open(open_store(&config.database.path)?)?)
}

fn show(ledger: &Ledger, height: u64) -> Result<(), Box<dyn std::error::Error>> {
    let mut block = ledger.get_block(height)?;
    star::decode_story(&mut block);
    println!("{}", serde_json::to_string_pretty(&block)?);
    Ok(())
}

fn add(ledger: &Ledger, body: &str) -> Result<(), Box<dyn std::error::Error>> {
    if body.trim().is_empty() {
        return Err("block body must not be empty".into());
    }
    let block = ledger.append(serde_json::Value::String(body.to_string()))?;
    println!(
        "{} block {} {}",
        "Added".bright_green(),
        block.height.to_string().bright_white(),
        block.hash.dimmed()
    );
    Ok(())
}

fn validate(ledger: &Ledger) -> Result<(), Box<dyn std::error::Error>> {
    let defects = ledger.validate_chain()?;
    let blocks = ledger.get_height() + 1;

    if defects.is_empty() {
        println!(
            "{} {} blocks, no errors detected",
            "✔".bright_green(),
            blocks
        );
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Height").fg(TableColor::Cyan),
            Cell::new("Defect").fg(TableColor::Cyan),
        ]);
    for defect in &defects {
        table.add_row(vec![
            Cell::new(defect.height),
            Cell::new(defect.kind.to_string()).fg(TableColor::Red),
        ]);
    }

    println!("{}", table);
    println!(
        "{} {} defects across {} blocks",
        "✘".bright_red(),
        defects.len(),
        blocks
    );
    std::process::exit(1);
}

fn keygen() {
    let keypair = KeyPair::generate();
    println!("{} {}", "Address:".bright_cyan(), keypair.address());
    println!("{} {}", "Secret: ".bright_cyan(), keypair.secret_hex());
    println!("{}", "Keep the secret key private.".yellow());
}

fn sign(message: &str, secret: &str) -> Result<(), Box<dyn std::error::Error>> {
    let keypair = KeyPair::from_secret_hex(secret)?;
    println!("{}", keypair.sign_message(message));
    Ok(())
}
