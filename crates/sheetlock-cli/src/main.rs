//! sheetlock CLI - read and edit cells of password-protected workbooks

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sheetlock::prelude::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sheetlock")]
#[command(
    author,
    version,
    about = "Read and edit cells of password-protected Excel workbooks"
)]
struct Cli {
    /// Settings file naming the workbook and its password
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value of one cell
    Get {
        /// Sheet name (case-sensitive)
        sheet: String,

        /// Cell reference such as B3
        cell: String,
    },

    /// Write one cell and save the workbook (unencrypted)
    Set {
        /// Sheet name (case-sensitive)
        sheet: String,

        /// Cell reference such as B3
        cell: String,

        /// New value; may be omitted with --type empty
        value: Option<String>,

        /// How to interpret the value
        #[arg(short = 't', long = "type", value_enum, default_value_t = ValueType::Text)]
        value_type: ValueType,
    },

    /// List the sheets of the workbook
    Sheets,
}

#[derive(Clone, Copy, ValueEnum)]
enum ValueType {
    Text,
    Number,
    Integer,
    Boolean,
    Empty,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from '{}'", cli.config.display()))?;

    match cli.command {
        Commands::Get { sheet, cell } => get_cell(&settings, &sheet, &cell),
        Commands::Set {
            sheet,
            cell,
            value,
            value_type,
        } => set_cell(&settings, &sheet, &cell, value.as_deref(), value_type),
        Commands::Sheets => list_sheets(&settings),
    }
}

fn open(settings: &Settings) -> Result<EncryptedWorkbook> {
    let mut book = EncryptedWorkbook::new();
    book.open_with_settings(settings)
        .with_context(|| format!("Failed to open '{}'", settings.file_path().display()))?;
    Ok(book)
}

fn parse_cell(cell: &str) -> Result<CellAddress> {
    CellAddress::parse(cell).with_context(|| format!("Invalid cell reference '{cell}'"))
}

fn parse_value(raw: Option<&str>, value_type: ValueType) -> Result<CellValue> {
    let raw = match (raw, value_type) {
        (_, ValueType::Empty) => return Ok(CellValue::Empty),
        (Some(raw), _) => raw,
        (None, _) => bail!("A value is required unless --type empty is given"),
    };
    Ok(match value_type {
        ValueType::Text => CellValue::text(raw),
        ValueType::Number => CellValue::Number(
            raw.trim()
                .parse()
                .with_context(|| format!("'{raw}' is not a number"))?,
        ),
        ValueType::Integer => CellValue::Integer(
            raw.trim()
                .parse()
                .with_context(|| format!("'{raw}' is not an integer"))?,
        ),
        ValueType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => CellValue::Boolean(true),
            "false" | "0" | "no" => CellValue::Boolean(false),
            _ => bail!("'{raw}' is not a boolean"),
        },
        ValueType::Empty => CellValue::Empty,
    })
}

fn get_cell(settings: &Settings, sheet: &str, cell: &str) -> Result<()> {
    let addr = parse_cell(cell)?;
    let mut book = open(settings)?;

    let handle = book
        .get_cell(sheet, addr.row, addr.col)
        .with_context(|| format!("Failed to resolve {sheet}!{cell}"))?;
    println!("{}", book.cell_value(handle)?);
    book.close();
    Ok(())
}

fn set_cell(
    settings: &Settings,
    sheet: &str,
    cell: &str,
    raw: Option<&str>,
    value_type: ValueType,
) -> Result<()> {
    let addr = parse_cell(cell)?;
    let value = parse_value(raw, value_type)?;
    let mut book = open(settings)?;

    let handle = book
        .get_cell(sheet, addr.row, addr.col)
        .with_context(|| format!("Failed to resolve {sheet}!{cell}"))?;
    book.set_cell_value(handle, value)?;
    book.save()
        .with_context(|| format!("Failed to save '{}'", settings.file_path().display()))?;

    eprintln!(
        "Warning: '{}' was saved without password protection",
        settings.file_path().display()
    );
    Ok(())
}

fn list_sheets(settings: &Settings) -> Result<()> {
    let mut book = open(settings)?;
    for (i, name) in book.sheet_names()?.into_iter().enumerate() {
        println!("{}\t{}", i, name);
    }
    book.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_typed() {
        assert_eq!(
            parse_value(Some("3.5"), ValueType::Number).unwrap(),
            CellValue::Number(3.5)
        );
        assert_eq!(
            parse_value(Some(" 42 "), ValueType::Integer).unwrap(),
            CellValue::Integer(42)
        );
        assert_eq!(
            parse_value(Some("TRUE"), ValueType::Boolean).unwrap(),
            CellValue::Boolean(true)
        );
        assert_eq!(
            parse_value(Some(" padded "), ValueType::Text).unwrap(),
            CellValue::text(" padded ")
        );
        assert_eq!(parse_value(None, ValueType::Empty).unwrap(), CellValue::Empty);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse_value(Some("abc"), ValueType::Integer).is_err());
        assert!(parse_value(Some("maybe"), ValueType::Boolean).is_err());
        assert!(parse_value(None, ValueType::Text).is_err());
    }

    #[test]
    fn cell_references_are_zero_based() {
        let addr = parse_cell("B3").unwrap();
        assert_eq!((addr.row, addr.col), (2, 1));
        assert!(parse_cell("3B").is_err());
    }

    #[test]
    fn cli_parses_set_with_type() {
        let cli = Cli::try_parse_from([
            "sheetlock", "--config", "my.ini", "set", "Sheet1", "A1", "7", "--type", "integer",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("my.ini"));
        match cli.command {
            Commands::Set {
                sheet, value_type, ..
            } => {
                assert_eq!(sheet, "Sheet1");
                assert!(matches!(value_type, ValueType::Integer));
            }
            _ => panic!("expected set"),
        }
    }
}
