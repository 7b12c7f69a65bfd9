use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::ledger::{ExtractedStatement, PlayerBalance, StatementLine};
use crate::model::{ActorId, Id, LedgerCommand, NewCharge, NewPayment, PaymentMethod, PlayerId};
use crate::Amount;

const DEFAULT_ACTOR: &str = "treasurer";

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{command}'")]
    UnrecognizedType { line: usize, command: String },

    #[error("line {line}: {command} missing {field}")]
    MissingField {
        line: usize,
        command: String,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} '{value}'")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("invalid statement json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write report: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct CommandRow {
    r#type: String,
    player: Option<PlayerId>,
    id: Option<Id>,
    amount: Option<String>,
    date: Option<String>,
    reference: Option<String>,
    method: Option<String>,
    detail: Option<String>,
    actor: Option<String>,
    force: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StatementRow {
    reference: Option<String>,
    amount: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    player: PlayerId,
    charged: String,
    paid: String,
    balance: String,
    unallocated: String,
}

/// Per-row parsing context
struct Row<'a> {
    line: usize,
    command: &'a str,
}

impl Row<'_> {
    fn required<T>(&self, value: Option<T>, field: &'static str) -> Result<T, CsvError> {
        value.ok_or_else(|| CsvError::MissingField {
            line: self.line,
            command: self.command.to_string(),
            field,
        })
    }

    fn amount(&self, value: Option<String>) -> Result<Amount, CsvError> {
        let value = self.required(non_empty(value), "amount")?;
        value.parse().map_err(|_| CsvError::InvalidField {
            line: self.line,
            field: "amount",
            value,
        })
    }

    fn date(&self, value: Option<String>) -> Result<NaiveDate, CsvError> {
        let value = self.required(non_empty(value), "date")?;
        parse_date(&value).ok_or(CsvError::InvalidField {
            line: self.line,
            field: "date",
            value,
        })
    }

    fn method(&self, value: Option<String>) -> Result<PaymentMethod, CsvError> {
        match non_empty(value) {
            None => Ok(PaymentMethod::BankTransfer),
            Some(value) => PaymentMethod::parse(&value).ok_or(CsvError::InvalidField {
                line: self.line,
                field: "method",
                value,
            }),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

fn parse_command(line: usize, row: CommandRow) -> Result<LedgerCommand, CsvError> {
    let command = row.r#type.to_ascii_lowercase();
    let ctx = Row {
        line,
        command: &command,
    };
    let actor: ActorId = non_empty(row.actor).unwrap_or_else(|| DEFAULT_ACTOR.to_string());

    match command.as_str() {
        "charge" => {
            let mut charge = NewCharge::new(
                ctx.required(row.player, "player")?,
                ctx.required(non_empty(row.detail), "detail")?,
                ctx.amount(row.amount)?,
                ctx.date(row.date)?,
            );
            charge.id = row.id;
            charge.reference_id = non_empty(row.reference);
            Ok(LedgerCommand::Charge { charge, actor })
        }
        "payment" => {
            let payment = NewPayment {
                id: row.id,
                player_id: ctx.required(row.player, "player")?,
                amount: ctx.amount(row.amount)?,
                payment_date: ctx.date(row.date)?,
                payment_method: ctx.method(row.method)?,
                reference: non_empty(row.reference),
                notes: non_empty(row.detail),
            };
            Ok(LedgerCommand::Payment {
                payment,
                force: row.force.unwrap_or(false),
                actor,
            })
        }
        "verify" => Ok(LedgerCommand::Verify {
            payment: ctx.required(row.id, "id")?,
            actor,
        }),
        "reject" => Ok(LedgerCommand::Reject {
            payment: ctx.required(row.id, "id")?,
            actor,
        }),
        "amend" => Ok(LedgerCommand::Amend {
            payment: ctx.required(row.id, "id")?,
            amount: ctx.amount(row.amount)?,
            actor,
        }),
        "void" => Ok(LedgerCommand::Void {
            charge: ctx.required(row.id, "id")?,
            reason: non_empty(row.detail).unwrap_or_else(|| "voided".to_string()),
            actor,
        }),
        _ => Err(CsvError::UnrecognizedType {
            line,
            command: row.r#type,
        }),
    }
}

/// Read ledger commands from a csv file
///
/// Columns: `type,player,id,amount,date,reference,method,detail,actor,force`.
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<LedgerCommand, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<CommandRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_command(line, row)
        }))
}

/// Read a statement: either the extraction collaborator's json, or a csv of
/// `reference,amount,date` rows whose text also serves as the raw text.
pub fn read_statement(path: impl AsRef<Path>) -> Result<ExtractedStatement, CsvError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| CsvError::Read {
        path: path.display().to_string(),
        source,
    })?;

    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
        return Ok(serde_json::from_str(&text)?);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut transactions = Vec::new();
    for (idx, result) in reader.deserialize::<StatementRow>().enumerate() {
        let line = idx + 2;
        let row = result.map_err(|source| CsvError::Parse { line, source })?;
        let amount = match non_empty(row.amount) {
            Some(value) => Some(value.parse().map_err(|_| CsvError::InvalidField {
                line,
                field: "amount",
                value,
            })?),
            None => None,
        };
        transactions.push(StatementLine {
            reference: non_empty(row.reference),
            amount,
            date: row.date.as_deref().and_then(parse_date),
        });
    }

    Ok(ExtractedStatement {
        transactions,
        raw_text: text,
    })
}

/// Write player balances in csv format
pub fn write_balances(
    writer: impl io::Write,
    balances: impl IntoIterator<Item = PlayerBalance>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for balance in balances {
        writer.serialize(BalanceRow {
            player: balance.player_id,
            charged: balance.total_charges.to_string(),
            paid: balance.total_payments.to_string(),
            balance: balance.balance.to_string(),
            unallocated: balance.unallocated.to_string(),
        })?;
    }

    writer.flush().map_err(|e| CsvError::Write(e.into()))?;
    Ok(())
}
