//! SWIFT MT940 reader.
//!
//! Uses `:61:` (statement line) and `:86:` (information to account owner).
//! Structured `:86:` fields (`GVC?00...?20...`) are split into reference
//! (`?20`-`?29`, `?60`-`?63`) and counterparty (`?32`, `?33`).

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use windledger_core::{DomainError, DomainResult};

use crate::model::{BankFormat, BankTransaction, ParsedStatement};

struct Field {
    tag: String,
    lines: Vec<String>,
}

pub fn parse(text: &str) -> DomainResult<ParsedStatement> {
    let tag_re = Regex::new(r"^:(?P<tag>\d{2}[A-Z]?):(?P<rest>.*)$")
        .map_err(|e| DomainError::invariant(format!("mt940 tag pattern: {e}")))?;
    let line_re = Regex::new(
        r"^(?P<val>\d{6})(?P<book>\d{4})?(?P<dc>RC|RD|C|D)(?P<fund>[A-Z])?(?P<amt>\d+(?:,\d*)?)",
    )
    .map_err(|e| DomainError::invariant(format!("mt940 :61: pattern: {e}")))?;

    let fields = split_fields(text, &tag_re);

    let mut statement = ParsedStatement::new(BankFormat::Mt940);
    let mut record = 0usize;
    let mut current: Option<usize> = None;

    for field in fields {
        match field.tag.as_str() {
            "61" => {
                record += 1;
                let first = field.lines.first().map(String::as_str).unwrap_or("");
                match parse_statement_line(first, &line_re) {
                    Ok(tx) => {
                        statement.transactions.push(tx);
                        current = Some(statement.transactions.len() - 1);
                    }
                    Err(message) => {
                        statement.skip(record, message);
                        current = None;
                    }
                }
            }
            "86" => {
                if let Some(tx) = current.take().and_then(|i| statement.transactions.get_mut(i)) {
                    let (reference, counterparty) = parse_information(&field.lines);
                    tx.reference = reference;
                    tx.counterparty = counterparty;
                }
            }
            _ => current = None,
        }
    }

    Ok(statement)
}

fn split_fields(text: &str, tag_re: &Regex) -> Vec<Field> {
    let mut fields: Vec<Field> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');
        if let Some(caps) = tag_re.captures(line) {
            fields.push(Field {
                tag: caps["tag"].to_string(),
                lines: vec![caps["rest"].to_string()],
            });
        } else if line.starts_with('{') || line.trim() == "-}" || line.trim() == "-" {
            // SWIFT block framing
            continue;
        } else if let Some(last) = fields.last_mut() {
            last.lines.push(line.to_string());
        }
    }
    fields
}

fn parse_statement_line(line: &str, line_re: &Regex) -> Result<BankTransaction, String> {
    let caps = line_re
        .captures(line.trim())
        .ok_or_else(|| format!("malformed :61: line '{}'", line.trim()))?;

    let value_date = parse_yymmdd(&caps["val"])?;

    let raw_amount = caps["amt"].trim_end_matches(',').replace(',', ".");
    let magnitude: Decimal = raw_amount
        .parse()
        .map_err(|e| format!("invalid amount '{}': {e}", &caps["amt"]))?;

    let amount = match &caps["dc"] {
        "C" | "RD" => magnitude,
        _ => -magnitude,
    };

    Ok(BankTransaction {
        amount,
        value_date,
        counterparty: None,
        reference: String::new(),
    })
}

fn parse_yymmdd(s: &str) -> Result<NaiveDate, String> {
    let yy: i32 = s[0..2].parse().map_err(|_| format!("invalid date '{s}'"))?;
    let mm: u32 = s[2..4].parse().map_err(|_| format!("invalid date '{s}'"))?;
    let dd: u32 = s[4..6].parse().map_err(|_| format!("invalid date '{s}'"))?;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, mm, dd).ok_or_else(|| format!("invalid date '{s}'"))
}

/// Returns (reference, counterparty).
fn parse_information(lines: &[String]) -> (String, Option<String>) {
    let is_structured = lines.first().is_some_and(|first| {
        let b = first.as_bytes();
        b.len() >= 4 && b[..3].iter().all(u8::is_ascii_digit) && b[3] == b'?'
    });

    if !is_structured {
        let reference = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        return (reference, None);
    }

    let joined: String = lines.iter().map(|l| l.trim_end()).collect();
    let mut reference = String::new();
    let mut counterparty = String::new();

    // Subfields continue each other: `?20RG-2026-?210001` is one token.
    for segment in joined[4..].split('?') {
        if segment.len() < 2 || !segment.is_char_boundary(2) {
            continue;
        }
        let (key, value) = segment.split_at(2);
        match key.parse::<u8>() {
            Ok(20..=29) | Ok(60..=63) => reference.push_str(value),
            Ok(32) | Ok(33) => counterparty.push_str(value),
            _ => {}
        }
    }

    let counterparty = counterparty.trim();
    let counterparty = (!counterparty.is_empty()).then(|| counterparty.to_string());
    (reference.trim().to_string(), counterparty)
}
