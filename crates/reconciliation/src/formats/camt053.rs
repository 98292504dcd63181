//! ISO 20022 CAMT.053 (`BkToCstmrStmt`) reader.
//!
//! Streams the document with `quick-xml`, tracking the element path so each
//! text node can be attributed to its field inside the current `Ntry`.

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use rust_decimal::Decimal;

use windledger_core::DomainResult;

use crate::model::{BankFormat, BankTransaction, ParsedStatement};

#[derive(Debug, Default)]
struct EntryDraft {
    amount: Option<String>,
    indicator: Option<String>,
    value_date: Option<String>,
    booking_date: Option<String>,
    debtor: Option<String>,
    creditor: Option<String>,
    references: Vec<String>,
    error: Option<String>,
}

impl EntryDraft {
    fn absorb(&mut self, path: &[String], text: &str) {
        if text.is_empty() {
            return;
        }
        let Some(last) = path.last().map(String::as_str) else {
            return;
        };
        let parent = path
            .len()
            .checked_sub(2)
            .and_then(|i| path.get(i))
            .map(String::as_str);
        let within = |name: &str| path.iter().any(|p| p == name);

        match (parent, last) {
            (Some("Ntry"), "Amt") => self.amount = Some(text.to_string()),
            (Some("Ntry"), "CdtDbtInd") => self.indicator = Some(text.to_string()),
            (Some("ValDt"), "Dt" | "DtTm") => {
                self.value_date.get_or_insert_with(|| text.to_string());
            }
            (Some("BookgDt"), "Dt" | "DtTm") => {
                self.booking_date.get_or_insert_with(|| text.to_string());
            }
            (_, "Nm") if within("Dbtr") => {
                self.debtor.get_or_insert_with(|| text.to_string());
            }
            (_, "Nm") if within("Cdtr") => {
                self.creditor.get_or_insert_with(|| text.to_string());
            }
            (_, "Ustrd") if within("RmtInf") => self.push_reference(text),
            (Some("CdtrRefInf"), "Ref") => self.push_reference(text),
            (_, "AddtlNtryInf" | "AddtlTxInf") => self.push_reference(text),
            _ => {}
        }
    }

    fn push_reference(&mut self, text: &str) {
        if !self.references.iter().any(|r| r == text) {
            self.references.push(text.to_string());
        }
    }

    fn finish(self) -> Result<BankTransaction, String> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let raw_amount = self.amount.ok_or("entry without Amt")?;
        let magnitude: Decimal = raw_amount
            .trim()
            .parse()
            .map_err(|e| format!("invalid amount '{raw_amount}': {e}"))?;
        if magnitude.is_sign_negative() {
            return Err(format!("negative amount '{raw_amount}'"));
        }

        let credit = match self.indicator.as_deref() {
            Some("CRDT") => true,
            Some("DBIT") => false,
            Some(other) => return Err(format!("unknown CdtDbtInd '{other}'")),
            None => return Err("entry without CdtDbtInd".to_string()),
        };

        let raw_date = self
            .value_date
            .or(self.booking_date)
            .ok_or("entry without value or booking date")?;
        let value_date = raw_date
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| format!("invalid date '{raw_date}'"))?;

        let (amount, counterparty) = if credit {
            (magnitude, self.debtor)
        } else {
            (-magnitude, self.creditor)
        };

        Ok(BankTransaction {
            amount,
            value_date,
            counterparty,
            reference: self.references.join(" "),
        })
    }
}

pub fn parse(text: &str) -> DomainResult<ParsedStatement> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut statement = ParsedStatement::new(BankFormat::Camt053);
    let mut path: Vec<String> = Vec::new();
    let mut entry: Option<EntryDraft> = None;
    let mut record = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Ntry" {
                    record += 1;
                    entry = Some(EntryDraft::default());
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                if path.last().is_some_and(|p| p == "Ntry") {
                    if let Some(draft) = entry.take() {
                        match draft.finish() {
                            Ok(tx) => statement.transactions.push(tx),
                            Err(message) => statement.skip(record, message),
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Text(t)) => {
                if let Some(draft) = entry.as_mut() {
                    match t.unescape() {
                        Ok(value) => draft.absorb(&path, value.trim()),
                        Err(e) => draft.error = Some(format!("undecodable text: {e}")),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                // Markup is broken from here on; keep everything read so far.
                let at = if entry.take().is_some() { record } else { record + 1 };
                statement.skip(at, format!("malformed markup: {e}"));
                return Ok(statement);
            }
            _ => {}
        }
        buf.clear();
    }

    if entry.is_some() {
        statement.skip(record, "unterminated entry");
    }

    Ok(statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
  <BkToCstmrStmt>
    <Stmt>
      <Id>STMT-2026-01</Id>
      <Ntry>
        <Amt Ccy="EUR">1190.00</Amt>
        <CdtDbtInd>CRDT</CdtDbtInd>
        <BookgDt><Dt>2026-01-15</Dt></BookgDt>
        <ValDt><Dt>2026-01-16</Dt></ValDt>
        <NtryDtls><TxDtls>
          <AmtDtls><TxAmt><Amt Ccy="EUR">1190.00</Amt></TxAmt></AmtDtls>
          <RltdPties>
            <Dbtr><Nm>Bürgerwind eG</Nm></Dbtr>
            <Cdtr><Nm>Windpark Betriebs GmbH</Nm></Cdtr>
          </RltdPties>
          <RltdAgts><DbtrAgt><FinInstnId><Nm>Sparkasse</Nm></FinInstnId></DbtrAgt></RltdAgts>
          <RmtInf><Ustrd>RG-2026-0001 Umlage</Ustrd></RmtInf>
        </TxDtls></NtryDtls>
      </Ntry>
      <Ntry>
        <Amt Ccy="EUR">oops</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <BookgDt><Dt>2026-01-17</Dt></BookgDt>
      </Ntry>
      <Ntry>
        <Amt Ccy="EUR">238.00</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <BookgDt><DtTm>2026-01-18T09:30:00</DtTm></BookgDt>
        <NtryDtls><TxDtls>
          <RltdPties><Cdtr><Pty><Nm>Hof Jansen &amp; Söhne</Nm></Pty></Cdtr></RltdPties>
          <RmtInf><Strd><CdtrRefInf><Ref>GS-2026-0007</Ref></CdtrRefInf></Strd></RmtInf>
        </TxDtls></NtryDtls>
        <AddtlNtryInf>SEPA Überweisung</AddtlNtryInf>
      </Ntry>
    </Stmt>
  </BkToCstmrStmt>
</Document>"#;

    #[test]
    fn parses_entries_with_counterparty_by_direction() {
        let st = parse(SAMPLE).unwrap();
        assert_eq!(st.transactions.len(), 2);

        let credit = &st.transactions[0];
        assert_eq!(credit.amount, dec!(1190.00));
        assert_eq!(credit.value_date, NaiveDate::from_ymd_opt(2026, 1, 16).unwrap());
        assert_eq!(credit.counterparty.as_deref(), Some("Bürgerwind eG"));
        assert_eq!(credit.reference, "RG-2026-0001 Umlage");

        let debit = &st.transactions[1];
        assert_eq!(debit.amount, dec!(-238.00));
        assert_eq!(debit.value_date, NaiveDate::from_ymd_opt(2026, 1, 18).unwrap());
        assert_eq!(debit.counterparty.as_deref(), Some("Hof Jansen & Söhne"));
        assert_eq!(debit.reference, "GS-2026-0007 SEPA Überweisung");
    }

    #[test]
    fn bad_entry_is_counted_and_skipped() {
        let st = parse(SAMPLE).unwrap();
        assert_eq!(st.skipped(), 1);
        assert_eq!(st.issues[0].record, 2);
    }

    #[test]
    fn truncated_markup_keeps_parsed_entries() {
        let cut = SAMPLE.find("<Ntry>\n        <Amt Ccy=\"EUR\">oops").unwrap();
        let truncated = format!("{}<Ntry><Amt>1</Amt></Wrong>", &SAMPLE[..cut]);
        let st = parse(&truncated).unwrap();
        assert_eq!(st.transactions.len(), 1);
        assert_eq!(st.skipped(), 1);
    }
}
