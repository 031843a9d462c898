use crate::domain::transaction::{PaymentType, Transaction, TransactionStatus};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct LedgerRow<'a> {
    id: u64,
    client_id: u32,
    r#type: PaymentType,
    status: TransactionStatus,
    amount: Decimal,
    currency: &'a str,
    gateway_id: Option<u32>,
    transaction_id: Option<&'a str>,
    parent_transaction_id: Option<&'a str>,
    reference_id: Option<&'a str>,
    message: Option<&'a str>,
}

/// Writes ledger rows as CSV, one row per transaction in id order.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(destination: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(destination),
        }
    }

    pub fn write_transactions(&mut self, mut transactions: Vec<Transaction>) -> Result<()> {
        transactions.sort_by_key(|tx| tx.id);
        for tx in &transactions {
            self.writer.serialize(LedgerRow {
                id: tx.id,
                client_id: tx.client_id,
                r#type: tx.r#type,
                status: tx.status,
                amount: tx.amount,
                currency: &tx.currency,
                gateway_id: tx.gateway_id,
                transaction_id: tx.transaction_id.as_deref(),
                parent_transaction_id: tx.parent_transaction_id.as_deref(),
                reference_id: tx.reference_id.as_deref(),
                message: tx.message.as_deref(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::NewTransaction;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writer_emits_header_and_rows() {
        let tx = NewTransaction {
            client_id: 5,
            account_id: None,
            amount: dec!(-20.00),
            currency: "USD".to_string(),
            r#type: PaymentType::Other,
            gateway_id: Some(3),
            transaction_id: None,
            reference_id: None,
            parent_transaction_id: Some("PB-1".to_string()),
            message: None,
            status: TransactionStatus::Approved,
        }
        .into_transaction(2, Utc::now());

        let mut out = Vec::new();
        LedgerWriter::new(&mut out).write_transactions(vec![tx]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with(
            "id,client_id,type,status,amount,currency,gateway_id,transaction_id,parent_transaction_id,reference_id,message\n"
        ));
        assert!(text.contains("2,5,other,approved,-20.00,USD,3,,PB-1,,"));
    }
}
