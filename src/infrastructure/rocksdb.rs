use crate::domain::ports::TransactionLedger;
use crate::domain::transaction::{
    InvoiceAmount, InvoiceApplication, NewTransaction, Transaction, TransactionUpdate,
    total_applied,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for transaction rows, keyed by big-endian id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping `gateway_id/transaction_id` to a row id.
pub const CF_REMOTE_INDEX: &str = "remote_index";
/// Column Family for invoice applications, keyed by big-endian transaction id.
pub const CF_APPLICATIONS: &str = "applications";
/// Column Family holding the id sequence.
pub const CF_META: &str = "meta";

const LAST_ID_KEY: &[u8] = b"last_id";

/// A persistent transaction ledger backed by RocksDB.
///
/// Writes are serialized through a mutex so the remote-id uniqueness check and the
/// write that follows it cannot interleave. `Clone` shares the database.
#[derive(Clone)]
pub struct RocksDBLedger {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

fn remote_key(gateway_id: Option<u32>, remote_id: &str) -> Vec<u8> {
    let gateway = gateway_id.map_or_else(|| "-".to_string(), |id| id.to_string());
    format!("{gateway}/{remote_id}").into_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| PaymentError::LedgerError("corrupt id in ledger".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

impl RocksDBLedger {
    /// Opens or creates a ledger at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_TRANSACTIONS, CF_REMOTE_INDEX, CF_APPLICATIONS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::LedgerError(format!("{name} column family not found")))
    }

    fn read(&self, id: u64) -> Result<Option<Transaction>> {
        match self.db.get_cf(self.cf(CF_TRANSACTIONS)?, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn lookup_remote(&self, gateway_id: Option<u32>, remote_id: &str) -> Result<Option<u64>> {
        self.db
            .get_cf(self.cf(CF_REMOTE_INDEX)?, remote_key(gateway_id, remote_id))?
            .map(|bytes| decode_id(&bytes))
            .transpose()
    }

    fn read_applications(&self, id: u64) -> Result<Vec<InvoiceApplication>> {
        match self.db.get_cf(self.cf(CF_APPLICATIONS)?, id.to_be_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Applies `update` to row `id` and writes it with its index entries in one batch.
    fn write_edit(&self, id: u64, update: TransactionUpdate) -> Result<Transaction> {
        let current = self.read(id)?.ok_or(PaymentError::TransactionNotFound)?;
        let mut edited = current.clone();
        update.apply_to(&mut edited);

        let mut batch = WriteBatch::default();
        let index = self.cf(CF_REMOTE_INDEX)?;
        if current.transaction_id != edited.transaction_id || current.gateway_id != edited.gateway_id
        {
            if let Some(remote_id) = &edited.transaction_id {
                if self
                    .lookup_remote(edited.gateway_id, remote_id)?
                    .is_some_and(|other| other != id)
                {
                    return Err(PaymentError::LedgerError(format!(
                        "remote transaction '{remote_id}' is already recorded"
                    )));
                }
                batch.put_cf(index, remote_key(edited.gateway_id, remote_id), id.to_be_bytes());
            }
            if let Some(remote_id) = &current.transaction_id {
                batch.delete_cf(index, remote_key(current.gateway_id, remote_id));
            }
        }
        batch.put_cf(
            self.cf(CF_TRANSACTIONS)?,
            id.to_be_bytes(),
            serde_json::to_vec(&edited)?,
        );
        self.db.write(batch)?;
        Ok(edited)
    }
}

#[async_trait]
impl TransactionLedger for RocksDBLedger {
    async fn get(&self, id: u64) -> Result<Option<Transaction>> {
        self.read(id)
    }

    async fn get_by_transaction_id(
        &self,
        remote_id: &str,
        client_id: Option<u32>,
        gateway_id: Option<u32>,
    ) -> Result<Option<Transaction>> {
        let matches = |tx: &Transaction| {
            tx.transaction_id.as_deref() == Some(remote_id)
                && client_id.is_none_or(|c| tx.client_id == c)
        };

        if gateway_id.is_some() {
            return match self.lookup_remote(gateway_id, remote_id)? {
                Some(id) => Ok(self.read(id)?.filter(|tx| matches(tx))),
                None => Ok(None),
            };
        }
        Ok(self.get_all().await?.into_iter().find(|tx| matches(tx)))
    }

    async fn get_linked(
        &self,
        parent_transaction_id: &str,
        gateway_id: Option<u32>,
    ) -> Result<Vec<Transaction>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|tx| {
                tx.parent_transaction_id.as_deref() == Some(parent_transaction_id)
                    && tx.gateway_id == gateway_id
            })
            .collect())
    }

    async fn add(&self, tx: NewTransaction) -> Result<u64> {
        let _guard = self.writes.lock().await;

        let existing = match &tx.transaction_id {
            Some(remote_id) => self.lookup_remote(tx.gateway_id, remote_id)?,
            None => None,
        };
        if let Some(id) = existing {
            let remote_id = tx.transaction_id.as_deref().unwrap_or("-");
            tracing::info!(
                id,
                transaction_id = %remote_id,
                "remote transaction already recorded; updating the existing row"
            );
            self.write_edit(id, tx.to_update())?;
            return Ok(id);
        }

        let last = match self.db.get_cf(self.cf(CF_META)?, LAST_ID_KEY)? {
            Some(bytes) => decode_id(&bytes)?,
            None => 0,
        };
        let id = last + 1;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_META)?, LAST_ID_KEY, id.to_be_bytes());
        if let Some(remote_id) = &tx.transaction_id {
            batch.put_cf(
                self.cf(CF_REMOTE_INDEX)?,
                remote_key(tx.gateway_id, remote_id),
                id.to_be_bytes(),
            );
        }
        let row = tx.into_transaction(id, Utc::now());
        batch.put_cf(
            self.cf(CF_TRANSACTIONS)?,
            id.to_be_bytes(),
            serde_json::to_vec(&row)?,
        );
        self.db.write(batch)?;
        tracing::debug!(id, "transaction recorded");
        Ok(id)
    }

    async fn edit(
        &self,
        id: u64,
        update: TransactionUpdate,
        staff_id: Option<u32>,
    ) -> Result<Transaction> {
        let _guard = self.writes.lock().await;
        let edited = self.write_edit(id, update)?;
        tracing::debug!(id, staff_id, status = %edited.status, "transaction edited");
        Ok(edited)
    }

    async fn apply(&self, id: u64, amounts: &[InvoiceAmount]) -> Result<()> {
        let _guard = self.writes.lock().await;
        let tx = self.read(id)?.ok_or(PaymentError::TransactionNotFound)?;

        let mut applications = self.read_applications(id)?;
        let already: Decimal = applications.iter().map(|a| a.amount).sum();
        if already + total_applied(amounts) > tx.amount {
            return Err(PaymentError::LedgerError(format!(
                "applying {} to transaction {id} would exceed its amount {}",
                total_applied(amounts),
                tx.amount
            )));
        }

        applications.extend(amounts.iter().map(|a| InvoiceApplication {
            transaction_id: id,
            invoice_id: a.invoice_id,
            amount: a.amount,
        }));
        self.db.put_cf(
            self.cf(CF_APPLICATIONS)?,
            id.to_be_bytes(),
            serde_json::to_vec(&applications)?,
        )?;
        Ok(())
    }

    async fn applications(&self, id: u64) -> Result<Vec<InvoiceApplication>> {
        self.read_applications(id)
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_TRANSACTIONS)?, IteratorMode::Start) {
            let (_key, value) = item?;
            transactions.push(serde_json::from_slice(&value)?);
        }
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::{PaymentType, TransactionStatus};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn new_tx(remote: &str, status: TransactionStatus) -> NewTransaction {
        NewTransaction {
            client_id: 1,
            account_id: None,
            amount: dec!(100.00),
            currency: "USD".to_string(),
            r#type: PaymentType::Cc,
            gateway_id: Some(1),
            transaction_id: Some(remote.to_string()),
            reference_id: None,
            parent_transaction_id: None,
            message: None,
            status,
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let ledger = RocksDBLedger::open(dir.path()).expect("Failed to open RocksDB");

        for name in [CF_TRANSACTIONS, CF_REMOTE_INDEX, CF_APPLICATIONS, CF_META] {
            assert!(ledger.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_ledger_round_trip_and_conflict() {
        let dir = tempdir().unwrap();
        let ledger = RocksDBLedger::open(dir.path()).unwrap();

        let id = ledger.add(new_tx("TX1", TransactionStatus::Pending)).await.unwrap();
        let again = ledger.add(new_tx("TX1", TransactionStatus::Approved)).await.unwrap();
        assert_eq!(id, again);

        let found = ledger
            .get_by_transaction_id("TX1", Some(1), Some(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, TransactionStatus::Approved);
        assert_eq!(ledger.get_all().await.unwrap().len(), 1);

        ledger
            .apply(
                id,
                &[InvoiceAmount {
                    invoice_id: 3,
                    amount: dec!(60.00),
                }],
            )
            .await
            .unwrap();
        assert!(
            ledger
                .apply(
                    id,
                    &[InvoiceAmount {
                        invoice_id: 4,
                        amount: dec!(50.00),
                    }],
                )
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_rocksdb_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let ledger = RocksDBLedger::open(dir.path()).unwrap();
            ledger.add(new_tx("TX1", TransactionStatus::Approved)).await.unwrap();
        }
        let ledger = RocksDBLedger::open(dir.path()).unwrap();
        let id = ledger.add(new_tx("TX2", TransactionStatus::Approved)).await.unwrap();
        assert_eq!(id, 2);
    }
}
