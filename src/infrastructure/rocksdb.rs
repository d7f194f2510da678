use crate::domain::loan::{Loan, LoanId, LoanQuery, LoanSortKey, LoanStatus, SortDirection};
use crate::domain::ports::{LedgerEntry, LedgerStore, Page, UnitOfWork};
use crate::domain::transaction::{Transaction, TransactionFilter};
use crate::domain::user::{PhoneNumber, User, UserId};
use crate::domain::wallet::Wallet;
use crate::error::{LoanError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for per-user ledger entries (user + wallet + loans +
/// transactions as one JSON document).
pub const CF_LEDGER: &str = "ledger";
/// Column Family for secondary indexes: phone, loan id, checkout request id
/// and gateway receipt lookups.
pub const CF_INDEX: &str = "index";

fn phone_key(phone: &str) -> Vec<u8> {
    format!("phone:{phone}").into_bytes()
}

fn loan_key(loan_id: &LoanId) -> Vec<u8> {
    format!("loan:{loan_id}").into_bytes()
}

fn checkout_key(checkout: &str) -> Vec<u8> {
    format!("checkout:{checkout}").into_bytes()
}

fn receipt_key(receipt: &str) -> Vec<u8> {
    format!("receipt:{receipt}").into_bytes()
}

/// A persistent ledger store backed by RocksDB.
///
/// RocksDB gives atomic multi-key writes through `WriteBatch`, so an entry
/// and its index rows commit together. Per-user serialization is provided by
/// an in-process lock table: RocksDB itself has no transactions, and every
/// mutation for a user funnels through this store anyway.
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<DB>,
    user_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
    /// Serializes registrations so the phone uniqueness check and the insert
    /// commit as one step.
    registration_lock: Arc<Mutex<()>>,
}

impl RocksDbLedgerStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_ledger = ColumnFamilyDescriptor::new(CF_LEDGER, Options::default());
        let cf_index = ColumnFamilyDescriptor::new(CF_INDEX, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_ledger, cf_index])
            .map_err(LoanError::system)?;

        Ok(Self {
            db: Arc::new(db),
            user_locks: Arc::new(Mutex::new(HashMap::new())),
            registration_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LoanError::system(format!("{name} column family not found")))
    }

    async fn user_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(*user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_entry(&self, user_id: &UserId) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(CF_LEDGER)?;
        let key = user_id.to_string().into_bytes();
        match self.db.get_cf(&cf, key).map_err(LoanError::system)? {
            Some(bytes) => {
                let entry = serde_json::from_slice(&bytes).map_err(LoanError::system)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn index_value(&self, key: &[u8]) -> Result<Option<String>> {
        let cf = self.cf(CF_INDEX)?;
        match self.db.get_cf(&cf, key).map_err(LoanError::system)? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(LoanError::system)?,
            )),
            None => Ok(None),
        }
    }

    fn user_id_at(&self, key: &[u8]) -> Result<Option<UserId>> {
        match self.index_value(key)? {
            Some(raw) => Ok(Some(raw.parse().map_err(LoanError::system)?)),
            None => Ok(None),
        }
    }

    /// Serializes the entry and every index row touched by a commit into one
    /// atomic `WriteBatch`. New receipts are checked against the unique
    /// index first; a duplicate fails the whole unit.
    fn write_entry(&self, before: Option<&LedgerEntry>, after: &LedgerEntry) -> Result<()> {
        let cf_ledger = self.cf(CF_LEDGER)?;
        let cf_index = self.cf(CF_INDEX)?;
        let user_value = after.user.id.to_string();

        let old_receipts: Vec<&str> = before
            .map(|entry| {
                entry
                    .transactions
                    .iter()
                    .filter_map(|t| t.gateway_receipt.as_deref())
                    .collect()
            })
            .unwrap_or_default();

        let mut batch = WriteBatch::default();
        for tx in &after.transactions {
            if let Some(receipt) = tx.gateway_receipt.as_deref()
                && !old_receipts.contains(&receipt)
            {
                if self.index_value(&receipt_key(receipt))?.is_some() {
                    return Err(LoanError::system(format!(
                        "duplicate gateway receipt {receipt}"
                    )));
                }
                batch.put_cf(&cf_index, receipt_key(receipt), tx.id.to_string());
            }
            if let Some(checkout) = tx.checkout_request_id.as_deref() {
                batch.put_cf(&cf_index, checkout_key(checkout), &user_value);
            }
        }
        for loan in &after.loans {
            batch.put_cf(&cf_index, loan_key(&loan.id), &user_value);
        }
        batch.put_cf(
            &cf_index,
            phone_key(after.user.phone_number.as_str()),
            &user_value,
        );

        let entry_bytes = serde_json::to_vec(after).map_err(LoanError::system)?;
        batch.put_cf(&cf_ledger, user_value.into_bytes(), entry_bytes);

        self.db.write(batch).map_err(LoanError::system)
    }

    fn all_entries(&self) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf(CF_LEDGER)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(LoanError::system)?;
            entries.push(serde_json::from_slice(&value).map_err(LoanError::system)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn create_user(&self, user: User, wallet: Wallet) -> Result<User> {
        // The phone index acts as the registration uniqueness constraint.
        let _guard = self.registration_lock.lock().await;

        if self
            .index_value(&phone_key(user.phone_number.as_str()))?
            .is_some()
        {
            return Err(LoanError::system(format!(
                "phone number {} already registered",
                user.phone_number
            )));
        }
        let entry = LedgerEntry::new(user.clone(), wallet);
        self.write_entry(None, &entry)?;
        Ok(user)
    }

    async fn user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.read_entry(id)?.map(|e| e.user))
    }

    async fn user_by_phone(&self, phone: &PhoneNumber) -> Result<Option<User>> {
        match self.user_id_at(&phone_key(phone.as_str()))? {
            Some(id) => self.user(&id).await,
            None => Ok(None),
        }
    }

    async fn wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        Ok(self.read_entry(user_id)?.map(|e| e.wallet))
    }

    async fn loan(&self, id: &LoanId) -> Result<Option<Loan>> {
        let Some(user_id) = self.user_id_at(&loan_key(id))? else {
            return Ok(None);
        };
        Ok(self
            .read_entry(&user_id)?
            .and_then(|e| e.loan(id).cloned()))
    }

    async fn user_loans(&self, user_id: &UserId) -> Result<Vec<Loan>> {
        let Some(entry) = self.read_entry(user_id)? else {
            return Ok(Vec::new());
        };
        let mut loans = entry.loans;
        loans.sort_by(|a, b| b.application_date.cmp(&a.application_date));
        Ok(loans)
    }

    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>> {
        let mut found = Vec::new();
        for entry in self.all_entries()? {
            found.extend(entry.loans.into_iter().filter(|l| l.status == status));
        }
        Ok(found)
    }

    async fn list_loans(&self, query: &LoanQuery) -> Result<Page<Loan>> {
        let mut matches: Vec<(Loan, String)> = Vec::new();
        for entry in self.all_entries()? {
            let phone = entry.user.phone_number.as_str().to_string();
            for loan in entry.loans {
                if let Some(status) = query.status
                    && loan.status != status
                {
                    continue;
                }
                if let Some(min) = query.min_amount
                    && loan.amount.value() < min
                {
                    continue;
                }
                if let Some(max) = query.max_amount
                    && loan.amount.value() > max
                {
                    continue;
                }
                if let Some(search) = &query.search {
                    let needle = search.to_lowercase();
                    if !loan.purpose.to_lowercase().contains(&needle)
                        && !phone.contains(needle.as_str())
                    {
                        continue;
                    }
                }
                matches.push((loan, phone.clone()));
            }
        }

        matches.sort_by(|(a, _), (b, _)| {
            let ordering = match query.sort_by {
                LoanSortKey::ApplicationDate => a.application_date.cmp(&b.application_date),
                LoanSortKey::Amount => a.amount.cmp(&b.amount),
                LoanSortKey::AmountDue => a.amount_due.cmp(&b.amount_due),
                LoanSortKey::TermDays => a.term_days.cmp(&b.term_days),
                LoanSortKey::Status => a.status.to_string().cmp(&b.status.to_string()),
                LoanSortKey::DueDate => a.due_date.cmp(&b.due_date),
            };
            match query.sort_direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        let total = matches.len();
        let per_page = query.per_page_or_default();
        let page = query.page_or_default();
        let data = matches
            .into_iter()
            .map(|(loan, _)| loan)
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        Ok(Page::new(data, page, per_page, total))
    }

    async fn loan_transactions(&self, loan_id: &LoanId) -> Result<Vec<Transaction>> {
        let Some(user_id) = self.user_id_at(&loan_key(loan_id))? else {
            return Ok(Vec::new());
        };
        let Some(entry) = self.read_entry(&user_id)? else {
            return Ok(Vec::new());
        };
        Ok(entry
            .transactions
            .into_iter()
            .filter(|t| t.loan_id == Some(*loan_id))
            .collect())
    }

    async fn user_transactions(
        &self,
        user_id: &UserId,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>> {
        let Some(entry) = self.read_entry(user_id)? else {
            return Ok(Page::new(Vec::new(), 1, 100, 0));
        };
        let mut rows: Vec<Transaction> = entry
            .transactions
            .into_iter()
            .filter(|t| filter.tx_type.is_none_or(|ty| t.tx_type == ty))
            .filter(|t| filter.status.is_none_or(|st| t.status == st))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = rows.len();
        let per_page = if filter.per_page == 0 {
            100
        } else {
            filter.per_page
        };
        let page = if filter.page == 0 { 1 } else { filter.page };
        let data = rows
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        Ok(Page::new(data, page, per_page, total))
    }

    async fn transaction_by_checkout(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>> {
        let Some(user_id) = self.user_id_at(&checkout_key(checkout_request_id))? else {
            return Ok(None);
        };
        let Some(entry) = self.read_entry(&user_id)? else {
            return Ok(None);
        };
        Ok(entry
            .transactions
            .into_iter()
            .find(|t| t.checkout_request_id.as_deref() == Some(checkout_request_id)))
    }

    async fn mutate(&self, user_id: &UserId, work: UnitOfWork<'_>) -> Result<LedgerEntry> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let before = self
            .read_entry(user_id)?
            .ok_or_else(|| LoanError::not_found("user"))?;
        let mut working = before.clone();
        work(&mut working)?;

        self.write_entry(Some(&before), &working)?;
        Ok(working)
    }
}
