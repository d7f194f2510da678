use crate::domain::loan::{Loan, LoanId, LoanQuery, LoanSortKey, LoanStatus, SortDirection};
use crate::domain::ports::{LedgerEntry, LedgerStore, Page, UnitOfWork};
use crate::domain::transaction::{Transaction, TransactionFilter};
use crate::domain::user::{PhoneNumber, User, UserId};
use crate::domain::wallet::Wallet;
use crate::error::{LoanError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type Slot = Arc<Mutex<LedgerEntry>>;

/// A thread-safe in-memory ledger store.
///
/// Each user's entry sits behind its own async mutex, so mutations on the
/// same wallet serialize while different users proceed independently — no
/// global write lock. A mutation runs against a working copy of the entry;
/// only a successful unit of work is written back, which gives the
/// all-or-nothing guarantee the lifecycle relies on.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    entries: RwLock<HashMap<UserId, Slot>>,
    phone_index: RwLock<HashMap<String, UserId>>,
    loan_index: RwLock<HashMap<LoanId, UserId>>,
    checkout_index: RwLock<HashMap<String, UserId>>,
    /// Global uniqueness index over gateway receipts, the ledger's
    /// idempotency keys.
    receipts: RwLock<HashSet<String>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, user_id: &UserId) -> Result<Slot> {
        self.entries
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| LoanError::not_found("user"))
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<Option<LedgerEntry>> {
        let slot = {
            let entries = self.entries.read().await;
            entries.get(user_id).cloned()
        };
        match slot {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn all_entries(&self) -> Vec<Slot> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Index maintenance at commit time: new receipts must be globally
    /// unique (like a database unique constraint), new loans and checkout
    /// ids become discoverable.
    async fn commit_indexes(&self, before: &LedgerEntry, after: &LedgerEntry) -> Result<()> {
        let old_receipts: HashSet<&str> = before
            .transactions
            .iter()
            .filter_map(|t| t.gateway_receipt.as_deref())
            .collect();
        let new_receipts: Vec<&str> = after
            .transactions
            .iter()
            .filter_map(|t| t.gateway_receipt.as_deref())
            .filter(|r| !old_receipts.contains(r))
            .collect();

        if !new_receipts.is_empty() {
            let mut receipts = self.receipts.write().await;
            for receipt in &new_receipts {
                if receipts.contains(*receipt) {
                    return Err(LoanError::system(format!(
                        "duplicate gateway receipt {receipt}"
                    )));
                }
            }
            for receipt in new_receipts {
                receipts.insert(receipt.to_string());
            }
        }

        let user_id = after.user.id;
        {
            let mut loans = self.loan_index.write().await;
            for loan in &after.loans {
                loans.entry(loan.id).or_insert(user_id);
            }
        }
        {
            let mut checkouts = self.checkout_index.write().await;
            for tx in &after.transactions {
                if let Some(checkout) = &tx.checkout_request_id {
                    checkouts.entry(checkout.clone()).or_insert(user_id);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_user(&self, user: User, wallet: Wallet) -> Result<User> {
        let mut phones = self.phone_index.write().await;
        if phones.contains_key(user.phone_number.as_str()) {
            return Err(LoanError::system(format!(
                "phone number {} already registered",
                user.phone_number
            )));
        }
        phones.insert(user.phone_number.as_str().to_string(), user.id);

        let mut entries = self.entries.write().await;
        entries.insert(
            user.id,
            Arc::new(Mutex::new(LedgerEntry::new(user.clone(), wallet))),
        );
        Ok(user)
    }

    async fn user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.snapshot(id).await?.map(|e| e.user))
    }

    async fn user_by_phone(&self, phone: &PhoneNumber) -> Result<Option<User>> {
        let user_id = {
            let phones = self.phone_index.read().await;
            phones.get(phone.as_str()).copied()
        };
        match user_id {
            Some(id) => self.user(&id).await,
            None => Ok(None),
        }
    }

    async fn wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        Ok(self.snapshot(user_id).await?.map(|e| e.wallet))
    }

    async fn loan(&self, id: &LoanId) -> Result<Option<Loan>> {
        let user_id = {
            let loans = self.loan_index.read().await;
            loans.get(id).copied()
        };
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        Ok(self
            .snapshot(&user_id)
            .await?
            .and_then(|e| e.loan(id).cloned()))
    }

    async fn user_loans(&self, user_id: &UserId) -> Result<Vec<Loan>> {
        let Some(entry) = self.snapshot(user_id).await? else {
            return Ok(Vec::new());
        };
        let mut loans = entry.loans;
        loans.sort_by(|a, b| b.application_date.cmp(&a.application_date));
        Ok(loans)
    }

    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>> {
        let mut found = Vec::new();
        for slot in self.all_entries().await {
            let entry = slot.lock().await;
            found.extend(entry.loans.iter().filter(|l| l.status == status).cloned());
        }
        Ok(found)
    }

    async fn list_loans(&self, query: &LoanQuery) -> Result<Page<Loan>> {
        let mut matches: Vec<(Loan, String)> = Vec::new();
        for slot in self.all_entries().await {
            let entry = slot.lock().await;
            let phone = entry.user.phone_number.as_str().to_string();
            for loan in &entry.loans {
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
                matches.push((loan.clone(), phone.clone()));
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
        let user_id = {
            let loans = self.loan_index.read().await;
            loans.get(loan_id).copied()
        };
        let Some(user_id) = user_id else {
            return Ok(Vec::new());
        };
        let Some(entry) = self.snapshot(&user_id).await? else {
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
        let Some(entry) = self.snapshot(user_id).await? else {
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
        let user_id = {
            let checkouts = self.checkout_index.read().await;
            checkouts.get(checkout_request_id).copied()
        };
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        let Some(entry) = self.snapshot(&user_id).await? else {
            return Ok(None);
        };
        Ok(entry
            .transactions
            .into_iter()
            .find(|t| t.checkout_request_id.as_deref() == Some(checkout_request_id)))
    }

    async fn mutate(&self, user_id: &UserId, work: UnitOfWork<'_>) -> Result<LedgerEntry> {
        let slot = self.slot(user_id).await?;
        let mut guard = slot.lock().await;

        let mut working = guard.clone();
        work(&mut working)?;

        self.commit_indexes(&guard, &working).await?;
        *guard = working.clone();
        Ok(working)
    }
}
