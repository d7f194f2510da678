use crate::domain::loan::{Loan, LoanId, LoanQuery, LoanStatus};
use crate::domain::money::Amount;
use crate::domain::transaction::{Transaction, TransactionFilter, TransactionId};
use crate::domain::user::{PhoneNumber, User, UserId};
use crate::domain::wallet::Wallet;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A consistent snapshot of one user's financial state, handed mutably to an
/// atomic unit of work. The store commits the whole entry or none of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user: User,
    pub wallet: Wallet,
    pub loans: Vec<Loan>,
    pub transactions: Vec<Transaction>,
}

impl LedgerEntry {
    pub fn new(user: User, wallet: Wallet) -> Self {
        Self {
            user,
            wallet,
            loans: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn loan(&self, id: &LoanId) -> Option<&Loan> {
        self.loans.iter().find(|l| l.id == *id)
    }

    pub fn loan_mut(&mut self, id: &LoanId) -> Option<&mut Loan> {
        self.loans.iter_mut().find(|l| l.id == *id)
    }

    /// The user's single loan in an active status, if any.
    pub fn active_loan(&self) -> Option<&Loan> {
        self.loans.iter().find(|l| l.status.is_active())
    }

    pub fn disbursed_loan(&self) -> Option<&Loan> {
        self.loans.iter().find(|l| l.status == LoanStatus::Disbursed)
    }

    pub fn transaction_mut(&mut self, id: &TransactionId) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == *id)
    }
}

/// An all-or-nothing mutation over one user's ledger entry. Returning `Err`
/// discards every change made to the snapshot.
pub type UnitOfWork<'a> = Box<dyn FnOnce(&mut LedgerEntry) -> Result<()> + Send + 'a>;

/// Pagination envelope for the admin surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, page: usize, per_page: usize, total: usize) -> Self {
        let total_pages = total.div_ceil(per_page.max(1));
        Self {
            data,
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

/// Durable record of users, wallets, loans and transactions.
///
/// `mutate` is the concurrency backbone: every transition that touches money
/// routes through it so concurrent mutations on the same wallet serialize
/// instead of interleaving. Reads are read-committed; writes for different
/// users are independent.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a user and their wallet in one atomic unit. Fails if the
    /// (normalized) phone number is already registered.
    async fn create_user(&self, user: User, wallet: Wallet) -> Result<User>;

    async fn user(&self, id: &UserId) -> Result<Option<User>>;

    async fn user_by_phone(&self, phone: &PhoneNumber) -> Result<Option<User>>;

    async fn wallet(&self, user_id: &UserId) -> Result<Option<Wallet>>;

    async fn loan(&self, id: &LoanId) -> Result<Option<Loan>>;

    /// A user's loans, most recent application first.
    async fn user_loans(&self, user_id: &UserId) -> Result<Vec<Loan>>;

    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>>;

    /// Admin listing: filter, sort, paginate.
    async fn list_loans(&self, query: &LoanQuery) -> Result<Page<Loan>>;

    async fn loan_transactions(&self, loan_id: &LoanId) -> Result<Vec<Transaction>>;

    async fn user_transactions(
        &self,
        user_id: &UserId,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>>;

    async fn transaction_by_checkout(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>>;

    /// Atomically read-modify-write a single user's ledger entry. Mutations
    /// for the same user serialize; the committed entry is returned.
    async fn mutate(&self, user_id: &UserId, work: UnitOfWork<'_>) -> Result<LedgerEntry>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;

/// Push-payment request submitted to the mobile-money gateway.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub phone: PhoneNumber,
    pub amount: Amount,
    /// Account reference shown on the payer's prompt.
    pub reference: String,
    pub description: String,
}

/// Gateway acknowledgement that a push payment was initiated. The money
/// movement itself is confirmed later, through the asynchronous callback.
#[derive(Debug, Clone)]
pub struct PushResponse {
    pub checkout_request_id: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PushStatus {
    pub result_code: Option<i64>,
    pub description: String,
}

/// Boundary to the external mobile-money API. Implementations own their own
/// timeouts; the workflow layer owns retry policy.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_push(&self, request: PushRequest) -> Result<PushResponse>;

    async fn query_status(&self, checkout_request_id: &str) -> Result<PushStatus>;
}

pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;

/// Outbound SMS boundary. Delivery mechanics are out of scope; failures are
/// reported so workflows can log them, never to roll anything back.
#[async_trait]
pub trait SmsNotifier: Send + Sync {
    async fn send(&self, phone: &PhoneNumber, message: &str) -> Result<()>;
}

pub type SmsNotifierRef = Arc<dyn SmsNotifier>;
