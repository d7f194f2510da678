#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use umoja_loans::application::lifecycle::LoanLifecycle;
use umoja_loans::application::reconciler::CallbackReconciler;
use umoja_loans::application::workflow::{RetryPolicy, WorkflowOrchestrator};
use umoja_loans::domain::money::Balance;
use umoja_loans::domain::ports::{
    LedgerStoreRef, PaymentGateway, PushRequest, PushResponse, PushStatus, SmsNotifier,
};
use umoja_loans::domain::user::{CreditScore, PhoneNumber, User};
use umoja_loans::error::{LoanError, Result};
use umoja_loans::infrastructure::in_memory::InMemoryLedgerStore;

/// Scripted payment gateway: queued failures are returned first, then every
/// push succeeds with a fresh checkout request id.
pub struct MockGateway {
    calls: AtomicUsize,
    counter: AtomicUsize,
    failures: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_times(times: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
            failures: Mutex::new(vec!["gateway unavailable".to_string(); times]),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate_push(&self, _request: PushRequest) -> Result<PushResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failures.lock().await.pop() {
            return Err(LoanError::Gateway(message));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(PushResponse {
            checkout_request_id: format!("ws_CO_{n}"),
            message: "Payment request sent to your phone".to_string(),
        })
    }

    async fn query_status(&self, _checkout_request_id: &str) -> Result<PushStatus> {
        Ok(PushStatus {
            result_code: Some(0),
            description: "ok".to_string(),
        })
    }
}

/// Records outbound SMS traffic for assertions.
#[derive(Default)]
pub struct RecordingSms {
    pub messages: Mutex<Vec<(String, String)>>,
}

impl RecordingSms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl SmsNotifier for RecordingSms {
    async fn send(&self, phone: &PhoneNumber, message: &str) -> Result<()> {
        self.messages
            .lock()
            .await
            .push((phone.as_str().to_string(), message.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub store: LedgerStoreRef,
    pub lifecycle: Arc<LoanLifecycle>,
    pub workflow: Arc<WorkflowOrchestrator>,
    pub reconciler: CallbackReconciler,
    pub gateway: Arc<MockGateway>,
    pub sms: Arc<RecordingSms>,
}

pub fn harness() -> Harness {
    harness_with_gateway(MockGateway::new())
}

pub fn harness_with_gateway(gateway: Arc<MockGateway>) -> Harness {
    let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
    let lifecycle = Arc::new(LoanLifecycle::with_defaults(store.clone()));
    let sms = RecordingSms::new();
    let workflow = Arc::new(WorkflowOrchestrator::new(
        store.clone(),
        lifecycle.clone(),
        gateway.clone(),
        sms.clone(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
        },
    ));
    let reconciler = CallbackReconciler::new(store.clone(), workflow.clone(), "254".to_string());
    Harness {
        store,
        lifecycle,
        workflow,
        reconciler,
        gateway,
        sms,
    }
}

pub async fn register(harness: &Harness, phone: &str) -> User {
    harness
        .lifecycle
        .register_user(&PhoneNumber::new(phone))
        .await
        .unwrap()
}

/// Registers a user and pins their score and borrowable limit, the way most
/// scenarios start (e.g. score 500, limit 5000).
pub async fn register_scored(
    harness: &Harness,
    phone: &str,
    score: i32,
    current_limit: Decimal,
) -> User {
    let user = register(harness, phone).await;
    let entry = harness
        .store
        .mutate(
            &user.id,
            Box::new(move |entry| {
                entry.user.credit_score = CreditScore::new(score);
                entry.wallet.current_loan_limit = Balance::new(current_limit);
                Ok(())
            }),
        )
        .await
        .unwrap();
    entry.user
}
