use crate::application::workflow::WorkflowOrchestrator;
use crate::domain::loan::LoanStatus;
use crate::domain::money::Amount;
use crate::domain::ports::LedgerStoreRef;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::domain::user::PhoneNumber;
use crate::error::{LoanError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Asynchronous payment-result notification, as delivered by the gateway.
/// Result code 0 means the payer authorized the push.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackPayload {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// Response returned to the gateway. Always reports success so the gateway
/// does not retry-storm callbacks whose failure is unrecoverable on this
/// side; recovery of a failed callback is an out-of-band operational action.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    fn success() -> Self {
        Self {
            result_code: 0,
            result_desc: "Success".to_string(),
        }
    }

    fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }
}

/// How a callback was resolved internally. The gateway never sees this; it
/// exists for logs and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Repayment settled against the pending push row.
    Settled,
    /// Gateway reported failure; the pending row was marked failed.
    MarkedFailed,
    /// Unknown checkout id or a row already out of `Pending`.
    AlreadyHandled,
    /// Payload well-formed but no valid repayment target; nothing written.
    NoTarget(String),
    /// Payload missing required metadata; nothing written.
    Malformed(String),
}

/// Consumes at-least-once delivered payment notifications and reconciles
/// them against in-flight loans idempotently.
///
/// Idempotency is by construction: the pending transaction looked up by
/// `checkout_request_id` can move out of `Pending` exactly once, inside the
/// same atomic unit as the wallet settlement.
pub struct CallbackReconciler {
    store: LedgerStoreRef,
    workflow: Arc<WorkflowOrchestrator>,
    country_prefix: String,
}

impl CallbackReconciler {
    pub fn new(
        store: LedgerStoreRef,
        workflow: Arc<WorkflowOrchestrator>,
        country_prefix: String,
    ) -> Self {
        Self {
            store,
            workflow,
            country_prefix,
        }
    }

    /// Boundary entry point. Whatever happens internally, the gateway gets a
    /// success acknowledgement.
    pub async fn acknowledge(&self, payload: CallbackPayload) -> CallbackAck {
        match self.reconcile(payload).await {
            Ok(Reconciliation::Settled) | Ok(Reconciliation::MarkedFailed) => {
                CallbackAck::success()
            }
            Ok(outcome) => {
                info!(?outcome, "callback ignored");
                CallbackAck::accepted()
            }
            Err(err) => {
                error!(%err, "callback processing failed");
                CallbackAck::accepted()
            }
        }
    }

    pub async fn reconcile(&self, payload: CallbackPayload) -> Result<Reconciliation> {
        let cb = payload.body.stk_callback;
        let checkout_id = cb.checkout_request_id.clone();

        // Stale, forged or replayed notifications resolve here.
        let Some(tx) = self.store.transaction_by_checkout(&checkout_id).await? else {
            warn!(checkout = %checkout_id, "callback for unknown checkout request");
            return Ok(Reconciliation::AlreadyHandled);
        };
        if tx.status != TransactionStatus::Pending {
            info!(checkout = %checkout_id, "callback replay for settled transaction");
            return Ok(Reconciliation::AlreadyHandled);
        }

        if cb.result_code != 0 {
            return self.mark_failed(&tx, &cb, &checkout_id).await;
        }

        let Some(details) = PaymentDetails::from_metadata(cb.callback_metadata.as_ref()) else {
            warn!(checkout = %checkout_id, "success callback missing payment metadata");
            return Ok(Reconciliation::Malformed(
                "missing Amount or MpesaReceiptNumber".to_string(),
            ));
        };

        let payer = PhoneNumber::new(details.phone_number.clone())
            .normalized(&self.country_prefix);
        let Some(user) = self.store.user_by_phone(&payer).await? else {
            warn!(checkout = %checkout_id, payer = %payer, "callback payer is not a registered user");
            return Ok(Reconciliation::NoTarget("unknown payer".to_string()));
        };
        let Some(loan) = self
            .store
            .user_loans(&user.id)
            .await?
            .into_iter()
            .find(|l| l.status == LoanStatus::Disbursed)
        else {
            // Do not invent a repayment target.
            warn!(checkout = %checkout_id, user = %user.id, "callback payer has no disbursed loan");
            return Ok(Reconciliation::NoTarget("no disbursed loan".to_string()));
        };

        let amount = Amount::new(details.amount)
            .map_err(|_| LoanError::system("callback carried a non-positive amount"))?;
        self.workflow
            .run_repayment_confirmation(
                &loan.id,
                tx.id,
                amount,
                details.receipt,
                payer.as_str().to_string(),
            )
            .await?;
        Ok(Reconciliation::Settled)
    }

    async fn mark_failed(
        &self,
        tx: &Transaction,
        cb: &StkCallback,
        checkout_id: &str,
    ) -> Result<Reconciliation> {
        let now = Utc::now();
        let tx_id = tx.id;
        let reason = if cb.result_desc.is_empty() {
            format!("payment failed with result code {}", cb.result_code)
        } else {
            cb.result_desc.clone()
        };
        let reason_log = reason.clone();
        self.store
            .mutate(
                &tx.user_id,
                Box::new(move |entry| {
                    // Re-checked under the user lock: a racing replay may
                    // have settled the row since the read above.
                    let Some(tx) = entry.transaction_mut(&tx_id) else {
                        return Ok(());
                    };
                    if tx.status == TransactionStatus::Pending {
                        tx.fail(reason, now)?;
                    }
                    Ok(())
                }),
            )
            .await?;
        warn!(checkout = %checkout_id, reason = %reason_log, "payment push failed");
        Ok(Reconciliation::MarkedFailed)
    }
}

struct PaymentDetails {
    amount: Decimal,
    receipt: String,
    phone_number: String,
}

impl PaymentDetails {
    /// Pulls `Amount`, `MpesaReceiptNumber` and `PhoneNumber` out of the
    /// metadata list. The gateway sends numbers as JSON numbers and the
    /// receipt as a string; both shapes are accepted for each field.
    fn from_metadata(metadata: Option<&CallbackMetadata>) -> Option<Self> {
        let items = &metadata?.item;
        let mut amount = None;
        let mut receipt = None;
        let mut phone = None;
        for item in items {
            match (item.name.as_str(), item.value.as_ref()) {
                ("Amount", Some(value)) => amount = value_to_decimal(value),
                ("MpesaReceiptNumber", Some(value)) => receipt = value_to_string(value),
                ("PhoneNumber", Some(value)) => phone = value_to_string(value),
                _ => {}
            }
        }
        Some(Self {
            amount: amount?,
            receipt: receipt?,
            phone_number: phone?,
        })
    }
}

fn value_to_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
