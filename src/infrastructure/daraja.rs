use crate::config::GatewayConfig;
use crate::domain::ports::{PaymentGateway, PushRequest, PushResponse, PushStatus};
use crate::error::{LoanError, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// HTTP adapter for the Daraja (M-Pesa) push-payment API.
///
/// Every call exchanges a short-lived OAuth token first, then submits the
/// request with a bearer header. Timeouts are bounded on the client; retry
/// policy belongs to the workflow layer, not here.
pub struct DarajaGateway {
    client: Client,
    config: GatewayConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest {
    business_short_code: String,
    password: String,
    timestamp: String,
    transaction_type: String,
    amount: u64,
    party_a: String,
    party_b: String,
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode", default)]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_request_id: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest {
    business_short_code: String,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "ResultCode", default)]
    result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
}

impl DarajaGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LoanError::Gateway(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn access_token(&self) -> Result<String> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| LoanError::Gateway(format!("token request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(LoanError::Gateway(format!(
                "token request rejected: {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LoanError::Gateway(format!("malformed token response: {e}")))?;
        Ok(token.access_token)
    }

    /// API password: base64 of shortcode + passkey + timestamp.
    fn password(&self, timestamp: &str) -> String {
        let raw = format!(
            "{}{}{timestamp}",
            self.config.shortcode, self.config.passkey
        );
        general_purpose::STANDARD.encode(raw)
    }

    fn timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }
}

#[async_trait]
impl PaymentGateway for DarajaGateway {
    async fn initiate_push(&self, request: PushRequest) -> Result<PushResponse> {
        let token = self.access_token().await?;
        let phone = request
            .phone
            .normalized(&self.config.country_prefix)
            .as_str()
            .to_string();
        let timestamp = Self::timestamp();

        // The API takes whole shillings only.
        let amount = request
            .amount
            .value()
            .round()
            .to_u64()
            .ok_or_else(|| LoanError::Gateway("amount out of range".to_string()))?;

        let payload = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount,
            party_a: phone.clone(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone.clone(),
            callback_url: self.config.callback_url.clone(),
            account_reference: request.reference.clone(),
            transaction_desc: request.description.clone(),
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
        debug!(%phone, amount, reference = %request.reference, "initiating STK push");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LoanError::Gateway(format!("push request failed: {e}")))?;

        let body: StkPushResponse = response
            .json()
            .await
            .map_err(|e| LoanError::Gateway(format!("malformed push response: {e}")))?;

        if body.response_code.as_deref() == Some("0") {
            let checkout_request_id = body.checkout_request_id.ok_or_else(|| {
                LoanError::Gateway("push accepted without a checkout request id".to_string())
            })?;
            info!(%phone, checkout = %checkout_request_id, "STK push initiated");
            Ok(PushResponse {
                checkout_request_id,
                message: body
                    .customer_message
                    .unwrap_or_else(|| "Payment request sent to your phone".to_string()),
            })
        } else {
            let message = body
                .response_description
                .or(body.error_message)
                .unwrap_or_else(|| "Unknown error".to_string());
            error!(%phone, %message, "STK push refused");
            Err(LoanError::Gateway(message))
        }
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<PushStatus> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();
        let payload = StkQueryRequest {
            business_short_code: self.config.shortcode.clone(),
            password: self.password(&timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let url = format!("{}/mpesa/stkpushquery/v1/query", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LoanError::Gateway(format!("status query failed: {e}")))?;

        let body: StkQueryResponse = response
            .json()
            .await
            .map_err(|e| LoanError::Gateway(format!("malformed query response: {e}")))?;
        Ok(PushStatus {
            result_code: body.result_code.and_then(|c| c.parse().ok()),
            description: body
                .result_desc
                .or(body.response_description)
                .unwrap_or_default(),
        })
    }
}
