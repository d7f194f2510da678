use crate::domain::ports::SmsNotifier;
use crate::domain::user::PhoneNumber;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Logs outbound SMS traffic instead of delivering it. Delivery mechanics
/// live outside this core; workflows only need a notifier that reports
/// success or failure.
#[derive(Default, Clone)]
pub struct TracingSmsNotifier;

impl TracingSmsNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SmsNotifier for TracingSmsNotifier {
    async fn send(&self, phone: &PhoneNumber, message: &str) -> Result<()> {
        info!(%phone, %message, "sending SMS");
        Ok(())
    }
}
