//! Card payment provider.
//!
//! The shop needs four calls from a provider: create a reusable customer
//! from a card token, attach another card to that customer, charge either a
//! token or a customer, and refund a charge that could not be recorded. [`StripeGateway`] talks to the Stripe
//! REST API; tests use a scripted gateway instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::value_objects::Money;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider refused the card.
    #[error("card declined: {0}")]
    Declined(String),

    #[error("rejected by payment provider: {0}")]
    InvalidRequest(String),

    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("payment provider timed out")]
    Timeout,
}

/// What a charge draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeSource {
    Token(String),
    Customer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount: Money,
    pub source: ChargeSource,
    /// Repeating a request with the same key never charges twice.
    pub idempotency_key: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Charge {
    pub id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Returns the provider's customer id.
    async fn create_customer(&self, email: &str, token: &str) -> Result<String, GatewayError>;
    async fn attach_source(&self, customer_id: &str, token: &str) -> Result<(), GatewayError>;
    async fn charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError>;
    /// Returns the full amount of a charge to the card.
    async fn refund(&self, charge_id: &str) -> Result<(), GatewayError>;
}

// =============================================================================
// Stripe
// =============================================================================

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct Customer {
    id: String,
}

/// Any provider object whose body the shop does not need.
#[derive(Deserialize)]
struct Object {}

pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
    currency: String,
}

impl StripeGateway {
    pub fn new(secret_key: SecretString, api_base: impl Into<String>, currency: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
            currency: currency.into(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)], idempotency_key: Option<&str>) -> Result<T, GatewayError> {
        let url = format!("{}{path}", self.api_base);
        let mut request = self.client.post(&url).bearer_auth(self.secret_key.expose_secret()).form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| GatewayError::Unavailable(format!("unreadable response: {e}")));
        }
        let message = response
            .json::<ErrorEnvelope>()
            .await
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| status.to_string());
        tracing::warn!(%status, path, %message, "payment provider rejected request");
        Err(classify(status, message))
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() { GatewayError::Timeout } else { GatewayError::Unavailable(e.to_string()) }
}

fn classify(status: StatusCode, message: String) -> GatewayError {
    match status {
        StatusCode::PAYMENT_REQUIRED => GatewayError::Declined(message),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::Unavailable(message),
        s if s.is_client_error() => GatewayError::InvalidRequest(message),
        _ => GatewayError::Unavailable(message),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(&self, email: &str, token: &str) -> Result<String, GatewayError> {
        let form = [("email", email.to_string()), ("source", token.to_string())];
        let customer: Customer = self.post("/v1/customers", &form, None).await?;
        Ok(customer.id)
    }

    async fn attach_source(&self, customer_id: &str, token: &str) -> Result<(), GatewayError> {
        let form = [("source", token.to_string())];
        let _: Object = self.post(&format!("/v1/customers/{customer_id}/sources"), &form, None).await?;
        Ok(())
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
        let amount = request
            .amount
            .minor_units()
            .ok_or_else(|| GatewayError::InvalidRequest(format!("amount {} out of range", request.amount)))?;
        let source = match &request.source {
            ChargeSource::Token(token) => ("source", token.clone()),
            ChargeSource::Customer(customer) => ("customer", customer.clone()),
        };
        let form = [
            ("amount", amount.to_string()),
            ("currency", self.currency.clone()),
            source,
            ("description", request.description.clone()),
        ];
        self.post("/v1/charges", &form, Some(&request.idempotency_key)).await
    }

    async fn refund(&self, charge_id: &str) -> Result<(), GatewayError> {
        let form = [("charge", charge_id.to_string())];
        let _: Object = self.post("/v1/refunds", &form, Some(&format!("refund-{charge_id}"))).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use super::*;

    type Hook = Pin<Box<dyn Future<Output = ()> + Send>>;

    /// Scripted gateway. Approved charges get `charge_id`, then `charge_id_1`,
    /// `charge_id_2`... per distinct idempotency key. Records every call.
    pub(crate) struct FakeGateway {
        charge_id: String,
        decline: Option<String>,
        declines: Mutex<VecDeque<String>>,
        during_charge: Mutex<Option<Hook>>,
        approved: Mutex<Vec<String>>,
        pub(crate) charges: Mutex<Vec<ChargeRequest>>,
        pub(crate) customers: Mutex<Vec<String>>,
        pub(crate) attached: Mutex<Vec<(String, String)>>,
        pub(crate) refunds: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        pub(crate) fn approving(charge_id: &str) -> Self {
            Self {
                charge_id: charge_id.to_string(),
                decline: None,
                declines: Mutex::new(VecDeque::new()),
                during_charge: Mutex::new(None),
                approved: Mutex::new(vec![]),
                charges: Mutex::new(vec![]),
                customers: Mutex::new(vec![]),
                attached: Mutex::new(vec![]),
                refunds: Mutex::new(vec![]),
            }
        }

        /// Declines every charge.
        pub(crate) fn declining(message: &str) -> Self {
            Self { decline: Some(message.to_string()), ..Self::approving("") }
        }

        /// Declines the next charge, then goes back to approving.
        pub(crate) fn decline_next(self, message: &str) -> Self {
            self.declines.lock().unwrap().push_back(message.to_string());
            self
        }

        /// Runs `hook` inside the next charge call, before it is answered.
        pub(crate) fn during_next_charge(&self, hook: impl Future<Output = ()> + Send + 'static) {
            *self.during_charge.lock().unwrap() = Some(Box::pin(hook));
        }

        pub(crate) fn charges(&self) -> Vec<ChargeRequest> { self.charges.lock().unwrap().clone() }
        pub(crate) fn refunds(&self) -> Vec<String> { self.refunds.lock().unwrap().clone() }
        pub(crate) fn customers(&self) -> Vec<String> { self.customers.lock().unwrap().clone() }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_customer(&self, email: &str, _token: &str) -> Result<String, GatewayError> {
            let mut customers = self.customers.lock().unwrap();
            customers.push(email.to_string());
            Ok(format!("cus_{}", customers.len()))
        }

        async fn attach_source(&self, customer_id: &str, token: &str) -> Result<(), GatewayError> {
            self.attached.lock().unwrap().push((customer_id.to_string(), token.to_string()));
            Ok(())
        }

        async fn charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
            let hook = self.during_charge.lock().unwrap().take();
            if let Some(hook) = hook {
                hook.await;
            }
            self.charges.lock().unwrap().push(request.clone());
            if let Some(message) = self.decline.clone().or_else(|| self.declines.lock().unwrap().pop_front()) {
                return Err(GatewayError::Declined(message));
            }
            let mut approved = self.approved.lock().unwrap();
            let n = match approved.iter().position(|k| *k == request.idempotency_key) {
                Some(n) => n,
                None => {
                    approved.push(request.idempotency_key.clone());
                    approved.len() - 1
                }
            };
            let id = if n == 0 { self.charge_id.clone() } else { format!("{}_{n}", self.charge_id) };
            Ok(Charge { id })
        }

        async fn refund(&self, charge_id: &str) -> Result<(), GatewayError> {
            self.refunds.lock().unwrap().push(charge_id.to_string());
            Ok(())
        }
    }
}
