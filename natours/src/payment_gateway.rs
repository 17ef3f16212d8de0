//! Hosted checkout and refunds through Stripe.
//!
//! [`PaymentGateway`] is the seam the reducers talk to. [`StripeGateway`]
//! calls the Stripe REST API; [`MockPaymentGateway`] records calls and is
//! used in tests and when no secret key is configured.
//!
//! [`WebhookVerifier`] authenticates `checkout.session.completed`
//! deliveries and turns them into a [`CompletedCheckout`].

use crate::config::StripeConfig;
use crate::types::{BookingId, Money, TourId, UserId};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentGatewayError {
    /// The provider answered with an error
    #[error("payment provider error ({status}): {message}")]
    Provider {
        /// HTTP status returned by the provider
        status: u16,
        /// Provider error message
        message: String,
    },
    /// The request never got an answer
    #[error("payment provider unreachable: {0}")]
    Transport(String),
    /// The provider answered with something we could not read
    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Checkout types
// ============================================================================

/// Booking intent carried through the provider in session metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutMetadata {
    /// Tour being booked
    pub tour: TourId,
    /// Paying user
    pub user: UserId,
    /// Departure
    pub start_date: DateTime<Utc>,
    /// Travelers paid for
    pub num_participants: u32,
    /// Existing booking to add travelers to
    pub booking: Option<BookingId>,
}

impl CheckoutMetadata {
    /// Flatten into string pairs for the provider.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("tour_id", self.tour.to_string()),
            ("user_id", self.user.to_string()),
            ("start_date", self.start_date.to_rfc3339()),
            ("num_participants", self.num_participants.to_string()),
        ];
        if let Some(booking) = self.booking {
            pairs.push(("booking_id", booking.to_string()));
        }
        pairs
    }

    /// Rebuild from the metadata map of a webhook event.
    ///
    /// # Errors
    ///
    /// [`WebhookError::InvalidPayload`] when a key is missing or unreadable.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, WebhookError> {
        fn field<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str, WebhookError> {
            map.get(key)
                .map(String::as_str)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| WebhookError::InvalidPayload(format!("metadata.{key} missing")))
        }
        let invalid = |key: &str| WebhookError::InvalidPayload(format!("metadata.{key} invalid"));

        let booking = match map.get("booking_id").filter(|v| !v.is_empty()) {
            Some(raw) => Some(raw.parse().map_err(|_| invalid("booking_id"))?),
            None => None,
        };

        Ok(Self {
            tour: field(map, "tour_id")?.parse().map_err(|_| invalid("tour_id"))?,
            user: field(map, "user_id")?.parse().map_err(|_| invalid("user_id"))?,
            start_date: DateTime::parse_from_rfc3339(field(map, "start_date")?)
                .map_err(|_| invalid("start_date"))?
                .with_timezone(&Utc),
            num_participants: field(map, "num_participants")?
                .parse()
                .map_err(|_| invalid("num_participants"))?,
            booking,
        })
    }
}

/// A product line on the hosted checkout page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineItem {
    /// Product name
    pub name: String,
    /// Product description
    pub description: String,
    /// Absolute image URLs
    pub images: Vec<String>,
    /// Price per unit
    pub unit_amount: Money,
    /// Units
    pub quantity: u32,
}

/// Everything needed to open a hosted checkout session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    /// Prefilled customer email
    pub customer_email: String,
    /// Reference shown in the provider dashboard (the tour ID)
    pub client_reference_id: String,
    /// Redirect after payment
    pub success_url: String,
    /// Redirect on cancel
    pub cancel_url: String,
    /// What is being bought
    pub line_item: LineItem,
    /// Booking intent
    pub metadata: CheckoutMetadata,
}

/// Redirect handle for a hosted checkout session.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider session ID
    pub id: String,
    /// Hosted checkout page
    pub url: String,
}

/// A paid checkout session as reported by the provider webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedCheckout {
    /// Provider session ID
    pub session_id: String,
    /// Provider payment intent ID
    pub payment_intent: String,
    /// Amount captured
    pub amount_total: Money,
    /// Customer email on the session
    pub customer_email: Option<String>,
    /// Booking intent
    pub metadata: CheckoutMetadata,
}

/// Payment gateway trait
///
/// Abstraction over the hosted checkout provider.
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout session
    ///
    /// # Errors
    ///
    /// Returns error if the provider refuses or cannot be reached
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>>;

    /// Refund `amount` of a captured payment intent, returning the refund ID
    ///
    /// # Errors
    ///
    /// Returns error if the refund fails
    fn refund(
        &self,
        payment_intent: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>>;
}

// ============================================================================
// Stripe
// ============================================================================

/// Stripe REST API client.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
    currency: String,
}

#[derive(Deserialize)]
struct StripeObject {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: String,
}

impl StripeGateway {
    /// Create a client for the configured account.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(secret_key: String, config: &StripeConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            secret_key,
            api_base: config.api_base.clone(),
            currency: config.currency.clone(),
        })
    }

    fn checkout_form(&self, request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let item = &request.line_item;
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("customer_email".to_string(), request.customer_email.clone()),
            (
                "client_reference_id".to_string(),
                request.client_reference_id.clone(),
            ),
            (
                "line_items[0][price_data][currency]".to_string(),
                self.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                item.unit_amount.cents().to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                item.name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]".to_string(),
                item.description.clone(),
            ),
            ("line_items[0][quantity]".to_string(), item.quantity.to_string()),
        ];
        for (i, image) in item.images.iter().enumerate() {
            form.push((
                format!("line_items[0][price_data][product_data][images][{i}]"),
                image.clone(),
            ));
        }
        for (key, value) in request.metadata.to_pairs() {
            form.push((format!("metadata[{key}]"), value));
        }
        form
    }

    fn post_form(
        &self,
        path: &'static str,
        form: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<StripeObject>> + Send>> {
        let client = self.client.clone();
        let url = format!("{}/v1/{path}", self.api_base);
        let secret_key = self.secret_key.clone();

        Box::pin(async move {
            let body = serde_urlencoded::to_string(&form)
                .map_err(|e| PaymentGatewayError::InvalidResponse(e.to_string()))?;

            let response = client
                .post(url)
                .bearer_auth(secret_key)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(body)
                .send()
                .await
                .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<StripeErrorBody>(&text)
                    .map_or(text, |body| body.error.message);
                return Err(PaymentGatewayError::Provider {
                    status: status.as_u16(),
                    message,
                });
            }

            response
                .json::<StripeObject>()
                .await
                .map_err(|e| PaymentGatewayError::InvalidResponse(e.to_string()))
        })
    }
}

impl PaymentGateway for StripeGateway {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>> {
        let call = self.post_form("checkout/sessions", self.checkout_form(&request));
        Box::pin(async move {
            let object = call.await?;
            let url = object.url.ok_or_else(|| {
                PaymentGatewayError::InvalidResponse("checkout session without url".into())
            })?;
            tracing::info!(session_id = %object.id, "Stripe checkout session created");
            Ok(CheckoutSession { id: object.id, url })
        })
    }

    fn refund(
        &self,
        payment_intent: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>> {
        let form = vec![
            ("payment_intent".to_string(), payment_intent.to_string()),
            ("amount".to_string(), amount.cents().to_string()),
        ];
        let call = self.post_form("refunds", form);
        let payment_intent = payment_intent.to_string();
        Box::pin(async move {
            let object = call.await?;
            tracing::info!(
                payment_intent = %payment_intent,
                amount = amount.cents(),
                refund_id = %object.id,
                "Stripe refund created"
            );
            Ok(object.id)
        })
    }
}

// ============================================================================
// Mock
// ============================================================================

#[derive(Debug, Default)]
struct MockState {
    checkout_requests: Vec<CheckoutSessionRequest>,
    refunds: Vec<(String, Money)>,
    fail_checkouts: bool,
    fail_refunds: bool,
}

/// In-process gateway that records calls.
///
/// Succeeds by default; each operation can be told to fail.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make checkout session creation fail (or succeed again)
    pub fn fail_checkouts(&self, fail: bool) {
        self.lock().fail_checkouts = fail;
    }

    /// Make refunds fail (or succeed again)
    pub fn fail_refunds(&self, fail: bool) {
        self.lock().fail_refunds = fail;
    }

    /// Every checkout session request received
    #[must_use]
    pub fn checkout_requests(&self) -> Vec<CheckoutSessionRequest> {
        self.lock().checkout_requests.clone()
    }

    /// Every successful refund as `(payment_intent, amount)`
    #[must_use]
    pub fn refunds(&self) -> Vec<(String, Money)> {
        self.lock().refunds.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>> {
        let result = {
            let mut state = self.lock();
            if state.fail_checkouts {
                Err(PaymentGatewayError::Provider {
                    status: 402,
                    message: "checkout declined".into(),
                })
            } else {
                state.checkout_requests.push(request);
                let id = format!("cs_test_{}", uuid::Uuid::new_v4().simple());
                let url = format!("https://checkout.stripe.test/pay/{id}");
                Ok(CheckoutSession { id, url })
            }
        };
        Box::pin(async move { result })
    }

    fn refund(
        &self,
        payment_intent: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>> {
        let result = {
            let mut state = self.lock();
            if state.fail_refunds {
                Err(PaymentGatewayError::Provider {
                    status: 400,
                    message: format!("charge for {payment_intent} cannot be refunded"),
                })
            } else {
                state.refunds.push((payment_intent.to_string(), amount));
                Ok(format!("re_test_{}", uuid::Uuid::new_v4().simple()))
            }
        };
        Box::pin(async move { result })
    }
}

// ============================================================================
// Webhooks
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Why a webhook delivery was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    /// No `Stripe-Signature` header
    #[error("missing Stripe-Signature header")]
    MissingHeader,
    /// Header without `t=`
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    /// Header without `v1=`
    #[error("signature header has no v1 signature")]
    MissingSignature,
    /// Header could not be parsed
    #[error("malformed signature header")]
    MalformedHeader,
    /// Timestamp outside the tolerance window
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    /// No signature matched
    #[error("signature mismatch")]
    SignatureMismatch,
    /// Body is not a readable event
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// A verified webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `checkout.session.completed`
    CheckoutCompleted(CompletedCheckout),
    /// Any other event type, acknowledged and ignored
    Ignored(String),
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawSession {
    id: String,
    payment_intent: Option<String>,
    amount_total: Option<i64>,
    customer_email: Option<String>,
    customer_details: Option<RawCustomerDetails>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawCustomerDetails {
    email: Option<String>,
}

/// Authenticates Stripe webhook deliveries.
///
/// The `Stripe-Signature` header has the form `t=<unix>,v1=<hex>[,v1=...]`.
/// Each `v1` is HMAC-SHA256 of `"{t}.{payload}"` under the endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl WebhookVerifier {
    /// Create a verifier with a tolerance in seconds
    #[must_use]
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance: Duration::seconds(tolerance_secs),
        }
    }

    /// Compute the `Stripe-Signature` header for `payload` at `timestamp`.
    #[must_use]
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        format!("t={timestamp},v1={}", self.signature(payload, timestamp))
    }

    fn signature(&self, payload: &[u8], timestamp: i64) -> String {
        // HMAC accepts keys of any length
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return String::new();
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check the signature header against the raw body.
    ///
    /// # Errors
    ///
    /// Returns the first [`WebhookError`] that applies.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<(), WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or(WebhookError::MalformedHeader)?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| WebhookError::MalformedHeader)?,
                    );
                }
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(WebhookError::MissingSignature);
        }

        let signed_at = DateTime::from_timestamp(timestamp, 0).ok_or(WebhookError::MalformedHeader)?;
        if (now - signed_at).abs() > self.tolerance {
            return Err(WebhookError::StaleTimestamp);
        }

        let expected = self.signature(payload, timestamp);
        if signatures
            .iter()
            .any(|candidate| constant_time_eq::constant_time_eq(candidate.as_bytes(), expected.as_bytes()))
        {
            Ok(())
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }

    /// Verify and decode a delivery.
    ///
    /// # Errors
    ///
    /// Returns a [`WebhookError`] when the signature or the body is invalid.
    pub fn construct_event(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, WebhookError> {
        self.verify(payload, header, now)?;
        parse_event(payload)
    }
}

/// Decode an (already verified) event body.
///
/// # Errors
///
/// [`WebhookError::InvalidPayload`] when the JSON does not describe an event.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let event: RawEvent =
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    if event.kind != "checkout.session.completed" {
        return Ok(WebhookEvent::Ignored(event.kind));
    }

    let session: RawSession = serde_json::from_value(event.data.object)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let payment_intent = session
        .payment_intent
        .ok_or_else(|| WebhookError::InvalidPayload("payment_intent missing".into()))?;
    let amount_total = session
        .amount_total
        .ok_or_else(|| WebhookError::InvalidPayload("amount_total missing".into()))?;
    let customer_email = session
        .customer_email
        .or_else(|| session.customer_details.and_then(|d| d.email));

    Ok(WebhookEvent::CheckoutCompleted(CompletedCheckout {
        session_id: session.id,
        payment_intent,
        amount_total: Money::from_cents(amount_total),
        customer_email,
        metadata: CheckoutMetadata::from_map(&session.metadata)?,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata() -> CheckoutMetadata {
        CheckoutMetadata {
            tour: TourId::new(),
            user: UserId::new(),
            start_date: Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
            num_participants: 2,
            booking: None,
        }
    }

    fn completed_payload(metadata: &CheckoutMetadata) -> Vec<u8> {
        let meta: serde_json::Map<String, serde_json::Value> = metadata
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_intent": "pi_1",
                "amount_total": 99_400,
                "customer_details": { "email": "jonas@example.com" },
                "metadata": meta,
            }}
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_signature_decodes_checkout() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let now = Utc::now();
        let meta = metadata();
        let payload = completed_payload(&meta);
        let header = verifier.sign(&payload, now.timestamp());

        let event = verifier.construct_event(&payload, &header, now).unwrap();
        let WebhookEvent::CheckoutCompleted(checkout) = event else {
            panic!("expected checkout event");
        };
        assert_eq!(checkout.session_id, "cs_test_1");
        assert_eq!(checkout.payment_intent, "pi_1");
        assert_eq!(checkout.amount_total, Money::from_cents(99_400));
        assert_eq!(checkout.customer_email.as_deref(), Some("jonas@example.com"));
        assert_eq!(checkout.metadata, meta);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let now = Utc::now();
        let header = verifier.sign(b"{}", now.timestamp());
        assert_eq!(
            verifier.verify(b"{ }", &header, now),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_header_errors() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let now = Utc::now();
        assert_eq!(
            verifier.verify(b"{}", "v1=abc", now),
            Err(WebhookError::MissingTimestamp)
        );
        assert_eq!(
            verifier.verify(b"{}", &format!("t={}", now.timestamp()), now),
            Err(WebhookError::MissingSignature)
        );
        assert_eq!(
            verifier.verify(b"{}", "garbage", now),
            Err(WebhookError::MalformedHeader)
        );
    }

    #[test]
    fn test_stale_timestamp() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let now = Utc::now();
        let header = verifier.sign(b"{}", now.timestamp() - 301);
        assert_eq!(
            verifier.verify(b"{}", &header, now),
            Err(WebhookError::StaleTimestamp)
        );
    }

    #[test]
    fn test_other_events_are_ignored() {
        let payload = br#"{"type":"payment_intent.created","data":{"object":{}}}"#;
        assert_eq!(
            parse_event(payload).unwrap(),
            WebhookEvent::Ignored("payment_intent.created".into())
        );
    }

    #[test]
    fn test_metadata_with_booking_round_trips() {
        let mut meta = metadata();
        meta.booking = Some(BookingId::new());
        let map: HashMap<String, String> = meta
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(CheckoutMetadata::from_map(&map).unwrap(), meta);
    }

    #[test]
    fn test_checkout_form_encodes_line_item_and_metadata() {
        let gateway = StripeGateway::new("sk_test".into(), &crate::config::Config::default().stripe).unwrap();
        let request = CheckoutSessionRequest {
            customer_email: "jonas@example.com".into(),
            client_reference_id: "tour".into(),
            success_url: "https://natours.test/ok".into(),
            cancel_url: "https://natours.test/cancel".into(),
            line_item: LineItem {
                name: "The Forest Hiker Tour".into(),
                description: "Breathtaking hike".into(),
                images: vec!["https://natours.test/img/tours/tour-1-cover.jpg".into()],
                unit_amount: Money::from_cents(39_700),
                quantity: 2,
            },
            metadata: metadata(),
        };
        let form: HashMap<String, String> = gateway.checkout_form(&request).into_iter().collect();
        assert_eq!(form["line_items[0][price_data][unit_amount]"], "39700");
        assert_eq!(form["line_items[0][quantity]"], "2");
        assert_eq!(form["metadata[num_participants]"], "2");
        assert!(form.contains_key("line_items[0][price_data][product_data][images][0]"));
        assert!(!form.contains_key("metadata[booking_id]"));
    }

    #[tokio::test]
    async fn test_mock_gateway_records_and_fails_on_demand() {
        let gateway = MockPaymentGateway::new();
        let id = gateway.refund("pi_1", Money::from_dollars(10)).await.unwrap();
        assert!(id.starts_with("re_test_"));
        assert_eq!(gateway.refunds(), vec![("pi_1".to_string(), Money::from_dollars(10))]);

        gateway.fail_refunds(true);
        assert!(gateway.refund("pi_2", Money::from_dollars(10)).await.is_err());
        assert_eq!(gateway.refunds().len(), 1);
    }
}
