//! Application state for the Natours HTTP server.
//!
//! Contains all shared resources needed by HTTP handlers:
//! - Repositories (direct reads and CRUD writes)
//! - Checkout and refund stores (multi-step workflows)
//! - Payment gateway, webhook verifier and email provider

use crate::aggregates::{
    CheckoutAction, CheckoutEnvironment, CheckoutReducer, CheckoutState, RefundAction,
    RefundEnvironment, RefundReducer, RefundState,
};
use crate::config::Config;
use crate::email::EmailProvider;
use crate::payment_gateway::{PaymentGateway, WebhookVerifier};
use crate::repositories::Repositories;
use natours_core::environment::Clock;
use natours_runtime::Store;
use std::sync::Arc;
use std::time::Duration;

/// Store running the checkout reducer
pub type CheckoutStore = Store<CheckoutState, CheckoutAction, CheckoutEnvironment, CheckoutReducer>;

/// Store running the refund reducer
pub type RefundStore = Store<RefundState, RefundAction, RefundEnvironment, RefundReducer>;

/// How long a handler waits for a workflow to reach its terminal action.
pub const WORKFLOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all HTTP handlers.
///
/// It's cloned (cheaply via Arc) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence
    pub repositories: Repositories,
    /// Checkout sessions and booking reconciliation
    pub checkout: Arc<CheckoutStore>,
    /// Refund requests and decisions
    pub refunds: Arc<RefundStore>,
    /// Payment provider
    pub gateway: Arc<dyn PaymentGateway>,
    /// Webhook signature verification
    pub webhooks: Arc<WebhookVerifier>,
    /// Outgoing email
    pub email: Arc<dyn EmailProvider>,
    /// Loaded configuration
    pub config: Arc<Config>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire the workflow stores over the given dependencies.
    #[must_use]
    pub fn new(
        config: Config,
        repositories: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let checkout_env = CheckoutEnvironment {
            tours: Arc::clone(&repositories.tours),
            bookings: Arc::clone(&repositories.bookings),
            failed_bookings: Arc::clone(&repositories.failed_bookings),
            users: Arc::clone(&repositories.users),
            gateway: Arc::clone(&gateway),
            email: Arc::clone(&email),
            clock: Arc::clone(&clock),
            public_base_url: config.server.public_base_url.clone(),
        };
        let refund_env = RefundEnvironment {
            bookings: Arc::clone(&repositories.bookings),
            refunds: Arc::clone(&repositories.refunds),
            users: Arc::clone(&repositories.users),
            gateway: Arc::clone(&gateway),
            email: Arc::clone(&email),
            clock: Arc::clone(&clock),
        };
        let webhooks = WebhookVerifier::new(
            config.stripe.webhook_secret.clone(),
            config.stripe.webhook_tolerance_secs,
        );

        Self {
            checkout: Arc::new(Store::new(
                CheckoutState::default(),
                CheckoutReducer::new(),
                checkout_env,
            )),
            refunds: Arc::new(Store::new(RefundState::default(), RefundReducer::new(), refund_env)),
            repositories,
            gateway,
            webhooks: Arc::new(webhooks),
            email,
            config: Arc::new(config),
            clock,
        }
    }

    /// Stop both workflow stores, letting in-flight effects finish.
    pub async fn shutdown(&self) {
        let timeout = Duration::from_secs(self.config.server.shutdown_timeout);
        if let Err(e) = self.checkout.shutdown(timeout).await {
            tracing::warn!(error = %e, "Checkout store did not drain");
        }
        if let Err(e) = self.refunds.shutdown(timeout).await {
            tracing::warn!(error = %e, "Refund store did not drain");
        }
    }
}
