// ChatPay — Workflow runner
//
// Drives one workflow instance end to end: collect the draft, fetch a quote
// when the definition asks for one, confirm, submit once, report once.
// Also serves the read-only account views (history, balances, wallets,
// profile and KYC).

use super::draft::FieldValue;
use super::{
    Draft, FieldKey, WorkflowDefinition, WorkflowKind, WorkflowState, WorkflowTracker,
    DEFAULT_WALLET_CHOICE, LOGIN_EMAIL, LOGIN_OTP,
};
use crate::api::{
    endpoints, network_name, ApiError, BatchEntry, BatchItem, BatchTransferRequest,
    CustomerData, DefaultWalletRequest, EmailTransferRequest, KycPage, OfframpRequest,
    PayeeRequest, Profile, Quote, QuoteRequest, Submission, TransferApi, TransferPage, Wallet,
    WalletBalance, WalletTransferRequest,
};
use crate::audit::{AuditEvent, AuditLogger};
use crate::config::{Config, OfframpConfig};
use crate::conversation::confirm::{self, Consent, SubmissionController, SubmitError};
use crate::conversation::engine::{ConversationSettings, Interrupt, StepEngine};
use crate::conversation::registry::{PromptError, PromptRegistry};
use crate::conversation::validate::MinorUnits;
use crate::conversation::{ConversationId, Outbox};
use crate::session::{Session, SessionError, SessionStore};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

const SUBMIT_FALLBACK: &str = "please try again later";
const SERVICE_UNAVAILABLE: &str = "the service is unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Submitted,
    Cancelled,
    Invalid,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Submitted => "submitted",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Invalid => "invalid",
            WorkflowStatus::Failed => "failed",
        }
    }
}

/// Terminal outcome of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    #[serde(skip)]
    pub state: WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Everything a runner needs from the configuration.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub conversation: ConversationSettings,
    pub currency: String,
    pub offramp: OfframpConfig,
    pub history_page_size: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            conversation: config.conversation_settings(),
            currency: config.transfers.currency.clone(),
            offramp: config.transfers.offramp.clone(),
            history_page_size: config.transfers.history_page_size,
        }
    }
}

/// Why a workflow ended without a successful submission.
#[derive(Debug)]
enum Halt {
    Interrupted(Interrupt),
    /// Carries the final message for the declined summary.
    Declined(&'static str),
    Remote {
        context: &'static str,
        error: ApiError,
    },
    Submit {
        context: &'static str,
        error: SubmitError,
    },
    /// Nothing to act on; carries the final message.
    Unavailable(&'static str),
    Incomplete(&'static str),
    Storage(SessionError),
}

impl From<Interrupt> for Halt {
    fn from(value: Interrupt) -> Self {
        Halt::Interrupted(value)
    }
}

/// A successful end: the final message plus the server response, if any.
struct Completion {
    message: String,
    payload: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct WorkflowRunner {
    registry: PromptRegistry,
    outbox: Arc<dyn Outbox>,
    api: Arc<dyn TransferApi>,
    settings: Arc<RunnerSettings>,
    audit: Option<Arc<AuditLogger>>,
}

impl WorkflowRunner {
    pub fn new(
        registry: PromptRegistry,
        outbox: Arc<dyn Outbox>,
        api: Arc<dyn TransferApi>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            registry,
            outbox,
            api,
            settings: Arc::new(settings),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &PromptRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run the named transfer workflow for `conversation` to a terminal state.
    pub async fn run_workflow(
        &self,
        conversation: &ConversationId,
        workflow: &str,
        session: &Session,
    ) -> WorkflowResult {
        match workflow.parse::<WorkflowKind>() {
            Ok(kind) => {
                self.run_tracked(conversation, kind, session, &WorkflowTracker::new())
                    .await
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation, workflow = %workflow, "Unknown workflow");
                self.say(conversation, "Unknown transfer type.").await;
                WorkflowResult {
                    status: WorkflowStatus::Invalid,
                    state: WorkflowState::INITIAL,
                    payload: None,
                    error_message: Some(e),
                }
            }
        }
    }

    /// Like [`run_workflow`](Self::run_workflow) with a caller-owned tracker,
    /// so progress can be inspected while the workflow runs.
    pub async fn run_tracked(
        &self,
        conversation: &ConversationId,
        kind: WorkflowKind,
        session: &Session,
        tracker: &WorkflowTracker,
    ) -> WorkflowResult {
        let definition = kind.definition();
        tracing::info!(conversation = %conversation, workflow = %kind, "Workflow started");
        self.audit(
            conversation,
            AuditEvent::WorkflowStarted {
                workflow: kind.name().to_string(),
            },
        )
        .await;

        let result = if definition.requires_payee && session.user_id.is_empty() {
            if let Err(e) = tracker.advance(WorkflowState::Failed) {
                tracing::error!("Failed to record terminal state: {}", e);
            }
            let message = "Your session has no user id. Please /login again.";
            self.say(conversation, message).await;
            WorkflowResult {
                status: WorkflowStatus::Invalid,
                state: tracker.current(),
                payload: None,
                error_message: Some("missing user id".to_string()),
            }
        } else {
            let engine = StepEngine::new(
                conversation,
                &self.registry,
                self.outbox.as_ref(),
                &self.settings.conversation,
                tracker,
            );
            let outcome = self.drive(&engine, definition, session).await;
            self.conclude(&engine, outcome).await
        };

        self.finish(conversation, kind.name(), &result).await;
        result
    }

    async fn drive(
        &self,
        engine: &StepEngine<'_>,
        definition: &WorkflowDefinition,
        session: &Session,
    ) -> Result<Completion, Halt> {
        let draft = engine.collect(&definition.shape).await?;

        let quote = if definition.requires_quote {
            engine
                .tracker()
                .advance(WorkflowState::Quoting)
                .map_err(Interrupt::from)?;
            Some(self.fetch_quote(&draft, session).await?)
        } else {
            None
        };

        let summary =
            confirm::render_summary(definition, &draft, &self.settings.currency, quote.as_ref());
        if confirm::ask_consent(engine, &summary).await? == Consent::Declined {
            return Err(Halt::Declined(definition.declined));
        }

        let submission = self.build_submission(definition, &draft, session, quote.as_ref())?;
        self.audit(
            engine.conversation(),
            AuditEvent::SubmissionAttempted {
                workflow: definition.kind.name().to_string(),
                endpoint: definition.endpoint.to_string(),
            },
        )
        .await;

        let receipt = SubmissionController::new(self.api.as_ref(), engine.tracker())
            .submit_once(&session.credential, definition.endpoint, &submission)
            .await
            .map_err(|error| Halt::Submit {
                context: definition.failure,
                error,
            })?;

        let mut message = definition.success.to_string();
        if let Some(status) = receipt.status.as_deref() {
            message.push_str(&format!(" Status: {}", status));
        }
        Ok(Completion {
            message,
            payload: serde_json::to_value(&receipt).ok(),
        })
    }

    async fn fetch_quote(&self, draft: &Draft, session: &Session) -> Result<Quote, Halt> {
        let corridor = &self.settings.offramp;
        let request = QuoteRequest {
            source_country: corridor.source_country.clone(),
            destination_country: corridor.destination_country.clone(),
            amount: required_amount(draft)?,
            currency: self.settings.currency.clone(),
            destination_currency: corridor.destination_currency.clone(),
        };
        self.api
            .offramp_quote(&session.credential, &request)
            .await
            .map_err(|error| Halt::Remote {
                context: "Failed to get a quote",
                error,
            })
    }

    fn build_submission(
        &self,
        definition: &WorkflowDefinition,
        draft: &Draft,
        session: &Session,
        quote: Option<&Quote>,
    ) -> Result<Submission, Halt> {
        let currency = self.settings.currency.clone();
        let submission = match definition.kind {
            WorkflowKind::EmailTransfer => Submission::Email(EmailTransferRequest {
                currency,
                payee_id: session.user_id.clone(),
                email: required_text(draft, FieldKey::Email)?,
                amount: required_amount(draft)?,
                purpose_code: required_text(draft, FieldKey::Purpose)?,
            }),
            WorkflowKind::WalletTransfer => Submission::Wallet(WalletTransferRequest {
                currency,
                wallet_address: required_text(draft, FieldKey::WalletAddress)?,
                amount: required_amount(draft)?,
                purpose_code: required_text(draft, FieldKey::Purpose)?,
            }),
            WorkflowKind::BankWithdrawal => {
                let quote = quote.ok_or(Halt::Incomplete("quote"))?;
                let corridor = &self.settings.offramp;
                Submission::Offramp(OfframpRequest {
                    invoice_number: uuid::Uuid::new_v4().to_string(),
                    purpose_code: required_text(draft, FieldKey::Purpose)?,
                    source_of_funds: corridor.source_of_funds.clone(),
                    recipient_relationship: corridor.recipient_relationship.clone(),
                    quote_payload: quote.quote_payload.clone(),
                    quote_signature: quote.quote_signature.clone(),
                    customer_data: CustomerData {
                        name: required_text(draft, FieldKey::CustomerName)?,
                        business_name: required_text(draft, FieldKey::BusinessName)?,
                        email: required_text(draft, FieldKey::CustomerEmail)?,
                        country: required_text(draft, FieldKey::CustomerCountry)?,
                    },
                    note: required_text(draft, FieldKey::Note)?,
                })
            }
            WorkflowKind::BulkTransfer => {
                let stamp = Utc::now().timestamp_millis();
                let requests = draft
                    .recipients()
                    .iter()
                    .enumerate()
                    .map(|(i, recipient)| {
                        Ok(BatchEntry {
                            request_id: format!("txn-{}-{}", stamp, i),
                            request: BatchItem {
                                wallet_address: recipient
                                    .text(FieldKey::WalletAddress)
                                    .map(String::from),
                                email: recipient.text(FieldKey::Email).map(String::from),
                                payee_id: session.user_id.clone(),
                                amount: required_amount(recipient)?,
                                purpose_code: required_text(recipient, FieldKey::Purpose)?,
                                currency: currency.clone(),
                            },
                        })
                    })
                    .collect::<Result<Vec<_>, Halt>>()?;
                Submission::Batch(BatchTransferRequest { requests })
            }
            WorkflowKind::AddPayee => Submission::Payee(PayeeRequest {
                email: required_text(draft, FieldKey::PayeeEmail)?,
                nick_name: required_text(draft, FieldKey::Nickname)?,
            }),
        };
        Ok(submission)
    }

    /// Map the outcome to a terminal state and send the single final message.
    async fn conclude(
        &self,
        engine: &StepEngine<'_>,
        outcome: Result<Completion, Halt>,
    ) -> WorkflowResult {
        let tracker = engine.tracker();
        // Revoked from outside: whatever stopped the workflow, it was cancelled.
        let outcome = match outcome {
            Err(halt) if tracker.is_revoked() => {
                tracing::debug!(conversation = %engine.conversation(), "Revoked workflow stopped at {:?}", halt);
                Err(Halt::Interrupted(Interrupt::Prompt(PromptError::Revoked)))
            }
            other => other,
        };
        let (status, terminal, message, error_message, payload) = match outcome {
            Ok(done) => (
                WorkflowStatus::Submitted,
                WorkflowState::Done,
                done.message,
                None,
                done.payload,
            ),
            Err(Halt::Interrupted(Interrupt::Cancelled)) => (
                WorkflowStatus::Cancelled,
                WorkflowState::Cancelled,
                "Operation cancelled.".to_string(),
                None,
                None,
            ),
            Err(Halt::Interrupted(Interrupt::Prompt(PromptError::Revoked))) => (
                WorkflowStatus::Cancelled,
                WorkflowState::Cancelled,
                "Operation cancelled.".to_string(),
                Some("revoked".to_string()),
                None,
            ),
            Err(Halt::Interrupted(Interrupt::Prompt(PromptError::Timeout(limit)))) => (
                WorkflowStatus::Cancelled,
                WorkflowState::Cancelled,
                "Operation cancelled: no reply received in time.".to_string(),
                Some(format!("no reply within {}s", limit.as_secs())),
                None,
            ),
            Err(Halt::Interrupted(e @ Interrupt::Prompt(PromptError::Concurrent(_)))) => {
                tracing::error!(conversation = %engine.conversation(), "Workflow aborted: {}", e);
                (
                    WorkflowStatus::Failed,
                    WorkflowState::Failed,
                    "Another operation is already waiting for your reply. Use /cancel first."
                        .to_string(),
                    Some(e.to_string()),
                    None,
                )
            }
            Err(Halt::Interrupted(e)) => {
                tracing::error!(conversation = %engine.conversation(), "Workflow aborted: {}", e);
                (
                    WorkflowStatus::Failed,
                    WorkflowState::Failed,
                    "Something went wrong. Please start again.".to_string(),
                    Some(e.to_string()),
                    None,
                )
            }
            Err(Halt::Declined(message)) => (
                WorkflowStatus::Cancelled,
                WorkflowState::Declined,
                message.to_string(),
                Some("declined".to_string()),
                None,
            ),
            Err(Halt::Remote { context, error }) => {
                tracing::warn!(conversation = %engine.conversation(), "{}: {}", context, error);
                let reason = error.user_message(SERVICE_UNAVAILABLE);
                (
                    WorkflowStatus::Failed,
                    WorkflowState::Failed,
                    format!("{}: {}", context, reason),
                    Some(reason),
                    None,
                )
            }
            Err(Halt::Submit {
                context,
                error: SubmitError::Api(error),
            }) => {
                let reason = error.user_message(SUBMIT_FALLBACK);
                (
                    WorkflowStatus::Failed,
                    WorkflowState::Failed,
                    format!("{}: {}", context, reason),
                    Some(reason),
                    None,
                )
            }
            Err(Halt::Submit { context, error }) => (
                WorkflowStatus::Failed,
                WorkflowState::Failed,
                format!("{}: {}", context, SUBMIT_FALLBACK),
                Some(error.to_string()),
                None,
            ),
            Err(Halt::Unavailable(message)) => (
                WorkflowStatus::Invalid,
                WorkflowState::Failed,
                message.to_string(),
                Some(message.to_string()),
                None,
            ),
            Err(Halt::Incomplete(what)) => (
                WorkflowStatus::Failed,
                WorkflowState::Failed,
                "Something went wrong. Please start again.".to_string(),
                Some(format!("incomplete draft: missing {}", what)),
                None,
            ),
            Err(Halt::Storage(e)) => {
                tracing::error!(conversation = %engine.conversation(), "Failed to store session: {}", e);
                (
                    WorkflowStatus::Failed,
                    WorkflowState::Failed,
                    "Login failed: the session could not be saved.".to_string(),
                    Some(e.to_string()),
                    None,
                )
            }
        };

        if tracker.current() != terminal {
            if let Err(e) = tracker.advance(terminal) {
                tracing::error!("Failed to record terminal state: {}", e);
            }
        }
        engine.say(&message).await;

        WorkflowResult {
            status,
            state: tracker.current(),
            payload,
            error_message,
        }
    }

    async fn finish(&self, conversation: &ConversationId, workflow: &str, result: &WorkflowResult) {
        tracing::info!(
            conversation = %conversation,
            workflow = %workflow,
            status = result.status.as_str(),
            state = %result.state,
            "Workflow finished"
        );
        self.audit(
            conversation,
            AuditEvent::WorkflowFinished {
                workflow: workflow.to_string(),
                status: result.status.as_str().to_string(),
                state: result.state.to_string(),
                error: result.error_message.clone(),
            },
        )
        .await;
    }

    // -----------------------------------------------------------------------
    // Login and history
    // -----------------------------------------------------------------------

    /// Email OTP login. A rejected code re-prompts the code until cancelled.
    pub async fn run_login(
        &self,
        conversation: &ConversationId,
        sessions: &dyn SessionStore,
        tracker: &WorkflowTracker,
    ) -> WorkflowResult {
        let engine = StepEngine::new(
            conversation,
            &self.registry,
            self.outbox.as_ref(),
            &self.settings.conversation,
            tracker,
        );
        tracing::info!(conversation = %conversation, workflow = "login", "Workflow started");

        let outcome = self.login(&engine, sessions).await;
        let result = self.conclude(&engine, outcome).await;
        self.finish(conversation, "login", &result).await;
        result
    }

    async fn login(
        &self,
        engine: &StepEngine<'_>,
        sessions: &dyn SessionStore,
    ) -> Result<Completion, Halt> {
        let email = match engine.ask_field(&LOGIN_EMAIL).await? {
            Some(FieldValue::Text(email)) => email,
            _ => return Err(Halt::Incomplete("email")),
        };
        let challenge = self
            .api
            .request_email_otp(&email)
            .await
            .map_err(|error| Halt::Remote {
                context: "Failed to send the one-time code",
                error,
            })?;

        engine.tracker().advance(WorkflowState::Collecting {
            index: 1,
            recipient: None,
        })
        .map_err(Interrupt::from)?;

        let grant = loop {
            let otp = match engine.ask_field(&LOGIN_OTP).await? {
                Some(FieldValue::Text(otp)) => otp,
                _ => return Err(Halt::Incomplete("one-time code")),
            };
            match self
                .api
                .authenticate_email_otp(&email, &otp, &challenge.sid)
                .await
            {
                Ok(grant) => break grant,
                Err(e) => {
                    tracing::debug!(conversation = %engine.conversation(), "One-time code rejected: {}", e);
                    engine
                        .say(&format!(
                            "{} Please try again.",
                            e.user_message("The code was not accepted.")
                        ))
                        .await;
                }
            }
        };

        let session = Session {
            conversation_id: engine.conversation().clone(),
            user_id: grant.user.id,
            organization_id: grant.user.organization_id,
            credential: grant.access_token,
            expires_at: grant.expire_at,
        };
        sessions.set(session).await.map_err(Halt::Storage)?;

        Ok(Completion {
            message: "Login successful. You can now make transfers.".to_string(),
            payload: None,
        })
    }

    // -----------------------------------------------------------------------
    // Default wallet
    // -----------------------------------------------------------------------

    /// List the account's wallets, ask which one becomes the default,
    /// confirm, then submit the choice once.
    pub async fn run_set_default_wallet(
        &self,
        conversation: &ConversationId,
        session: &Session,
        tracker: &WorkflowTracker,
    ) -> WorkflowResult {
        const NAME: &str = "default_wallet";
        tracing::info!(conversation = %conversation, workflow = NAME, "Workflow started");
        self.audit(
            conversation,
            AuditEvent::WorkflowStarted {
                workflow: NAME.to_string(),
            },
        )
        .await;

        let engine = StepEngine::new(
            conversation,
            &self.registry,
            self.outbox.as_ref(),
            &self.settings.conversation,
            tracker,
        );
        let outcome = self.choose_default_wallet(&engine, session).await;
        let result = self.conclude(&engine, outcome).await;
        self.finish(conversation, NAME, &result).await;
        result
    }

    async fn choose_default_wallet(
        &self,
        engine: &StepEngine<'_>,
        session: &Session,
    ) -> Result<Completion, Halt> {
        let wallets = self
            .api
            .wallets(&session.credential)
            .await
            .map_err(|error| Halt::Remote {
                context: "Failed to fetch wallets",
                error,
            })?;
        if wallets.is_empty() {
            return Err(Halt::Unavailable("No wallets found."));
        }
        engine.say(&render_wallets(&wallets)).await;

        let wallet = loop {
            let choice = match engine.ask_field(&DEFAULT_WALLET_CHOICE).await? {
                Some(FieldValue::Count(n)) => n as usize,
                _ => return Err(Halt::Incomplete(FieldKey::WalletChoice.label())),
            };
            match choice.checked_sub(1).and_then(|i| wallets.get(i)) {
                Some(wallet) => break wallet,
                None => {
                    engine
                        .say(&format!(
                            "Please choose a number between 1 and {}.",
                            wallets.len()
                        ))
                        .await;
                }
            }
        };

        if wallet.is_default {
            return Ok(Completion {
                message: format!("{} is already your default wallet.", wallet.describe()),
                payload: None,
            });
        }

        let summary = format!("Default wallet\n\n{}: {}", FieldKey::WalletChoice.label(), wallet.describe());
        if confirm::ask_consent(engine, &summary).await? == Consent::Declined {
            return Err(Halt::Declined("Default wallet unchanged."));
        }

        let submission = Submission::DefaultWallet(DefaultWalletRequest {
            wallet_id: wallet.id.clone(),
        });
        self.audit(
            engine.conversation(),
            AuditEvent::SubmissionAttempted {
                workflow: "default_wallet".to_string(),
                endpoint: endpoints::WALLET_DEFAULT.to_string(),
            },
        )
        .await;
        SubmissionController::new(self.api.as_ref(), engine.tracker())
            .submit_once(&session.credential, endpoints::WALLET_DEFAULT, &submission)
            .await
            .map_err(|error| Halt::Submit {
                context: "Failed to set the default wallet",
                error,
            })?;

        Ok(Completion {
            message: format!("Default wallet set to {}.", wallet.describe()),
            payload: None,
        })
    }

    // -----------------------------------------------------------------------
    // Account views
    // -----------------------------------------------------------------------

    /// Send the most recent transfers of the session's account.
    pub async fn list_transfers(&self, conversation: &ConversationId, session: &Session) {
        let page = self
            .api
            .list_transfers(&session.credential, 1, self.settings.history_page_size)
            .await;
        self.report(conversation, "transfers", page, render_transfers)
            .await;
    }

    pub async fn show_balances(&self, conversation: &ConversationId, session: &Session) {
        let balances = self.api.wallet_balances(&session.credential).await;
        self.report(conversation, "balances", balances, render_balances)
            .await;
    }

    pub async fn list_wallets(&self, conversation: &ConversationId, session: &Session) {
        let wallets = self.api.wallets(&session.credential).await;
        self.report(conversation, "wallets", wallets, |wallets| {
            if wallets.is_empty() {
                "No wallets found.".to_string()
            } else {
                render_wallets(&wallets)
            }
        })
        .await;
    }

    pub async fn show_profile(&self, conversation: &ConversationId, session: &Session) {
        let profile = self.api.profile(&session.credential).await;
        self.report(conversation, "profile", profile, render_profile)
            .await;
    }

    pub async fn show_kyc(&self, conversation: &ConversationId, session: &Session) {
        let records = self.api.kyc_records(&session.credential).await;
        self.report(conversation, "KYC status", records, render_kyc)
            .await;
    }

    /// Send the rendered view, or the failure with the server's own words.
    async fn report<T>(
        &self,
        conversation: &ConversationId,
        what: &str,
        fetched: Result<T, ApiError>,
        render: impl FnOnce(T) -> String,
    ) {
        let message = match fetched {
            Ok(value) => render(value),
            Err(e) => {
                tracing::warn!(conversation = %conversation, "Failed to fetch {}: {}", what, e);
                format!("Failed to fetch {}: {}", what, e.user_message(SERVICE_UNAVAILABLE))
            }
        };
        self.say(conversation, &message).await;
    }

    async fn say(&self, conversation: &ConversationId, text: &str) {
        self.outbox
            .send_message(conversation, text, crate::conversation::TextFormat::Plain)
            .await;
    }

    async fn audit(&self, conversation: &ConversationId, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(conversation.as_str(), event).await;
        }
    }
}

fn render_transfers(page: TransferPage) -> String {
    if page.data.is_empty() {
        return "No recent transfers found.".to_string();
    }
    let mut text = String::from("Recent transfers:\n");
    for record in &page.data {
        text.push_str(&format!(
            "\n• {} {} | {}",
            record.amount_text(),
            record.currency,
            record.status
        ));
    }
    text
}

fn render_wallets(wallets: &[Wallet]) -> String {
    let mut text = String::from("Your wallets:\n");
    for (i, wallet) in wallets.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", i + 1, wallet.describe()));
        if wallet.is_default {
            text.push_str(" (default)");
        }
    }
    text
}

fn render_balances(wallets: Vec<WalletBalance>) -> String {
    if wallets.is_empty() {
        return "No balance information available.".to_string();
    }
    let mut text = String::from("Wallet balances:\n");
    for wallet in &wallets {
        text.push_str(&format!("\n{}", network_name(&wallet.network)));
        if wallet.is_default {
            text.push_str(" (default)");
        }
        if wallet.balances.is_empty() {
            text.push_str("\n  0");
        }
        for balance in &wallet.balances {
            text.push_str(&format!("\n  {} {}", balance.display_amount(), balance.symbol));
        }
    }
    text
}

fn render_profile(profile: Profile) -> String {
    format!(
        "Your profile\n\nEmail: {}\nStatus: {}\nRole: {}\nWallet address: {}",
        profile.email,
        profile.status.to_uppercase(),
        profile.role.to_uppercase(),
        profile.wallet_address.as_deref().unwrap_or("Not linked")
    )
}

fn render_kyc(page: KycPage) -> String {
    if page.data.is_empty() {
        return "No KYC record found. Complete your verification in the web app.".to_string();
    }
    let mut text = String::from("KYC status:\n");
    for record in &page.data {
        text.push_str(&format!(
            "\n• {} ({}, {})",
            record.status.to_uppercase(),
            record.kind,
            record.country.to_uppercase()
        ));
    }
    if page.data.iter().all(|r| r.is_approved()) {
        text.push_str("\n\nYour KYC is fully approved.");
    } else {
        text.push_str("\n\nYour KYC is not approved yet. Please complete your verification.");
    }
    text
}

fn required_text(draft: &Draft, key: FieldKey) -> Result<String, Halt> {
    draft
        .text(key)
        .map(String::from)
        .ok_or(Halt::Incomplete(key.label()))
}

fn required_amount(draft: &Draft) -> Result<MinorUnits, Halt> {
    draft
        .amount(FieldKey::Amount)
        .ok_or(Halt::Incomplete(FieldKey::Amount.label()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{wallet, MockTransferApi};
    use crate::api::Credential;
    use crate::conversation::testing::{reply, reply_all, RecordingOutbox};
    use crate::session::FileSessionStore;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        runner: WorkflowRunner,
        outbox: Arc<RecordingOutbox>,
        api: Arc<MockTransferApi>,
        conv: ConversationId,
    }

    fn harness_with(api: MockTransferApi, settings: RunnerSettings) -> Harness {
        crate::logger::init_test();
        let outbox = Arc::new(RecordingOutbox::default());
        let api = Arc::new(api);
        let runner = WorkflowRunner::new(
            PromptRegistry::new(),
            outbox.clone(),
            api.clone(),
            settings,
        );
        Harness {
            runner,
            outbox,
            api,
            conv: ConversationId::new("test", "1"),
        }
    }

    fn harness(api: MockTransferApi) -> Harness {
        harness_with(api, RunnerSettings::default())
    }

    fn session() -> Session {
        Session {
            conversation_id: ConversationId::new("test", "1"),
            user_id: "user-1".into(),
            organization_id: None,
            credential: Credential::new("token"),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_email_transfer_submits_once() {
        let h = harness(MockTransferApi::default());
        let session = session();

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "email", &session),
            reply_all(
                h.runner.registry(),
                &h.conv,
                &["bob@example.com", "150", "salary", "YES"]
            )
        );

        assert_eq!(result.status, WorkflowStatus::Submitted);
        assert_eq!(result.state, WorkflowState::Done);
        let calls = h.api.calls_to(endpoints::SEND);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["amount"], "150000000");
        assert_eq!(calls[0]["payeeId"], "user-1");
        assert_eq!(calls[0]["purposeCode"], "salary");

        let texts = h.outbox.texts().await;
        assert!(texts.last().unwrap().starts_with("Email transfer submitted"));
    }

    #[tokio::test]
    async fn test_cancel_at_confirmation_makes_no_call() {
        let h = harness(MockTransferApi::default());
        let session = session();

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "wallet", &session),
            reply_all(h.runner.registry(), &h.conv, &["0xabc", "100", "gift", "cancel"])
        );

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.state, WorkflowState::Cancelled);
        assert_eq!(h.api.call_count(), 0);
        assert_eq!(h.outbox.texts().await.last().unwrap(), "Operation cancelled.");
    }

    #[tokio::test]
    async fn test_decline_is_distinct_from_cancel() {
        let h = harness(MockTransferApi::default());
        let session = session();

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "wallet", &session),
            reply_all(h.runner.registry(), &h.conv, &["0xabc", "100", "gift", "no"])
        );

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.state, WorkflowState::Declined);
        assert_eq!(result.error_message.as_deref(), Some("declined"));
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_server_error_is_reported_verbatim() {
        let h = harness(MockTransferApi {
            submit_error: Some((400, "Insufficient balance".into())),
            ..Default::default()
        });
        let session = session();

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "wallet", &session),
            reply_all(h.runner.registry(), &h.conv, &["0xabc", "100", "gift", "yes"])
        );

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("Insufficient balance"));
        assert_eq!(
            h.outbox.texts().await.last().unwrap(),
            "Transfer failed: Insufficient balance"
        );
        assert_eq!(h.api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_bank_withdrawal_quotes_before_confirmation() {
        let h = harness(MockTransferApi::default());
        let session = session();
        let answers = [
            "1000",
            "salary",
            "Alice",
            "Acme",
            "alice@example.com",
            "usa",
            "rent",
            "yes",
        ];

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "bank", &session),
            reply_all(h.runner.registry(), &h.conv, &answers)
        );

        assert_eq!(result.status, WorkflowStatus::Submitted);
        let quotes = h.api.calls_to(endpoints::OFFRAMP_QUOTE);
        assert_eq!(quotes[0]["amount"], "1000000000");
        assert_eq!(quotes[0]["sourceCountry"], "usa");

        let offramp = h.api.calls_to(endpoints::OFFRAMP);
        assert_eq!(offramp.len(), 1);
        assert_eq!(offramp[0]["quotePayload"], "payload");
        assert_eq!(offramp[0]["customerData"]["businessName"], "Acme");
        assert_eq!(offramp[0]["sourceOfFunds"], "salary");
        assert!(offramp[0]["invoiceNumber"].as_str().unwrap().len() >= 32);

        let texts = h.outbox.texts().await;
        let summary = &texts[texts.len() - 2];
        assert!(summary.contains("Estimated arrival: 1-2 business days"));
    }

    #[tokio::test]
    async fn test_quote_failure_ends_before_confirmation() {
        let h = harness(MockTransferApi {
            quote_error: Some("Amount below corridor minimum".into()),
            ..Default::default()
        });
        let session = session();
        let answers = ["1000", "salary", "Alice", "Acme", "alice@example.com", "usa", "rent"];

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "bank", &session),
            reply_all(h.runner.registry(), &h.conv, &answers)
        );

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.state, WorkflowState::Failed);
        assert!(h.api.calls_to(endpoints::OFFRAMP).is_empty());
        let texts = h.outbox.texts().await;
        assert_eq!(
            texts.last().unwrap(),
            "Failed to get a quote: Amount below corridor minimum"
        );
        assert!(!texts.iter().any(|t| t.contains("Reply 'yes'")));
    }

    #[tokio::test]
    async fn test_bulk_transfer_builds_one_request_per_recipient() {
        let h = harness(MockTransferApi::default());
        let session = session();
        let answers = [
            "2", "skip", "skip", "0xabc", "100", "gift", "skip", "c@example.com", "200",
            "family", "yes",
        ];

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "transfer_bulk", &session),
            reply_all(h.runner.registry(), &h.conv, &answers)
        );

        assert_eq!(result.status, WorkflowStatus::Submitted);
        let batch = h.api.calls_to(endpoints::SEND_BATCH);
        assert_eq!(batch.len(), 1);
        let requests = batch[0]["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0]["requestId"].as_str().unwrap().starts_with("txn-"));
        assert!(requests[0]["requestId"].as_str().unwrap().ends_with("-0"));
        assert_eq!(requests[0]["request"]["walletAddress"], "0xabc");
        assert!(requests[0]["request"]["email"].is_null());
        assert_eq!(requests[1]["request"]["email"], "c@example.com");
        assert_eq!(requests[1]["request"]["amount"], "200000000");
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_invalid() {
        let h = harness(MockTransferApi::default());
        let result = h.runner.run_workflow(&h.conv, "crypto", &session()).await;
        assert_eq!(result.status, WorkflowStatus::Invalid);
        assert_eq!(h.outbox.texts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_payee_is_invalid() {
        let h = harness(MockTransferApi::default());
        let mut session = session();
        session.user_id.clear();

        let result = h.runner.run_workflow(&h.conv, "email", &session).await;
        assert_eq!(result.status, WorkflowStatus::Invalid);
        assert_eq!(result.state, WorkflowState::Failed);
        assert!(!h.runner.registry().is_pending(&h.conv));
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_revoked_workflow_is_cancelled() {
        let h = harness(MockTransferApi::default());
        let session = session();

        let (result, _) = tokio::join!(h.runner.run_workflow(&h.conv, "email", &session), async {
            reply(h.runner.registry(), &h.conv, "bob@example.com").await;
            while !h.runner.registry().is_pending(&h.conv) {
                tokio::task::yield_now().await;
            }
            h.runner.registry().cancel_all(&h.conv);
        });

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.error_message.as_deref(), Some("revoked"));
        assert_eq!(h.outbox.texts().await.last().unwrap(), "Operation cancelled.");
    }

    #[tokio::test]
    async fn test_revoked_between_prompts_is_cancelled() {
        let h = harness(MockTransferApi::default());
        let session = session();
        let tracker = WorkflowTracker::new();

        let (result, _) = tokio::join!(
            h.runner
                .run_tracked(&h.conv, WorkflowKind::WalletTransfer, &session, &tracker),
            async {
                reply(h.runner.registry(), &h.conv, "0xabc").await;
                // the answer is in; the next prompt is not registered yet
                tracker.revoke().unwrap();
                assert!(!h.runner.registry().cancel_all(&h.conv));
            }
        );

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.state, WorkflowState::Cancelled);
        assert_eq!(result.error_message.as_deref(), Some("revoked"));
        assert_eq!(h.api.call_count(), 0);
        let texts = h.outbox.texts().await;
        assert_eq!(texts.last().unwrap(), "Operation cancelled.");
        assert!(!texts.iter().any(|t| t.contains("Something went wrong")));
    }

    #[tokio::test]
    async fn test_add_payee_submits_email_and_nickname() {
        let h = harness(MockTransferApi::default());
        let session = session();

        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "add_payee", &session),
            reply_all(h.runner.registry(), &h.conv, &["bob", "bob@example.com", "Bob", "yes"])
        );

        assert_eq!(result.status, WorkflowStatus::Submitted);
        let calls = h.api.calls_to(endpoints::PAYEES);
        assert_eq!(calls, vec![serde_json::json!({"email": "bob@example.com", "nickName": "Bob"})]);
        let texts = h.outbox.texts().await;
        assert!(texts.iter().any(|t| t.contains("Payee email: bob@example.com")));
        assert!(texts.last().unwrap().starts_with("Payee added successfully."));
    }

    #[tokio::test]
    async fn test_declined_payee_uses_its_own_message() {
        let h = harness(MockTransferApi::default());

        let sess = session();
        let (result, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "add_payee", &sess),
            reply_all(h.runner.registry(), &h.conv, &["bob@example.com", "Bob", "no"])
        );

        assert_eq!(result.state, WorkflowState::Declined);
        assert_eq!(h.outbox.texts().await.last().unwrap(), "Payee not added.");
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_default_wallet_choice_is_confirmed_then_submitted() {
        let h = harness(MockTransferApi {
            wallets: vec![
                wallet("w-1", "137", "0xaaa", true),
                wallet("w-2", "8453", "0xbbb", false),
            ],
            ..Default::default()
        });
        let tracker = WorkflowTracker::new();

        let sess = session();
        let (result, _) = tokio::join!(
            h.runner.run_set_default_wallet(&h.conv, &sess, &tracker),
            reply_all(h.runner.registry(), &h.conv, &["3", "2", "yes"])
        );

        assert_eq!(result.status, WorkflowStatus::Submitted);
        assert_eq!(result.state, WorkflowState::Done);
        assert_eq!(
            h.api.calls_to(endpoints::WALLET_DEFAULT),
            vec![serde_json::json!({"walletId": "w-2"})]
        );
        let texts = h.outbox.texts().await;
        assert!(texts[0].contains("1. Polygon 0xaaa (default)"));
        assert!(texts.iter().any(|t| t == "Please choose a number between 1 and 2."));
        assert_eq!(texts.last().unwrap(), "Default wallet set to Base 0xbbb.");
    }

    #[tokio::test]
    async fn test_default_wallet_without_wallets() {
        let h = harness(MockTransferApi::default());

        let result = h
            .runner
            .run_set_default_wallet(&h.conv, &session(), &WorkflowTracker::new())
            .await;
        assert_eq!(result.status, WorkflowStatus::Invalid);
        assert_eq!(h.outbox.texts().await, vec!["No wallets found."]);
        assert!(h.api.calls_to(endpoints::WALLET_DEFAULT).is_empty());
    }

    #[tokio::test]
    async fn test_idle_prompt_times_out() {
        let mut settings = RunnerSettings::default();
        settings.conversation.prompt_timeout = Some(Duration::from_millis(20));
        let h = harness_with(MockTransferApi::default(), settings);

        let result = h.runner.run_workflow(&h.conv, "wallet", &session()).await;
        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert!(h
            .outbox
            .texts()
            .await
            .last()
            .unwrap()
            .contains("no reply received in time"));
    }

    #[tokio::test]
    async fn test_every_terminal_state_sends_one_final_message() {
        let h = harness(MockTransferApi::default());
        let session = session();

        let (_, _) = tokio::join!(
            h.runner.run_workflow(&h.conv, "email", &session),
            reply(h.runner.registry(), &h.conv, "cancel")
        );
        // one prompt + one final message
        assert_eq!(h.outbox.texts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_login_retries_rejected_code() {
        let tmp = TempDir::new().unwrap();
        let sessions = FileSessionStore::new(tmp.path());
        let h = harness(MockTransferApi {
            otp_rejections: std::sync::Mutex::new(1),
            ..Default::default()
        });

        let tracker = WorkflowTracker::new();
        let (result, _) = tokio::join!(
            h.runner.run_login(&h.conv, &sessions, &tracker),
            reply_all(h.runner.registry(), &h.conv, &["a@example.com", "000000", "123456"])
        );

        assert_eq!(result.status, WorkflowStatus::Submitted);
        assert_eq!(result.state, WorkflowState::Done);
        assert_eq!(h.api.calls_to(endpoints::OTP_AUTHENTICATE).len(), 2);
        assert!(h
            .outbox
            .texts()
            .await
            .iter()
            .any(|t| t == "Invalid OTP Please try again."));

        let stored = sessions.get(&h.conv).await.unwrap();
        assert_eq!(stored.user_id, "user-1");
        assert_eq!(stored.credential.expose(), "access-token");
    }

    #[tokio::test]
    async fn test_balances_in_whole_tokens() {
        let h = harness(MockTransferApi {
            wallets: vec![wallet("w-1", "42161", "0xaaa", true)],
            ..Default::default()
        });
        h.runner.show_balances(&h.conv, &session()).await;
        assert_eq!(
            h.outbox.texts().await,
            vec!["Wallet balances:\n\nArbitrum (default)\n  1.5 USDC"]
        );
    }

    #[tokio::test]
    async fn test_kyc_without_records() {
        let h = harness(MockTransferApi::default());
        h.runner.show_kyc(&h.conv, &session()).await;
        assert!(h.outbox.texts().await[0].starts_with("No KYC record found."));
        assert_eq!(h.api.calls_to(endpoints::KYCS).len(), 1);
    }

    #[test]
    fn test_kyc_approval_summary() {
        let page: KycPage = serde_json::from_value(serde_json::json!({
            "data": [{"status": "approved", "type": "individual", "country": "usa"}]
        }))
        .unwrap();
        let text = render_kyc(page);
        assert!(text.contains("• APPROVED (individual, USA)"));
        assert!(text.ends_with("Your KYC is fully approved."));
    }

    #[tokio::test]
    async fn test_list_transfers_empty() {
        let h = harness(MockTransferApi::default());
        h.runner.list_transfers(&h.conv, &session()).await;
        assert_eq!(h.outbox.texts().await, vec!["No recent transfers found."]);
        assert_eq!(h.api.calls_to(endpoints::TRANSFERS)[0]["limit"], 10);
    }
}
