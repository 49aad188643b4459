// ChatPay — Confirmation and single-shot submission

use super::engine::{Interrupt, StepEngine};
use crate::api::{ApiError, Credential, Quote, Submission, TransferApi, TransferReceipt};
use crate::conversation::validate::MinorUnits;
use crate::workflow::draft::FieldValue;
use crate::workflow::state::TransitionError;
use crate::workflow::{Draft, FieldKey, FormShape, WorkflowDefinition, WorkflowState, WorkflowTracker};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Approved,
    Declined,
}

/// Show `summary` and wait for exactly one reply.
///
/// The confirm keyword approves, the cancel keyword interrupts, anything
/// else declines.
pub async fn ask_consent(engine: &StepEngine<'_>, summary: &str) -> Result<Consent, Interrupt> {
    engine.tracker().advance(WorkflowState::Confirming)?;
    let settings = engine.settings();
    let prompt = format!(
        "{}\n\nReply '{}' to confirm or '{}' to stop.",
        summary, settings.confirm_keyword, settings.cancel_keyword
    );
    let answer = engine.ask(&prompt).await?;
    if answer.trim().eq_ignore_ascii_case(&settings.confirm_keyword) {
        Ok(Consent::Approved)
    } else {
        tracing::debug!(conversation = %engine.conversation(), "Confirmation declined");
        Ok(Consent::Declined)
    }
}

fn display_value(value: &FieldValue, currency: &str) -> String {
    match value {
        FieldValue::Text(text) => text.clone(),
        FieldValue::Amount(amount) => format!("{} {}", amount.to_major_string(), currency),
        FieldValue::Count(n) => n.to_string(),
    }
}

fn push_fields(text: &mut String, draft: &Draft, currency: &str, indent: &str) {
    for (key, value) in draft.iter() {
        text.push_str(&format!(
            "{}{}: {}\n",
            indent,
            key.label(),
            display_value(value, currency)
        ));
    }
}

/// Human-readable summary of a completed draft, amounts in major units.
pub fn render_summary(
    definition: &WorkflowDefinition,
    draft: &Draft,
    currency: &str,
    quote: Option<&Quote>,
) -> String {
    let mut text = format!("{} summary\n\n", definition.title);
    push_fields(&mut text, draft, currency, "");

    if !draft.recipients().is_empty() {
        let item_title = match definition.shape {
            FormShape::Repeated(form) => form.item_title,
            FormShape::Single(_) => "Recipient",
        };
        let mut total = MinorUnits::new(0);
        for (i, recipient) in draft.recipients().iter().enumerate() {
            text.push_str(&format!("\n{} {}\n", item_title, i + 1));
            push_fields(&mut text, recipient, currency, "  ");
            if let Some(amount) = recipient.amount(FieldKey::Amount) {
                total = total.checked_add(amount).unwrap_or(total);
            }
        }
        text.push_str(&format!("\nTotal: {} {}\n", total.to_major_string(), currency));
    }

    if let Some(quote) = quote.filter(|q| !q.arrival_time_message.is_empty()) {
        text.push_str(&format!("Estimated arrival: {}\n", quote.arrival_time_message));
    }

    text.trim_end().to_string()
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("transfer already submitted or not confirmed: {0}")]
    NotSubmittable(#[from] TransitionError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Performs the one remote call a confirmed draft is allowed.
///
/// The tracker moves to SUBMITTING before the call; a second attempt for the
/// same workflow fails without reaching the API.
pub struct SubmissionController<'a> {
    api: &'a dyn TransferApi,
    tracker: &'a WorkflowTracker,
}

impl<'a> SubmissionController<'a> {
    pub fn new(api: &'a dyn TransferApi, tracker: &'a WorkflowTracker) -> Self {
        Self { api, tracker }
    }

    pub async fn submit_once(
        &self,
        credential: &Credential,
        endpoint: &str,
        submission: &Submission,
    ) -> Result<TransferReceipt, SubmitError> {
        self.tracker.advance(WorkflowState::Submitting)?;
        tracing::info!(endpoint = %endpoint, "Submitting transfer");

        let outcome = self.api.submit(credential, endpoint, submission).await;
        let next = if outcome.is_ok() {
            WorkflowState::Done
        } else {
            WorkflowState::Failed
        };
        if let Err(e) = self.tracker.advance(next) {
            tracing::error!("Failed to record submission outcome: {}", e);
        }

        outcome.map_err(|e| {
            tracing::warn!(endpoint = %endpoint, "Transfer submission failed: {}", e);
            SubmitError::Api(e)
        })
    }
}
