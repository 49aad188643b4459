// ChatPay — Step engine
//
// Turns a form into a sequence of single-question exchanges on one
// conversation. Invalid answers re-prompt the same field; the cancel keyword
// aborts the whole form.

use super::registry::{PromptError, PromptRegistry};
use super::validate;
use super::{ConversationId, Outbox, TextFormat};
use crate::workflow::draft::FieldValue;
use crate::workflow::state::TransitionError;
use crate::workflow::{
    Draft, FieldContext, FieldSpec, FormShape, FormSpec, RepeatedForm, WorkflowState,
    WorkflowTracker,
};
use std::time::Duration;
use thiserror::Error;

/// Keywords and limits shared by every prompt of a conversation.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub cancel_keyword: String,
    pub confirm_keyword: String,
    pub prompt_timeout: Option<Duration>,
    pub fields: FieldContext,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            cancel_keyword: "cancel".to_string(),
            confirm_keyword: "yes".to_string(),
            prompt_timeout: None,
            fields: FieldContext::default(),
        }
    }
}

/// Why collection stopped before the form was complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Interrupt {
    #[error("cancelled by user")]
    Cancelled,
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub struct StepEngine<'a> {
    conversation: &'a ConversationId,
    registry: &'a PromptRegistry,
    outbox: &'a dyn Outbox,
    settings: &'a ConversationSettings,
    tracker: &'a WorkflowTracker,
}

impl<'a> StepEngine<'a> {
    pub fn new(
        conversation: &'a ConversationId,
        registry: &'a PromptRegistry,
        outbox: &'a dyn Outbox,
        settings: &'a ConversationSettings,
        tracker: &'a WorkflowTracker,
    ) -> Self {
        Self {
            conversation,
            registry,
            outbox,
            settings,
            tracker,
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        self.conversation
    }

    pub fn settings(&self) -> &ConversationSettings {
        self.settings
    }

    pub fn tracker(&self) -> &WorkflowTracker {
        self.tracker
    }

    pub async fn say(&self, text: &str) {
        self.outbox
            .send_message(self.conversation, text, TextFormat::Plain)
            .await;
    }

    /// Send `prompt` and wait for the reply. The cancel keyword interrupts.
    ///
    /// A workflow revoked through its tracker is never prompted again.
    pub async fn ask(&self, prompt: &str) -> Result<String, Interrupt> {
        let pending = self.registry.register(self.conversation)?;
        if self.tracker.is_revoked() {
            tracing::debug!(conversation = %self.conversation, "Workflow revoked before prompt");
            return Err(PromptError::Revoked.into());
        }
        self.say(prompt).await;
        let raw = pending.wait(self.settings.prompt_timeout).await?;
        if validate::is_cancel(&raw, &self.settings.cancel_keyword) {
            tracing::debug!(conversation = %self.conversation, "Cancel keyword received");
            return Err(Interrupt::Cancelled);
        }
        Ok(raw)
    }

    /// Ask one field until a valid answer arrives. `None` means it was skipped.
    pub async fn ask_field(&self, spec: &FieldSpec) -> Result<Option<FieldValue>, Interrupt> {
        let prompt = spec.render_prompt(&self.settings.fields, &self.settings.cancel_keyword);
        let mut text = prompt.clone();
        loop {
            let raw = self.ask(&text).await?;
            match spec.validate(&raw, &self.settings.fields) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!(
                        conversation = %self.conversation,
                        field = ?spec.key,
                        error = %e,
                        "Answer rejected"
                    );
                    text = format!("{}\n\n{}", e, prompt);
                }
            }
        }
    }

    /// Collect every field of `form` into a fresh draft.
    ///
    /// When the form's `require_any` rule is still unmet at its checkpoint,
    /// the answers so far are dropped and the form starts over.
    pub async fn collect_form(
        &self,
        form: &FormSpec,
        recipient: Option<usize>,
    ) -> Result<Draft, Interrupt> {
        let checkpoint = form.requirement_checkpoint();
        let mut draft = Draft::new();
        let mut index = 0;

        while let Some(spec) = form.fields.get(index) {
            let answered_elsewhere = spec.skip_if_present.is_some_and(|k| draft.contains(k));
            if !answered_elsewhere {
                self.tracker
                    .advance(WorkflowState::Collecting { index, recipient })?;
                if let Some(value) = self.ask_field(spec).await? {
                    draft.insert(spec.key, value);
                }
            }

            if checkpoint == Some(index) && !form.requirement_met(&draft) {
                self.say(&form.requirement_message()).await;
                draft = Draft::new();
                index = 0;
                continue;
            }
            index += 1;
        }

        Ok(draft)
    }

    /// Ask the item count, then collect the sub-form once per item.
    pub async fn collect_repeated(&self, form: &RepeatedForm) -> Result<Draft, Interrupt> {
        self.tracker.advance(WorkflowState::INITIAL)?;
        let mut draft = Draft::new();
        if let Some(value) = self.ask_field(&form.count).await? {
            draft.insert(form.count.key, value);
        }
        let count = draft.count(form.count.key).unwrap_or(0) as usize;

        for slot in 0..count {
            self.say(&format!("{} {} of {}", form.item_title, slot + 1, count))
                .await;
            let item = self.collect_form(&form.item, Some(slot)).await?;
            draft.push_recipient(item);
        }

        Ok(draft)
    }

    pub async fn collect(&self, shape: &FormShape) -> Result<Draft, Interrupt> {
        match shape {
            FormShape::Single(form) => self.collect_form(form, None).await,
            FormShape::Repeated(form) => self.collect_repeated(form).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::testing::{reply, reply_all, RecordingOutbox};
    use crate::conversation::validate::MinorUnits;
    use crate::workflow::{FieldKey, BULK_TRANSFER, EMAIL_TRANSFER, WALLET_TRANSFER};

    struct Fixture {
        conv: ConversationId,
        registry: PromptRegistry,
        outbox: RecordingOutbox,
        settings: ConversationSettings,
        tracker: WorkflowTracker,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                conv: ConversationId::new("test", "1"),
                registry: PromptRegistry::new(),
                outbox: RecordingOutbox::default(),
                settings: ConversationSettings::default(),
                tracker: WorkflowTracker::new(),
            }
        }

        fn engine(&self) -> StepEngine<'_> {
            StepEngine::new(
                &self.conv,
                &self.registry,
                &self.outbox,
                &self.settings,
                &self.tracker,
            )
        }
    }

    #[tokio::test]
    async fn test_collects_fields_in_order() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let (draft, _) = tokio::join!(
            engine.collect(&EMAIL_TRANSFER.shape),
            reply_all(&fx.registry, &fx.conv, &["bob@example.com", "150", "salary"])
        );
        let draft = draft.unwrap();

        let keys: Vec<FieldKey> = draft.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![FieldKey::Email, FieldKey::Amount, FieldKey::Purpose]);
        assert_eq!(draft.amount(FieldKey::Amount), Some(MinorUnits::new(150_000_000)));
        assert_eq!(fx.outbox.texts().await.len(), 3);
        assert!(!fx.registry.is_pending(&fx.conv));
    }

    #[tokio::test]
    async fn test_out_of_range_reprompts_same_field() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let (draft, _) = tokio::join!(
            engine.collect(&WALLET_TRANSFER.shape),
            reply_all(&fx.registry, &fx.conv, &["0xabc", "50", "250", "gift"])
        );
        let draft = draft.unwrap();
        assert_eq!(draft.amount(FieldKey::Amount), Some(MinorUnits::new(250_000_000)));

        let texts = fx.outbox.texts().await;
        assert_eq!(texts.len(), 4);
        assert!(texts[2].starts_with("Amount must be between 100 and 5000000."));
        assert!(texts[2].contains("Enter the transfer amount"));
    }

    #[tokio::test]
    async fn test_invalid_purpose_is_not_stored() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let (draft, _) = tokio::join!(
            engine.collect(&WALLET_TRANSFER.shape),
            reply_all(&fx.registry, &fx.conv, &["0xabc", "150", "Salary", "salary"])
        );
        assert_eq!(draft.unwrap().text(FieldKey::Purpose), Some("salary"));
    }

    #[tokio::test]
    async fn test_cancel_at_first_field() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let (result, _) = tokio::join!(
            engine.collect(&EMAIL_TRANSFER.shape),
            reply(&fx.registry, &fx.conv, "CANCEL")
        );
        assert_eq!(result, Err(Interrupt::Cancelled));
        assert!(!fx.registry.is_pending(&fx.conv));
    }

    #[tokio::test]
    async fn test_cancel_at_last_field() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let (result, _) = tokio::join!(
            engine.collect(&EMAIL_TRANSFER.shape),
            reply_all(&fx.registry, &fx.conv, &["bob@example.com", "150", " cancel "])
        );
        assert_eq!(result, Err(Interrupt::Cancelled));
    }

    #[tokio::test]
    async fn test_bulk_recipient_repeats_in_place() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let answers = [
            "2",
            // recipient 1: neither wallet nor email, then a wallet
            "skip",
            "skip",
            "0xabc",
            "100",
            "gift",
            // recipient 2: email only
            "skip",
            "carol@example.com",
            "200.5",
            "family",
        ];
        let (draft, _) = tokio::join!(
            engine.collect(&BULK_TRANSFER.shape),
            reply_all(&fx.registry, &fx.conv, &answers)
        );
        let draft = draft.unwrap();

        assert_eq!(draft.count(FieldKey::RecipientCount), Some(2));
        let recipients = draft.recipients();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].text(FieldKey::WalletAddress), Some("0xabc"));
        assert!(!recipients[0].contains(FieldKey::Email));
        assert_eq!(recipients[1].text(FieldKey::Email), Some("carol@example.com"));
        assert_eq!(
            recipients[1].amount(FieldKey::Amount),
            Some(MinorUnits::new(200_500_000))
        );

        let texts = fx.outbox.texts().await;
        assert!(texts
            .iter()
            .any(|t| t.starts_with("You must provide at least one of")));
        assert!(texts.iter().any(|t| t == "Recipient 2 of 2"));
        assert!(!texts.iter().any(|t| t.contains("Recipient 3")));
    }

    #[tokio::test]
    async fn test_tracker_follows_collection() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let (_, _) = tokio::join!(engine.collect(&EMAIL_TRANSFER.shape), async {
            reply_all(&fx.registry, &fx.conv, &["bob@example.com", "150"]).await;
            // third field is now pending
            while !fx.registry.is_pending(&fx.conv) {
                tokio::task::yield_now().await;
            }
            assert_eq!(
                fx.tracker.current(),
                WorkflowState::Collecting {
                    index: 2,
                    recipient: None
                }
            );
            reply(&fx.registry, &fx.conv, "salary").await;
        });
    }

    #[tokio::test]
    async fn test_revoked_workflow_is_not_prompted() {
        let fx = Fixture::new();
        fx.tracker.revoke().unwrap();
        let engine = fx.engine();

        assert_eq!(
            engine.ask("Enter the transfer amount").await,
            Err(Interrupt::Prompt(PromptError::Revoked))
        );
        assert!(matches!(
            engine.collect(&EMAIL_TRANSFER.shape).await,
            Err(Interrupt::Transition(_))
        ));
        assert!(fx.outbox.texts().await.is_empty());
        assert!(!fx.registry.is_pending(&fx.conv));
    }

    #[tokio::test]
    async fn test_prompt_timeout_interrupts() {
        let mut fx = Fixture::new();
        fx.settings.prompt_timeout = Some(Duration::from_millis(20));
        let engine = fx.engine();

        let result = engine.collect(&EMAIL_TRANSFER.shape).await;
        assert_eq!(
            result,
            Err(Interrupt::Prompt(PromptError::Timeout(Duration::from_millis(20))))
        );
        assert!(!fx.registry.is_pending(&fx.conv));
    }

    #[tokio::test]
    async fn test_concurrent_prompt_fails_fast() {
        let fx = Fixture::new();
        let other = fx.registry.clone();
        let conv = fx.conv.clone();
        let holder = tokio::spawn(async move { other.await_next_message(&conv, None).await });
        while !fx.registry.is_pending(&fx.conv) {
            tokio::task::yield_now().await;
        }

        let result = fx.engine().collect(&EMAIL_TRANSFER.shape).await;
        assert!(matches!(
            result,
            Err(Interrupt::Prompt(PromptError::Concurrent(_)))
        ));

        fx.registry.deliver(&fx.conv, "done");
        assert_eq!(holder.await.unwrap().unwrap(), "done");
    }
}
