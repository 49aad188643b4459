// ChatPay — Workflow definitions
//
// Each form-driven workflow is a static table entry: the fields to collect,
// how each answer is validated, where the confirmed draft is submitted and
// whether a quote must be fetched first. New workflows extend the table.

pub mod draft;
pub mod runner;
pub mod state;

use crate::api::endpoints;
use crate::conversation::validate::{self, AmountBounds, ValidationError};
use draft::FieldValue;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub use draft::Draft;
pub use state::{WorkflowState, WorkflowTracker};

/// Purpose codes accepted by the transfer endpoints.
pub const PURPOSE_OPTIONS: &[&str] = &[
    "self",
    "salary",
    "gift",
    "income",
    "saving",
    "education_support",
    "family",
    "home_improvement",
    "reimbursement",
];

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Email,
    WalletAddress,
    Amount,
    Purpose,
    CustomerName,
    BusinessName,
    CustomerEmail,
    CustomerCountry,
    Note,
    RecipientCount,
    Otp,
    PayeeEmail,
    Nickname,
    WalletChoice,
}

impl FieldKey {
    /// Human-readable label used in confirmation summaries.
    pub fn label(&self) -> &'static str {
        match self {
            FieldKey::Email => "Recipient email",
            FieldKey::WalletAddress => "Wallet address",
            FieldKey::Amount => "Amount",
            FieldKey::Purpose => "Purpose",
            FieldKey::CustomerName => "Name",
            FieldKey::BusinessName => "Business name",
            FieldKey::CustomerEmail => "Email",
            FieldKey::CustomerCountry => "Country",
            FieldKey::Note => "Note",
            FieldKey::RecipientCount => "Recipients",
            FieldKey::Otp => "One-time code",
            FieldKey::PayeeEmail => "Payee email",
            FieldKey::Nickname => "Nickname",
            FieldKey::WalletChoice => "Wallet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Decimal major units, bounded by the workflow's [`AmountBounds`].
    Amount,
    OneOf(&'static [&'static str]),
    Text,
    /// Text that may be skipped with the skip keyword.
    OptionalText,
    Email,
    /// Email that may be skipped with the skip keyword.
    OptionalEmail,
    Count,
}

/// Per-instance inputs a field rule needs besides the raw answer.
#[derive(Debug, Clone)]
pub struct FieldContext {
    pub bounds: AmountBounds,
    pub skip_keyword: String,
}

impl Default for FieldContext {
    fn default() -> Self {
        Self {
            bounds: AmountBounds::STANDARD,
            skip_keyword: "skip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub prompt: &'static str,
    pub rule: FieldRule,
    /// Do not ask this field when the draft already holds a value for this key.
    pub skip_if_present: Option<FieldKey>,
}

impl FieldSpec {
    pub const fn new(key: FieldKey, prompt: &'static str, rule: FieldRule) -> Self {
        Self {
            key,
            prompt,
            rule,
            skip_if_present: None,
        }
    }

    pub const fn unless(mut self, key: FieldKey) -> Self {
        self.skip_if_present = Some(key);
        self
    }

    /// Validate one raw answer. `Ok(None)` means an optional field was skipped.
    pub fn validate(
        &self,
        raw: &str,
        ctx: &FieldContext,
    ) -> Result<Option<FieldValue>, ValidationError> {
        let value = match self.rule {
            FieldRule::Amount => FieldValue::Amount(validate::validate_amount(raw, ctx.bounds)?),
            FieldRule::OneOf(options) => {
                FieldValue::Text(validate::validate_choice(raw, options)?)
            }
            FieldRule::Text => FieldValue::Text(validate::validate_text(raw)?),
            FieldRule::OptionalText => {
                match validate::validate_optional_text(raw, &ctx.skip_keyword) {
                    Some(text) => FieldValue::Text(text),
                    None => return Ok(None),
                }
            }
            FieldRule::Email => FieldValue::Text(validate::validate_email(raw)?),
            FieldRule::OptionalEmail => {
                match validate::validate_optional_text(raw, &ctx.skip_keyword) {
                    Some(text) => FieldValue::Text(validate::validate_email(&text)?),
                    None => return Ok(None),
                }
            }
            FieldRule::Count => FieldValue::Count(validate::validate_count(raw)?),
        };
        Ok(Some(value))
    }

    /// Prompt text as shown to the user, including option lists and skip hints.
    pub fn render_prompt(&self, ctx: &FieldContext, cancel_keyword: &str) -> String {
        let mut text = self.prompt.to_string();
        match self.rule {
            FieldRule::OneOf(options) => {
                text.push_str("\n\n");
                for option in options {
                    text.push_str(&format!("• {}\n", option));
                }
                text.push_str("Type the option exactly as shown.");
            }
            FieldRule::Amount => {
                text.push_str(&format!(
                    " (min {}, max {})",
                    ctx.bounds.min.to_major_string(),
                    ctx.bounds.max.to_major_string()
                ));
            }
            FieldRule::OptionalText | FieldRule::OptionalEmail => {
                text.push_str(&format!(" (type '{}' to leave it empty)", ctx.skip_keyword));
            }
            _ => {}
        }
        text.push_str(&format!("\n(Type '{}' to stop)", cancel_keyword));
        text
    }
}

/// An ordered list of fields plus cross-field completeness rules.
#[derive(Debug, Clone, Copy)]
pub struct FormSpec {
    pub fields: &'static [FieldSpec],
    /// At least one of these keys must be answered, otherwise the form restarts.
    pub require_any: &'static [FieldKey],
}

impl FormSpec {
    pub const fn new(fields: &'static [FieldSpec]) -> Self {
        Self {
            fields,
            require_any: &[],
        }
    }

    /// Index of the field after which `require_any` can be checked.
    pub fn requirement_checkpoint(&self) -> Option<usize> {
        self.fields
            .iter()
            .rposition(|f| self.require_any.contains(&f.key))
    }

    pub fn requirement_met(&self, draft: &Draft) -> bool {
        self.require_any.is_empty() || self.require_any.iter().any(|k| draft.contains(*k))
    }

    /// Message shown when `require_any` is not met.
    pub fn requirement_message(&self) -> String {
        let labels: Vec<&str> = self.require_any.iter().map(|k| k.label()).collect();
        format!("You must provide at least one of: {}.", labels.join(", "))
    }
}

/// A sub-form asked once per item, with the item count collected first.
#[derive(Debug, Clone, Copy)]
pub struct RepeatedForm {
    pub count: FieldSpec,
    pub item: FormSpec,
    pub item_title: &'static str,
}

// ---------------------------------------------------------------------------
// Workflow kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    EmailTransfer,
    WalletTransfer,
    BankWithdrawal,
    BulkTransfer,
    AddPayee,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 5] = [
        WorkflowKind::EmailTransfer,
        WorkflowKind::WalletTransfer,
        WorkflowKind::BankWithdrawal,
        WorkflowKind::BulkTransfer,
        WorkflowKind::AddPayee,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowKind::EmailTransfer => "email",
            WorkflowKind::WalletTransfer => "wallet",
            WorkflowKind::BankWithdrawal => "bank",
            WorkflowKind::BulkTransfer => "bulk",
            WorkflowKind::AddPayee => "add_payee",
        }
    }

    pub fn definition(&self) -> &'static WorkflowDefinition {
        match self {
            WorkflowKind::EmailTransfer => &EMAIL_TRANSFER,
            WorkflowKind::WalletTransfer => &WALLET_TRANSFER,
            WorkflowKind::BankWithdrawal => &BANK_WITHDRAWAL,
            WorkflowKind::BulkTransfer => &BULK_TRANSFER,
            WorkflowKind::AddPayee => &ADD_PAYEE,
        }
    }

    /// Whether a confirmed draft moves funds.
    pub fn is_transfer(&self) -> bool {
        !matches!(self, WorkflowKind::AddPayee)
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let name = name.strip_prefix("transfer_").unwrap_or(&name);
        WorkflowKind::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| format!("unknown workflow: {}", s))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FormShape {
    Single(FormSpec),
    Repeated(RepeatedForm),
}

#[derive(Debug)]
pub struct WorkflowDefinition {
    pub kind: WorkflowKind,
    pub title: &'static str,
    pub shape: FormShape,
    pub endpoint: &'static str,
    pub requires_quote: bool,
    /// The session's user id is sent as `payeeId`.
    pub requires_payee: bool,
    /// Final message after the server accepted the submission.
    pub success: &'static str,
    /// Prefix of the final message when the submission was refused.
    pub failure: &'static str,
    /// Final message when the summary was not confirmed.
    pub declined: &'static str,
}

const TRANSFER_FAILED: &str = "Transfer failed";
const TRANSFER_DECLINED: &str = "Transfer declined. Nothing was sent.";

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

const AMOUNT: FieldSpec = FieldSpec::new(FieldKey::Amount, "Enter the transfer amount", FieldRule::Amount);
const PURPOSE: FieldSpec = FieldSpec::new(
    FieldKey::Purpose,
    "Select the purpose of the transfer:",
    FieldRule::OneOf(PURPOSE_OPTIONS),
);

static EMAIL_FIELDS: [FieldSpec; 3] = [
    FieldSpec::new(FieldKey::Email, "Please enter the recipient's email:", FieldRule::Email),
    AMOUNT,
    PURPOSE,
];

static WALLET_FIELDS: [FieldSpec; 3] = [
    FieldSpec::new(
        FieldKey::WalletAddress,
        "Please enter the recipient's wallet address:",
        FieldRule::Text,
    ),
    AMOUNT,
    PURPOSE,
];

static BANK_FIELDS: [FieldSpec; 7] = [
    AMOUNT,
    PURPOSE,
    FieldSpec::new(FieldKey::CustomerName, "Enter customer name:", FieldRule::Text),
    FieldSpec::new(FieldKey::BusinessName, "Enter business name:", FieldRule::Text),
    FieldSpec::new(FieldKey::CustomerEmail, "Enter customer email:", FieldRule::Email),
    FieldSpec::new(FieldKey::CustomerCountry, "Enter customer country:", FieldRule::Text),
    FieldSpec::new(FieldKey::Note, "Enter a note for the withdrawal:", FieldRule::Text),
];

static PAYEE_FIELDS: [FieldSpec; 2] = [
    FieldSpec::new(FieldKey::PayeeEmail, "Enter the payee's email address:", FieldRule::Email),
    FieldSpec::new(FieldKey::Nickname, "Enter a nickname for this payee:", FieldRule::Text),
];

static BULK_RECIPIENT_FIELDS: [FieldSpec; 4] = [
    FieldSpec::new(
        FieldKey::WalletAddress,
        "Enter the recipient's wallet address",
        FieldRule::OptionalText,
    ),
    FieldSpec::new(
        FieldKey::Email,
        "Enter the recipient's email",
        FieldRule::OptionalEmail,
    )
    .unless(FieldKey::WalletAddress),
    AMOUNT,
    PURPOSE,
];

pub static EMAIL_TRANSFER: WorkflowDefinition = WorkflowDefinition {
    kind: WorkflowKind::EmailTransfer,
    title: "Email transfer",
    shape: FormShape::Single(FormSpec::new(&EMAIL_FIELDS)),
    endpoint: endpoints::SEND,
    requires_quote: false,
    requires_payee: true,
    success: "Email transfer submitted successfully.",
    failure: TRANSFER_FAILED,
    declined: TRANSFER_DECLINED,
};

pub static WALLET_TRANSFER: WorkflowDefinition = WorkflowDefinition {
    kind: WorkflowKind::WalletTransfer,
    title: "Wallet transfer",
    shape: FormShape::Single(FormSpec::new(&WALLET_FIELDS)),
    endpoint: endpoints::WALLET_WITHDRAW,
    requires_quote: false,
    requires_payee: false,
    success: "Wallet transfer submitted successfully.",
    failure: TRANSFER_FAILED,
    declined: TRANSFER_DECLINED,
};

pub static BANK_WITHDRAWAL: WorkflowDefinition = WorkflowDefinition {
    kind: WorkflowKind::BankWithdrawal,
    title: "Bank withdrawal",
    shape: FormShape::Single(FormSpec::new(&BANK_FIELDS)),
    endpoint: endpoints::OFFRAMP,
    requires_quote: true,
    requires_payee: false,
    success: "Bank withdrawal submitted successfully.",
    failure: TRANSFER_FAILED,
    declined: TRANSFER_DECLINED,
};

pub static BULK_TRANSFER: WorkflowDefinition = WorkflowDefinition {
    kind: WorkflowKind::BulkTransfer,
    title: "Bulk transfer",
    shape: FormShape::Repeated(RepeatedForm {
        count: FieldSpec::new(
            FieldKey::RecipientCount,
            "How many recipients do you want to send funds to?",
            FieldRule::Count,
        ),
        item: FormSpec {
            fields: &BULK_RECIPIENT_FIELDS,
            require_any: &[FieldKey::WalletAddress, FieldKey::Email],
        },
        item_title: "Recipient",
    }),
    endpoint: endpoints::SEND_BATCH,
    requires_quote: false,
    requires_payee: true,
    success: "Bulk transfer submitted successfully.",
    failure: TRANSFER_FAILED,
    declined: TRANSFER_DECLINED,
};

pub static ADD_PAYEE: WorkflowDefinition = WorkflowDefinition {
    kind: WorkflowKind::AddPayee,
    title: "New payee",
    shape: FormShape::Single(FormSpec::new(&PAYEE_FIELDS)),
    endpoint: endpoints::PAYEES,
    requires_quote: false,
    requires_payee: false,
    success: "Payee added successfully.",
    failure: "Failed to add payee",
    declined: "Payee not added.",
};

// ---------------------------------------------------------------------------
// Login form
// ---------------------------------------------------------------------------

pub static LOGIN_EMAIL: FieldSpec = FieldSpec::new(
    FieldKey::Email,
    "Please reply with your email to authenticate.",
    FieldRule::Email,
);

pub static LOGIN_OTP: FieldSpec = FieldSpec::new(
    FieldKey::Otp,
    "Please reply with the one-time code sent to your email.",
    FieldRule::Text,
);

// ---------------------------------------------------------------------------
// Default wallet choice
// ---------------------------------------------------------------------------

pub static DEFAULT_WALLET_CHOICE: FieldSpec = FieldSpec::new(
    FieldKey::WalletChoice,
    "Reply with the number of the wallet to make your default:",
    FieldRule::Count,
);
