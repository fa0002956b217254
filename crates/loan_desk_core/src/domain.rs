//! crates/loan_desk_core/src/domain.rs
//!
//! Defines the core data structures for the loan desk: chats, messages, the
//! user profile with its document vault, and the loan pipeline stages.
//! Field names follow the camelCase layout of the hosted documents.

use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use crate::document::lenient;

/// Display name of a chat that has not been named yet.
pub const DEFAULT_CHAT_NAME: &str = "New Chat";

/// User id sent to the chat backend when nobody is signed in.
pub const GUEST_USER_ID: &str = "guest";

/// Text of the synthetic assistant message appended when a send fails.
pub const SYSTEM_ERROR_TEXT: &str = "System Error. Is Backend running?";

//=========================================================================================
// Timestamps and Ids
//=========================================================================================

/// Document timestamps: ISO-8601 UTC with millisecond precision and a `Z` suffix,
/// so that string order equals time order.
pub mod timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn now() -> String {
        format(&Utc::now())
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Epoch-millisecond ids that never repeat within a process.
#[derive(Debug)]
pub struct ClockIds {
    last: AtomicI64,
}

impl ClockIds {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Returns the current epoch millis, or one more than the last id handed out
    /// if the clock has not moved on.
    pub fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for ClockIds {
    fn default() -> Self {
        Self::new()
    }
}

static IDS: ClockIds = ClockIds::new();

/// Next process-wide clock id, shared by chat ids and message ids.
pub fn next_clock_id() -> i64 {
    IDS.next()
}

//=========================================================================================
// Identity
//=========================================================================================

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// A sign-in session issued by the identity provider.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user: AuthUser,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Chats and Messages
//=========================================================================================

/// Client-generated chat identifier (epoch millis at creation, as text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn generate() -> Self {
        Self(next_clock_id().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChatId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ChatId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "bot", alias = "assistant")]
    Assistant,
}

/// One transcript entry. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub role: Role,
    pub text: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: next_clock_id(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system_error() -> Self {
        Self::assistant(SYSTEM_ERROR_TEXT)
    }

    pub fn is_sanction_letter(&self) -> bool {
        self.role == Role::Assistant && crate::sanction::is_sanction_letter(&self.text)
    }
}

/// The chat document written when a conversation starts. The loan projection
/// fields are owned by the decision backend and only ever read here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub chat_id: ChatId,
    pub chat_name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(chat_id: ChatId, chat_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            chat_id,
            chat_name: chat_name.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: ChatId,
    pub name: String,
    pub updated_at: Option<String>,
}

/// Display name for a new chat: the seed text plus a local `HH:MM` suffix,
/// or the generic name when there is no seed.
pub fn session_name(seed: Option<&str>, now: DateTime<Local>) -> String {
    match seed.map(str::trim).filter(|s| !s.is_empty()) {
        Some(seed) => format!("{seed} • {}", now.format("%H:%M")),
        None => DEFAULT_CHAT_NAME.to_string(),
    }
}

//=========================================================================================
// Loan Pipeline
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LoanStage {
    #[default]
    Inquiry,
    Applied,
    Verified,
    Approved,
    Disbursed,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown loan stage: {0}")]
pub struct UnknownStage(pub String);

impl LoanStage {
    /// The four stages shown as the application progress pipeline.
    pub const PIPELINE: [LoanStage; 4] = [
        LoanStage::Inquiry,
        LoanStage::Applied,
        LoanStage::Verified,
        LoanStage::Approved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStage::Inquiry => "INQUIRY",
            LoanStage::Applied => "APPLIED",
            LoanStage::Verified => "VERIFIED",
            LoanStage::Approved => "APPROVED",
            LoanStage::Disbursed => "DISBURSED",
        }
    }

    /// Position in the pipeline. A disbursed loan has completed every stage.
    pub fn pipeline_index(&self) -> usize {
        match self {
            LoanStage::Inquiry => 0,
            LoanStage::Applied => 1,
            LoanStage::Verified => 2,
            LoanStage::Approved | LoanStage::Disbursed => 3,
        }
    }

    pub fn has_repayment_schedule(&self) -> bool {
        matches!(self, LoanStage::Approved | LoanStage::Disbursed)
    }
}

impl FromStr for LoanStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INQUIRY" => Ok(LoanStage::Inquiry),
            "APPLIED" => Ok(LoanStage::Applied),
            "VERIFIED" => Ok(LoanStage::Verified),
            "APPROVED" => Ok(LoanStage::Approved),
            "DISBURSED" => Ok(LoanStage::Disbursed),
            _ => Err(UnknownStage(s.to_string())),
        }
    }
}

impl fmt::Display for LoanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The loan products offered as conversation starters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanTopic {
    HomeLoan,
    PersonalLoan,
    EducationLoan,
    CarLoan,
}

impl LoanTopic {
    pub const ALL: [LoanTopic; 4] = [
        LoanTopic::HomeLoan,
        LoanTopic::PersonalLoan,
        LoanTopic::EducationLoan,
        LoanTopic::CarLoan,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LoanTopic::HomeLoan => "Home Loan",
            LoanTopic::PersonalLoan => "Personal Loan",
            LoanTopic::EducationLoan => "Education Loan",
            LoanTopic::CarLoan => "Car Loan",
        }
    }

    pub fn subtext(&self) -> &'static str {
        match self {
            LoanTopic::HomeLoan => "Check eligibility for ₹50L",
            LoanTopic::PersonalLoan => "Instant approval up to ₹5L",
            LoanTopic::EducationLoan => "Study abroad rates",
            LoanTopic::CarLoan => "New & Used car finance",
        }
    }

    /// The first message sent when a conversation is started from a topic card.
    pub fn opening_message(&self) -> String {
        format!("I want to apply for a {}", self.label())
    }
}

impl FromStr for LoanTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        LoanTopic::ALL
            .into_iter()
            .find(|topic| {
                let label = topic.label().to_ascii_lowercase();
                label == wanted || label.split(' ').next() == Some(wanted.as_str())
            })
            .ok_or_else(|| format!("Unknown loan topic: {s}"))
    }
}

//=========================================================================================
// Profile and Document Vault
//=========================================================================================

/// A custom document entry in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraDocument {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// The user's profile document. Numeric fields tolerate numbers stored as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::text")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::text")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::text")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::text")]
    pub city: Option<String>,
    /// PAN number as typed by the user; the card image lives in `documents`.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::text")]
    pub pan_card: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::amount")]
    pub salary: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::amount")]
    pub credit_score: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::amount")]
    pub pre_approved_limit: Option<u64>,
    #[serde(deserialize_with = "lenient::flag")]
    pub is_email_verified: bool,
    #[serde(deserialize_with = "lenient::flag")]
    pub is_phone_verified: bool,
    #[serde(deserialize_with = "lenient::url_map")]
    pub documents: BTreeMap<String, String>,
    #[serde(deserialize_with = "lenient::extra_documents")]
    pub extra_docs: Vec<ExtraDocument>,
}

impl UserProfile {
    pub fn kyc_verified(&self) -> bool {
        self.documents.contains_key(VaultSlot::PanCard.key().as_str())
    }

    pub fn set_pan_number(&mut self, pan: &str) {
        self.pan_card = Some(pan.trim().to_uppercase());
    }

    pub fn add_extra_document(&mut self) -> usize {
        self.extra_docs.push(ExtraDocument {
            name: "New Document".to_string(),
            url: String::new(),
        });
        self.extra_docs.len() - 1
    }

    pub fn remove_extra_document(&mut self, index: usize) -> Option<ExtraDocument> {
        (index < self.extra_docs.len()).then(|| self.extra_docs.remove(index))
    }

    pub fn rename_extra_document(&mut self, index: usize, name: &str) -> bool {
        match self.extra_docs.get_mut(index) {
            Some(doc) => {
                doc.name = name.to_string();
                true
            }
            None => false,
        }
    }
}

/// Where an uploaded file lands in the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultSlot {
    PanCard,
    SalarySlip,
    /// Index into the profile's custom document list.
    Custom(usize),
}

impl VaultSlot {
    pub fn key(&self) -> String {
        match self {
            VaultSlot::PanCard => "panCard".to_string(),
            VaultSlot::SalarySlip => "salarySlip".to_string(),
            VaultSlot::Custom(index) => format!("extra_{index}"),
        }
    }

    pub fn label(&self) -> String {
        match self {
            VaultSlot::PanCard => "PAN Card Image".to_string(),
            VaultSlot::SalarySlip => "Salary Slip".to_string(),
            VaultSlot::Custom(index) => format!("Custom document #{}", index + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactChannel {
    Email,
    Phone,
}

impl ContactChannel {
    /// The profile flag set when the channel is marked verified.
    pub fn flag_field(&self) -> &'static str {
        match self {
            ContactChannel::Email => "isEmailVerified",
            ContactChannel::Phone => "isPhoneVerified",
        }
    }
}

/// Calendar date used when issuing sanction letters.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
