//! crates/loan_desk_core/src/status.rs
//!
//! Loan status aggregation: reads a chat's loan projection and the owner's
//! profile and folds them into a read-only snapshot for the status view.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::document::{as_amount, field_str};
use crate::domain::{ChatId, LoanStage};
use crate::ports::{DocumentPath, DocumentStore, IdentityProvider, PortError, PortResult};

pub const UNKNOWN_SCHEME: &str = "N/A";
pub const UNSCHEDULED_EMI_DATE: &str = "TBD";

/// Repayment details, only present once a loan is approved.
#[derive(Debug, Clone, PartialEq)]
pub struct RepaymentView {
    pub emi: u64,
    pub next_emi_date: String,
    pub paid_emis: u64,
    pub tenure_months: u64,
    /// Share of the tenure already paid, in `0.0..=1.0`.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoanStatusSnapshot {
    pub stage: LoanStage,
    pub stage_index: usize,
    pub amount: u64,
    pub scheme: String,
    pub emi: u64,
    pub next_emi_date: String,
    pub tenure_months: u64,
    pub paid_emis: u64,
    pub credit_score: Option<u64>,
    pub kyc_verified: bool,
    pub repayment: Option<RepaymentView>,
}

impl LoanStatusSnapshot {
    /// Builds a snapshot from the raw chat and profile documents, either of
    /// which may be missing.
    pub fn from_documents(chat: Option<&Value>, profile: Option<&Value>) -> Self {
        let empty = Value::Null;
        let chat = chat.unwrap_or(&empty);
        let profile = profile.unwrap_or(&empty);

        let stage = match field_str(chat, "loanStatus") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}; showing the initial stage", e);
                LoanStage::Inquiry
            }),
            None => LoanStage::Inquiry,
        };
        let amount_of = |key: &str| chat.get(key).and_then(as_amount).unwrap_or(0);

        let emi = amount_of("emiAmount");
        let tenure_months = amount_of("tenureMonths");
        let paid_emis = amount_of("paidEmis");
        let next_emi_date = field_str(chat, "nextEmiDate")
            .unwrap_or(UNSCHEDULED_EMI_DATE)
            .to_string();

        let repayment = stage.has_repayment_schedule().then(|| RepaymentView {
            emi,
            next_emi_date: next_emi_date.clone(),
            paid_emis,
            tenure_months,
            progress: repayment_progress(paid_emis, tenure_months),
        });

        Self {
            stage,
            stage_index: stage.pipeline_index(),
            amount: amount_of("loanAmount"),
            scheme: field_str(chat, "loanScheme").unwrap_or(UNKNOWN_SCHEME).to_string(),
            emi,
            next_emi_date,
            tenure_months,
            paid_emis,
            credit_score: profile.get("creditScore").and_then(as_amount),
            kyc_verified: profile
                .get("documents")
                .is_some_and(|docs| field_str(docs, "panCard").is_some()),
            repayment,
        }
    }

    /// Whether `stage` is done (or in progress) for this loan.
    pub fn reached(&self, stage: LoanStage) -> bool {
        stage.pipeline_index() <= self.stage_index
    }

    /// Fill of the pipeline progress bar, in `0.0..=1.0`.
    pub fn pipeline_progress(&self) -> f64 {
        self.stage_index as f64 / (LoanStage::PIPELINE.len() - 1) as f64
    }
}

fn repayment_progress(paid: u64, tenure: u64) -> f64 {
    if tenure == 0 {
        return 0.0;
    }
    (paid as f64 / tenure as f64).min(1.0)
}

/// Computes status snapshots on demand. Nothing is cached.
pub struct LoanStatusAggregator {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
}

impl LoanStatusAggregator {
    pub fn new(identity: Arc<dyn IdentityProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self { identity, store }
    }

    pub async fn snapshot(&self, chat_id: &ChatId) -> PortResult<LoanStatusSnapshot> {
        let user = self.identity.current_user().ok_or(PortError::Unauthorized)?;
        let chat_path = DocumentPath::chat(user.user_id, chat_id);
        let profile_path = DocumentPath::profile(user.user_id);

        let (chat, profile) = tokio::join!(self.store.get(&chat_path), self.store.get(&profile_path));
        Ok(LoanStatusSnapshot::from_documents(chat?.as_ref(), profile?.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_status_reports_initial_stage_and_zeroes() {
        let chat = json!({"chatId": "1", "chatName": "New Chat", "messages": []});
        let snapshot = LoanStatusSnapshot::from_documents(Some(&chat), None);
        assert_eq!(snapshot.stage, LoanStage::Inquiry);
        assert_eq!(snapshot.stage_index, 0);
        assert_eq!(snapshot.amount, 0);
        assert_eq!(snapshot.emi, 0);
        assert_eq!(snapshot.tenure_months, 0);
        assert_eq!(snapshot.paid_emis, 0);
        assert_eq!(snapshot.scheme, UNKNOWN_SCHEME);
        assert_eq!(snapshot.next_emi_date, UNSCHEDULED_EMI_DATE);
        assert_eq!(snapshot.credit_score, None);
        assert!(!snapshot.kyc_verified);
        assert!(snapshot.repayment.is_none());
    }

    #[test]
    fn approved_loan_exposes_repayment() {
        let chat = json!({
            "loanStatus": "APPROVED",
            "loanAmount": 500000,
            "emiAmount": 10623,
            "tenureMonths": 60,
            "paidEmis": 15,
            "nextEmiDate": "18 Nov 2026",
            "loanScheme": "Byte Flexi Loan"
        });
        let profile = json!({"creditScore": 780, "documents": {"panCard": "https://files/pan"}});
        let snapshot = LoanStatusSnapshot::from_documents(Some(&chat), Some(&profile));

        assert_eq!(snapshot.stage_index, 3);
        assert_eq!(snapshot.amount, 500000);
        assert_eq!(snapshot.credit_score, Some(780));
        assert!(snapshot.kyc_verified);
        let repayment = snapshot.repayment.unwrap();
        assert_eq!(repayment.emi, 10623);
        assert_eq!(repayment.next_emi_date, "18 Nov 2026");
        assert!((repayment.progress - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn verified_loan_has_no_repayment_view() {
        let chat = json!({"loanStatus": "VERIFIED", "emiAmount": 100});
        let snapshot = LoanStatusSnapshot::from_documents(Some(&chat), None);
        assert!(snapshot.reached(LoanStage::Applied));
        assert!(snapshot.reached(LoanStage::Verified));
        assert!(!snapshot.reached(LoanStage::Approved));
        assert!(snapshot.repayment.is_none());
        assert!((snapshot.pipeline_progress() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn disbursed_and_unknown_stages() {
        let disbursed = json!({"loanStatus": "DISBURSED", "tenureMonths": 0, "paidEmis": 3});
        let snapshot = LoanStatusSnapshot::from_documents(Some(&disbursed), None);
        assert!(snapshot.reached(LoanStage::Approved));
        assert_eq!(snapshot.repayment.unwrap().progress, 0.0);

        let unknown = json!({"loanStatus": "ON_HOLD"});
        let snapshot = LoanStatusSnapshot::from_documents(Some(&unknown), None);
        assert_eq!(snapshot.stage, LoanStage::Inquiry);
    }
}
