//! services/desk/src/render.rs
//!
//! Plain-text rendering of the desk's views for the terminal.

use loan_desk_core::domain::{ChatId, ChatSummary, LoanStage, LoanTopic, Message, Role, UserProfile, VaultSlot};
use loan_desk_core::status::LoanStatusSnapshot;
use std::collections::HashSet;
use std::fmt::Write;

const BAR_WIDTH: usize = 20;

pub fn banner() -> String {
    let mut out = String::from("ByteFinance Loan Desk\nHow can we help you today?\n\n");
    for (index, topic) in LoanTopic::ALL.iter().enumerate() {
        let _ = writeln!(out, "  {}. {:<15} {}", index + 1, topic.label(), topic.subtext());
    }
    out.push_str("\nType a message, /start <topic>, or /help.");
    out
}

pub fn help() -> &'static str {
    "\
Chat:     <text> | /start <home|personal|education|car> | /new | /chats | /switch <n> | /rename <name>
Status:   /status | /letter
Profile:  /profile | /set <name|phone|city|pan|salary> <value> | /save | /verify <email|phone>
Vault:    /upload <pan|salary|n> <file> | /adddoc | /rmdoc <n> | /renamedoc <n> <name>
Account:  /signup <email> <password> | /signin <email> <password> | /signout
          /quit"
}

pub fn message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "You",
        Role::Assistant => "Desk",
    };
    let mut line = format!("{speaker}: {}", message.text);
    if message.is_sanction_letter() {
        line.push_str("\n      [Sanction letter ready: type /letter to save it]");
    }
    line
}

pub fn chat_list(chats: &[ChatSummary], current: Option<&ChatId>) -> String {
    if chats.is_empty() {
        return "No saved chats yet.".to_string();
    }
    let mut out = String::from("Chats:");
    for (index, chat) in chats.iter().enumerate() {
        let marker = if current == Some(&chat.id) { '*' } else { ' ' };
        let _ = write!(out, "\n {marker}{:>2}. {}", index + 1, chat.name);
    }
    out
}

fn bar(fraction: f64) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        (fraction.clamp(0.0, 1.0) * 100.0).round() as u32
    )
}

pub fn status(snapshot: &LoanStatusSnapshot) -> String {
    let mut out = format!("Loan status: {}\n", snapshot.stage);
    let steps: Vec<String> = LoanStage::PIPELINE
        .iter()
        .map(|stage| {
            let mark = if snapshot.reached(*stage) { '✓' } else { ' ' };
            format!("[{mark}] {stage}")
        })
        .collect();
    let _ = writeln!(out, "{}", steps.join("  "));
    let _ = writeln!(out, "Progress: {}", bar(snapshot.pipeline_progress()));
    let _ = writeln!(out, "Amount: ₹{}   Scheme: {}", snapshot.amount, snapshot.scheme);
    let credit = snapshot
        .credit_score
        .map(|score| score.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let kyc = if snapshot.kyc_verified { "Verified" } else { "Pending" };
    let _ = write!(out, "Credit score: {credit}   KYC: {kyc}");

    if let Some(repayment) = &snapshot.repayment {
        let _ = write!(
            out,
            "\nEMI: ₹{} per month, next due {}\nPaid {} of {} EMIs {}",
            repayment.emi,
            repayment.next_emi_date,
            repayment.paid_emis,
            repayment.tenure_months,
            bar(repayment.progress)
        );
    }
    out
}

fn or_blank(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

fn verified(flag: bool) -> &'static str {
    if flag {
        " (verified)"
    } else {
        " (unverified)"
    }
}

pub fn profile(profile: &UserProfile) -> String {
    let mut out = String::from("Profile\n");
    let _ = writeln!(out, "  Name:   {}", or_blank(profile.name.as_deref()));
    let _ = writeln!(
        out,
        "  Email:  {}{}",
        or_blank(profile.email.as_deref()),
        verified(profile.is_email_verified)
    );
    let _ = writeln!(
        out,
        "  Phone:  {}{}",
        or_blank(profile.phone.as_deref()),
        verified(profile.is_phone_verified)
    );
    let _ = writeln!(out, "  City:   {}", or_blank(profile.city.as_deref()));
    let _ = writeln!(out, "  PAN:    {}", or_blank(profile.pan_card.as_deref()));
    let salary = profile.salary.map(|s| format!("₹{s}")).unwrap_or_else(|| "-".into());
    let _ = writeln!(out, "  Salary: {salary}");
    if let Some(limit) = profile.pre_approved_limit {
        let _ = writeln!(out, "  Pre-approved limit: ₹{limit}");
    }

    out.push_str("Vault\n");
    for slot in [VaultSlot::PanCard, VaultSlot::SalarySlip] {
        let state = profile
            .documents
            .get(&slot.key())
            .map(String::as_str)
            .unwrap_or("not uploaded");
        let _ = writeln!(out, "  {}: {state}", slot.label());
    }
    for (index, doc) in profile.extra_docs.iter().enumerate() {
        let state = if doc.url.is_empty() { "not uploaded" } else { doc.url.as_str() };
        let _ = writeln!(out, "  {}. {}: {state}", index + 1, doc.name);
    }
    out.trim_end().to_string()
}

/// Remembers which messages were already printed so that each remote
/// transcript replacement only prints what is new.
#[derive(Default)]
pub struct TranscriptPrinter {
    printed: HashSet<i64>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh<'a>(&mut self, transcript: &'a [Message]) -> Vec<&'a Message> {
        if transcript.is_empty() {
            self.printed.clear();
            return Vec::new();
        }
        transcript
            .iter()
            .filter(|message| self.printed.insert(message.id))
            .collect()
    }
}
