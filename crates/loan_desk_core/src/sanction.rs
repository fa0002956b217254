//! crates/loan_desk_core/src/sanction.rs
//!
//! Sanction letters: recognising approval messages from the assistant and
//! turning them into a downloadable letter.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

const DEFAULT_CUSTOMER: &str = "Valued Customer";
const DEFAULT_AMOUNT: &str = "5,00,000";

fn customer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)for\s+([A-Za-z\s]+?)\s+(?:for|of|has)").expect("customer pattern is valid")
    })
}

fn amount_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:₹|Rs\.?)\s?(\d[\d,]*)").expect("amount pattern is valid")
    })
}

/// True when the text announces a generated or approved sanction letter.
pub fn is_sanction_letter(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("sanction letter")
        && ["approved", "generated", "success"]
            .iter()
            .any(|word| lower.contains(word))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanctionLetter {
    pub customer: String,
    pub amount: String,
    pub issued_on: NaiveDate,
}

impl SanctionLetter {
    /// Pulls the customer name and amount out of an approval message,
    /// falling back to placeholders when the text does not carry them.
    pub fn from_message(text: &str, issued_on: NaiveDate) -> Self {
        let customer = customer_pattern()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_CUSTOMER.to_string());
        let amount = amount_pattern()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_end_matches(',').to_string())
            .unwrap_or_else(|| DEFAULT_AMOUNT.to_string());
        Self {
            customer,
            amount,
            issued_on,
        }
    }

    pub fn file_name(&self) -> String {
        format!("Sanction_Letter_{}.txt", self.customer.replace(' ', "_"))
    }

    pub fn render(&self) -> String {
        format!(
            "ByteFinance\n\
             \n\
             SANCTION LETTER\n\
             \n\
             Date: {date}\n\
             To: {customer}\n\
             \n\
             Dear Customer,\n\
             We are pleased to inform you that your loan application has been\n\
             provisionally APPROVED based on your credit profile.\n\
             \n\
             Approved Amount: Rs. {amount}\n\
             Interest Rate: 8.5% p.a.\n\
             Tenure: Flexible\n",
            date = self.issued_on.format("%d/%m/%Y"),
            customer = self.customer,
            amount = self.amount,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn detects_approval_messages_only() {
        assert!(is_sanction_letter(
            "SUCCESS: Sanction Letter Generated. Your loan of ₹5,00,000 is approved!"
        ));
        assert!(!is_sanction_letter("Shall I prepare your sanction letter?"));
        assert!(!is_sanction_letter("Your loan is approved."));
    }

    #[test]
    fn extracts_name_and_amount() {
        let letter = SanctionLetter::from_message(
            "Sanction letter generated for Asha Rao has been approved for Rs. 3,50,000.",
            day(),
        );
        assert_eq!(letter.customer, "Asha Rao");
        assert_eq!(letter.amount, "3,50,000");
        assert_eq!(letter.file_name(), "Sanction_Letter_Asha_Rao.txt");
        assert!(letter.render().contains("Approved Amount: Rs. 3,50,000"));
        assert!(letter.render().contains("Date: 19/10/2026"));
    }

    #[test]
    fn falls_back_to_placeholders() {
        let letter = SanctionLetter::from_message("SUCCESS: Sanction Letter Generated.", day());
        assert_eq!(letter.customer, DEFAULT_CUSTOMER);
        assert_eq!(letter.amount, DEFAULT_AMOUNT);
    }
}
