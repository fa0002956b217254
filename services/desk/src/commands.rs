//! services/desk/src/commands.rs
//!
//! Parses one line of terminal input. Lines starting with `/` are commands;
//! anything else is a chat message.

use loan_desk_core::domain::{ContactChannel, LoanTopic, VaultSlot};
use std::path::PathBuf;

/// A profile field editable from the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Phone,
    City,
    Pan,
    Salary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Help,
    Topics,
    Start(LoanTopic),
    NewChat,
    Chats,
    /// Zero-based index into the chat list.
    Switch(usize),
    Rename(String),
    Status,
    Letter,
    Profile,
    Set(ProfileField, String),
    Save,
    Verify(ContactChannel),
    Upload(VaultSlot, PathBuf),
    AddDocument,
    RemoveDocument(usize),
    RenameDocument(usize, String),
    SignUp { email: String, password: String },
    SignIn { email: String, password: String },
    SignOut,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unknown command /{0}. Type /help for the list.")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

/// Reads a 1-based list position as a zero-based index.
fn position(raw: &str, usage: &'static str) -> Result<usize, ParseError> {
    raw.parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .map(|n| n - 1)
        .ok_or(ParseError::Usage(usage))
}

fn credentials(rest: &str, usage: &'static str) -> Result<(String, String), ParseError> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(email), Some(password), None) => Ok((email.to_string(), password.to_string())),
        _ => Err(ParseError::Usage(usage)),
    }
}

pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let Some(body) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };
    let (name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let rest = rest.trim();

    let command = match name.to_ascii_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "topics" | "home" => Command::Topics,
        "start" => {
            const USAGE: &str = "/start <home|personal|education|car>";
            let topic = match rest.parse::<usize>() {
                Ok(n) if (1..=LoanTopic::ALL.len()).contains(&n) => LoanTopic::ALL[n - 1],
                _ => rest.parse().map_err(|_| ParseError::Usage(USAGE))?,
            };
            Command::Start(topic)
        }
        "new" => Command::NewChat,
        "chats" => Command::Chats,
        "switch" => Command::Switch(position(rest, "/switch <n>")?),
        "rename" => Command::Rename(rest.to_string()),
        "status" => Command::Status,
        "letter" => Command::Letter,
        "profile" => Command::Profile,
        "set" => {
            const USAGE: &str = "/set <name|phone|city|pan|salary> <value>";
            let (field, value) = rest.split_once(char::is_whitespace).ok_or(ParseError::Usage(USAGE))?;
            let field = match field.to_ascii_lowercase().as_str() {
                "name" => ProfileField::Name,
                "phone" => ProfileField::Phone,
                "city" => ProfileField::City,
                "pan" => ProfileField::Pan,
                "salary" => ProfileField::Salary,
                _ => return Err(ParseError::Usage(USAGE)),
            };
            Command::Set(field, value.trim().to_string())
        }
        "save" => Command::Save,
        "verify" => match rest.to_ascii_lowercase().as_str() {
            "email" => Command::Verify(ContactChannel::Email),
            "phone" => Command::Verify(ContactChannel::Phone),
            _ => return Err(ParseError::Usage("/verify <email|phone>")),
        },
        "upload" => {
            const USAGE: &str = "/upload <pan|salary|n> <file>";
            let (slot, file) = rest.split_once(char::is_whitespace).ok_or(ParseError::Usage(USAGE))?;
            let slot = match slot.to_ascii_lowercase().as_str() {
                "pan" => VaultSlot::PanCard,
                "salary" => VaultSlot::SalarySlip,
                other => VaultSlot::Custom(position(other, USAGE)?),
            };
            Command::Upload(slot, PathBuf::from(file.trim()))
        }
        "adddoc" => Command::AddDocument,
        "rmdoc" => Command::RemoveDocument(position(rest, "/rmdoc <n>")?),
        "renamedoc" => {
            const USAGE: &str = "/renamedoc <n> <name>";
            let (index, name) = rest.split_once(char::is_whitespace).ok_or(ParseError::Usage(USAGE))?;
            Command::RenameDocument(position(index, USAGE)?, name.trim().to_string())
        }
        "signup" => {
            let (email, password) = credentials(rest, "/signup <email> <password>")?;
            Command::SignUp { email, password }
        }
        "signin" | "login" => {
            let (email, password) = credentials(rest, "/signin <email> <password>")?;
            Command::SignIn { email, password }
        }
        "signout" | "logout" => Command::SignOut,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse("  hello there "), Ok(Command::Send("hello there".into())));
        assert_eq!(parse(""), Ok(Command::Send(String::new())));
    }

    #[test]
    fn topics_by_name_or_card_number() {
        assert_eq!(parse("/start home"), Ok(Command::Start(LoanTopic::HomeLoan)));
        assert_eq!(parse("/start 4"), Ok(Command::Start(LoanTopic::CarLoan)));
        assert!(matches!(parse("/start 9"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn positions_are_one_based() {
        assert_eq!(parse("/switch 1"), Ok(Command::Switch(0)));
        assert!(parse("/switch 0").is_err());
        assert_eq!(
            parse("/upload 2 ./form16.pdf"),
            Ok(Command::Upload(VaultSlot::Custom(1), PathBuf::from("./form16.pdf")))
        );
        assert_eq!(
            parse("/renamedoc 1 Form 16"),
            Ok(Command::RenameDocument(0, "Form 16".into()))
        );
    }

    #[test]
    fn profile_and_account_commands() {
        assert_eq!(
            parse("/set salary 85,000"),
            Ok(Command::Set(ProfileField::Salary, "85,000".into()))
        );
        assert_eq!(parse("/verify PHONE"), Ok(Command::Verify(ContactChannel::Phone)));
        assert_eq!(
            parse("/signin a@b.c pw"),
            Ok(Command::SignIn { email: "a@b.c".into(), password: "pw".into() })
        );
        assert!(parse("/signup a@b.c").is_err());
        assert_eq!(parse("/rename"), Ok(Command::Rename(String::new())));
        assert_eq!(parse("/bogus"), Err(ParseError::Unknown("bogus".into())));
    }
}
