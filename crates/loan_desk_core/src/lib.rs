pub mod chat;
pub mod document;
pub mod domain;
pub mod ports;
pub mod profile;
pub mod sanction;
pub mod status;

pub use chat::{ActiveChat, ChatSessionManager, IgnoreReason, SendOutcome, View};
pub use domain::{
    AuthSession, AuthUser, ChatId, ChatSession, ChatSummary, ContactChannel, ExtraDocument,
    LoanStage, LoanTopic, Message, Role, UserProfile, VaultSlot,
};
pub use ports::{
    ChatBackend, ChatRequest, DocumentStore, IdentityProvider, ObjectStore, PortError, PortResult,
};
pub use profile::ProfileVault;
pub use sanction::SanctionLetter;
pub use status::{LoanStatusAggregator, LoanStatusSnapshot, RepaymentView};
