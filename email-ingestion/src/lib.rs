pub mod email_ingester;

pub use email_ingester::{AckAction, ImapMailboxSource, MailboxConfig, MailboxCredential};
