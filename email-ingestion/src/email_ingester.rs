use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interfaces::defs::{Document, DocumentSource};
use interfaces::labels::identify_newsletter;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use url::Url;

/// Most recent messages fetched in one collection.
pub const MAX_MESSAGES: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct MailboxCredential {
    pub email_address: String,
    pub password: String,
    pub last_sync_date: Option<DateTime<Utc>>,
}

/// What to do with messages once their digests were produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AckAction {
    MarkSeen,
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MailboxConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    pub use_tls: bool,
    pub accept_invalid_certs: bool,
    pub accept_invalid_hostnames: bool,
    pub last_sync_date: Option<DateTime<Utc>>,
    pub ack_action: AckAction,
}

fn query_flag(uri: &Url, key: &str, default: bool) -> bool {
    uri.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.parse().unwrap_or(default))
        .unwrap_or(default)
}

impl MailboxConfig {
    /// Parse a mailbox URI plus credentials.
    /// Expected URI format: email://username@server:port/mailbox?tls=true&ack=seen
    pub fn from_uri_and_credentials(uri: &str, credentials: &MailboxCredential) -> Result<Self> {
        let parsed_uri = Url::parse(uri)
            .map_err(|e| anyhow::anyhow!("Invalid email URI '{}': {}", uri, e))?;

        if parsed_uri.scheme() != "email" {
            return Err(anyhow::anyhow!("URI must use 'email://' scheme, got: {}", parsed_uri.scheme()));
        }

        let server = parsed_uri.host_str()
            .ok_or_else(|| anyhow::anyhow!("No server specified in URI: {}", uri))?
            .to_string();

        let port = parsed_uri.port().unwrap_or(993);

        let username = match parsed_uri.username() {
            "" => credentials.email_address.clone(),
            user => user.replace("%40", "@"),
        };

        let mailbox = match parsed_uri.path().trim_start_matches('/') {
            "" => "INBOX".to_string(),
            path => path.to_string(),
        };

        let ack_action = match parsed_uri.query_pairs().find(|(key, _)| key == "ack") {
            None => AckAction::MarkSeen,
            Some((_, value)) if value == "seen" => AckAction::MarkSeen,
            Some((_, value)) if value == "delete" => AckAction::Delete,
            Some((_, value)) => {
                return Err(anyhow::anyhow!("Unknown ack action '{}' in URI: {}", value, uri))
            }
        };

        Ok(Self {
            server,
            port,
            username,
            password: credentials.password.clone(),
            mailbox,
            use_tls: query_flag(&parsed_uri, "tls", true),
            // Only meant for local test servers
            accept_invalid_certs: query_flag(&parsed_uri, "accept_invalid_certs", false),
            accept_invalid_hostnames: query_flag(&parsed_uri, "accept_invalid_hostnames", false),
            last_sync_date: credentials.last_sync_date,
            ack_action,
        })
    }

    /// IMAP SEARCH criteria for the pending messages.
    pub fn search_criteria(&self) -> String {
        match &self.last_sync_date {
            Some(last_sync) => format!("SINCE {}", last_sync.format("%d-%b-%Y")),
            None => "ALL".to_string(),
        }
    }
}

/// Build a document from one raw RFC822 message.
pub fn message_to_document(uid: u32, raw: &[u8]) -> Result<Document> {
    let parsed = mail_parser::MessageParser::default()
        .parse(raw)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse email {}", uid))?;

    let from = parsed.from()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| addr.address.as_ref())
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let subject = parsed.subject().unwrap_or("(No Subject)").to_string();

    let body_text = parsed.body_text(0)
        .map(|body| body.into_owned())
        .unwrap_or_default();

    let id = format!("{}_{}", uid, parsed.message_id().unwrap_or("unknown"));
    let label = identify_newsletter(&from, &subject);

    let mut document = Document::new(id, label, body_text.trim())
        .with_subject(subject)
        .with_sender(from);
    if let Some(date) = parsed.date() {
        document = document.with_received_at(date.to_rfc3339());
    }
    Ok(document)
}

fn connect(config: &MailboxConfig) -> Result<imap::Session<native_tls::TlsStream<std::net::TcpStream>>> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .danger_accept_invalid_hostnames(config.accept_invalid_hostnames)
        .build()?;

    let client = if config.use_tls {
        imap::connect((config.server.as_str(), config.port), &config.server, &tls)?
    } else {
        imap::connect_starttls((config.server.as_str(), config.port), &config.server, &tls)?
    };

    let mut session = client.login(&config.username, &config.password)
        .map_err(|(e, _)| anyhow::anyhow!("Login failed for {}: {}", config.username, e))?;
    session.select(&config.mailbox)?;
    Ok(session)
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",")
}

fn fetch_raw_messages(config: &MailboxConfig) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut session = connect(config)?;

    let mut uids: Vec<u32> = session.uid_search(config.search_criteria())?.into_iter().collect();
    uids.sort_unstable();
    if uids.len() > MAX_MESSAGES {
        uids = uids.split_off(uids.len() - MAX_MESSAGES);
    }

    if uids.is_empty() {
        session.logout()?;
        return Ok(Vec::new());
    }

    let fetches = session.uid_fetch(uid_set(&uids), "RFC822")?;
    let mut raw_messages: Vec<(u32, Vec<u8>)> = fetches
        .iter()
        .filter_map(|fetch| match (fetch.uid, fetch.body()) {
            (Some(uid), Some(body)) => Some((uid, body.to_vec())),
            _ => None,
        })
        .collect();
    raw_messages.sort_by_key(|(uid, _)| *uid);

    session.logout()?;
    Ok(raw_messages)
}

fn acknowledge_uids(config: &MailboxConfig, uids: &[u32]) -> Result<()> {
    let mut session = connect(config)?;
    match config.ack_action {
        AckAction::MarkSeen => {
            session.uid_store(uid_set(uids), "+FLAGS (\\Seen)")?;
        }
        AckAction::Delete => {
            session.uid_store(uid_set(uids), "+FLAGS (\\Deleted)")?;
            session.expunge()?;
        }
    }
    session.logout()?;
    Ok(())
}

/// Newsletter emails from an IMAP mailbox, oldest first.
pub struct ImapMailboxSource {
    config: MailboxConfig,
    pending: HashMap<String, u32>,
}

impl ImapMailboxSource {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }
}

#[async_trait]
impl DocumentSource for ImapMailboxSource {
    fn source_name(&self) -> String {
        format!("imap://{}/{}", self.config.server, self.config.mailbox)
    }

    async fn collect(&mut self) -> Result<Vec<Document>> {
        let config = self.config.clone();
        let raw_messages = tokio::task::spawn_blocking(move || fetch_raw_messages(&config)).await??;
        info!("Fetched {} messages from {}", raw_messages.len(), self.source_name());

        self.pending.clear();
        let mut documents = Vec::with_capacity(raw_messages.len());
        for (uid, raw) in raw_messages {
            match message_to_document(uid, &raw) {
                Ok(document) => {
                    debug!("Message {} labelled {}", uid, document.source_label);
                    self.pending.insert(document.id.clone(), uid);
                    documents.push(document);
                }
                Err(e) => warn!("Skipping message {}: {}", uid, e),
            }
        }
        Ok(documents)
    }

    async fn acknowledge(&mut self, documents: &[Document]) -> Result<()> {
        let uids: Vec<u32> = documents
            .iter()
            .filter_map(|document| self.pending.remove(&document.id))
            .collect();
        if uids.is_empty() {
            return Ok(());
        }

        let config = self.config.clone();
        let count = uids.len();
        tokio::task::spawn_blocking(move || acknowledge_uids(&config, &uids)).await??;
        info!("Acknowledged {} messages ({:?})", count, self.config.ack_action);
        Ok(())
    }
}
