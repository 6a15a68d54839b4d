use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use scraper::{ElementRef, Html};
use std::time::Duration;
use tracing::{debug, warn};

use crate::links::extract_links;
use crate::models::InboundEmail;
use crate::parser::collapse_whitespace;

const IMAP_PORT: u16 = 993;
const SMTP_PORT: u16 = 587;
const IMAP_TIMEOUT: Duration = Duration::from_secs(15);
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait MailSource: Send + Sync {
    /// Unread INBOX messages in sequence order. Fetching marks them read.
    async fn fetch_unread(&self) -> Result<Vec<InboundEmail>>;
}

#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MailAccount {
    pub imap_host: String,
    pub smtp_host: String,
    pub username: String,
    pub password: String,
}

pub struct ImapMailSource {
    account: MailAccount,
}

impl ImapMailSource {
    pub fn new(account: MailAccount) -> Self {
        Self { account }
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch_unread(&self) -> Result<Vec<InboundEmail>> {
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || fetch_unread_blocking(&account))
            .await
            .context("IMAP task failed")?
    }
}

fn fetch_unread_blocking(account: &MailAccount) -> Result<Vec<InboundEmail>> {
    let tls = native_tls::TlsConnector::builder().build()?;

    let addr = (account.imap_host.as_str(), IMAP_PORT);
    let tcp = std::net::TcpStream::connect(addr)
        .with_context(|| format!("Failed to connect to IMAP server {}", account.imap_host))?;
    tcp.set_read_timeout(Some(IMAP_TIMEOUT))?;
    tcp.set_write_timeout(Some(IMAP_TIMEOUT))?;
    let tls_stream = tls.connect(&account.imap_host, tcp)?;

    let mut client = imap::Client::new(tls_stream);
    client.read_greeting().context("IMAP server sent no greeting")?;
    let mut session = client
        .login(&account.username, &account.password)
        .map_err(|e| anyhow!("Login failed: {}", e.0))?;

    session.select("INBOX")?;

    let mut unseen: Vec<u32> = session.search("UNSEEN")?.into_iter().collect();
    if unseen.is_empty() {
        session.logout()?;
        return Ok(Vec::new());
    }
    unseen.sort_unstable();

    let seq_set = unseen.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
    let fetches = session.fetch(seq_set, "RFC822")?;

    let mut messages: Vec<_> = fetches.iter().collect();
    messages.sort_by_key(|m| m.message);

    let mut emails = Vec::new();
    for message in messages {
        let Some(raw) = message.body() else {
            continue;
        };
        match parse_raw_email(raw) {
            Ok(email) => emails.push(email),
            Err(e) => warn!(seq = message.message, error = %e, "Failed to parse email"),
        }
    }
    debug!(count = emails.len(), "Fetched unread emails");

    session.logout()?;
    Ok(emails)
}

pub fn parse_raw_email(raw: &[u8]) -> Result<InboundEmail> {
    let parsed = parse_mail(raw)?;

    let header = |name: &str| {
        parsed
            .headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let message_id = header("Message-ID").unwrap_or_else(|| format!("unknown-{}", Utc::now().timestamp_millis()));
    let from = header("From").unwrap_or_else(|| "unknown".to_string());
    let subject = header("Subject").unwrap_or_else(|| "(no subject)".to_string());
    let received_at = header("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    let html = find_part(&parsed, "text/html").unwrap_or_default();
    let body = find_part(&parsed, "text/plain")
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| html_to_text(&html));
    let links = extract_links(&body);

    Ok(InboundEmail {
        message_id,
        from,
        subject,
        body,
        html,
        received_at,
        links,
    })
}

// Depth-first, first inline leaf of the given type
fn find_part(part: &ParsedMail, mimetype: &str) -> Option<String> {
    if part.subparts.is_empty() {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            return None;
        }
        if part.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
            return part.get_body().ok();
        }
        return None;
    }
    part.subparts.iter().find_map(|sub| find_part(sub, mimetype))
}

const BLOCK_TAGS: &[&str] = &[
    "br", "p", "div", "tr", "li", "table", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Plain rendering of an HTML part for messages without a `text/plain`
/// alternative. Link targets follow their anchor text in brackets.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let document = Html::parse_document(html);
    let mut out = String::new();
    render_element(document.root_element(), &mut out);

    out.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if matches!(name, "script" | "style" | "head") {
        return;
    }
    let block = BLOCK_TAGS.contains(&name);
    if block {
        out.push('\n');
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            render_element(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
        }
    }
    if name == "a" {
        if let Some(href) = el.value().attr("href").filter(|h| h.starts_with("http")) {
            out.push_str(&format!(" [{}]", href));
        }
    }
    if block {
        out.push('\n');
    }
}

pub struct SmtpMailSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailSink {
    pub fn new(account: &MailAccount) -> Result<Self> {
        let from: Mailbox = account
            .username
            .parse()
            .with_context(|| format!("Invalid sender address: {}", account.username))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.smtp_host)
            .with_context(|| format!("Invalid SMTP host: {}", account.smtp_host))?
            .port(SMTP_PORT)
            .credentials(Credentials::new(account.username.clone(), account.password.clone()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl MailSink for SmtpMailSink {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let to: Mailbox = to.parse().with_context(|| format!("Invalid recipient address: {}", to))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .context("Failed to build digest email")?;

        self.transport.send(message).await.context("SMTP send failed")?;
        Ok(())
    }
}
