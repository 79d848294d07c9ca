/// Known newsletters and the sender/subject fragments that identify them.
const NEWSLETTER_PATTERNS: &[(&str, &[&str])] = &[
    ("TLDR AI", &["tldrnewsletter.com", "tldr ai"]),
    ("Ben's Bites", &["bensbites", "ben's bites"]),
    ("AI Secret", &["aisecret", "ai secret"]),
    ("AI Israel Weekly", &["ai-israel"]),
    ("Aftershoot AI", &["aftershoot"]),
    ("The Rundown AI", &["therundown", "rundown"]),
    ("AI Breakfast", &["aibreakfast"]),
    ("Import AI", &["importai"]),
];

pub const UNKNOWN_NEWSLETTER: &str = "Other AI Newsletter";

/// Label a document by the newsletter that sent it.
pub fn identify_newsletter(from_address: &str, subject: &str) -> String {
    let from_lower = from_address.to_lowercase();
    let subject_lower = subject.to_lowercase();

    NEWSLETTER_PATTERNS
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| from_lower.contains(keyword) || subject_lower.contains(keyword))
        })
        .map(|(label, _)| label.to_string())
        .unwrap_or_else(|| UNKNOWN_NEWSLETTER.to_string())
}
