//! Builds outgoing messages and their tagged Message-IDs.

use crate::core::error::{AppError, Result};
use crate::core::models::{MessageCategory, SendRequest};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::Message;
use rand::Rng;

/// Per-run settings applied to every composed message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Prefix placed before the UUID in the Message-ID local part.
    pub custom_tag: Option<String>,
    /// Also set `References` to the generated Message-ID.
    pub references: bool,
    /// Set `Reply-To` to the sender.
    pub reply_to_sender: bool,
}

/// Inserts `tag` into `local` at a random char boundary after the first character.
pub fn insert_tag<R: Rng + ?Sized>(local: &str, tag: &str, rng: &mut R) -> String {
    if tag.is_empty() {
        return local.to_string();
    }
    if local.is_empty() {
        return tag.to_string();
    }
    let boundaries: Vec<usize> = local
        .char_indices()
        .map(|(i, _)| i)
        .skip(1)
        .chain(std::iter::once(local.len()))
        .collect();
    let pos = boundaries[rng.gen_range(0..boundaries.len())];
    format!("{}{}{}", &local[..pos], tag, &local[pos..])
}

/// Generates `<local@sender-domain>` with the category tag spliced into `local`.
pub fn generate_message_id<R: Rng + ?Sized>(
    sender: &str,
    category: MessageCategory,
    custom_tag: Option<&str>,
    rng: &mut R,
) -> Result<String> {
    let domain = sender
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>'))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::MessageBuild(format!("sender has no domain: {}", sender)))?;

    let uuid = uuid::Uuid::new_v4();
    let base_local = match custom_tag.filter(|t| !t.is_empty()) {
        Some(tag) => format!("{}-{}", tag, uuid),
        None => uuid.to_string(),
    };
    let local = insert_tag(&base_local, category.tag(), rng);
    Ok(format!("<{}@{}>", local, domain))
}

/// Composes the message for `request`, returning it with its Message-ID.
pub fn compose(request: &SendRequest, options: &ComposeOptions) -> Result<(Message, String)> {
    let message_id = generate_message_id(
        &request.sender,
        request.category,
        options.custom_tag.as_deref(),
        &mut rand::thread_rng(),
    )?;

    let from: Mailbox = request.sender.parse()?;
    let to: Mailbox = request.recipient.parse()?;

    let mut builder = Message::builder()
        .from(from.clone())
        .to(to)
        .subject(request.message.subject.clone().unwrap_or_default())
        .message_id(Some(message_id.clone()));
    if options.references {
        builder = builder.references(message_id.clone());
    }
    if options.reply_to_sender {
        builder = builder.reply_to(from);
    }

    let message = match request.message.body_parts() {
        (Some(text), Some(html)) => builder.multipart(MultiPart::alternative_plain_html(
            text.to_string(),
            html.to_string(),
        ))?,
        (None, Some(html)) => {
            builder.multipart(MultiPart::mixed().singlepart(SinglePart::html(html.to_string())))?
        }
        (text, None) => builder.multipart(
            MultiPart::mixed().singlepart(SinglePart::plain(text.unwrap_or_default().to_string())),
        )?,
    };

    Ok((message, message_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TemplateMessage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn request(text: Option<&str>, html: Option<&str>) -> SendRequest {
        SendRequest {
            sender: "alice@warm.example".into(),
            recipient: "seed@inbox.example".into(),
            message: TemplateMessage {
                subject: Some("Quarterly check-in".into()),
                plain_text: text.map(str::to_string),
                html: html.map(str::to_string),
                ..TemplateMessage::default()
            },
            category: MessageCategory::Warmup,
        }
    }

    #[test]
    fn tag_never_lands_at_position_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let tagged = insert_tag("abcdef", "-mldz", &mut rng);
            assert_eq!(tagged.len(), 11);
            assert!(tagged.starts_with('a'));
            assert_eq!(tagged.replace("-mldz", ""), "abcdef");
        }
    }

    #[test]
    fn tag_may_land_at_the_end() {
        let mut rng = StdRng::seed_from_u64(1);
        let seen_end = (0..500).any(|_| insert_tag("ab", "-x", &mut rng) == "ab-x");
        assert!(seen_end);
    }

    #[test]
    fn message_id_uses_sender_domain_and_category_tag() {
        let mut rng = StdRng::seed_from_u64(3);
        let id = generate_message_id("bob@brand.io", MessageCategory::Spam, None, &mut rng).unwrap();
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@brand.io>"));
        assert!(id.contains("-smdz"));
        // uuid (36) + tag (5) + brackets/at/domain
        assert_eq!(id.len(), 1 + 36 + 5 + 1 + "brand.io".len() + 1);
    }

    #[test]
    fn message_id_keeps_custom_tag_prefix() {
        let mut rng = StdRng::seed_from_u64(3);
        let id = generate_message_id("bob@brand.io", MessageCategory::Warmup, Some("curious-gepard"), &mut rng)
            .unwrap();
        let local = id.trim_start_matches('<').split('@').next().unwrap().replace("-mldz", "");
        assert!(local.starts_with("curious-gepard-"));
    }

    #[test]
    fn sender_without_domain_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(generate_message_id("nobody", MessageCategory::Warmup, None, &mut rng).is_err());
    }

    #[test]
    fn composes_alternative_when_both_bodies_exist() {
        let (message, id) = compose(
            &request(Some("hello"), Some("<p>hello</p>")),
            &ComposeOptions {
                references: true,
                ..ComposeOptions::default()
            },
        )
        .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains(&format!("Message-ID: {}", id)));
        assert!(raw.contains(&format!("References: {}", id)));
        assert!(raw.contains("Subject: Quarterly check-in"));
        assert!(!raw.contains("Reply-To:"));
    }

    #[test]
    fn reply_to_mirrors_sender() {
        let (message, _) = compose(
            &request(Some("hello"), None),
            &ComposeOptions {
                reply_to_sender: true,
                ..ComposeOptions::default()
            },
        )
        .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Reply-To: alice@warm.example"));
    }

    #[test]
    fn composes_single_part_bodies() {
        let (html_only, _) = compose(&request(None, Some("<b>hi</b>")), &ComposeOptions::default()).unwrap();
        let raw = String::from_utf8(html_only.formatted()).unwrap();
        assert!(raw.contains("text/html"));
        assert!(!raw.contains("multipart/alternative"));
        assert!(!raw.contains("References:"));

        let (text_only, _) = compose(&request(Some(""), None), &ComposeOptions::default()).unwrap();
        let raw = String::from_utf8(text_only.formatted()).unwrap();
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn invalid_recipient_fails_to_compose() {
        let mut req = request(Some("x"), None);
        req.recipient = "not-an-address".into();
        assert!(compose(&req, &ComposeOptions::default()).is_err());
    }
}
