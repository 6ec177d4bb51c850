// Copy rendering — turn an origin message into the embed delivered to the
// user's DMs, and read the Source link back out of one.

use std::str::FromStr;

use crate::discord::models::{Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedImage, Message};

use super::link::{LinkError, MessageLink};

/// Name of the field that carries the jump link back to the origin message.
pub const SOURCE_FIELD: &str = "Source";
const ATTACHMENT_FIELD_PREFIX: &str = "Attachment ";
const SOURCE_LABEL: &str = "Jump to message";
const EMBED_COLOR: u32 = 0x3498db;
/// Discord's limit on embed descriptions, in characters.
const MAX_DESCRIPTION: usize = 4096;

/// How non-preview attachments are labelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachmentNumbering {
    /// "Attachment 1", "Attachment 2", ... over the listed attachments only.
    #[default]
    Sequential,
    /// Numbered by position in the original message, so the preview's number
    /// is skipped ("Attachment 1", "Attachment 3", ...).
    Positional,
}

impl FromStr for AttachmentNumbering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "positional" => Ok(Self::Positional),
            other => Err(format!(
                "unknown attachment numbering '{other}' (expected sequential or positional)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Glyph named in the footer's removal hint
    pub delete_glyph: String,
    pub numbering: AttachmentNumbering,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            delete_glyph: "❌".to_string(),
            numbering: AttachmentNumbering::default(),
        }
    }
}

/// Render `message` as a private copy.
pub fn render(message: &Message, guild_name: &str, link: &MessageLink, options: &RenderOptions) -> Embed {
    let preview = message.attachments.iter().position(|a| a.is_image());

    let mut fields = vec![EmbedField {
        name: SOURCE_FIELD.to_string(),
        value: link.markdown(SOURCE_LABEL),
        inline: false,
    }];

    let listed = message
        .attachments
        .iter()
        .enumerate()
        .filter(|(position, _)| Some(*position) != preview);
    for (listed_index, (position, attachment)) in listed.enumerate() {
        let number = match options.numbering {
            AttachmentNumbering::Sequential => listed_index + 1,
            AttachmentNumbering::Positional => position + 1,
        };
        fields.push(EmbedField {
            name: format!("{ATTACHMENT_FIELD_PREFIX}{number}"),
            value: format!("[{}]({})", attachment.filename, attachment.url),
            inline: false,
        });
    }

    Embed {
        title: Some(format!("Bookmark from {guild_name}")),
        description: description(&message.content),
        timestamp: Some(message.timestamp.to_rfc3339()),
        color: Some(EMBED_COLOR),
        author: Some(EmbedAuthor {
            name: message.author.display_name().to_string(),
            icon_url: Some(message.author.avatar_url()),
        }),
        fields,
        footer: Some(EmbedFooter {
            text: format!("React with {} to remove this bookmark", options.delete_glyph),
        }),
        image: preview.map(|i| EmbedImage {
            url: message.attachments[i].url.clone(),
        }),
    }
}

fn description(content: &str) -> Option<String> {
    if content.is_empty() {
        return None;
    }
    if content.chars().count() <= MAX_DESCRIPTION {
        return Some(content.to_string());
    }
    let mut truncated: String = content.chars().take(MAX_DESCRIPTION - 1).collect();
    truncated.push('…');
    Some(truncated)
}

/// Attachment URLs carried by a rendered copy: the preview image first, then
/// every listed attachment in field order.
pub fn attachment_urls(embed: &Embed) -> Vec<String> {
    let listed = embed
        .fields
        .iter()
        .filter(|f| f.name.starts_with(ATTACHMENT_FIELD_PREFIX))
        .filter_map(|f| f.value.rsplit_once("](")?.1.strip_suffix(')'));
    embed
        .image
        .iter()
        .map(|i| i.url.as_str())
        .chain(listed)
        .map(str::to_string)
        .collect()
}

/// Decode the Source link of a rendered copy.
pub fn source_link(embed: &Embed) -> Result<MessageLink, LinkError> {
    let field = embed
        .fields
        .iter()
        .find(|f| f.name == SOURCE_FIELD)
        .ok_or(LinkError::Missing)?;
    MessageLink::from_markdown(&field.value)
}

/// Decode the Source link of a delivered copy message: the first embed that
/// has a Source field decides.
pub fn source_link_of(message: &Message) -> Result<MessageLink, LinkError> {
    let embed = message
        .embeds
        .iter()
        .find(|e| e.fields.iter().any(|f| f.name == SOURCE_FIELD))
        .ok_or(LinkError::Missing)?;
    source_link(embed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::models::{Attachment, User};
    use chrono::{TimeZone, Utc};

    fn attachment(n: u32, content_type: Option<&str>) -> Attachment {
        Attachment {
            id: n.to_string(),
            filename: format!("file{n}"),
            url: format!("https://cdn.example/file{n}"),
            content_type: content_type.map(str::to_string),
        }
    }

    fn message(content: &str, attachments: Vec<Attachment>) -> Message {
        Message {
            id: "300".to_string(),
            channel_id: "200".to_string(),
            content: content.to_string(),
            author: User {
                id: "9".to_string(),
                username: "bea".to_string(),
                global_name: None,
                avatar: None,
                bot: false,
            },
            attachments,
            embeds: Vec::new(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn link() -> MessageLink {
        MessageLink::new("100", "200", "300")
    }

    fn attachment_fields(embed: &Embed) -> Vec<(String, String)> {
        embed
            .fields
            .iter()
            .filter(|f| f.name != SOURCE_FIELD)
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }

    #[test]
    fn renders_header_body_and_source() {
        let embed = render(&message("hello there", vec![]), "Rustaceans", &link(), &RenderOptions::default());
        assert_eq!(embed.title.as_deref(), Some("Bookmark from Rustaceans"));
        assert_eq!(embed.description.as_deref(), Some("hello there"));
        assert_eq!(embed.author.as_ref().unwrap().name, "bea");
        assert_eq!(embed.timestamp.as_deref(), Some("2024-03-01T12:00:00+00:00"));
        assert_eq!(embed.color, Some(0x3498db));
        assert_eq!(embed.fields.len(), 1);
        assert_eq!(
            embed.fields[0].value,
            "[Jump to message](https://discord.com/channels/100/200/300)"
        );
        assert_eq!(
            embed.footer.as_ref().unwrap().text,
            "React with ❌ to remove this bookmark"
        );
        assert!(embed.image.is_none());
    }

    #[test]
    fn attachment_urls_lists_preview_then_fields() {
        let attachments = vec![
            attachment(1, Some("text/plain")),
            attachment(2, Some("image/png")),
            attachment(3, None),
        ];
        let embed = render(&message("x", attachments), "g", &link(), &RenderOptions::default());
        assert_eq!(
            attachment_urls(&embed),
            [
                "https://cdn.example/file2",
                "https://cdn.example/file1",
                "https://cdn.example/file3",
            ]
        );
        assert!(attachment_urls(&render(&message("x", vec![]), "g", &link(), &RenderOptions::default())).is_empty());
    }

    #[test]
    fn empty_content_has_no_description() {
        let embed = render(&message("", vec![]), "g", &link(), &RenderOptions::default());
        assert!(embed.description.is_none());
    }

    #[test]
    fn long_content_is_truncated() {
        let long = "a".repeat(MAX_DESCRIPTION + 10);
        let embed = render(&message(&long, vec![]), "g", &link(), &RenderOptions::default());
        let description = embed.description.unwrap();
        assert_eq!(description.chars().count(), MAX_DESCRIPTION);
        assert!(description.ends_with('…'));
    }

    #[test]
    fn first_image_becomes_preview() {
        let attachments = vec![
            attachment(1, Some("application/pdf")),
            attachment(2, Some("image/png")),
            attachment(3, Some("image/jpeg")),
        ];
        let embed = render(&message("x", attachments), "g", &link(), &RenderOptions::default());
        assert_eq!(embed.image.unwrap().url, "https://cdn.example/file2");
    }

    #[test]
    fn sequential_numbering_renumbers_after_preview() {
        let attachments = vec![
            attachment(1, Some("text/plain")),
            attachment(2, Some("image/png")),
            attachment(3, None),
            attachment(4, Some("image/gif")),
        ];
        let embed = render(&message("x", attachments), "g", &link(), &RenderOptions::default());
        let names: Vec<String> = attachment_fields(&embed).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Attachment 1", "Attachment 2", "Attachment 3"]);
        assert_eq!(
            attachment_fields(&embed)[1].1,
            "[file3](https://cdn.example/file3)"
        );
    }

    #[test]
    fn positional_numbering_skips_preview_number() {
        let attachments = vec![
            attachment(1, Some("text/plain")),
            attachment(2, Some("image/png")),
            attachment(3, None),
            attachment(4, Some("image/gif")),
        ];
        let options = RenderOptions {
            numbering: AttachmentNumbering::Positional,
            ..Default::default()
        };
        let embed = render(&message("x", attachments), "g", &link(), &options);
        let names: Vec<String> = attachment_fields(&embed).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Attachment 1", "Attachment 3", "Attachment 4"]);
    }

    #[test]
    fn no_image_lists_every_attachment() {
        let attachments = vec![attachment(1, None), attachment(2, Some("video/mp4"))];
        let embed = render(&message("x", attachments), "g", &link(), &RenderOptions::default());
        assert!(embed.image.is_none());
        assert_eq!(attachment_fields(&embed).len(), 2);
    }

    #[test]
    fn footer_names_configured_glyph() {
        let options = RenderOptions {
            delete_glyph: "🗑️".to_string(),
            ..Default::default()
        };
        let embed = render(&message("x", vec![]), "g", &link(), &options);
        assert_eq!(embed.footer.unwrap().text, "React with 🗑️ to remove this bookmark");
    }

    #[test]
    fn source_link_recovers_origin() {
        let embed = render(&message("x", vec![attachment(1, None)]), "g", &link(), &RenderOptions::default());
        assert_eq!(source_link(&embed).unwrap(), link());
    }

    #[test]
    fn source_link_missing_or_mangled() {
        let mut embed = render(&message("x", vec![]), "g", &link(), &RenderOptions::default());
        embed.fields[0].value = "[Jump to message](https://discord.com/channels/100/200)".to_string();
        assert!(matches!(source_link(&embed), Err(LinkError::UnexpectedPath(_))));
        embed.fields.clear();
        assert_eq!(source_link(&embed), Err(LinkError::Missing));
    }

    #[test]
    fn source_link_of_message_skips_foreign_embeds() {
        let mut copy = message("", vec![]);
        copy.embeds = vec![
            Embed {
                title: Some("unrelated".to_string()),
                ..Default::default()
            },
            render(&message("x", vec![]), "g", &link(), &RenderOptions::default()),
        ];
        assert_eq!(source_link_of(&copy).unwrap(), link());

        copy.embeds.truncate(1);
        assert_eq!(source_link_of(&copy), Err(LinkError::Missing));
    }

    #[test]
    fn numbering_parses_case_insensitively() {
        assert_eq!("Positional".parse::<AttachmentNumbering>(), Ok(AttachmentNumbering::Positional));
        assert_eq!(" sequential ".parse::<AttachmentNumbering>(), Ok(AttachmentNumbering::Sequential));
        assert!("alphabetical".parse::<AttachmentNumbering>().is_err());
    }
}
