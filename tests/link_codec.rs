// Link codec through the public API — a rendered copy must always lead back
// to the message it was made from, and anything else must be rejected.

use chrono::Utc;

use dogear::bookmark::link::{LinkError, MessageLink};
use dogear::bookmark::render::{render, source_link, RenderOptions};
use dogear::bookmark::BookmarkError;
use dogear::discord::memory::user;
use dogear::discord::models::Message;

fn message(id: &str, channel_id: &str) -> Message {
    Message {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        content: "saved for later".to_string(),
        author: user("3001", "bea"),
        attachments: Vec::new(),
        embeds: Vec::new(),
        timestamp: Utc::now(),
    }
}

#[test]
fn rendered_copies_lead_back_to_their_origin() {
    let cases = [
        ("1", "2", "3"),
        ("81384788765712384", "381870553235193857", "1095370126497853450"),
        ("18446744073709551615", "1", "18446744073709551615"),
    ];
    for (guild, channel, id) in cases {
        let link = MessageLink::new(guild, channel, id);
        let embed = render(&message(id, channel), "Rustaceans", &link, &RenderOptions::default());
        let decoded = source_link(&embed).unwrap();
        assert_eq!(decoded.guild_id, guild);
        assert_eq!(decoded.channel_id, channel);
        assert_eq!(decoded.message_id, id);
    }
}

#[test]
fn malformed_links_become_malformed_input() {
    let bad = [
        "https://discord.com/channels/1/2",
        "https://discord.com/channels/1/2/3/4",
        "https://evil.example/channels/1/2/3",
        "https://discord.com/channels/@me/2/3",
        "https://discord.com/channels/1/2/18446744073709551616",
        "discord.com/channels/1/2/3",
    ];
    for input in bad {
        let err: BookmarkError = MessageLink::parse(input).unwrap_err().into();
        assert!(
            matches!(err, BookmarkError::MalformedInput(_)),
            "{input} should be rejected"
        );
    }
}

#[test]
fn parse_via_from_str() {
    let link: MessageLink = "https://discord.com/channels/1/2/3".parse().unwrap();
    assert_eq!(link, MessageLink::new("1", "2", "3"));
    assert_eq!("".parse::<MessageLink>(), Err(LinkError::InvalidUrl(String::new())));
}
