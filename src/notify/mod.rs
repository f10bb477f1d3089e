// src/notify/mod.rs
pub mod stdout;
pub mod webhook;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::event::Event;

/// Body markup for rendered notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgFormat {
    #[default]
    Text,
    Markdown,
    Html,
}

/// One rendered, consumer-specific notification.
///
/// `name` is the message's scheduling identity: deferred sends register a
/// one-shot job under it, so it must be stable per release.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub name: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub format: MsgFormat,
    pub send_time: DateTime<Utc>,
}

/// A notification transport. `send` reports per-message success; retry
/// policy is the transport's own concern.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, msg: &Message) -> Result<()>;
    fn name(&self) -> &str;
}

/// Render one event into the consumer's configured format. All formats carry
/// the same field set; only the markup differs.
pub fn render_message(source: &str, event: &Event, format: MsgFormat) -> Result<Message> {
    let r = &event.release;
    if r.name.is_empty() {
        return Err(anyhow!("release has no name, cannot render"));
    }
    let start_time = r.release_time.format("%Y-%m-%d %H:%M").to_string();
    let body = match format {
        MsgFormat::Markdown => format!(
            "*Release Name:* {}\n\
             *video_id:* {}\n\
             *start_time:* {}\n\
             *image:* [Image]({})\n\
             *collection_id:* {}\n\
             *genre_id:* {}\n\
             *country:* {}\n\
             *url:* {}",
            r.name, r.video_id, start_time, r.image, r.collection_id, r.genre_id, r.country, r.url
        ),
        MsgFormat::Html => format!(
            "<b>Release Name:</b> {}<br>\
             <b>video_id:</b> {}<br>\
             <b>start_time:</b> {}<br>\
             <b>image:</b> <a href='{}'>Image</a><br>\
             <b>collection_id:</b> {}<br>\
             <b>genre_id:</b> {}<br>\
             <b>country:</b> {}<br>\
             <b>url:</b> {}",
            r.name, r.video_id, start_time, r.image, r.collection_id, r.genre_id, r.country, r.url
        ),
        MsgFormat::Text => format!(
            "Release Name: {}\n\
             video_id: {}\n\
             start_time: {}\n\
             image: {}\n\
             collection_id: {}\n\
             genre_id: {}\n\
             country: {}\n\
             url: {}",
            r.name, r.video_id, start_time, r.image, r.collection_id, r.genre_id, r.country, r.url
        ),
    };
    Ok(Message {
        name: r.name.clone(),
        title: format!("{source} New Release"),
        body,
        tags: Vec::new(),
        format,
        send_time: r.release_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Release};

    fn sample_event() -> Event {
        Event {
            fingerprint: "fp".into(),
            release: Release {
                name: "Dune Part Two".into(),
                video_id: 81012345,
                country: "HK".into(),
                release_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                collection_id: 7,
                image: "https://img.example/dune.jpg".into(),
                genre_id: 3,
                url: "https://www.netflix.com/watch/81012345".into(),
            },
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn text_body_lists_every_field() {
        let msg = render_message("netflix", &sample_event(), MsgFormat::Text).unwrap();
        assert_eq!(msg.title, "netflix New Release");
        assert_eq!(msg.name, "Dune Part Two");
        for needle in [
            "Release Name: Dune Part Two",
            "video_id: 81012345",
            "collection_id: 7",
            "genre_id: 3",
            "country: HK",
            "url: https://www.netflix.com/watch/81012345",
        ] {
            assert!(msg.body.contains(needle), "missing {needle:?} in {}", msg.body);
        }
    }

    #[test]
    fn markdown_and_html_use_their_markup() {
        let ev = sample_event();
        let md = render_message("netflix", &ev, MsgFormat::Markdown).unwrap();
        assert!(md.body.contains("*Release Name:*"));
        assert!(md.body.contains("[Image](https://img.example/dune.jpg)"));
        let html = render_message("netflix", &ev, MsgFormat::Html).unwrap();
        assert!(html.body.contains("<b>Release Name:</b>"));
        assert!(html.body.contains("<a href='https://img.example/dune.jpg'>"));
    }

    #[test]
    fn send_time_follows_release_time() {
        let ev = sample_event();
        let msg = render_message("netflix", &ev, MsgFormat::Text).unwrap();
        assert_eq!(msg.send_time, ev.release.release_time);
    }

    #[test]
    fn rendering_fails_without_a_name() {
        let mut ev = sample_event();
        ev.release.name.clear();
        assert!(render_message("netflix", &ev, MsgFormat::Text).is_err());
    }
}
