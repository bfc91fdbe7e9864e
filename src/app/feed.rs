use anyhow::{Context, Result, anyhow, bail};
use chrono::DateTime;
use tracing::warn;
use xml::attribute::OwnedAttribute;
use xml::name::OwnedName;
use xml::reader::{ParserConfig, XmlEvent};

use crate::http::{RetryPolicy, get_text_with_retries};

const MEDIA_NS: &str = "http://search.yahoo.com/mrss/";
const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Feed {
    pub(crate) title: String,
    pub(crate) entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FeedEntry {
    pub(crate) title: String,
    pub(crate) published_at: Option<i64>,
    pub(crate) enclosure_urls: Vec<String>,
    pub(crate) media_urls: Vec<String>,
}

impl FeedEntry {
    /// First enclosure, falling back to the first media:content url.
    pub(crate) fn playable_url(&self) -> Option<&str> {
        self.enclosure_urls
            .first()
            .or_else(|| self.media_urls.first())
            .map(String::as_str)
    }
}

pub(crate) trait FeedSource: Send {
    fn fetch(&self, url: &str) -> Result<Feed>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpFeedSource {
    policy: RetryPolicy,
}

impl HttpFeedSource {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch(&self, url: &str) -> Result<Feed> {
        let body = get_text_with_retries(url, &self.policy)
            .with_context(|| format!("failed to fetch feed {url}"))?;
        parse_feed(&body).with_context(|| format!("failed to parse feed {url}"))
    }
}

pub(crate) fn parse_published_at(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|published| published.timestamp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Rss,
    Atom,
}

/// Elements the reader cares about; everything else is walked past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Channel,
    Entry,
    Title,
    Published,
    Updated,
    Enclosure,
    Link,
    MediaContent,
    Other,
}

fn classify(name: &OwnedName) -> Tag {
    match name.namespace.as_deref() {
        Some(MEDIA_NS) if name.local_name == "content" => return Tag::MediaContent,
        None | Some(ATOM_NS) => {}
        Some(_) => return Tag::Other,
    }
    match name.local_name.as_str() {
        "channel" => Tag::Channel,
        "item" | "entry" => Tag::Entry,
        "title" => Tag::Title,
        "pubDate" | "published" => Tag::Published,
        "updated" => Tag::Updated,
        "enclosure" => Tag::Enclosure,
        "link" => Tag::Link,
        _ => Tag::Other,
    }
}

fn attribute<'a>(attributes: &'a [OwnedAttribute], local_name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|attr| attr.name.prefix.is_none() && attr.name.local_name == local_name)
        .map(|attr| attr.value.trim())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy)]
enum TextField {
    FeedTitle,
    EntryTitle,
    Published,
    Updated,
}

/// Text of one element, collected until the element closes at `depth`.
struct Capture {
    field: TextField,
    depth: usize,
    text: String,
}

#[derive(Default)]
struct EntryBuilder {
    title: String,
    published: Option<String>,
    updated: Option<String>,
    enclosure_urls: Vec<String>,
    media_urls: Vec<String>,
}

impl EntryBuilder {
    fn finish(self) -> FeedEntry {
        let published_at = self
            .published
            .as_deref()
            .and_then(parse_published_at)
            .or_else(|| self.updated.as_deref().and_then(parse_published_at));
        FeedEntry {
            title: self.title,
            published_at,
            enclosure_urls: self.enclosure_urls,
            media_urls: self.media_urls,
        }
    }

    /// A cut-off entry keeps its title but none of its urls.
    fn abandon(self) -> FeedEntry {
        FeedEntry {
            enclosure_urls: Vec::new(),
            media_urls: Vec::new(),
            ..self.finish()
        }
    }
}

#[derive(Default)]
struct FeedReader {
    kind: Option<FeedKind>,
    title: String,
    entries: Vec<FeedEntry>,
    stack: Vec<Tag>,
    current: Option<EntryBuilder>,
    capture: Option<Capture>,
}

impl FeedReader {
    fn start(&mut self, name: &OwnedName, attributes: &[OwnedAttribute]) -> Result<()> {
        let Some(kind) = self.kind else {
            let (kind, root) = match name.local_name.as_str() {
                "rss" => (FeedKind::Rss, Tag::Other),
                "feed" => (FeedKind::Atom, Tag::Channel),
                other => bail!("document is not an RSS or Atom feed (root element `{other}`)"),
            };
            self.kind = Some(kind);
            self.stack.push(root);
            return Ok(());
        };

        let tag = match classify(name) {
            Tag::Entry if self.current.is_some() => Tag::Other,
            tag => tag,
        };
        let parent = self.stack.last().copied();
        let depth = self.stack.len();
        let field = match (tag, parent) {
            (Tag::Title, Some(Tag::Channel)) => Some(TextField::FeedTitle),
            (Tag::Title, Some(Tag::Entry)) => Some(TextField::EntryTitle),
            (Tag::Published, Some(Tag::Entry)) => Some(TextField::Published),
            (Tag::Updated, Some(Tag::Entry)) => Some(TextField::Updated),
            _ => None,
        };
        if let Some(field) = field {
            self.capture = Some(Capture {
                field,
                depth,
                text: String::new(),
            });
        }

        if tag == Tag::Entry {
            self.current = Some(EntryBuilder::default());
        } else if let Some(entry) = self.current.as_mut() {
            match (tag, parent) {
                (Tag::Enclosure, Some(Tag::Entry)) if kind == FeedKind::Rss => {
                    entry
                        .enclosure_urls
                        .extend(attribute(attributes, "url").map(str::to_string));
                }
                (Tag::Link, Some(Tag::Entry))
                    if kind == FeedKind::Atom
                        && attribute(attributes, "rel") == Some("enclosure") =>
                {
                    entry
                        .enclosure_urls
                        .extend(attribute(attributes, "href").map(str::to_string));
                }
                (Tag::MediaContent, _) => {
                    entry
                        .media_urls
                        .extend(attribute(attributes, "url").map(str::to_string));
                }
                _ => {}
            }
        }

        self.stack.push(tag);
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn end(&mut self) {
        let Some(tag) = self.stack.pop() else {
            return;
        };
        if self
            .capture
            .as_ref()
            .is_some_and(|capture| capture.depth == self.stack.len())
        {
            if let Some(capture) = self.capture.take() {
                self.store(capture);
            }
        }
        if tag == Tag::Entry {
            if let Some(entry) = self.current.take() {
                self.entries.push(entry.finish());
            }
        }
    }

    fn store(&mut self, capture: Capture) {
        let text = capture.text.trim().to_string();
        match (capture.field, self.current.as_mut()) {
            (TextField::FeedTitle, _) if self.title.is_empty() => self.title = text,
            (TextField::EntryTitle, Some(entry)) => entry.title = text,
            (TextField::Published, Some(entry)) => entry.published = Some(text),
            (TextField::Updated, Some(entry)) => entry.updated = Some(text),
            _ => {}
        }
    }

    /// Keeps what was read before a syntax error; the open entry loses its urls.
    fn cut_off(&mut self, err: &xml::reader::Error) {
        warn!(
            entries = self.entries.len(),
            "feed is malformed, keeping the entries read so far: {err}"
        );
        if let Some(entry) = self.current.take() {
            self.entries.push(entry.abandon());
        }
    }

    fn finish(self) -> Result<Feed> {
        if self.kind.is_none() {
            bail!("document is not an RSS or Atom feed");
        }
        Ok(Feed {
            title: self.title,
            entries: self.entries,
        })
    }
}

/// Streams an RSS 2.0 or Atom document into a [`Feed`].
///
/// Entries are read one element at a time, so a broken entry never takes the
/// rest of the feed down with it.
pub(crate) fn parse_feed(body: &str) -> Result<Feed> {
    let events = ParserConfig::new()
        .trim_whitespace(true)
        .cdata_to_characters(true)
        .create_reader(body.as_bytes());

    let mut reader = FeedReader::default();
    for event in events {
        match event {
            Ok(XmlEvent::StartElement {
                name, attributes, ..
            }) => reader.start(&name, &attributes)?,
            Ok(XmlEvent::EndElement { .. }) => reader.end(),
            Ok(XmlEvent::Characters(text)) => reader.text(&text),
            Ok(_) => {}
            Err(err) if reader.kind.is_none() => {
                return Err(anyhow!("document is not an RSS or Atom feed: {err}"));
            }
            Err(err) => {
                reader.cut_off(&err);
                break;
            }
        }
    }
    reader.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Morning Briefing</title>
    <link>https://news.test</link>
    <itunes:author>News Desk</itunes:author>
    <item>
      <title>Tuesday edition</title>
      <pubDate>Tue, 06 Oct 2026 05:00:00 GMT</pubDate>
      <enclosure url="https://cdn.test/tue.mp3" length="1" type="audio/mpeg"/>
      <enclosure url="https://cdn.test/tue-alt.mp3" length="1" type="audio/mpeg"/>
    </item>
    <item>
      <title>Monday edition</title>
      <pubDate>Mon, 05 Oct 2026 05:00:00 +0000</pubDate>
      <media:content url="https://cdn.test/mon.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Announcement</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parse_feed_extracts_titles_dates_and_media() {
        let feed = parse_feed(SAMPLE_FEED).expect("feed should parse");
        assert_eq!(feed.title, "Morning Briefing");
        assert_eq!(feed.entries.len(), 3);

        let tuesday = &feed.entries[0];
        assert_eq!(tuesday.title, "Tuesday edition");
        assert_eq!(tuesday.published_at, Some(1_791_262_800));
        assert_eq!(tuesday.playable_url(), Some("https://cdn.test/tue.mp3"));

        let monday = &feed.entries[1];
        assert!(monday.enclosure_urls.is_empty());
        assert_eq!(monday.playable_url(), Some("https://cdn.test/mon.mp3"));

        let announcement = &feed.entries[2];
        assert_eq!(announcement.published_at, None);
        assert_eq!(announcement.playable_url(), None);
    }

    #[test]
    fn enclosure_wins_over_media_content() {
        let entry = FeedEntry {
            title: "both".to_string(),
            published_at: None,
            enclosure_urls: vec!["https://cdn.test/enclosure.mp3".to_string()],
            media_urls: vec!["https://cdn.test/media.mp3".to_string()],
        };
        assert_eq!(entry.playable_url(), Some("https://cdn.test/enclosure.mp3"));
    }

    #[test]
    fn unparseable_dates_are_treated_as_missing() {
        assert_eq!(parse_published_at("yesterday-ish"), None);
        assert_eq!(parse_published_at("Thu, 01 Jan 1970 00:01:00 +0000"), Some(60));
    }

    #[test]
    fn parse_feed_rejects_non_feeds() {
        assert!(parse_feed("<html><body>nope</body></html>").is_err());
    }

    #[test]
    fn repeated_elements_need_not_be_adjacent() {
        let feed = parse_feed(
            r#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Field Notes</title>
    <item>
      <title>First</title>
      <enclosure url="https://cdn.test/first.mp3" type="audio/mpeg"/>
    </item>
    <atom:link href="https://feeds.test/notes.xml" rel="self"/>
    <item>
      <title>Second</title>
      <media:content url="https://cdn.test/second.mp3"/>
      <media:thumbnail url="https://cdn.test/second.jpg"/>
      <media:content url="https://cdn.test/second-hq.mp3"/>
    </item>
  </channel>
</rss>"#,
        )
        .expect("feed should parse");

        assert_eq!(feed.title, "Field Notes");
        let urls = feed
            .entries
            .iter()
            .map(FeedEntry::playable_url)
            .collect::<Vec<_>>();
        assert_eq!(
            urls,
            [
                Some("https://cdn.test/first.mp3"),
                Some("https://cdn.test/second.mp3")
            ]
        );
        assert_eq!(feed.entries[1].media_urls.len(), 2);
    }

    #[test]
    fn broken_entry_keeps_earlier_entries_and_loses_its_urls() {
        let feed = parse_feed(
            r#"<rss version="2.0">
  <channel>
    <title>Field Notes</title>
    <item>
      <title>Intact</title>
      <enclosure url="https://cdn.test/intact.mp3"/>
    </item>
    <item>
      <title>Cut off</title>
      <enclosure url="https://cdn.test/cut.mp3">
    </item>
  </channel>
</rss>"#,
        )
        .expect("readable prefix should be kept");

        assert_eq!(feed.entries.len(), 2);
        assert_eq!(
            feed.entries[0].playable_url(),
            Some("https://cdn.test/intact.mp3")
        );
        assert_eq!(feed.entries[1].title, "Cut off");
        assert_eq!(feed.entries[1].playable_url(), None);
    }

    #[test]
    fn parse_feed_reads_atom_enclosure_links() {
        let feed = parse_feed(
            r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Hour</title>
  <link href="https://atom.test/" rel="alternate"/>
  <entry>
    <title type="text">Pilot</title>
    <link href="https://atom.test/pilot" rel="alternate"/>
    <id>urn:atom-hour:pilot</id>
    <link href="https://cdn.test/pilot.mp3" rel="enclosure" type="audio/mpeg"/>
    <updated>2026-10-06T06:00:00Z</updated>
    <published>2026-10-06T05:00:00Z</published>
  </entry>
  <entry>
    <title>Teaser</title>
    <link href="https://atom.test/teaser"/>
    <updated>2026-10-05T05:00:00+00:00</updated>
  </entry>
</feed>"#,
        )
        .expect("atom feed should parse");

        assert_eq!(feed.title, "Atom Hour");
        assert_eq!(feed.entries.len(), 2);

        let pilot = &feed.entries[0];
        assert_eq!(pilot.title, "Pilot");
        assert_eq!(pilot.playable_url(), Some("https://cdn.test/pilot.mp3"));
        assert_eq!(pilot.published_at, Some(1_791_262_800));

        let teaser = &feed.entries[1];
        assert_eq!(teaser.playable_url(), None);
        assert_eq!(teaser.published_at, Some(1_791_262_800 - 86_400));
    }
}
