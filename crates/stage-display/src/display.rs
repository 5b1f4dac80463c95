//! Display consumer: turns relay notifications into a rendered page.

use crate::relay::{ConnectionSource, ConnectionStatus};
use crate::render::{escape_html, render_lyrics, render_progress};
use crate::store::{SongRecord, SongStore};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Renderable content for one resolved song.
#[derive(Debug, Clone, PartialEq)]
pub struct SongContent {
    pub title: String,
    pub key: Option<String>,
    pub chart_url: Option<String>,
    /// Lyric/chord body, already rendered to HTML.
    pub lyrics_html: String,
}

impl SongContent {
    fn from_record(requested: &str, record: &SongRecord) -> Self {
        let title = record
            .title
            .clone()
            .or_else(|| record.name.clone())
            .unwrap_or_else(|| requested.to_string());
        Self {
            title,
            key: record.key.clone(),
            chart_url: record.chart_url.as_deref().and_then(web_link),
            lyrics_html: record
                .lyrics
                .as_deref()
                .map(render_lyrics)
                .unwrap_or_default(),
        }
    }
}

/// Only plain web links make it into an `href`; anything else (`javascript:`,
/// `data:`, relative paths) is dropped.
fn web_link(url: &str) -> Option<String> {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")).then(|| url.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Idle,
    Song(SongContent),
    NotFound { name: String },
    Error { name: String, message: String },
}

/// Pick the record for `name`: exact primary name, then exact title, then a
/// case-insensitive match on name, title or controller name.  First match in
/// store order wins within each tier.
pub fn select_song<'a>(records: &'a [SongRecord], name: &str) -> Option<&'a SongRecord> {
    let exact = |field: &Option<String>| field.as_deref() == Some(name);
    let folded = name.to_lowercase();
    let loose = |field: &Option<String>| {
        field
            .as_deref()
            .is_some_and(|v| v.to_lowercase() == folded)
    };

    records
        .iter()
        .find(|r| exact(&r.name))
        .or_else(|| records.iter().find(|r| exact(&r.title)))
        .or_else(|| {
            records
                .iter()
                .find(|r| loose(&r.name) || loose(&r.title) || loose(&r.controller_name))
        })
}

pub struct DisplayConsumer<S> {
    store: S,
    /// Resolved songs, kept for the session.  Failures are never inserted.
    cache: HashMap<String, SongContent>,
    last_notified: Option<String>,
    view: View,
    progress: f64,
    playing: bool,
    relay_connected: bool,
    controller_connected: bool,
}

impl<S: SongStore> DisplayConsumer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            last_notified: None,
            view: View::Idle,
            progress: 0.0,
            playing: false,
            relay_connected: false,
            controller_connected: false,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Handle a song change.  Returns true when the view changed.
    pub async fn song_changed(&mut self, name: &str) -> bool {
        if name.is_empty() {
            self.last_notified = None;
            if self.view == View::Idle {
                return false;
            }
            info!("Song cleared");
            self.view = View::Idle;
            return true;
        }
        if self.last_notified.as_deref() == Some(name) {
            return false;
        }

        if let Some(content) = self.cache.get(name) {
            debug!("Song cache hit: {}", name);
            self.view = View::Song(content.clone());
            self.last_notified = Some(name.to_string());
            return true;
        }

        match self.store.list_all().await {
            Ok(records) => match select_song(&records, name) {
                Some(record) => {
                    let content = SongContent::from_record(name, record);
                    info!("Song resolved: {} -> {}", name, content.title);
                    self.cache.insert(name.to_string(), content.clone());
                    self.view = View::Song(content);
                    self.last_notified = Some(name.to_string());
                }
                None => {
                    warn!("No song found for {:?}", name);
                    self.view = View::NotFound {
                        name: name.to_string(),
                    };
                }
            },
            Err(e) => {
                warn!("Song lookup for {:?} failed: {}", name, e);
                self.view = View::Error {
                    name: name.to_string(),
                    message: e.to_string(),
                };
            }
        }
        true
    }

    pub fn set_progress(&mut self, fraction: f64) {
        self.progress = fraction;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn set_connection(&mut self, status: ConnectionStatus) {
        match status.source {
            ConnectionSource::Relay => {
                self.relay_connected = status.connected;
                // The controller state is unknown until the bridge says so.
                if !status.connected {
                    self.controller_connected = false;
                }
            }
            ConnectionSource::Controller => self.controller_connected = status.connected,
        }
    }

    fn connection_badge(&self) -> &'static str {
        match (self.relay_connected, self.controller_connected) {
            (false, _) => "<span class=\"badge offline\">bridge offline</span>",
            (true, false) => "<span class=\"badge waiting\">controller offline</span>",
            (true, true) => "<span class=\"badge live\">live</span>",
        }
    }

    /// Full HTML page for the current state.
    pub fn page_html(&self) -> String {
        let body = match &self.view {
            View::Idle => "<p class=\"idle\">Waiting for the next song</p>\n".to_string(),
            View::Song(song) => {
                let mut html = format!("<h2 class=\"title\">{}</h2>\n", escape_html(&song.title));
                if let Some(key) = &song.key {
                    html.push_str(&format!("<p class=\"key\">Key: {}</p>\n", escape_html(key)));
                }
                if let Some(url) = &song.chart_url {
                    html.push_str(&format!(
                        "<p class=\"chart\"><a href=\"{}\" target=\"_blank\" rel=\"noopener\">Chart</a></p>\n",
                        escape_html(url)
                    ));
                }
                html.push_str("<section class=\"lyrics\">\n");
                html.push_str(&song.lyrics_html);
                html.push_str("</section>\n");
                html
            }
            View::NotFound { name } => format!(
                "<p class=\"error\">Song not found: {}</p>\n",
                escape_html(name)
            ),
            View::Error { name, message } => format!(
                "<p class=\"error\">Could not load {}: {}</p>\n",
                escape_html(name),
                escape_html(message)
            ),
        };

        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Stage display</title></head>\n<body class=\"{}\">\n<header>{}</header>\n{}{}\n</body>\n</html>\n",
            if self.playing { "playing" } else { "stopped" },
            self.connection_badge(),
            body,
            render_progress(self.progress)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockStore {
        records: Arc<Mutex<Vec<SongRecord>>>,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl MockStore {
        fn with(records: Vec<SongRecord>) -> Self {
            Self {
                records: Arc::new(Mutex::new(records)),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SongStore for MockStore {
        async fn list_all(&self) -> Result<Vec<SongRecord>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                let err = serde_json::from_str::<Vec<SongRecord>>("nope").unwrap_err();
                return Err(StoreError::Parse(err));
            }
            Ok(self.records.lock().unwrap().clone())
        }
    }

    fn record(name: &str, lyrics: &str) -> SongRecord {
        SongRecord {
            name: Some(name.to_string()),
            lyrics: Some(lyrics.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolves_and_caches() {
        let store = MockStore::with(vec![record("Intro", "[C]la"), record("Outro", "bye")]);
        let mut display = DisplayConsumer::new(store.clone());

        assert!(display.song_changed("Intro").await);
        assert_eq!(store.calls(), 1);
        match display.view() {
            View::Song(song) => {
                assert_eq!(song.title, "Intro");
                assert!(song.lyrics_html.contains("<span class=\"chord\">C</span>"));
            }
            other => panic!("unexpected view: {:?}", other),
        }

        // Same name again: no-op.
        assert!(!display.song_changed("Intro").await);

        assert!(display.song_changed("Outro").await);
        assert!(display.song_changed("Intro").await);
        // Intro came from the cache the second time.
        assert_eq!(store.calls(), 2);
        assert_eq!(display.cached(), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_retried_after_data_arrives() {
        let store = MockStore::with(vec![record("Intro", "la")]);
        let mut display = DisplayConsumer::new(store.clone());

        display.song_changed("Encore").await;
        assert_eq!(
            display.view(),
            &View::NotFound {
                name: "Encore".to_string()
            }
        );
        assert_eq!(display.cached(), 0);
        assert!(display.page_html().contains("Song not found: Encore"));

        store.records.lock().unwrap().push(record("Encore", "again"));
        display.song_changed("Encore").await;
        assert!(matches!(display.view(), View::Song(_)));
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_store_error_renders_error_view() {
        let store = MockStore {
            fail: true,
            ..Default::default()
        };
        let mut display = DisplayConsumer::new(store.clone());

        display.song_changed("Intro").await;
        assert!(matches!(display.view(), View::Error { .. }));
        assert_eq!(display.cached(), 0);

        display.song_changed("Intro").await;
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_name_goes_idle() {
        let store = MockStore::with(vec![record("Intro", "la")]);
        let mut display = DisplayConsumer::new(store.clone());

        display.song_changed("Intro").await;
        assert!(display.song_changed("").await);
        assert_eq!(display.view(), &View::Idle);
        assert!(!display.song_changed("").await);

        // After clearing, the same song shows again (from cache).
        assert!(display.song_changed("Intro").await);
        assert_eq!(store.calls(), 1);
    }

    #[test]
    fn test_select_priority() {
        let records = vec![
            SongRecord {
                controller_name: Some("hello".to_string()),
                lyrics: Some("loose".to_string()),
                ..Default::default()
            },
            SongRecord {
                title: Some("Hello".to_string()),
                lyrics: Some("title".to_string()),
                ..Default::default()
            },
            SongRecord {
                name: Some("Hello".to_string()),
                lyrics: Some("name".to_string()),
                ..Default::default()
            },
        ];

        let hit = select_song(&records, "Hello").unwrap();
        assert_eq!(hit.lyrics.as_deref(), Some("name"));

        let hit = select_song(&records[..2], "Hello").unwrap();
        assert_eq!(hit.lyrics.as_deref(), Some("title"));

        let hit = select_song(&records, "HELLO").unwrap();
        assert_eq!(hit.lyrics.as_deref(), Some("loose"));

        assert!(select_song(&records, "Goodbye").is_none());
    }

    #[tokio::test]
    async fn test_page_escapes_metadata() {
        let store = MockStore::with(vec![SongRecord {
            name: Some("<b>Bold</b>".to_string()),
            key: Some("A&B".to_string()),
            chart_url: Some("https://charts/x?a=1&b=2".to_string()),
            ..Default::default()
        }]);
        let mut display = DisplayConsumer::new(store);
        display.song_changed("<b>Bold</b>").await;
        display.set_progress(1.7);

        let page = display.page_html();
        assert!(page.contains("&lt;b&gt;Bold&lt;/b&gt;"));
        assert!(page.contains("Key: A&amp;B"));
        assert!(page.contains("href=\"https://charts/x?a=1&amp;b=2\""));
        assert!(page.contains("width: 100%"));
    }

    #[tokio::test]
    async fn test_chart_link_requires_web_scheme() {
        let store = MockStore::with(vec![
            SongRecord {
                name: Some("Bad".to_string()),
                chart_url: Some(" JavaScript:alert(1)".to_string()),
                ..Default::default()
            },
            SongRecord {
                name: Some("Good".to_string()),
                chart_url: Some("HTTPS://charts/good.pdf".to_string()),
                ..Default::default()
            },
        ]);
        let mut display = DisplayConsumer::new(store);

        display.song_changed("Bad").await;
        let page = display.page_html();
        assert!(!page.contains("href="));
        assert!(!page.to_lowercase().contains("javascript:"));

        display.song_changed("Good").await;
        assert!(display
            .page_html()
            .contains("href=\"HTTPS://charts/good.pdf\""));
    }

    #[test]
    fn test_connection_badge() {
        let mut display = DisplayConsumer::new(MockStore::default());
        assert!(display.page_html().contains("bridge offline"));

        display.set_connection(ConnectionStatus {
            connected: true,
            source: ConnectionSource::Relay,
        });
        assert!(display.page_html().contains("controller offline"));

        display.set_connection(ConnectionStatus {
            connected: true,
            source: ConnectionSource::Controller,
        });
        assert!(display.page_html().contains("badge live"));

        display.set_connection(ConnectionStatus {
            connected: false,
            source: ConnectionSource::Relay,
        });
        assert!(display.page_html().contains("bridge offline"));
    }
}
