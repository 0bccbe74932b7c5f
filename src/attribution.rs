//! Playtime attribution across title switches.
//!
//! A session is launched for one catalog entry, but the remote device can
//! switch to another title mid-session. The tracker keeps the catalog entry
//! currently being credited and when it started, and moves the credit over
//! when a `title_change` arrives.

use std::time::SystemTime;

use tokio::time::Instant;

use crate::catalog::{credit_playtime, CatalogEntry, CatalogStore, NewEntry};
use crate::events::EventPayload;
use crate::presence::PresenceSink;

/// Collaborators and session facts a title change needs.
pub struct AttributionContext<'a> {
    pub catalog: &'a dyn CatalogStore,
    pub presence: &'a dyn PresenceSink,
    /// Platform tag titles are matched and created under.
    pub platform: &'a str,
    /// Catalog id the session was launched for.
    pub origin: &'a str,
    pub session_started: SystemTime,
}

#[derive(Debug, Clone)]
pub struct TitleTracker {
    /// Last title id reported by the client. `None` until the first report.
    current_title: Option<String>,
    /// Catalog entry receiving playtime, `None` on the home screen.
    target: Option<String>,
    since: Instant,
}

fn whole_minutes(since: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(since).as_secs() / 60
}

impl TitleTracker {
    pub fn new(origin: &str, now: Instant) -> Self {
        Self {
            current_title: None,
            target: Some(origin.to_string()),
            since: now,
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn current_title(&self) -> Option<&str> {
        self.current_title.as_deref()
    }

    /// Restart the clock without crediting, e.g. when a reconnected client
    /// comes back up.
    pub fn resume(&mut self, now: Instant) {
        self.since = now;
    }

    /// Credit the time since the last reset to the current target. Returns
    /// the minutes credited.
    pub fn flush(&mut self, catalog: &dyn CatalogStore, now: Instant, wall: SystemTime) -> u64 {
        let minutes = whole_minutes(self.since, now);
        self.since = now;
        match &self.target {
            Some(target) if minutes > 0 => {
                credit_playtime(catalog, target, minutes, wall);
                minutes
            }
            _ => 0,
        }
    }

    /// Handle a reported title switch.
    ///
    /// Returns the `title_change` payload to emit, or `None` when the title
    /// id did not change.
    pub fn on_title_change(
        &mut self,
        ctx: &AttributionContext<'_>,
        title_id: &str,
        title_name: &str,
        now: Instant,
        wall: SystemTime,
    ) -> Option<EventPayload> {
        if self.current_title.as_deref() == Some(title_id) {
            return None;
        }

        let credited = self.flush(ctx.catalog, now, wall);
        tracing::debug!(
            previous = ?self.target,
            credited,
            title_id,
            title_name,
            "title changed"
        );
        self.current_title = Some(title_id.to_string());

        if title_id.is_empty() {
            // Home screen: nothing is being played.
            self.target = None;
            ctx.presence.clear();
            return Some(EventPayload::TitleChange {
                title_id: String::new(),
                title_name: String::new(),
                target_id: None,
                target_name: None,
            });
        }

        let resolved = resolve_title(ctx, title_id, title_name, wall);
        self.target = resolved.as_ref().map(|e| e.id.clone());

        if let Some(entry) = &resolved {
            ctx.presence.set(&entry.name, ctx.platform, ctx.session_started);
        }

        Some(EventPayload::TitleChange {
            title_id: title_id.to_string(),
            title_name: title_name.to_string(),
            target_id: resolved.as_ref().map(|e| e.id.clone()),
            target_name: match resolved {
                Some(entry) => Some(entry.name),
                None if !title_name.is_empty() => Some(title_name.to_string()),
                None => None,
            },
        })
    }
}

/// Map a reported title to a catalog entry: by external id, then by name,
/// then by creating a new entry that inherits the origin's device settings.
fn resolve_title(
    ctx: &AttributionContext<'_>,
    title_id: &str,
    title_name: &str,
    wall: SystemTime,
) -> Option<CatalogEntry> {
    let found = ctx
        .catalog
        .find_by_external_id(ctx.platform, title_id)
        .or_else(|| {
            if title_name.is_empty() {
                None
            } else {
                ctx.catalog.find_by_name(ctx.platform, title_name)
            }
        });

    let mut entry = match found {
        Some(entry) => entry,
        None if title_name.is_empty() => {
            tracing::debug!(title_id, "unknown title without a name, not creating entry");
            return None;
        }
        None => {
            let launch = ctx
                .catalog
                .get(ctx.origin)
                .map(|origin| origin.launch.inherited())
                .unwrap_or_default();
            let created = ctx.catalog.create(NewEntry {
                name: title_name.to_string(),
                platform: ctx.platform.to_string(),
                external_id: Some(title_id.to_string()),
                launch,
                last_active: Some(wall),
            });
            match created {
                Ok(entry) => {
                    tracing::info!(id = %entry.id, title_id, title_name, "added title to catalog");
                    if let Err(e) = ctx.catalog.persist() {
                        tracing::warn!(error = %e, "failed to persist catalog");
                    }
                    ctx.catalog.notify_changed();
                    entry
                }
                Err(e) => {
                    tracing::warn!(title_id, title_name, error = %e, "failed to add title to catalog");
                    return None;
                }
            }
        }
    };

    if entry.external_id.as_deref().map_or(true, str::is_empty) {
        entry.external_id = Some(title_id.to_string());
        let saved = ctx.catalog.update(&entry).and_then(|_| ctx.catalog.persist());
        if let Err(e) = saved {
            tracing::warn!(id = %entry.id, error = %e, "failed to record title id");
        }
    }

    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::launch::LaunchProfile;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPresence {
        calls: Mutex<Vec<String>>,
    }

    impl PresenceSink for RecordingPresence {
        fn set(&self, name: &str, platform: &str, _started_at: SystemTime) {
            self.calls.lock().push(format!("set {name} {platform}"));
        }

        fn clear(&self) {
            self.calls.lock().push("clear".to_string());
        }
    }

    fn entry(id: &str, name: &str, external: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            id: id.into(),
            name: name.into(),
            platform: "psn".into(),
            external_id: external.map(Into::into),
            playtime_minutes: 0,
            last_active: None,
            launch: LaunchProfile::default(),
        }
    }

    fn ctx<'a>(catalog: &'a MemoryCatalog, presence: &'a RecordingPresence) -> AttributionContext<'a> {
        AttributionContext {
            catalog,
            presence,
            platform: "psn",
            origin: "origin",
            session_started: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn switch_credits_elapsed_minutes_to_previous_target() {
        let catalog = MemoryCatalog::with_entries(vec![
            entry("origin", "Launcher Pick", None),
            entry("a", "Title A", Some("CUSA0000A")),
            entry("b", "Title B", Some("CUSA0000B")),
        ]);
        let presence = RecordingPresence::default();
        let ctx = ctx(&catalog, &presence);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);

        tracker.on_title_change(&ctx, "CUSA0000A", "Title A", t0, SystemTime::now());
        assert_eq!(tracker.target(), Some("a"));

        let later = t0 + Duration::from_secs(12 * 60 + 30);
        let event = tracker
            .on_title_change(&ctx, "CUSA0000B", "Title B", later, SystemTime::now())
            .unwrap();

        assert_eq!(catalog.get("a").unwrap().playtime_minutes, 12);
        assert_eq!(catalog.get("b").unwrap().playtime_minutes, 0);
        assert_eq!(catalog.get("origin").unwrap().playtime_minutes, 0);
        assert_eq!(
            event,
            EventPayload::TitleChange {
                title_id: "CUSA0000B".into(),
                title_name: "Title B".into(),
                target_id: Some("b".into()),
                target_name: Some("Title B".into()),
            }
        );

        // Clock was reset at the switch.
        assert_eq!(tracker.flush(&catalog, later + Duration::from_secs(59), SystemTime::now()), 0);
    }

    #[test]
    fn unchanged_title_is_a_no_op() {
        let catalog = MemoryCatalog::with_entries(vec![entry("a", "Title A", Some("CUSA0000A"))]);
        let presence = RecordingPresence::default();
        let ctx = ctx(&catalog, &presence);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);
        tracker.on_title_change(&ctx, "CUSA0000A", "Title A", t0, SystemTime::now());
        let calls_before = presence.calls.lock().len();

        let later = t0 + Duration::from_secs(30 * 60);
        assert!(tracker
            .on_title_change(&ctx, "CUSA0000A", "Title A", later, SystemTime::now())
            .is_none());
        assert_eq!(catalog.get("a").unwrap().playtime_minutes, 0);
        assert_eq!(presence.calls.lock().len(), calls_before);
    }

    #[test]
    fn empty_title_clears_presence_and_target() {
        let catalog = MemoryCatalog::with_entries(vec![entry("origin", "Pick", None)]);
        let presence = RecordingPresence::default();
        let ctx = ctx(&catalog, &presence);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);

        // Less than a minute in: nothing to credit.
        let event = tracker
            .on_title_change(&ctx, "", "", t0 + Duration::from_secs(40), SystemTime::now())
            .unwrap();
        assert_eq!(
            event,
            EventPayload::TitleChange {
                title_id: String::new(),
                title_name: String::new(),
                target_id: None,
                target_name: None,
            }
        );
        assert_eq!(tracker.target(), None);
        assert_eq!(catalog.get("origin").unwrap().playtime_minutes, 0);
        assert_eq!(*presence.calls.lock(), vec!["clear".to_string()]);

        // Time on the home screen is not credited to anyone.
        assert_eq!(
            tracker.flush(&catalog, t0 + Duration::from_secs(3600), SystemTime::now()),
            0
        );
    }

    #[test]
    fn resolves_by_name_and_backfills_external_id() {
        let catalog = MemoryCatalog::with_entries(vec![entry("g", "Gran Turismo 7", None)]);
        let presence = RecordingPresence::default();
        let ctx = ctx(&catalog, &presence);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);

        tracker.on_title_change(&ctx, "PPSA01317", "gran turismo 7", t0, SystemTime::now());
        assert_eq!(tracker.target(), Some("g"));
        assert_eq!(
            catalog.get("g").unwrap().external_id.as_deref(),
            Some("PPSA01317")
        );
        assert_eq!(*presence.calls.lock(), vec!["set Gran Turismo 7 psn".to_string()]);
    }

    #[test]
    fn unknown_title_is_created_with_inherited_device() {
        let mut origin = entry("origin", "Pick", None);
        origin.launch = LaunchProfile {
            nickname: "Living Room".into(),
            host: "192.168.1.50".into(),
            registration_key: "secret".into(),
            ..Default::default()
        };
        let catalog = MemoryCatalog::with_entries(vec![origin]);
        let presence = RecordingPresence::default();
        let ctx = ctx(&catalog, &presence);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);

        let event = tracker
            .on_title_change(&ctx, "PPSA99999", "Brand New Game", t0, SystemTime::now())
            .unwrap();
        let EventPayload::TitleChange { target_id: Some(id), .. } = &event else {
            panic!("expected a resolved target, got {event:?}");
        };

        let created = catalog.get(id).unwrap();
        assert_eq!(created.name, "Brand New Game");
        assert_eq!(created.platform, "psn");
        assert_eq!(created.external_id.as_deref(), Some("PPSA99999"));
        assert_eq!(created.launch.nickname, "Living Room");
        assert_eq!(created.launch.host, "192.168.1.50");
        assert!(created.launch.registration_key.is_empty());
        assert_eq!(catalog.revision(), 1);
    }

    #[test]
    fn nameless_unknown_title_gets_null_target() {
        let catalog = MemoryCatalog::new();
        let presence = RecordingPresence::default();
        let ctx = ctx(&catalog, &presence);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);

        let event = tracker
            .on_title_change(&ctx, "PPSA00001", "", t0, SystemTime::now())
            .unwrap();
        assert!(matches!(
            event,
            EventPayload::TitleChange { target_id: None, target_name: None, .. }
        ));
        assert!(catalog.entries().is_empty());
        assert!(presence.calls.lock().is_empty());
    }

    #[test]
    fn flush_credits_origin_when_no_title_reported() {
        let catalog = MemoryCatalog::with_entries(vec![entry("origin", "Pick", None)]);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);
        let credited = tracker.flush(&catalog, t0 + Duration::from_secs(5 * 60), SystemTime::now());
        assert_eq!(credited, 5);
        assert_eq!(catalog.get("origin").unwrap().playtime_minutes, 5);
    }

    #[test]
    fn final_flush_credits_the_switched_title_not_the_origin() {
        let catalog = MemoryCatalog::with_entries(vec![
            entry("origin", "Launcher Pick", None),
            entry("astro", "Astro Bot", Some("PPSA01325")),
        ]);
        let presence = RecordingPresence::default();
        let ctx = ctx(&catalog, &presence);
        let t0 = Instant::now();
        let mut tracker = TitleTracker::new("origin", t0);

        tracker.on_title_change(&ctx, "PPSA01325", "Astro Bot", t0, SystemTime::now());
        let credited = tracker.flush(&catalog, t0 + Duration::from_secs(7 * 60 + 10), SystemTime::now());

        assert_eq!(credited, 7);
        assert_eq!(catalog.get("astro").unwrap().playtime_minutes, 7);
        assert!(catalog.get("astro").unwrap().last_active.is_some());
        assert_eq!(catalog.get("origin").unwrap().playtime_minutes, 0);
    }
}
