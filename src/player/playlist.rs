//! Playlist selection: time-window filter, priority sort, round-robin.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::{Ad, AdManifest};

struct Inner {
    ads: Vec<Ad>,
    cursor: usize,
    last_update: Option<DateTime<Utc>>,
}

/// The active ad list with a monotonically increasing round-robin cursor.
///
/// The cursor persists across manifest updates so content additions and
/// removals do not reset position arbitrarily; the modulo in [`next`]
/// keeps it in range.
///
/// [`next`]: Playlist::next
pub struct Playlist {
    inner: RwLock<Inner>,
}

impl Playlist {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                ads: Vec::new(),
                cursor: 0,
                last_update: None,
            }),
        }
    }

    /// Replace the ad list from a fresh manifest. The cursor is reset only
    /// when the new list is shorter than the cursor.
    pub fn update(&self, manifest: &AdManifest) {
        let mut inner = self.inner.write().expect("playlist lock");
        inner.ads = manifest.ads.clone();
        inner.last_update = Some(Utc::now());
        if inner.ads.len() < inner.cursor {
            inner.cursor = 0;
        }
    }

    /// Ads eligible at `now`: inside their window, or windowless.
    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<Ad> {
        let inner = self.inner.read().expect("playlist lock");
        filter_by_window(&inner.ads, now)
    }

    /// The next ad in round-robin order over the filtered, priority-sorted
    /// sequence. Takes the write lock because the cursor advances.
    pub fn next(&self, now: DateTime<Utc>) -> Option<Ad> {
        let mut inner = self.inner.write().expect("playlist lock");
        let eligible = sort_by_priority(filter_by_window(&inner.ads, now));
        if eligible.is_empty() {
            return None;
        }
        let ad = eligible[inner.cursor % eligible.len()].clone();
        inner.cursor += 1;
        Some(ad)
    }

    pub fn reset(&self) {
        self.inner.write().expect("playlist lock").cursor = 0;
    }

    pub fn count(&self) -> usize {
        self.inner.read().expect("playlist lock").ads.len()
    }

    pub fn active_count(&self) -> usize {
        self.active_at(Utc::now()).len()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.inner.read().expect("playlist lock").last_update
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep ads whose window contains `now`. Absent bounds are open.
fn filter_by_window(ads: &[Ad], now: DateTime<Utc>) -> Vec<Ad> {
    ads.iter()
        .filter(|ad| {
            let started = ad.start_time.map_or(true, |start| now >= start);
            let not_ended = ad.end_time.map_or(true, |end| now <= end);
            started && not_ended
        })
        .cloned()
        .collect()
}

/// Strictly descending priority; ties broken by ascending id so the order
/// is total and deterministic.
fn sort_by_priority(mut ads: Vec<Ad>) -> Vec<Ad> {
    ads.sort_by(|a, b| {
        b.priority_or_default()
            .cmp(&a.priority_or_default())
            .then_with(|| a.id.cmp(&b.id))
    });
    ads
}
