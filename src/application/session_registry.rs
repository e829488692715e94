//! Per-tile analytics session registry
//!
//! Each tile has one current sequence number. Starting a session bumps it,
//! which fires the cancellation callbacks of whatever was in flight before
//! and turns every later write from that work into a no-op. Sequences come
//! from one registry-wide counter, so a forgotten tile's old sessions can
//! never match a number issued later.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::sweeper::TileId;

pub type CancelCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TileSession {
    sequence: u64,
    cancel_callbacks: Vec<CancelCallback>,
}

#[derive(Default)]
struct Sessions {
    by_tile: HashMap<TileId, TileSession>,
    issued: u64,
}

impl Sessions {
    fn next_sequence(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Invalidate everything in flight for `tile` and return the new current sequence.
    pub fn bump(&self, tile: TileId) -> u64 {
        let (sequence, callbacks) = {
            let mut sessions = self.lock();
            let sequence = sessions.next_sequence();
            let session = sessions.by_tile.entry(tile).or_default();
            session.sequence = sequence;
            (sequence, std::mem::take(&mut session.cancel_callbacks))
        };
        if !callbacks.is_empty() {
            debug!("{}: superseding {} in-flight callbacks", tile, callbacks.len());
        }
        callbacks.into_iter().for_each(|cancel| cancel());
        sequence
    }

    /// Stop in-flight work for `tile` without starting anything new.
    pub fn cancel_inflight(&self, tile: TileId) {
        let callbacks = {
            let mut sessions = self.lock();
            let sequence = sessions.next_sequence();
            match sessions.by_tile.get_mut(&tile) {
                Some(session) => {
                    session.sequence = sequence;
                    std::mem::take(&mut session.cancel_callbacks)
                }
                None => return,
            }
        };
        callbacks.into_iter().for_each(|cancel| cancel());
    }

    /// Cancel `tile`'s in-flight work and drop its entry entirely.
    pub fn forget(&self, tile: TileId) {
        let Some(session) = self.lock().by_tile.remove(&tile) else {
            return;
        };
        if !session.cancel_callbacks.is_empty() {
            debug!("{}: removed from the page, cancelling {} callbacks", tile, session.cancel_callbacks.len());
        }
        session.cancel_callbacks.into_iter().for_each(|cancel| cancel());
    }

    /// Tiles with a live entry
    pub fn len(&self) -> usize {
        self.lock().by_tile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every tile's in-flight work.
    pub fn cancel_all(&self) {
        let callbacks: Vec<CancelCallback> = {
            let mut sessions = self.lock();
            let sequence = sessions.next_sequence();
            sessions
                .by_tile
                .values_mut()
                .flat_map(|session| {
                    session.sequence = sequence;
                    std::mem::take(&mut session.cancel_callbacks)
                })
                .collect()
        };
        if !callbacks.is_empty() {
            debug!("Cancelling {} in-flight callbacks", callbacks.len());
        }
        callbacks.into_iter().for_each(|cancel| cancel());
    }

    /// Attach a cancellation callback to session `sequence`. A stale session
    /// is cancelled on the spot and `false` is returned.
    pub fn add_cancel(&self, tile: TileId, sequence: u64, cancel: CancelCallback) -> bool {
        {
            let mut sessions = self.lock();
            if let Some(session) = sessions.by_tile.get_mut(&tile).filter(|s| s.sequence == sequence) {
                session.cancel_callbacks.push(cancel);
                return true;
            }
        }
        cancel();
        false
    }

    pub fn current(&self, tile: TileId) -> u64 {
        self.lock().by_tile.get(&tile).map_or(0, |s| s.sequence)
    }

    pub fn is_current(&self, tile: TileId, sequence: u64) -> bool {
        self.current(tile) == sequence
    }

    /// Run `write` only while `sequence` is current. The registry lock is held
    /// for the duration, so no bump can interleave with the write.
    pub fn render_if_current<R>(&self, tile: TileId, sequence: u64, write: impl FnOnce() -> R) -> Option<R> {
        let sessions = self.lock();
        let current = sessions.by_tile.get(&tile).map_or(0, |s| s.sequence);
        if current != sequence {
            debug!("{}: dropping write from stale session {} (current {})", tile, sequence, current);
            return None;
        }
        Some(write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TILE: TileId = TileId(7);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> CancelCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = Arc::clone(&count);
            move || -> CancelCallback {
                let count = Arc::clone(&count);
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        (count, make)
    }

    #[test]
    fn bump_fires_previous_callbacks_once() {
        let registry = SessionRegistry::new();
        let (fired, callback) = counter();

        let first = registry.bump(TILE);
        assert!(registry.add_cancel(TILE, first, callback()));
        assert!(registry.add_cancel(TILE, first, callback()));

        let second = registry.bump(TILE);
        assert_eq!(second, first + 1);
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        registry.bump(TILE);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_session_is_cancelled_on_registration() {
        let registry = SessionRegistry::new();
        let (fired, callback) = counter();
        let old = registry.bump(TILE);
        registry.bump(TILE);

        assert!(!registry.add_cancel(TILE, old, callback()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_writes_are_dropped() {
        let registry = SessionRegistry::new();
        let old = registry.bump(TILE);
        let new = registry.bump(TILE);

        assert_eq!(registry.render_if_current(TILE, old, || "old"), None);
        assert_eq!(registry.render_if_current(TILE, new, || "new"), Some("new"));
    }

    #[test]
    fn cancel_inflight_invalidates_without_new_session() {
        let registry = SessionRegistry::new();
        let (fired, callback) = counter();
        let sequence = registry.bump(TILE);
        registry.add_cancel(TILE, sequence, callback());

        registry.cancel_inflight(TILE);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!registry.is_current(TILE, sequence));

        // Unknown tiles are a no-op
        registry.cancel_inflight(TileId(99));
        assert_eq!(registry.current(TileId(99)), 0);
    }

    #[test]
    fn cancel_all_reaches_every_tile() {
        let registry = SessionRegistry::new();
        let (fired, callback) = counter();
        for tile in [TileId(1), TileId(2), TileId(3)] {
            let sequence = registry.bump(tile);
            registry.add_cancel(tile, sequence, callback());
        }
        registry.cancel_all();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn forgotten_tiles_release_their_entry() {
        let registry = SessionRegistry::new();
        let (fired, callback) = counter();
        let old = registry.bump(TILE);
        registry.add_cancel(TILE, old, callback());

        registry.forget(TILE);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.render_if_current(TILE, old, || "late"), None);

        // Numbers issued afterwards never collide with the forgotten session
        let other = registry.bump(TileId(8));
        assert_ne!(other, old);
        assert_eq!(registry.render_if_current(TILE, other, || "late"), None);
    }
}
