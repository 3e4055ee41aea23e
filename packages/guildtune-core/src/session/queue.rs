//! Bounded two-part queue: ready tracks plus lazily resolved playlist entries.

use std::collections::VecDeque;

use crate::resolver::{PlaylistEntry, QueueItem, Track};

/// Per-room queue.
///
/// Capacity applies to the sum of both sequences. Both are FIFO.
#[derive(Debug)]
pub struct TrackQueue {
    ready: VecDeque<Track>,
    pending: VecDeque<PlaylistEntry>,
    capacity: usize,
}

impl TrackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ready: VecDeque::new(),
            pending: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.pending.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Appends an item if there is room. Returns whether it was added.
    pub fn push(&mut self, item: QueueItem) -> bool {
        if self.is_full() {
            return false;
        }
        match item {
            QueueItem::Track(track) => self.ready.push_back(track),
            QueueItem::Entry(entry) => self.pending.push_back(entry),
        }
        true
    }

    pub fn pop_ready(&mut self) -> Option<Track> {
        self.ready.pop_front()
    }

    pub fn pop_pending(&mut self) -> Option<PlaylistEntry> {
        self.pending.pop_front()
    }

    /// Removes the ready track at a 0-based position.
    pub fn remove_ready(&mut self, index: usize) -> Option<Track> {
        self.ready.remove(index)
    }

    pub fn clear(&mut self) {
        self.ready.clear();
        self.pending.clear();
    }

    pub fn ready_titles(&self) -> Vec<String> {
        self.ready.iter().map(|t| t.title.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(n: usize) -> QueueItem {
        QueueItem::Track(Track::new(format!("https://cdn/{}", n), format!("Track {}", n)))
    }

    fn entry(n: usize) -> QueueItem {
        QueueItem::Entry(PlaylistEntry {
            url: format!("https://youtu.be/{}", n),
            title: None,
            duration_secs: None,
        })
    }

    #[test]
    fn capacity_spans_both_sequences() {
        let mut queue = TrackQueue::new(3);
        assert!(queue.push(track(1)));
        assert!(queue.push(entry(2)));
        assert!(queue.push(entry(3)));
        assert!(!queue.push(track(4)));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pending_len(), 2);
        assert!(queue.is_full());
    }

    #[test]
    fn ready_sequence_is_fifo() {
        let mut queue = TrackQueue::new(10);
        for n in 1..=3 {
            queue.push(track(n));
        }

        let titles: Vec<String> = std::iter::from_fn(|| queue.pop_ready())
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Track 1", "Track 2", "Track 3"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_and_clear() {
        let mut queue = TrackQueue::new(10);
        for n in 1..=3 {
            queue.push(track(n));
        }
        queue.push(entry(4));

        assert_eq!(queue.remove_ready(1).unwrap().title, "Track 2");
        assert_eq!(queue.remove_ready(5), None);
        assert_eq!(queue.ready_titles(), vec!["Track 1", "Track 3"]);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.remaining(), 10);
    }
}
