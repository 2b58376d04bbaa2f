use rand::Rng;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use super::track::Track;
use crate::error::{PlaybackError, Result};

/// Which of the two independent loop flags a loop command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Replay the last started track.
    Track,
    /// Append finished tracks back onto the queue.
    Queue,
}

/// The next track picked by [`MusicQueue::select_next`].
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub track: Track,
    /// True when the pick is a single-loop replay of `last_track`.
    pub replay: bool,
}

/// Per-guild play queue plus the loop/shuffle flags that decide what comes next.
#[derive(Debug)]
pub struct MusicQueue {
    items: VecDeque<Track>,
    last_track: Option<Track>,
    loop_single: bool,
    loop_all: bool,
    shuffle: bool,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            last_track: None,
            loop_single: false,
            loop_all: false,
            shuffle: false,
            max_size,
        }
    }

    pub fn push(&mut self, track: Track) -> Result<()> {
        if self.items.len() >= self.max_size {
            return Err(PlaybackError::QueueFull {
                capacity: self.max_size,
            });
        }

        info!("➕ Added to queue: {}", track.title);
        self.items.push_back(track);
        Ok(())
    }

    /// Appends as many tracks as fit and returns the accepted ones.
    pub fn extend(&mut self, tracks: Vec<Track>) -> Vec<Track> {
        let available_space = self.max_size.saturating_sub(self.items.len());
        let accepted: Vec<Track> = tracks.into_iter().take(available_space).collect();

        self.items.extend(accepted.iter().cloned());
        info!("➕ Added {} tracks to queue", accepted.len());
        accepted
    }

    /// Whether an advance would find something to play.
    pub fn has_next(&self) -> bool {
        !self.items.is_empty() || (self.loop_single && self.last_track.is_some())
    }

    pub fn select_next(&mut self) -> Option<Selection> {
        self.select_next_with(&mut rand::thread_rng())
    }

    /// Picks the next track: single-loop replay, then a uniformly random index
    /// under shuffle, otherwise strict FIFO. The pick becomes `last_track`.
    pub fn select_next_with<R: Rng>(&mut self, rng: &mut R) -> Option<Selection> {
        if self.loop_single {
            if let Some(track) = self.last_track.clone() {
                debug!("🔂 Replaying track: {}", track.title);
                return Some(Selection { track, replay: true });
            }
        }

        let next = if self.shuffle && !self.items.is_empty() {
            let index = rng.gen_range(0..self.items.len());
            let picked = self.items.remove(index);
            if let Some(track) = &picked {
                debug!("🔀 Shuffle picked #{}: {}", index + 1, track.title);
            }
            picked
        } else {
            self.items.pop_front()
        };

        let track = next?;
        self.last_track = Some(track.clone());
        Some(Selection {
            track,
            replay: false,
        })
    }

    /// Puts a naturally finished track back at the tail when queue looping is on.
    pub fn requeue_finished(&mut self, track: Track) -> bool {
        if !self.loop_all || self.loop_single {
            return false;
        }

        debug!("🔁 Requeued by queue loop: {}", track.title);
        self.items.push_back(track);
        true
    }

    /// Removes the track at a 1-based position.
    pub fn remove_at(&mut self, position: usize) -> Result<Track> {
        let len = self.items.len();
        if position == 0 || position > len {
            return Err(PlaybackError::IndexOutOfBounds { position, len });
        }

        self.items
            .remove(position - 1)
            .ok_or(PlaybackError::IndexOutOfBounds { position, len })
    }

    pub fn clear(&mut self) {
        self.items.clear();
        info!("🗑️ Queue cleared");
    }

    /// Drops the single-loop replay candidate so the next advance reads the queue.
    pub fn forget_last_track(&mut self) -> Option<Track> {
        self.last_track.take()
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.shuffle
    }

    pub fn toggle_loop_single(&mut self) -> bool {
        self.loop_single = !self.loop_single;
        self.loop_single
    }

    pub fn toggle_loop_all(&mut self) -> bool {
        self.loop_all = !self.loop_all;
        self.loop_all
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn loop_single(&self) -> bool {
        self.loop_single
    }

    pub fn loop_all(&self) -> bool {
        self.loop_all
    }

    pub fn last_track(&self) -> Option<&Track> {
        self.last_track.as_ref()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.items.iter().map(Track::duration).sum()
    }

    /// Returns one page of the queue (1-based, clamped to the valid range).
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_items = self.items.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(items_per_page)
        };
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;

        QueuePage {
            items: self
                .items
                .iter()
                .skip(start)
                .take(items_per_page)
                .cloned()
                .collect(),
            first_position: start + 1,
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub items: Vec<Track>,
    /// 1-based queue position of `items[0]`.
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use serenity::model::id::UserId;

    fn track(title: &str) -> Track {
        Track::new(title, UserId::new(1)).with_duration(60)
    }

    fn queue_of(titles: &[&str]) -> MusicQueue {
        let mut queue = MusicQueue::new(100);
        for title in titles {
            queue.push(track(title)).unwrap();
        }
        queue
    }

    fn titles(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|t| t.title.clone()).collect()
    }

    fn drain(queue: &mut MusicQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.select_next())
            .map(|selection| selection.track.title)
            .collect()
    }

    #[test]
    fn test_fifo_selection() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        assert_eq!(drain(&mut queue), vec!["a", "b", "c", "d"]);
        assert!(!queue.has_next());
    }

    #[test]
    fn test_double_shuffle_toggle_restores_fifo() {
        let mut queue = queue_of(&["a", "b", "c"]);
        assert!(queue.toggle_shuffle());
        assert!(!queue.toggle_shuffle());
        assert_eq!(drain(&mut queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_shuffle_removes_each_track_once() {
        let mut queue = queue_of(&["a", "b", "c", "d", "e"]);
        queue.toggle_shuffle();
        let mut rng = StdRng::seed_from_u64(7);

        let mut picked: Vec<String> = std::iter::from_fn(|| queue.select_next_with(&mut rng))
            .map(|selection| selection.track.title)
            .collect();
        picked.sort();

        assert_eq!(picked, vec!["a", "b", "c", "d", "e"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_loop_single_replays_last_track() {
        let mut queue = queue_of(&["a", "b"]);
        let first = queue.select_next().unwrap();
        assert!(!first.replay);

        queue.toggle_loop_single();
        let replay = queue.select_next().unwrap();
        assert_eq!(replay.track.title, "a");
        assert!(replay.replay);
        assert_eq!(queue.len(), 1);

        queue.toggle_loop_single();
        assert_eq!(queue.select_next().unwrap().track.title, "b");
    }

    #[test]
    fn test_loop_single_without_history_reads_queue() {
        let mut queue = queue_of(&["a"]);
        queue.toggle_loop_single();
        let selection = queue.select_next().unwrap();
        assert_eq!(selection.track.title, "a");
        assert!(!selection.replay);

        queue.forget_last_track();
        assert!(!queue.has_next());
    }

    #[test]
    fn test_requeue_finished_only_with_queue_loop() {
        let mut queue = queue_of(&["b"]);
        assert!(!queue.requeue_finished(track("a")));

        queue.toggle_loop_all();
        assert!(queue.requeue_finished(track("a")));
        assert_eq!(titles(&queue.tracks()), vec!["b", "a"]);

        queue.toggle_loop_single();
        assert!(!queue.requeue_finished(track("c")));
    }

    #[test]
    fn test_remove_at_bounds() {
        let mut queue = queue_of(&["a", "b", "c"]);
        assert_eq!(
            queue.remove_at(4),
            Err(PlaybackError::IndexOutOfBounds { position: 4, len: 3 })
        );
        assert_eq!(
            queue.remove_at(0),
            Err(PlaybackError::IndexOutOfBounds { position: 0, len: 3 })
        );
        assert_eq!(queue.remove_at(1).unwrap().title, "a");
        assert_eq!(titles(&queue.tracks()), vec!["b", "c"]);
    }

    #[test]
    fn test_capacity() {
        let mut queue = MusicQueue::new(2);
        queue.push(track("a")).unwrap();
        let accepted = queue.extend(vec![track("b"), track("c")]);
        assert_eq!(titles(&accepted), vec!["b"]);
        assert_eq!(
            queue.push(track("d")),
            Err(PlaybackError::QueueFull { capacity: 2 })
        );
    }

    #[test]
    fn test_pages() {
        let queue = queue_of(&["a", "b", "c", "d", "e", "f", "g"]);

        let second = queue.page(2, 5);
        assert_eq!(titles(&second.items), vec!["f", "g"]);
        assert_eq!(second.first_position, 6);
        assert_eq!(second.total_pages, 2);

        let clamped = queue.page(9, 5);
        assert_eq!(clamped.current_page, 2);

        let empty = MusicQueue::new(10).page(1, 5);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_total_duration() {
        let queue = queue_of(&["a", "b"]);
        assert_eq!(queue.total_duration(), Duration::from_secs(120));
    }
}
