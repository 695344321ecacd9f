//! Pure merge logic for the feed: no I/O, no clocks, no tasks.

use std::collections::HashSet;

use crate::post::{Post, PostId};

/// Ordered, duplicate-free post list plus the live events held back while
/// the bulk snapshot is loading.
#[derive(Debug, Default, Clone)]
pub struct FeedModel {
    posts: Vec<Post>,
    ids: HashSet<PostId>,
    buffered: Vec<Post>,
    buffered_ids: HashSet<PostId>,
    loaded: bool,
}

impl FeedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything, back to the pre-snapshot state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.ids.contains(id)
    }

    /// Number of live posts waiting for the snapshot.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Holds a live post until the snapshot arrives. Returns false for an id
    /// already buffered.
    pub fn buffer_live(&mut self, post: Post) -> bool {
        if !self.buffered_ids.insert(post.id.clone()) {
            return false;
        }
        self.buffered.push(post);
        true
    }

    /// Installs the bulk snapshot, then replays buffered live posts.
    ///
    /// The snapshot is deduplicated by id and sorted newest first. Buffered
    /// posts are replayed in arrival order, each prepended unless its id is
    /// already present, so the latest arrival ends up first.
    pub fn load_snapshot(&mut self, snapshot: Vec<Post>) {
        let mut posts = Vec::with_capacity(snapshot.len() + self.buffered.len());
        let mut ids = HashSet::with_capacity(posts.capacity());
        for post in snapshot {
            if ids.insert(post.id.clone()) {
                posts.push(post);
            }
        }
        posts.sort_by(Post::feed_order);

        self.posts = posts;
        self.ids = ids;
        self.loaded = true;

        let buffered = std::mem::take(&mut self.buffered);
        self.buffered_ids.clear();
        for post in buffered {
            self.prepend_live(post);
        }
    }

    /// Puts a live post at the front. Returns false (and changes nothing)
    /// when the id is already in the feed.
    pub fn prepend_live(&mut self, post: Post) -> bool {
        if !self.ids.insert(post.id.clone()) {
            return false;
        }
        self.posts.insert(0, post);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn post(id: &str, day: u32) -> Post {
        Post {
            id: PostId::new(id),
            author_id: "u1".to_string(),
            caption: None,
            image_url: format!("https://img/{id}.jpg"),
            created_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            author_profile: None,
        }
    }

    fn ids(model: &FeedModel) -> Vec<&str> {
        model.posts().iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn snapshot_then_live_prepends() {
        let mut model = FeedModel::new();
        model.load_snapshot(vec![post("p3", 3), post("p1", 1)]);

        assert!(model.prepend_live(post("p4", 4)));
        assert_eq!(ids(&model), vec!["p4", "p3", "p1"]);

        assert!(!model.prepend_live(post("p4", 4)));
        assert_eq!(ids(&model), vec!["p4", "p3", "p1"]);
    }

    #[test]
    fn buffered_posts_replay_latest_arrival_first() {
        let mut model = FeedModel::new();
        assert!(model.buffer_live(post("l1", 10)));
        assert!(model.buffer_live(post("l2", 11)));
        assert!(!model.buffer_live(post("l1", 10)));
        assert_eq!(model.buffered_len(), 2);

        model.load_snapshot(vec![post("h1", 1), post("h2", 2)]);

        assert_eq!(ids(&model), vec!["l2", "l1", "h2", "h1"]);
        assert_eq!(model.buffered_len(), 0);
    }

    #[test]
    fn buffered_post_already_in_snapshot_is_not_duplicated() {
        let mut model = FeedModel::new();
        model.buffer_live(post("p2", 2));

        model.load_snapshot(vec![post("p2", 2), post("p1", 1)]);

        assert_eq!(ids(&model), vec!["p2", "p1"]);
    }

    #[test]
    fn snapshot_is_deduplicated_and_ordered() {
        let mut model = FeedModel::new();
        model.load_snapshot(vec![post("a", 1), post("b", 3), post("a", 1), post("c", 2)]);
        assert_eq!(ids(&model), vec!["b", "c", "a"]);
    }

    #[test]
    fn empty_snapshot_is_loaded_and_empty() {
        let mut model = FeedModel::new();
        model.load_snapshot(Vec::new());
        assert!(model.is_loaded());
        assert!(model.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut model = FeedModel::new();
        model.buffer_live(post("l1", 1));
        model.load_snapshot(vec![post("p1", 1)]);

        model.reset();

        assert!(!model.is_loaded());
        assert!(model.is_empty());
        assert_eq!(model.buffered_len(), 0);
        assert!(!model.contains(&PostId::new("p1")));
    }

    /// Every split of N live arrivals around a snapshot yields the union of
    /// ids, each once, live before historical, latest arrival first.
    #[test]
    fn all_interleavings_produce_the_union() {
        let historical = vec![post("h3", 3), post("h2", 2), post("h1", 1)];
        let live: Vec<Post> = (0..4).map(|i| post(&format!("l{i}"), 20 + i)).collect();

        for split in 0..=live.len() {
            let mut model = FeedModel::new();
            for p in &live[..split] {
                model.buffer_live(p.clone());
            }
            model.load_snapshot(historical.clone());
            for p in &live[split..] {
                model.prepend_live(p.clone());
            }

            assert_eq!(
                ids(&model),
                vec!["l3", "l2", "l1", "l0", "h3", "h2", "h1"],
                "split at {split}"
            );
        }
    }
}
