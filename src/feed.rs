//! Feed, reel and story state shown on screen.
//!
//! [`FeedState`] is patched by socket pushes and by the user's own actions.
//! Likes and saves go through one [`OptimisticToggle`] per target, kept for
//! the lifetime of the state; a settled toggle is written back into the
//! entity's member list so display counts follow it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::api::{CommentTarget, PostsApi, ToggleApi};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ServerEvent};
use crate::metrics::{MetricKind, MetricsPolicy};
use crate::models::{Comment, Post, Reel, Story};
use crate::optimistic::{OptimisticToggle, ToggleState, ToggleTarget};
use crate::socket::EventSink;

/// Posts, reels and stories currently on screen, kept current by socket
/// pushes.
pub struct FeedState {
    me: String,
    metrics: MetricsPolicy,
    sink: Arc<dyn EventSink>,
    posts: Vec<Post>,
    reels: Vec<Reel>,
    stories: Vec<Story>,
    reported_views: HashSet<String>,
    toggles: HashMap<ToggleTarget, OptimisticToggle>,
}

impl FeedState {
    #[must_use]
    pub fn new(me: impl Into<String>, metrics: MetricsPolicy, sink: Arc<dyn EventSink>) -> Self {
        FeedState {
            me: me.into(),
            metrics,
            sink,
            posts: Vec::new(),
            reels: Vec::new(),
            stories: Vec::new(),
            reported_views: HashSet::new(),
            toggles: HashMap::new(),
        }
    }

    pub fn set_posts(&mut self, posts: Vec<Post>) {
        self.posts = posts;
    }

    pub fn set_reels(&mut self, reels: Vec<Reel>) {
        self.reels = reels;
    }

    pub fn set_stories(&mut self, stories: Vec<Story>) {
        self.stories = stories;
    }

    #[must_use]
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    #[must_use]
    pub fn reels(&self) -> &[Reel] {
        &self.reels
    }

    pub fn active_stories(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Story> {
        self.stories.iter().filter(move |s| !s.is_expired(now))
    }

    /// Replaces posts with the first page and reloads stories.
    ///
    /// # Errors
    ///
    /// Returns the REST error; the current lists are kept.
    pub async fn refresh(&mut self, api: &dyn PostsApi) -> Result<()> {
        let posts = api.posts_page(1).await?;
        let stories = api.stories().await?;
        info!("loaded {} posts and {} stories", posts.len(), stories.len());
        self.posts = posts;
        self.stories = stories;
        Ok(())
    }

    /// Appends a further page of posts, skipping ones already shown.
    /// Returns how many were added.
    ///
    /// # Errors
    ///
    /// Returns the REST error.
    pub async fn load_posts(&mut self, page: u32, api: &dyn PostsApi) -> Result<usize> {
        let fetched = api.posts_page(page).await?;
        let before = self.posts.len();
        for post in fetched {
            if !self.posts.iter().any(|p| p.id == post.id) {
                self.posts.push(post);
            }
        }
        Ok(self.posts.len() - before)
    }

    /// Applies a feed push. Returns false for events that changed nothing.
    pub async fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::PostLiked { post_id, user_id, liked } => {
                self.set_liked(ToggleTarget::PostLike(post_id.clone()), user_id, *liked).await
            }
            ServerEvent::ReelLiked { reel_id, user_id, liked } => {
                self.set_liked(ToggleTarget::ReelLike(reel_id.clone()), user_id, *liked).await
            }
            ServerEvent::PostCommented { post_id, comment } => self
                .posts
                .iter_mut()
                .find(|p| &p.id == post_id)
                .is_some_and(|p| push_comment(&mut p.comments, comment)),
            ServerEvent::ReelCommented { reel_id, comment } => self
                .reels
                .iter_mut()
                .find(|r| &r.id == reel_id)
                .is_some_and(|r| push_comment(&mut r.comments, comment)),
            ServerEvent::NewPost { post } => {
                if self.posts.iter().any(|p| p.id == post.id) {
                    return false;
                }
                self.posts.insert(0, post.clone());
                true
            }
            ServerEvent::NewStory { story } => {
                if self.stories.iter().any(|s| s.id == story.id) {
                    return false;
                }
                self.stories.insert(0, story.clone());
                true
            }
            ServerEvent::StoryViewed { story_id, viewer_id } => self
                .stories
                .iter_mut()
                .find(|s| &s.id == story_id)
                .is_some_and(|s| set_member(&mut s.viewers, viewer_id, true)),
            other => {
                debug!("feed ignoring {other:?}");
                false
            }
        }
    }

    /// Records a pushed like and brings an existing toggle for the same
    /// target up to date.
    async fn set_liked(&mut self, target: ToggleTarget, user_id: &str, liked: bool) -> bool {
        let Some(members) = self.members_mut(&target) else {
            return false;
        };
        if !set_member(members, user_id, liked) {
            return false;
        }
        if let Some(toggle) = self.toggles.get(&target) {
            let (active, count) = self.membership(&target);
            toggle.sync(active, count).await;
        }
        true
    }

    /// Likes, unlikes, saves or unsaves optimistically and returns the
    /// settled state.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] when the target is not in the feed, or the
    /// backend error after the toggle rolled back.
    pub async fn toggle(&mut self, target: ToggleTarget, api: &dyn ToggleApi) -> Result<ToggleState> {
        let toggle = self.toggle_for(&target)?;
        let outcome = toggle.toggle(api).await;

        let settled = toggle.state().await;
        let me = self.me.clone();
        if let Some(members) = self.members_mut(&target) {
            set_member(members, &me, settled.active);
        }
        outcome
    }

    /// Current like or save state for `target`, if it is in the feed.
    pub async fn toggle_state(&self, target: &ToggleTarget) -> Option<ToggleState> {
        if let Some(toggle) = self.toggles.get(target) {
            return Some(toggle.state().await);
        }
        self.members(target)?;
        let (active, count) = self.membership(target);
        Some(ToggleState { active, count })
    }

    fn toggle_for(&mut self, target: &ToggleTarget) -> Result<OptimisticToggle> {
        if let Some(toggle) = self.toggles.get(target) {
            return Ok(toggle.clone());
        }
        if self.members(target).is_none() {
            return Err(ClientError::not_found("feed item", target.id()));
        }
        let (active, count) = self.membership(target);
        let toggle = OptimisticToggle::new(target.clone(), active, count);
        self.toggles.insert(target.clone(), toggle.clone());
        Ok(toggle)
    }

    fn membership(&self, target: &ToggleTarget) -> (bool, u64) {
        self.members(target).map_or((false, 0), |members| {
            (members.iter().any(|id| id == &self.me), members.len() as u64)
        })
    }

    fn members(&self, target: &ToggleTarget) -> Option<&Vec<String>> {
        match target {
            ToggleTarget::PostLike(id) => self.posts.iter().find(|p| &p.id == id).map(|p| &p.likes),
            ToggleTarget::SavePost(id) => self.posts.iter().find(|p| &p.id == id).map(|p| &p.saved_by),
            ToggleTarget::ReelLike(id) => self.reels.iter().find(|r| &r.id == id).map(|r| &r.likes),
            ToggleTarget::StoryLike(id) => self.stories.iter().find(|s| &s.id == id).map(|s| &s.likes),
            ToggleTarget::Follow(_) => None,
        }
    }

    fn members_mut(&mut self, target: &ToggleTarget) -> Option<&mut Vec<String>> {
        match target {
            ToggleTarget::PostLike(id) => self.posts.iter_mut().find(|p| &p.id == id).map(|p| &mut p.likes),
            ToggleTarget::SavePost(id) => self.posts.iter_mut().find(|p| &p.id == id).map(|p| &mut p.saved_by),
            ToggleTarget::ReelLike(id) => self.reels.iter_mut().find(|r| &r.id == id).map(|r| &mut r.likes),
            ToggleTarget::StoryLike(id) => self.stories.iter_mut().find(|s| &s.id == id).map(|s| &mut s.likes),
            ToggleTarget::Follow(_) => None,
        }
    }

    /// Posts a comment and adds the stored copy to the post or reel.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for blank text, [`ClientError::NotFound`]
    /// when the target is not in the feed, otherwise the REST error.
    pub async fn add_comment(&mut self, target: &CommentTarget, text: &str, api: &dyn PostsApi) -> Result<Comment> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::validation("Comment cannot be empty"));
        }
        if self.comments_mut(target).is_none() {
            let id = match target {
                CommentTarget::Post(id) | CommentTarget::Reel(id) => id,
            };
            return Err(ClientError::not_found("feed item", id));
        }

        let comment = api.add_comment(target, text).await?;
        if let Some(comments) = self.comments_mut(target) {
            push_comment(comments, &comment);
        }
        Ok(comment)
    }

    fn comments_mut(&mut self, target: &CommentTarget) -> Option<&mut Vec<Comment>> {
        match target {
            CommentTarget::Post(id) => self.posts.iter_mut().find(|p| &p.id == id).map(|p| &mut p.comments),
            CommentTarget::Reel(id) => self.reels.iter_mut().find(|r| &r.id == id).map(|r| &mut r.comments),
        }
    }

    /// Marks a story as seen by us and reports it once per story.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for an unknown story, or the socket error;
    /// a failed report may be retried.
    pub fn view_story(&mut self, story_id: &str) -> Result<bool> {
        let story = self
            .stories
            .iter_mut()
            .find(|s| s.id == story_id)
            .ok_or_else(|| ClientError::not_found("story", story_id))?;

        set_member(&mut story.viewers, &self.me, true);
        if !self.reported_views.insert(story_id.to_string()) {
            return Ok(false);
        }
        if story.user.id() == self.me {
            return Ok(false);
        }

        if let Err(e) = self.sink.emit(ClientEvent::StoryViewed {
            story_id: story_id.to_string(),
            user_id: self.me.clone(),
        }) {
            warn!("could not report view of story {story_id}: {e}");
            self.reported_views.remove(story_id);
            return Err(e);
        }
        Ok(true)
    }

    #[must_use]
    pub fn post_likes(&self, post_id: &str) -> Option<u64> {
        let post = self.posts.iter().find(|p| p.id == post_id)?;
        Some(self.metrics.display_count(&post.id, MetricKind::Likes, post.likes.len() as u64))
    }

    #[must_use]
    pub fn post_comments(&self, post_id: &str) -> Option<u64> {
        let post = self.posts.iter().find(|p| p.id == post_id)?;
        Some(self.metrics.display_count(&post.id, MetricKind::Comments, post.comments.len() as u64))
    }

    #[must_use]
    pub fn reel_likes(&self, reel_id: &str) -> Option<u64> {
        let reel = self.reels.iter().find(|r| r.id == reel_id)?;
        Some(self.metrics.display_count(&reel.id, MetricKind::Likes, reel.likes.len() as u64))
    }

    #[must_use]
    pub fn reel_views(&self, reel_id: &str) -> Option<u64> {
        let reel = self.reels.iter().find(|r| r.id == reel_id)?;
        Some(self.metrics.display_count(&reel.id, MetricKind::Views, reel.views))
    }

    #[must_use]
    pub fn reel_comments(&self, reel_id: &str) -> Option<u64> {
        let reel = self.reels.iter().find(|r| r.id == reel_id)?;
        Some(self.metrics.display_count(&reel.id, MetricKind::Comments, reel.comments.len() as u64))
    }
}

fn set_member(ids: &mut Vec<String>, id: &str, present: bool) -> bool {
    let position = ids.iter().position(|existing| existing == id);
    match (present, position) {
        (true, None) => {
            ids.push(id.to_string());
            true
        }
        (false, Some(index)) => {
            ids.remove(index);
            true
        }
        _ => false,
    }
}

fn push_comment(comments: &mut Vec<Comment>, comment: &Comment) -> bool {
    if comments.iter().any(|c| c.id == comment.id) {
        return false;
    }
    comments.push(comment.clone());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::demo_count;
    use serde_json::json;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<ClientEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: ClientEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeToggleApi {
        fail: bool,
        calls: StdMutex<Vec<(ToggleTarget, bool)>>,
    }

    #[async_trait]
    impl ToggleApi for FakeToggleApi {
        async fn set_toggle(&self, target: &ToggleTarget, active: bool) -> Result<()> {
            self.calls.lock().unwrap().push((target.clone(), active));
            if self.fail {
                return Err(ClientError::Http { status: 500, message: "boom".to_string() });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePostsApi {
        pages: Vec<Vec<Post>>,
        stories: Vec<Story>,
    }

    #[async_trait]
    impl PostsApi for FakePostsApi {
        async fn posts_page(&self, page: u32) -> Result<Vec<Post>> {
            Ok(self.pages.get(page as usize - 1).cloned().unwrap_or_default())
        }

        async fn stories(&self) -> Result<Vec<Story>> {
            Ok(self.stories.clone())
        }

        async fn add_comment(&self, _target: &CommentTarget, text: &str) -> Result<Comment> {
            Ok(serde_json::from_value(json!({"_id": "c-new", "user": "me", "text": text})).unwrap())
        }
    }

    fn post(id: &str, likes: &[&str]) -> Post {
        serde_json::from_value(json!({"_id": id, "user": "author", "caption": "hi", "likes": likes})).unwrap()
    }

    fn reel(id: &str, views: u64) -> Reel {
        serde_json::from_value(json!({"_id": id, "user": "author", "videoUrl": "v.mp4", "views": views})).unwrap()
    }

    fn story(id: &str, owner: &str, expires_at: &str) -> Story {
        serde_json::from_value(json!({"_id": id, "user": owner, "mediaUrl": "s.jpg", "expiresAt": expires_at}))
            .unwrap()
    }

    fn comment(id: &str) -> Comment {
        serde_json::from_value(json!({"_id": id, "user": "u2", "text": "nice"})).unwrap()
    }

    fn state() -> (FeedState, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (FeedState::new("me", MetricsPolicy::disabled(), sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_like_pushes_update_posts_and_reels() {
        let (mut feed, _) = state();
        feed.set_posts(vec![post("P1", &["u1"])]);
        feed.set_reels(vec![reel("R1", 10)]);

        assert!(feed.apply(&ServerEvent::PostLiked { post_id: "P1".into(), user_id: "u2".into(), liked: true }).await);
        assert!(!feed.apply(&ServerEvent::PostLiked { post_id: "P1".into(), user_id: "u2".into(), liked: true }).await);
        assert_eq!(feed.post_likes("P1"), Some(2));

        assert!(feed.apply(&ServerEvent::PostLiked { post_id: "P1".into(), user_id: "u1".into(), liked: false }).await);
        assert_eq!(feed.post_likes("P1"), Some(1));

        assert!(feed.apply(&ServerEvent::ReelLiked { reel_id: "R1".into(), user_id: "me".into(), liked: true }).await);
        assert_eq!(feed.reel_likes("R1"), Some(1));
        assert!(!feed.apply(&ServerEvent::ReelLiked { reel_id: "gone".into(), user_id: "me".into(), liked: true }).await);
    }

    #[tokio::test]
    async fn test_comment_pushes_are_deduplicated() {
        let (mut feed, _) = state();
        feed.set_posts(vec![post("P1", &[])]);
        feed.set_reels(vec![reel("R1", 0)]);

        let push = ServerEvent::PostCommented { post_id: "P1".into(), comment: comment("c1") };
        assert!(feed.apply(&push).await);
        assert!(!feed.apply(&push).await);
        assert_eq!(feed.post_comments("P1"), Some(1));

        assert!(feed.apply(&ServerEvent::ReelCommented { reel_id: "R1".into(), comment: comment("c2") }).await);
        assert_eq!(feed.reel_comments("R1"), Some(1));
    }

    #[tokio::test]
    async fn test_new_post_and_story_prepend_once() {
        let (mut feed, _) = state();
        feed.set_posts(vec![post("P1", &[])]);

        assert!(feed.apply(&ServerEvent::NewPost { post: post("P2", &[]) }).await);
        assert!(!feed.apply(&ServerEvent::NewPost { post: post("P2", &[]) }).await);
        assert_eq!(feed.posts()[0].id, "P2");

        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert!(feed.apply(&ServerEvent::NewStory { story: story("S1", "u2", "2026-01-02T00:00:00Z") }).await);
        assert!(feed.apply(&ServerEvent::NewStory { story: story("S0", "u2", "2025-12-31T00:00:00Z") }).await);
        let active: Vec<&str> = feed.active_stories(now).map(|s| s.id.as_str()).collect();
        assert_eq!(active, vec!["S1"]);
    }

    #[test]
    fn test_view_story_reports_once() {
        let (mut feed, sink) = state();
        feed.set_stories(vec![story("S1", "u2", "2030-01-01T00:00:00Z"), story("S2", "me", "2030-01-01T00:00:00Z")]);

        assert!(feed.view_story("S1").unwrap());
        assert!(!feed.view_story("S1").unwrap());
        assert!(!feed.view_story("S2").unwrap());
        assert!(matches!(feed.view_story("nope"), Err(ClientError::NotFound { .. })));

        let events = sink.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![ClientEvent::StoryViewed { story_id: "S1".into(), user_id: "me".into() }]
        );
    }

    #[tokio::test]
    async fn test_story_viewed_push_adds_viewer() {
        let (mut feed, _) = state();
        feed.set_stories(vec![story("S1", "me", "2030-01-01T00:00:00Z")]);

        assert!(feed.apply(&ServerEvent::StoryViewed { story_id: "S1".into(), viewer_id: "u3".into() }).await);
        assert!(!feed.apply(&ServerEvent::StoryViewed { story_id: "S1".into(), viewer_id: "u3".into() }).await);
    }

    #[test]
    fn test_display_counts_blend_demo_metrics() {
        let sink = Arc::new(RecordingSink::default());
        let mut feed = FeedState::new("me", MetricsPolicy::new(true), sink);
        feed.set_reels(vec![reel("R123", 5)]);

        assert_eq!(feed.reel_views("R123"), Some(5 + demo_count("R123", MetricKind::Views)));
        assert_eq!(feed.reel_views("missing"), None);
    }

    #[tokio::test]
    async fn test_like_toggle_is_kept_and_written_back() {
        let (mut feed, _) = state();
        feed.set_posts(vec![post("P1", &[])]);
        let api = FakeToggleApi::default();
        let target = ToggleTarget::PostLike("P1".to_string());

        let liked = feed.toggle(target.clone(), &api).await.unwrap();
        assert_eq!(liked, ToggleState { active: true, count: 1 });
        assert_eq!(feed.post_likes("P1"), Some(1));
        assert!(feed.posts()[0].is_liked_by("me"));

        let unliked = feed.toggle(target.clone(), &api).await.unwrap();
        assert_eq!(unliked, ToggleState { active: false, count: 0 });
        assert_eq!(feed.post_likes("P1"), Some(0));
        assert_eq!(*api.calls.lock().unwrap(), vec![(target.clone(), true), (target, false)]);
    }

    #[tokio::test]
    async fn test_failed_toggle_rolls_back() {
        let (mut feed, _) = state();
        feed.set_posts(vec![post("P1", &["u1"])]);
        let api = FakeToggleApi { fail: true, ..FakeToggleApi::default() };
        let target = ToggleTarget::SavePost("P1".to_string());

        assert!(feed.toggle(target.clone(), &api).await.is_err());
        assert_eq!(feed.toggle_state(&target).await, Some(ToggleState { active: false, count: 0 }));
        assert!(feed.posts()[0].saved_by.is_empty());
        assert_eq!(feed.post_likes("P1"), Some(1));
    }

    #[tokio::test]
    async fn test_push_from_other_user_keeps_own_like() {
        let (mut feed, _) = state();
        feed.set_reels(vec![reel("R1", 0)]);
        let api = FakeToggleApi::default();
        let target = ToggleTarget::ReelLike("R1".to_string());
        feed.toggle(target.clone(), &api).await.unwrap();

        assert!(feed.apply(&ServerEvent::ReelLiked { reel_id: "R1".into(), user_id: "u2".into(), liked: true }).await);
        assert!(!feed.apply(&ServerEvent::ReelLiked { reel_id: "R1".into(), user_id: "me".into(), liked: true }).await);

        assert_eq!(feed.reel_likes("R1"), Some(2));
        assert_eq!(feed.toggle_state(&target).await, Some(ToggleState { active: true, count: 2 }));

        let unliked = feed.toggle(target, &api).await.unwrap();
        assert_eq!(unliked, ToggleState { active: false, count: 1 });
        assert_eq!(feed.reels()[0].likes, vec!["u2"]);
    }

    #[tokio::test]
    async fn test_toggle_unknown_target() {
        let (mut feed, _) = state();
        let api = FakeToggleApi::default();

        let result = feed.toggle(ToggleTarget::PostLike("missing".to_string()), &api).await;
        assert!(matches!(result, Err(ClientError::NotFound { .. })));
        let result = feed.toggle(ToggleTarget::Follow("u2".to_string()), &api).await;
        assert!(matches!(result, Err(ClientError::NotFound { .. })));
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_and_load_more_posts() {
        let (mut feed, _) = state();
        let api = FakePostsApi {
            pages: vec![vec![post("P1", &[]), post("P2", &[])], vec![post("P2", &[]), post("P3", &[])]],
            stories: vec![story("S1", "u2", "2030-01-01T00:00:00Z")],
        };

        feed.refresh(&api).await.unwrap();
        assert_eq!(feed.posts().len(), 2);
        assert_eq!(feed.active_stories(Utc::now()).count(), 1);

        assert_eq!(feed.load_posts(2, &api).await.unwrap(), 1);
        let ids: Vec<&str> = feed.posts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2", "P3"]);
    }

    #[tokio::test]
    async fn test_add_comment() {
        let (mut feed, _) = state();
        feed.set_posts(vec![post("P1", &[])]);
        let api = FakePostsApi::default();
        let target = CommentTarget::Post("P1".to_string());

        let comment = feed.add_comment(&target, "  great shot ", &api).await.unwrap();
        assert_eq!(comment.text, "great shot");
        assert_eq!(feed.post_comments("P1"), Some(1));

        assert!(matches!(feed.add_comment(&target, " ", &api).await, Err(ClientError::Validation(_))));
        let missing = CommentTarget::Reel("R9".to_string());
        assert!(matches!(feed.add_comment(&missing, "hi", &api).await, Err(ClientError::NotFound { .. })));

        // The push for our own comment arrives afterwards.
        assert!(!feed.apply(&ServerEvent::PostCommented { post_id: "P1".into(), comment }).await);
    }
}
