//! Optimistic like/follow/save toggles.
//!
//! The local state flips immediately and the REST call runs afterwards. A
//! failed call restores the value captured before the flip, provided no newer
//! toggle has been issued in the meantime.

use std::sync::Arc;

use log::{error, warn};
use tokio::sync::Mutex;

use crate::api::ToggleApi;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToggleTarget {
    PostLike(String),
    ReelLike(String),
    StoryLike(String),
    Follow(String),
    SavePost(String),
}

impl ToggleTarget {
    /// Id of the post, reel, story or user the toggle acts on.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            ToggleTarget::PostLike(id)
            | ToggleTarget::ReelLike(id)
            | ToggleTarget::StoryLike(id)
            | ToggleTarget::Follow(id)
            | ToggleTarget::SavePost(id) => id,
        }
    }

    /// REST path; `POST` turns the toggle on and `DELETE` turns it off.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            ToggleTarget::PostLike(id) => format!("posts/{id}/like"),
            ToggleTarget::ReelLike(id) => format!("reels/{id}/like"),
            ToggleTarget::StoryLike(id) => format!("stories/{id}/like"),
            ToggleTarget::Follow(user_id) => format!("users/{user_id}/follow"),
            ToggleTarget::SavePost(id) => format!("posts/{id}/save"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleState {
    pub active: bool,
    pub count: u64,
}

impl ToggleState {
    fn flipped(self) -> Self {
        if self.active {
            ToggleState {
                active: false,
                count: self.count.saturating_sub(1),
            }
        } else {
            ToggleState {
                active: true,
                count: self.count + 1,
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    state: ToggleState,
    /// Bumped on every toggle; only the latest toggle may roll back.
    seq: u64,
}

#[derive(Clone)]
pub struct OptimisticToggle {
    target: ToggleTarget,
    entry: Arc<Mutex<Entry>>,
}

impl OptimisticToggle {
    #[must_use]
    pub fn new(target: ToggleTarget, active: bool, count: u64) -> Self {
        OptimisticToggle {
            target,
            entry: Arc::new(Mutex::new(Entry {
                state: ToggleState { active, count },
                seq: 0,
            })),
        }
    }

    #[must_use]
    pub fn target(&self) -> &ToggleTarget {
        &self.target
    }

    pub async fn state(&self) -> ToggleState {
        self.entry.lock().await.state
    }

    /// Replaces the local state with an authoritative value (e.g. a socket push).
    pub async fn sync(&self, active: bool, count: u64) {
        let mut entry = self.entry.lock().await;
        entry.state = ToggleState { active, count };
        entry.seq += 1;
    }

    /// Flips locally, calls the backend, and rolls back on failure.
    ///
    /// Returns the state after the call settles.
    ///
    /// # Errors
    ///
    /// Returns the backend error after rolling back.
    pub async fn toggle(&self, api: &dyn ToggleApi) -> Result<ToggleState> {
        let (previous, next, seq) = {
            let mut entry = self.entry.lock().await;
            let previous = entry.state;
            entry.state = previous.flipped();
            entry.seq += 1;
            (previous, entry.state, entry.seq)
        };

        match api.set_toggle(&self.target, next.active).await {
            Ok(()) => Ok(self.entry.lock().await.state),
            Err(e) => {
                let mut entry = self.entry.lock().await;
                if entry.seq == seq {
                    entry.state = previous;
                    error!("{:?} failed, rolled back: {e}", self.target);
                } else {
                    warn!("{:?} failed after a newer toggle, keeping newer state: {e}", self.target);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct FakeToggleApi {
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeToggleApi {
        fn new(fail: bool) -> Self {
            Self { fail, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ToggleApi for FakeToggleApi {
        async fn set_toggle(&self, _target: &ToggleTarget, _active: bool) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ClientError::Http { status: 500, message: "boom".to_string() })
            } else {
                Ok(())
            }
        }
    }

    /// Fails its first call only after `release` is notified.
    struct GatedFailApi {
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToggleApi for GatedFailApi {
        async fn set_toggle(&self, _target: &ToggleTarget, _active: bool) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.release.notified().await;
                Err(ClientError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_target_paths() {
        assert_eq!(ToggleTarget::PostLike("p1".to_string()).path(), "posts/p1/like");
        assert_eq!(ToggleTarget::ReelLike("r1".to_string()).path(), "reels/r1/like");
        assert_eq!(ToggleTarget::Follow("u1".to_string()).path(), "users/u1/follow");
        assert_eq!(ToggleTarget::SavePost("p1".to_string()).path(), "posts/p1/save");
    }

    #[tokio::test]
    async fn test_successful_like_keeps_flip() {
        let api = FakeToggleApi::new(false);
        let like = OptimisticToggle::new(ToggleTarget::PostLike("p1".to_string()), false, 41);

        let state = like.toggle(&api).await.unwrap();

        assert_eq!(state, ToggleState { active: true, count: 42 });
        assert_eq!(like.state().await, state);
    }

    #[tokio::test]
    async fn test_failed_like_rolls_back() {
        let api = FakeToggleApi::new(true);
        for (active, count) in [(false, 0), (false, 10), (true, 1), (true, 7)] {
            let like = OptimisticToggle::new(ToggleTarget::ReelLike("r1".to_string()), active, count);

            assert!(like.toggle(&api).await.is_err());
            assert_eq!(like.state().await, ToggleState { active, count });
        }
    }

    #[tokio::test]
    async fn test_unlike_at_zero_does_not_underflow() {
        let api = FakeToggleApi::new(false);
        let like = OptimisticToggle::new(ToggleTarget::PostLike("p1".to_string()), true, 0);
        let state = like.toggle(&api).await.unwrap();
        assert_eq!(state, ToggleState { active: false, count: 0 });
    }

    #[tokio::test]
    async fn test_double_toggle_issues_two_calls() {
        let api = FakeToggleApi::new(false);
        let follow = OptimisticToggle::new(ToggleTarget::Follow("u2".to_string()), false, 100);

        follow.toggle(&api).await.unwrap();
        follow.toggle(&api).await.unwrap();

        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(follow.state().await, ToggleState { active: false, count: 100 });
    }

    #[tokio::test]
    async fn test_stale_failure_does_not_clobber_newer_toggle() {
        let api = Arc::new(GatedFailApi { release: Notify::new(), calls: AtomicUsize::new(0) });
        let like = OptimisticToggle::new(ToggleTarget::PostLike("p1".to_string()), false, 5);

        let first = {
            let api = Arc::clone(&api);
            let like = like.clone();
            tokio::spawn(async move { like.toggle(api.as_ref()).await })
        };
        while api.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Unlike and like again while the first like is still in flight.
        let second = like.toggle(api.as_ref()).await.unwrap();
        assert_eq!(second, ToggleState { active: false, count: 5 });
        let third = like.toggle(api.as_ref()).await.unwrap();
        assert_eq!(third, ToggleState { active: true, count: 6 });

        api.release.notify_one();
        assert!(first.await.unwrap().is_err());
        assert_eq!(like.state().await, ToggleState { active: true, count: 6 });
    }

    #[tokio::test]
    async fn test_sync_overrides_local_state() {
        let like = OptimisticToggle::new(ToggleTarget::PostLike("p1".to_string()), false, 5);
        like.sync(true, 9).await;
        assert_eq!(like.state().await, ToggleState { active: true, count: 9 });
    }
}
