//! Infinite reel feed.
//!
//! Pages are requested with the ids the user has already watched excluded.
//! When the server runs out, the watched set is forgotten and the feed starts
//! again from page 1 after a short pause.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::api::FeedApi;
use crate::error::Result;
use crate::models::Reel;
use crate::storage::{get_json, set_json, KeyValueStore};

pub const VIEWED_KEY: &str = "viewedReels";
pub const VIEWED_CAP: usize = 100;
pub const REFILL_DELAY: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Pager {
    reels: Vec<Reel>,
    ids: HashSet<String>,
    page: u32,
    viewed: Vec<String>,
}

impl Pager {
    /// Appends unseen reels; returns how many were new.
    fn append(&mut self, reels: Vec<Reel>) -> usize {
        let before = self.reels.len();
        for reel in reels {
            if self.ids.insert(reel.id.clone()) {
                self.reels.push(reel);
            }
        }
        self.reels.len() - before
    }
}

/// Clears the loading flag when a load finishes, however it finishes.
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoadingGuard(flag))
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReelFeed {
    api: Arc<dyn FeedApi>,
    store: Arc<dyn KeyValueStore>,
    pager: Mutex<Pager>,
    loading: AtomicBool,
    refill_delay: Duration,
}

impl ReelFeed {
    /// Builds the feed, restoring the persisted watched set.
    ///
    /// # Errors
    ///
    /// The storage error when the watched set cannot be read.
    pub async fn open(api: Arc<dyn FeedApi>, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let mut viewed: Vec<String> = get_json(store.as_ref(), VIEWED_KEY).await?.unwrap_or_default();
        if viewed.len() > VIEWED_CAP {
            viewed.drain(..viewed.len() - VIEWED_CAP);
        }
        Ok(ReelFeed {
            api,
            store,
            pager: Mutex::new(Pager {
                page: 1,
                viewed,
                ..Pager::default()
            }),
            loading: AtomicBool::new(false),
            refill_delay: REFILL_DELAY,
        })
    }

    #[must_use]
    pub fn with_refill_delay(mut self, delay: Duration) -> Self {
        self.refill_delay = delay;
        self
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub async fn reels(&self) -> Vec<Reel> {
        self.pager.lock().await.reels.clone()
    }

    pub async fn viewed(&self) -> Vec<String> {
        self.pager.lock().await.viewed.clone()
    }

    pub async fn page(&self) -> u32 {
        self.pager.lock().await.page
    }

    /// Fetches the next page. A call made while another is in flight does
    /// nothing and returns 0.
    ///
    /// # Errors
    ///
    /// The REST error; the page counter is not advanced.
    pub async fn load_next(&self) -> Result<usize> {
        let Some(_guard) = LoadingGuard::acquire(&self.loading) else {
            debug!("reel page already loading");
            return Ok(0);
        };

        let (page, exclude) = {
            let pager = self.pager.lock().await;
            (pager.page, pager.viewed.clone())
        };

        let reels = self.api.reels_page(page, &exclude).await?;
        if !reels.is_empty() {
            let mut pager = self.pager.lock().await;
            pager.page = page + 1;
            return Ok(pager.append(reels));
        }

        info!("reel feed exhausted at page {page}, recycling watched reels");
        {
            let mut pager = self.pager.lock().await;
            pager.viewed.clear();
            pager.page = 1;
        }
        set_json(self.store.as_ref(), VIEWED_KEY, &Vec::<String>::new()).await?;

        tokio::time::sleep(self.refill_delay).await;

        let reels = self.api.reels_page(1, &[]).await?;
        let mut pager = self.pager.lock().await;
        if !reels.is_empty() {
            pager.page = 2;
        }
        Ok(pager.append(reels))
    }

    /// Records a watched reel. The set keeps the newest [`VIEWED_CAP`] ids.
    ///
    /// # Errors
    ///
    /// The storage error when the watched set cannot be saved.
    pub async fn mark_viewed(&self, reel_id: &str) -> Result<()> {
        let snapshot = {
            let mut pager = self.pager.lock().await;
            if pager.viewed.iter().any(|id| id == reel_id) {
                return Ok(());
            }
            pager.viewed.push(reel_id.to_string());
            if pager.viewed.len() > VIEWED_CAP {
                let excess = pager.viewed.len() - VIEWED_CAP;
                pager.viewed.drain(..excess);
            }
            pager.viewed.clone()
        };
        set_json(self.store.as_ref(), VIEWED_KEY, &snapshot).await
    }

    /// Drops everything loaded and starts again from page 1. The watched set
    /// is kept.
    pub async fn reset(&self) {
        let mut pager = self.pager.lock().await;
        pager.reels.clear();
        pager.ids.clear();
        pager.page = 1;
    }
}
