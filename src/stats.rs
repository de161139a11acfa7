use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected during a conversion run. Shared with download tasks.
#[derive(Debug, Default)]
pub struct ConversionStats {
    pub articles_converted: AtomicU64,
    pub articles_skipped: AtomicU64,
    pub image_jobs: AtomicU64,
    pub downloads_completed: AtomicU64,
    pub downloads_skipped: AtomicU64,
    pub downloads_failed: AtomicU64,
}

impl ConversionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_converted(&self) {
        self.articles_converted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.articles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_image_jobs(&self, count: u64) {
        self.image_jobs.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_downloaded(&self) {
        self.downloads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_download_skipped(&self) {
        self.downloads_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn converted(&self) -> u64 {
        self.articles_converted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.articles_skipped.load(Ordering::Relaxed)
    }

    pub fn image_jobs(&self) -> u64 {
        self.image_jobs.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloads_completed.load(Ordering::Relaxed)
    }

    pub fn download_skipped(&self) -> u64 {
        self.downloads_skipped.load(Ordering::Relaxed)
    }

    pub fn download_failed(&self) -> u64 {
        self.downloads_failed.load(Ordering::Relaxed)
    }
}
