use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result};
use tracing::debug;
use url::Url;

/// How discovered URLs are folded together for dedup purposes.
///
/// The fragment never identifies a distinct document, so it is always
/// dropped. Whether the query string identifies one is site-dependent;
/// stripping it trades recall (paginated listings collapse into one page)
/// for precision (tracking parameters stop producing duplicate visits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NormalizePolicy {
    /// Drop both query string and fragment (default).
    StripQuery,
    /// Drop only the fragment, keep the query string.
    KeepQuery,
}

/// Normalize a URL for frontier membership. Idempotent.
pub fn normalize(raw: &str, policy: NormalizePolicy) -> Result<String> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid URL: {raw}"))?;
    url.set_fragment(None);
    if policy == NormalizePolicy::StripQuery {
        url.set_query(None);
    }
    Ok(url.to_string())
}

/// What `dequeue` hands back to the crawl loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    /// A fresh URL; the caller is expected to process it and then call
    /// `mark_processed`.
    Page(String),
    /// The popped entry was already visited by the time it surfaced.
    AlreadyVisited,
    /// The popped entry is outside the domain scope; dropped, not visited.
    ExternalSkipped(String),
}

/// BFS frontier over one domain: pending queue, visited set, and the
/// page-count bound. Owned exclusively by the crawl loop.
pub struct Frontier {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    visited: HashSet<String>,
    page_count: usize,
    max_pages: usize,
    base_host: String,
    allow_external: bool,
    policy: NormalizePolicy,
}

impl Frontier {
    pub fn new(
        base_url: &str,
        max_pages: usize,
        allow_external: bool,
        policy: NormalizePolicy,
    ) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid base URL: {base_url}"))?;
        let base_host = base
            .host_str()
            .with_context(|| format!("base URL has no host: {base_url}"))?
            .to_string();

        let mut frontier = Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            visited: HashSet::new(),
            page_count: 0,
            max_pages,
            base_host,
            allow_external,
            policy,
        };
        frontier.enqueue(base_url)?;
        Ok(frontier)
    }

    pub fn base_host(&self) -> &str {
        &self.base_host
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn allow_external(&self) -> bool {
        self.allow_external
    }

    /// Add a URL unless its normalized form is already known. Returns true
    /// if it was actually queued.
    pub fn enqueue(&mut self, raw: &str) -> Result<bool> {
        let url = normalize(raw, self.policy)?;
        if self.visited.contains(&url) || self.queued.contains(&url) {
            return Ok(false);
        }
        debug!(%url, "queued");
        self.queued.insert(url.clone());
        self.queue.push_back(url);
        Ok(true)
    }

    /// True while the loop should keep going: work remains and the page
    /// bound has not been hit.
    pub fn has_work(&self) -> bool {
        !self.queue.is_empty() && self.page_count < self.max_pages
    }

    /// FIFO pop. External entries are dropped here rather than at enqueue
    /// time so the skip can be logged against the page that linked them.
    pub fn dequeue(&mut self) -> Option<Dequeued> {
        let url = self.queue.pop_front()?;
        self.queued.remove(&url);

        if self.visited.contains(&url) {
            return Some(Dequeued::AlreadyVisited);
        }
        if !self.allow_external && !self.in_scope(&url) {
            debug!(%url, "external, dropped");
            return Some(Dequeued::ExternalSkipped(url));
        }
        Some(Dequeued::Page(url))
    }

    /// Record a dequeued page as processed, consuming one unit of the page
    /// budget.
    pub fn mark_processed(&mut self, url: &str) {
        if self.visited.insert(url.to_string()) {
            self.page_count += 1;
        }
    }

    /// Host comparison against the domain scope.
    pub fn in_scope(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h == self.base_host))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontier(max_pages: usize) -> Frontier {
        Frontier::new(
            "https://example.test/",
            max_pages,
            false,
            NormalizePolicy::StripQuery,
        )
        .unwrap()
    }

    #[test]
    fn normalize_strips_query_and_fragment() {
        let n = normalize("https://example.test/a?b=1#c", NormalizePolicy::StripQuery).unwrap();
        assert_eq!(n, "https://example.test/a");
    }

    #[test]
    fn normalize_keep_query_strips_only_fragment() {
        let n = normalize("https://example.test/a?b=1#c", NormalizePolicy::KeepQuery).unwrap();
        assert_eq!(n, "https://example.test/a?b=1");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "https://example.test/a?b=1#c",
            "https://example.test/",
            "http://example.test/path/deep?x=y",
        ] {
            let once = normalize(raw, NormalizePolicy::StripQuery).unwrap();
            let twice = normalize(&once, NormalizePolicy::StripQuery).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn duplicate_enqueue_is_single_entry() {
        let mut f = frontier(10);
        assert!(f.enqueue("https://example.test/page").unwrap());
        assert!(!f.enqueue("https://example.test/page?utm=1").unwrap());
        assert!(!f.enqueue("https://example.test/page#top").unwrap());

        // seed + one page
        let mut seen = 0;
        while let Some(d) = f.dequeue() {
            if let Dequeued::Page(url) = d {
                f.mark_processed(&url);
                seen += 1;
            }
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn page_bound_is_respected() {
        let mut f = frontier(2);
        for i in 0..10 {
            f.enqueue(&format!("https://example.test/p{i}")).unwrap();
        }
        let mut processed = 0;
        while f.has_work() {
            if let Some(Dequeued::Page(url)) = f.dequeue() {
                f.mark_processed(&url);
                processed += 1;
            }
        }
        assert_eq!(processed, 2);
        assert_eq!(f.page_count(), 2);
    }

    #[test]
    fn external_url_is_dropped_not_visited() {
        let mut f = frontier(10);
        f.enqueue("https://elsewhere.test/x").unwrap();

        let mut external = Vec::new();
        let mut pages = Vec::new();
        while let Some(d) = f.dequeue() {
            match d {
                Dequeued::Page(url) => {
                    f.mark_processed(&url);
                    pages.push(url);
                }
                Dequeued::ExternalSkipped(url) => external.push(url),
                Dequeued::AlreadyVisited => {}
            }
        }
        assert_eq!(pages, vec!["https://example.test/".to_string()]);
        assert_eq!(external, vec!["https://elsewhere.test/x".to_string()]);
        assert_eq!(f.page_count(), 1);
    }

    #[test]
    fn visited_url_is_not_requeued() {
        let mut f = frontier(10);
        if let Some(Dequeued::Page(url)) = f.dequeue() {
            f.mark_processed(&url);
        }
        // Discovery on a later page can legitimately re-offer the seed.
        assert!(!f.enqueue("https://example.test/").unwrap());
        assert_eq!(f.dequeue(), None);
        assert_eq!(f.page_count(), 1);
    }

    #[test]
    fn no_url_processed_twice() {
        let mut f = frontier(100);
        f.enqueue("https://example.test/a").unwrap();
        f.enqueue("https://example.test/a").unwrap();
        let mut processed = Vec::new();
        while let Some(d) = f.dequeue() {
            if let Dequeued::Page(url) = d {
                f.mark_processed(&url);
                f.enqueue("https://example.test/a").unwrap();
                processed.push(url);
            }
        }
        let mut dedup = processed.clone();
        dedup.dedup();
        assert_eq!(processed.len(), dedup.len());
    }
}
