//! Breadth-first link discovery.
//!
//! Given one or more seed links, the crawler enumerates candidate
//! distribution links: local directories are listed (files are candidates,
//! subdirectories are crawled further) and remote pages are fetched and
//! scraped for `href`s. `rel="homepage"` / `rel="download"` links feed back
//! into the crawl only when `follow_links` is set.
//!
//! Work fans out over a bounded pool: every discovered seed forks a task and
//! the crawl joins them all, so completion is exactly "no task left" — there
//! is no idle-worker/empty-queue race to coordinate. Page errors are logged
//! and contribute nothing.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexSet;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::Context;
use crate::types::Link;

/// Extraction of links from an HTML page.
pub struct PageParser;

/// Suffixes that mark a `rel=` link as data rather than a page worth
/// scraping.
const REL_SKIP_EXTENSIONS: &[&str] = &[".zip", ".tar", ".tar.gz", ".tar.bz2", ".tgz", ".exe"];
const REL_TYPES: &[&str] = &["homepage", "download"];

impl PageParser {
    /// All `href` targets on the page.
    pub fn links(page: &str) -> Vec<String> {
        let Ok(dom) = tl::parse(page, tl::ParserOptions::default()) else {
            return Vec::new();
        };
        let mut hrefs = Vec::new();
        if let Some(anchors) = dom.query_selector("a") {
            for anchor in anchors {
                let Some(tag) = anchor.get(dom.parser()).and_then(|n| n.as_tag()) else {
                    continue;
                };
                if let Some(href) = tag.attributes().get("href").flatten() {
                    hrefs.push(
                        html_escape::decode_html_entities(href.as_utf8_str().as_ref()).into_owned(),
                    );
                }
            }
        }
        hrefs
    }

    /// `href` targets of `rel="homepage"` / `rel="download"` anchors that are
    /// worth scraping, i.e. that do not point at an obvious archive.
    pub fn rel_links(page: &str) -> Vec<String> {
        let Ok(dom) = tl::parse(page, tl::ParserOptions::default()) else {
            return Vec::new();
        };
        let mut hrefs = Vec::new();
        if let Some(anchors) = dom.query_selector("a") {
            for anchor in anchors {
                let Some(tag) = anchor.get(dom.parser()).and_then(|n| n.as_tag()) else {
                    continue;
                };
                let rel = tag
                    .attributes()
                    .get("rel")
                    .flatten()
                    .map(|v| v.as_utf8_str().to_ascii_lowercase());
                if !rel.is_some_and(|rel| REL_TYPES.contains(&rel.as_str())) {
                    continue;
                }
                let Some(href) = tag.attributes().get("href").flatten() else {
                    continue;
                };
                let href =
                    html_escape::decode_html_entities(href.as_utf8_str().as_ref()).into_owned();
                let path = href
                    .split(['?', '#'])
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if REL_SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
                    continue;
                }
                hrefs.push(href);
            }
        }
        hrefs
    }
}

/// Breadth-first crawler over a bounded worker pool.
#[derive(Clone)]
pub struct Crawler {
    context: Context,
    concurrency: usize,
}

impl Crawler {
    /// Creates a crawler with the given worker-pool width (minimum 1).
    pub fn new(context: Context, concurrency: usize) -> Crawler {
        Crawler {
            context,
            concurrency: concurrency.max(1),
        }
    }

    /// Crawls from the given seeds until no unvisited link remains. Each link
    /// is visited at most once; the output order is not significant.
    pub async fn crawl(
        &self,
        seeds: impl IntoIterator<Item = Link>,
        follow_links: bool,
    ) -> IndexSet<Link> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut pending = JoinSet::new();
        let mut seen: HashSet<Link> = HashSet::new();
        let mut discovered: IndexSet<Link> = IndexSet::new();

        let mut fork = |link: Link, pending: &mut JoinSet<(Vec<Link>, Vec<Link>)>| {
            let context = self.context.clone();
            let semaphore = Arc::clone(&semaphore);
            pending.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                visit(&context, &link, follow_links).await
            });
        };

        for seed in seeds {
            if seen.insert(seed.clone()) {
                fork(seed, &mut pending);
            }
        }

        while let Some(joined) = pending.join_next().await {
            let Ok((candidates, further)) = joined else {
                tracing::warn!("crawl worker aborted");
                continue;
            };
            discovered.extend(candidates);
            for seed in further {
                if seen.insert(seed.clone()) {
                    fork(seed, &mut pending);
                }
            }
        }

        discovered
    }
}

/// Visits one link: returns `(candidate links, further seeds)`.
async fn visit(context: &Context, link: &Link, follow_links: bool) -> (Vec<Link>, Vec<Link>) {
    if link.local() {
        visit_local(link)
    } else if link.remote() {
        visit_remote(context, link, follow_links).await
    } else {
        tracing::debug!("ignoring link with unsupported scheme: {link}");
        (Vec::new(), Vec::new())
    }
}

fn visit_local(link: &Link) -> (Vec<Link>, Vec<Link>) {
    let path = link.path();
    if path.is_file() {
        return (vec![link.clone()], Vec::new());
    }

    let entries = match fs_err::read_dir(&path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("failed to list {}: {e}", path.display());
            return (Vec::new(), Vec::new());
        }
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let Ok(entry_link) = Link::from_path(entry.path()) else {
            continue;
        };
        if entry.path().is_dir() {
            dirs.push(entry_link);
        } else {
            files.push(entry_link);
        }
    }
    (files, dirs)
}

async fn visit_remote(
    context: &Context,
    link: &Link,
    follow_links: bool,
) -> (Vec<Link>, Vec<Link>) {
    let page = match context.read(link).await {
        Ok(payload) => String::from_utf8_lossy(&payload).into_owned(),
        Err(e) => {
            tracing::warn!("failed to fetch {link}: {e}");
            return (Vec::new(), Vec::new());
        }
    };

    let candidates = PageParser::links(&page)
        .iter()
        .filter_map(|href| link.join(href))
        .collect();
    let seeds = if follow_links {
        PageParser::rel_links(&page)
            .iter()
            .filter_map(|href| link.join(href))
            .collect()
    } else {
        Vec::new()
    };
    (candidates, seeds)
}
