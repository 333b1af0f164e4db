//! Bulletin discovery: walk the paginated trade-results listing and
//! collect one download link per trading date.
//!
//! Listing pages group accordion items by document type with bulletins
//! first, so the scan of a page stops at the first non-bulletin anchor.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::LayoutError;

const ITEM_MARKER: &str = "accordeon-inner__wrap-item";
const NEXT_MARKER: &str = "bx-pag-next";
const BULLETIN_LABEL: &str = "Бюллетень";
const DATE_FORMAT: &str = "%d.%m.%Y";

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<a[^>]*?href="([^"]*)"[^>]*>(.*?)</a>"#).unwrap());
static SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<span[^>]*>\s*([^<]*?)\s*</span>").unwrap());

/// One discovered bulletin: where to fetch it and what to save it as.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulletinLink {
    pub url: String,
    pub filename: String,
}

/// What one listing page yielded.
#[derive(Debug)]
struct ListingScan {
    entries: Vec<(NaiveDate, BulletinLink)>,
    next: Option<String>,
    hit_cutoff: bool,
}

/// Crawl the listing from the configured start page, newest bulletins
/// first, until the cutoff year. On duplicate dates the first discovery
/// wins.
pub async fn crawl_listing(settings: &Settings) -> Result<BTreeMap<NaiveDate, BulletinLink>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.listing_timeout_secs))
        .build()?;
    let base = settings.base_url.clone();

    crawl_with(
        settings.listing_path.clone(),
        settings.base_url.clone(),
        settings.cutoff_year,
        move |path: String| {
            let client = client.clone();
            let url = absolute(&base, &path);
            fetch_page(client, url)
        },
    )
    .await
}

async fn fetch_page(client: reqwest::Client, url: String) -> Result<String> {
    debug!(%url, "fetching listing page");
    let resp = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("listing request failed: {url}"))?;
    Ok(resp.text().await?)
}

/// The worklist loop behind [`crawl_listing`], generic over the fetch so
/// pagination behavior can be driven from canned pages.
async fn crawl_with<F, Fut>(
    start: String,
    base: String,
    cutoff_year: i32,
    fetch: F,
) -> Result<BTreeMap<NaiveDate, BulletinLink>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut links = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut next = Some(start);

    while let Some(path) = next.take() {
        if !seen.insert(path.clone()) {
            warn!(%path, "pagination loops back to a visited page, stopping");
            break;
        }
        let html = fetch(path).await?;

        // The scan walks the whole page text; keep it off the async threads.
        let scan = {
            let base = base.clone();
            tokio::task::spawn_blocking(move || scan_listing(&html, &base, cutoff_year)).await??
        };

        for (date, link) in scan.entries {
            match links.entry(date) {
                Entry::Vacant(slot) => {
                    slot.insert(link);
                }
                Entry::Occupied(kept) => warn!(
                    %date,
                    kept = %kept.get().url,
                    dropped = %link.url,
                    "duplicate bulletin for date, keeping the first"
                ),
            }
        }

        if scan.hit_cutoff {
            info!(cutoff_year, "cutoff year reached, stopping discovery");
            break;
        }
        next = scan.next;
    }

    info!(links = links.len(), "discovery finished");
    Ok(links)
}

fn scan_listing(html: &str, base: &str, cutoff_year: i32) -> Result<ListingScan, LayoutError> {
    let mut entries = Vec::new();
    let mut hit_cutoff = false;

    // Each item owns the text between its marker and the next one, so the
    // first anchor and first span in a fragment belong to that item.
    let mut fragments = html.split(ITEM_MARKER);
    fragments.next(); // page head, before the first item

    for fragment in fragments {
        let Some(anchor) = ANCHOR_RE.captures(fragment) else {
            debug!("listing item without an anchor, skipping");
            continue;
        };
        if !anchor[2].contains(BULLETIN_LABEL) {
            break;
        }

        let date_str = SPAN_RE
            .captures(fragment)
            .ok_or(LayoutError::MissingDateLabel)?[1]
            .trim()
            .to_string();
        let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
            .map_err(|_| LayoutError::BadDate {
                value: date_str.clone(),
            })?;
        if date.year() <= cutoff_year {
            hit_cutoff = true;
            break;
        }

        let href = &anchor[1];
        entries.push((
            date,
            BulletinLink {
                url: absolute(base, href),
                filename: format!("{date_str}.{}", file_ext(href)),
            },
        ));
    }

    let next = match html.find(NEXT_MARKER) {
        Some(pos) => {
            let tail = &html[pos..];
            let scope = match tail.find("</li>") {
                Some(end) => &tail[..end],
                None => tail,
            };
            let caps = ANCHOR_RE
                .captures(scope)
                .ok_or(LayoutError::MissingNextLink)?;
            Some(caps[1].to_string())
        }
        None => None,
    };

    Ok(ListingScan {
        entries,
        next,
        hit_cutoff,
    })
}

fn absolute(base: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{base}{href}")
    }
}

/// Extension of the linked file: path without the query string, last
/// segment, after the last dot.
fn file_ext(href: &str) -> &str {
    let path = href.split('?').next().unwrap_or(href);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit('.').next().unwrap_or(name)
}

// ── Tests ──
