//! Room id discovery from a host's live page.

use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;

use crate::Result;
use crate::error::{Fetch, PageVerdict};

static QUERY_ROOM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"room_id=([0-9]*)").expect("valid room_id pattern"));
static JSON_ROOM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""roomId":"([0-9]*)""#).expect("valid roomId pattern"));

/// Served instead of the page by the anti-bot layer; worth one retry.
pub const PLACEHOLDER_MARKER: &str = "Please wait...";
/// Present on fully rendered pages.
pub const CANONICAL_URL_MARKER: &str = "\"og:url\"";

/// Pulls the room id out of live page HTML. `room_id=` query strings win over the embedded
/// `"roomId"` JSON value; empty captures do not count.
#[must_use]
pub fn extract_room_id(html: &str) -> Option<String> {
    [&*QUERY_ROOM_ID, &*JSON_ROOM_ID].into_iter().find_map(|re| {
        re.captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
    })
}

/// Why a page without room id probably came back the way it did.
#[must_use]
pub fn verdict(html: &str) -> PageVerdict {
    if html.contains(CANONICAL_URL_MARKER) {
        PageVerdict::LikelyOffline
    } else {
        PageVerdict::LikelyBlocked
    }
}

/// Runs `fetch_page` and extracts the room id, fetching once more if the first page was the
/// anti-bot placeholder.
pub async fn resolve<F, Fut>(mut fetch_page: F) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut retried = false;
    loop {
        let html = fetch_page().await?;
        if let Some(id) = extract_room_id(&html) {
            return Ok(id);
        }

        if !retried && html.contains(PLACEHOLDER_MARKER) {
            tracing::info!("live page returned the placeholder instead of the page, retrying");
            retried = true;
            continue;
        }

        return Err(Fetch::unresolved(verdict(&html)).into());
    }
}
