//! Reading an album listing page: title, song table, detail links and the
//! format columns it advertises.

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::page::{Page, PageNode};

const SONG_TABLE_ID: &str = "songlist";
const SONG_HEADER_ID: &str = "songlist_header";
const SENTINEL_NAME: &str = "song name";
const SENTINEL_TOTAL: &str = "total";
const TITLE_MARKER: &str = "MP3";
const INVALID_CHARS: &[char] = &['\\', '/', '?', ':', '*', '"', '<', '>', '|'];

/// Strips characters most filesystems reject in a file or directory name.
pub fn sanitize(name: &str) -> String {
    name.chars().filter(|c| !INVALID_CHARS.contains(c)).collect()
}

/// Album name taken from the document title, which reads like
/// `"<album> MP3 - Download <album> Soundtracks for FREE!"`.
pub fn album_title(page: &Page) -> Result<String> {
    let title = page
        .title()
        .ok_or_else(|| Error::Schema("document has no title".to_string()))?;
    let name = title.split(TITLE_MARKER).next().unwrap_or_default();
    let name = sanitize(name.trim());
    if name.is_empty() {
        return Err(Error::Schema(format!("cannot derive album name from title {title:?}")));
    }
    Ok(name)
}

pub fn song_table<N: PageNode>(root: &N) -> Result<N> {
    root.find_by_id(SONG_TABLE_ID)
        .ok_or_else(|| Error::Schema(format!("no element with id `{SONG_TABLE_ID}`")))
}

/// Detail page links of the table, qualified against `origin`, first-seen
/// order, no duplicates. A table without anchors gives an empty list.
pub fn extract_detail_links<N: PageNode>(table: &N, origin: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in table.find_all_by_tag("a") {
        let Some(href) = anchor.attribute("href") else {
            continue;
        };
        let link = match origin.join(href.trim()) {
            Ok(link) => link.to_string(),
            Err(err) => {
                warn!(href, %err, "skipping unusable link");
                continue;
            }
        };
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

fn header_row<N: PageNode>(table: &N) -> Result<N> {
    if let Some(row) = table.find_by_id(SONG_HEADER_ID) {
        return Ok(row);
    }
    table
        .find_all_by_tag("tr")
        .into_iter()
        .find(|row| !row.find_all_by_tag("th").is_empty())
        .ok_or_else(|| Error::Schema("song table has no header row".to_string()))
}

fn header_label<N: PageNode>(cell: &N) -> String {
    cell.text()
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
}

/// Format labels of the header row. When both sentinel columns are present
/// only the labels between them count, otherwise every non-empty label except
/// the sentinels.
pub fn available_formats<N: PageNode>(table: &N) -> Result<Vec<String>> {
    let labels: Vec<String> = header_row(table)?
        .find_all_by_tag("th")
        .iter()
        .map(header_label)
        .collect();

    let name = labels.iter().position(|l| l == SENTINEL_NAME);
    let total = labels.iter().position(|l| l == SENTINEL_TOTAL);
    let window = match (name, total) {
        (Some(start), Some(end)) if start < end => &labels[start + 1..end],
        _ => &labels[..],
    };

    Ok(window
        .iter()
        .filter(|l| !l.is_empty() && *l != SENTINEL_NAME && *l != SENTINEL_TOTAL)
        .cloned()
        .collect())
}

pub fn is_format_available<N: PageNode>(table: &N, format: &str) -> Result<bool> {
    let format = format.trim().to_lowercase();
    Ok(available_formats(table)?.iter().any(|f| *f == format))
}

/// Local file name for a media URL: the last path segment, percent-decoded
/// and sanitized.
pub fn file_name_from_url(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => url.rsplit('/').next().unwrap_or_default().to_string(),
    };
    let decoded = percent_decode_str(&segment).decode_utf8_lossy();
    let name = sanitize(&decoded);
    if name.trim().is_empty() {
        "track".to_string()
    } else {
        name
    }
}
