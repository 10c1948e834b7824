//! Browser runtime that replays neutralized scripts in their original order.
//!
//! The runtime itself lives in `reactivator.js`. It is injected once per
//! document, on page load it collects every `script[type="text/plain"]`
//! carrying a `data-script-order`, sorts them and recreates them one at a
//! time with their original type. An external script must fire `load` or
//! `error` before the next one starts. Deferred scripts wait for browser idle
//! time first, off-loaded scripts go straight away or to the worker relay
//! when one was injected. A synthetic `DOMContentLoaded` closes the replay.

use crate::extractors::scripts::Survey;
use crate::markers;

const RUNTIME: &str = include_str!("reactivator.js");

/// Where the bootstrap goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertionPoint {
    BodyEnd,
    HtmlEnd,
    DocumentEnd,
}

/// Where the worker relay snippet goes. It must run before any replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayPoint {
    HeadStart,
    HtmlStart,
    DocumentStart,
}

pub fn insertion_point(survey: &Survey) -> InsertionPoint {
    if survey.body_end {
        InsertionPoint::BodyEnd
    } else if survey.html_end {
        InsertionPoint::HtmlEnd
    } else {
        InsertionPoint::DocumentEnd
    }
}

pub fn relay_point(survey: &Survey) -> RelayPoint {
    if survey.has_head {
        RelayPoint::HeadStart
    } else if survey.has_html {
        RelayPoint::HtmlStart
    } else {
        RelayPoint::DocumentStart
    }
}

pub fn bootstrap_tag() -> String {
    format!(
        "<script {} {}>{}</script>",
        markers::IGNORE,
        markers::BOOTSTRAP,
        RUNTIME.trim()
    )
}

pub fn relay_tag(snippet: &str) -> String {
    // The snippet is raw text inside <script>; only a closing tag can break out.
    let snippet = snippet.trim().replace("</script", "<\\/script");
    format!(
        "<script {} {}>{}</script>",
        markers::IGNORE,
        markers::RELAY,
        snippet
    )
}
