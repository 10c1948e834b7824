use crate::classifier::{self, Classification};
use crate::config::ScriptPolicy;
use crate::error::Result;
use crate::extractors::scripts::{self, ScriptElement, Survey};
use crate::file_handler;
use crate::markers;
use crate::reactivator::{self, InsertionPoint, RelayPoint};
use lol_html::html_content::{ContentType, Element, EndTag};
use lol_html::{element, end, rewrite_str, RewriteStrSettings};
use sha2::{Digest, Sha256};
use std::cell::Cell;
use std::error::Error as StdError;
use std::path::Path;
use std::rc::Rc;

/// What happens to one neutralized script.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptEdit {
    pub classification: Classification,
    pub order: usize,
    /// Site-root URL of the file holding this script's inline code.
    pub external: Option<String>,
}

/// Per-document outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DocumentStats {
    pub offloaded: usize,
    pub deferred: usize,
    pub externalized: usize,
    pub bootstrap_injected: bool,
    pub relay_injected: bool,
}

impl DocumentStats {
    pub fn changed(&self) -> bool {
        self.offloaded + self.deferred > 0 || self.bootstrap_injected || self.relay_injected
    }
}

/// The edits of one pass, indexed by script position.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    edits: Vec<Option<ScriptEdit>>,
    bootstrap: Option<InsertionPoint>,
    relay: Option<RelayPoint>,
    pub stats: DocumentStats,
}

impl Plan {
    pub fn edit(&self, position: usize) -> Option<&ScriptEdit> {
        position
            .checked_sub(1)
            .and_then(|x| self.edits.get(x))
            .and_then(|x| x.as_ref())
    }
}

pub fn externalized_name(code: &str) -> String {
    //! Deterministic file name for an inline script body.
    let digest = format!("{:x}", Sha256::digest(code.as_bytes()));
    format!("inline-{}.js", &digest[..16])
}

fn externalize(script: &ScriptElement, dir: &str, site_root: &Path) -> Option<String> {
    let code = script.content.trim();
    if script.src.is_some() || code.is_empty() {
        return None;
    }
    let name = externalized_name(code);
    let path = site_root.join(dir).join(&name);
    match file_handler::write_if_absent(&path, code.as_bytes()) {
        Ok(written) => {
            if written {
                tracing::debug!("externalized inline script to {}", path.display());
            }
            Some(format!("/{}/{}", dir, name))
        }
        Err(e) => {
            tracing::warn!(
                "cannot externalize inline script #{} to {}: {}",
                script.position,
                path.display(),
                e
            );
            None
        }
    }
}

pub fn plan(survey: &Survey, policy: &ScriptPolicy, site_root: &Path) -> Plan {
    //! Classifies every script and decides the edits of this pass.
    //! Externalized files are written here, before the document changes.
    let mut stats = DocumentStats::default();
    let edits: Vec<Option<ScriptEdit>> = survey
        .page_scripts()
        .map(|script| {
            let classification = classifier::classify(script, policy);
            if !classification.is_neutralized() {
                return None;
            }
            if classification == Classification::Offloaded {
                stats.offloaded += 1;
            } else {
                stats.deferred += 1;
            }
            if script.defer || script.is_async {
                tracing::debug!("script #{} loses its native async/defer", script.position);
            }
            let external = policy
                .externalize_dir
                .as_deref()
                .and_then(|dir| externalize(script, dir, site_root));
            if external.is_some() {
                stats.externalized += 1;
            }
            Some(ScriptEdit {
                classification,
                order: script.position,
                external,
            })
        })
        .collect();

    let neutralized = stats.offloaded + stats.deferred + survey.neutralized().count();
    let bootstrap = if !survey.has_bootstrap && neutralized > 0 {
        stats.bootstrap_injected = true;
        Some(reactivator::insertion_point(survey))
    } else {
        None
    };

    let offloaded = stats.offloaded + survey.neutralized().filter(|x| x.offloaded).count();
    let relay = if policy.relay_snippet.is_some() && !survey.has_relay && offloaded > 0 {
        stats.relay_injected = true;
        Some(reactivator::relay_point(survey))
    } else {
        None
    };

    Plan {
        edits,
        bootstrap,
        relay,
        stats,
    }
}

/// Neutralizes one script element according to its edit.
pub fn rewrite(el: &mut Element, edit: &ScriptEdit) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
    let marker = match edit.classification {
        Classification::Offloaded => markers::OFFLOAD,
        Classification::Deferred => markers::DEFER,
        Classification::Ignored | Classification::Untouched => return Ok(()),
    };

    if let Some(original) = el.get_attribute("type") {
        if !original.trim().is_empty() {
            el.set_attribute(markers::ORIGINAL_TYPE, &original)?;
        }
    }
    el.set_attribute("type", markers::NEUTRAL_TYPE)?;

    if let Some(src) = el.get_attribute("src") {
        el.remove_attribute("src");
        el.set_attribute(markers::SRC, &src)?;
    } else if let Some(external) = &edit.external {
        el.set_attribute(markers::SRC, external)?;
        el.set_inner_content("", ContentType::Text);
    }

    el.remove_attribute("defer");
    el.remove_attribute("async");
    el.set_attribute(marker, "")?;
    el.set_attribute(markers::SCRIPT_ORDER, &edit.order.to_string())?;
    Ok(())
}

fn inject_before_end(el: &mut Element, tag: &str, done: &Rc<Cell<bool>>) {
    if let Some(handlers) = el.end_tag_handlers() {
        let tag = tag.to_string();
        let done = done.clone();
        handlers.push(Box::new(move |end: &mut EndTag| {
            if !done.replace(true) {
                end.before(&tag, ContentType::Html);
            }
            Ok(())
        }));
    }
}

/// Offset just past a leading `<!DOCTYPE ...>`, or 0 without one. A byte
/// order mark, whitespace and comments may come first.
fn after_doctype(html: &str) -> usize {
    let mut rest = html.trim_start_matches('\u{feff}');
    loop {
        rest = rest.trim_start();
        match rest.strip_prefix("<!--").and_then(|x| x.find("-->").map(|end| &x[end + 3..])) {
            Some(after) => rest = after,
            None => break,
        }
    }
    let is_doctype = rest
        .get(..9)
        .map(|x| x.eq_ignore_ascii_case("<!doctype"))
        .unwrap_or(false);
    if !is_doctype {
        return 0;
    }
    let start = html.len() - rest.len();
    rest.find('>').map(|end| start + end + 1).unwrap_or(0)
}

pub fn apply(html: &str, plan: &Plan, relay_snippet: Option<&str>) -> Result<String> {
    //! Second pass: applies the plan and injects the runtime once.
    let position = Cell::new(0usize);
    let bootstrap = reactivator::bootstrap_tag();
    let relay = relay_snippet.map(reactivator::relay_tag);
    let bootstrap_done = Rc::new(Cell::new(false));
    let relay_done = Cell::new(false);

    let bootstrap_at = |point: InsertionPoint| plan.bootstrap == Some(point);
    let relay_at = |point: RelayPoint| plan.relay == Some(point) && relay.is_some();

    let mut output = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("script", |el| {
                    if scripts::is_runtime_tag(el) {
                        return Ok(());
                    }
                    position.set(position.get() + 1);
                    if let Some(edit) = plan.edit(position.get()) {
                        rewrite(el, edit)?;
                    }
                    Ok(())
                }),
                element!("head", |el| {
                    if relay_at(RelayPoint::HeadStart) && !relay_done.replace(true) {
                        if let Some(tag) = &relay {
                            el.prepend(tag, ContentType::Html);
                        }
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if bootstrap_at(InsertionPoint::BodyEnd) {
                        inject_before_end(el, &bootstrap, &bootstrap_done);
                    }
                    Ok(())
                }),
                element!("html", |el| {
                    if relay_at(RelayPoint::HtmlStart) && !relay_done.replace(true) {
                        if let Some(tag) = &relay {
                            el.prepend(tag, ContentType::Html);
                        }
                    }
                    if bootstrap_at(InsertionPoint::HtmlEnd) {
                        inject_before_end(el, &bootstrap, &bootstrap_done);
                    }
                    Ok(())
                }),
            ],
            document_content_handlers: vec![end!(|end| {
                if bootstrap_at(InsertionPoint::DocumentEnd) && !bootstrap_done.replace(true) {
                    end.append(&bootstrap, ContentType::Html);
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;

    if relay_at(RelayPoint::DocumentStart) {
        if let Some(tag) = &relay {
            output.insert_str(after_doctype(&output), tag);
        }
    }
    Ok(output)
}

/// Rewritten document and what changed.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub html: String,
    pub stats: DocumentStats,
}

pub fn process_document(html: &str, policy: &ScriptPolicy, site_root: &Path) -> Result<Outcome> {
    //! Survey, classify, plan and rewrite one document.
    let survey = scripts::survey(html)?;
    let plan = plan(&survey, policy, site_root);
    if !plan.stats.changed() {
        return Ok(Outcome {
            html: html.to_string(),
            stats: plan.stats,
        });
    }
    let html = apply(html, &plan, policy.relay_snippet.as_deref())?;
    Ok(Outcome {
        html,
        stats: plan.stats,
    })
}
