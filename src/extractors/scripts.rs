use crate::error::Result;
use crate::markers;
use crate::patterns::Candidate;
use lol_html::html_content::{Element, EndTag};
use lol_html::{element, rewrite_str, text, RewriteStrSettings};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A `<script>` element as found in the scraped document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptElement {
    /// 1-based position among the page's own script elements, in document
    /// order. Injected runtime tags get 0 and are never counted.
    pub position: usize,
    pub script_type: Option<String>,
    pub src: Option<String>,
    pub id: Option<String>,
    pub defer: bool,
    pub is_async: bool,
    pub ignored: bool,
    pub offloaded: bool,
    pub order: Option<usize>,
    pub content: String,
    /// Located before the `<body>` start tag.
    pub above_the_fold: bool,
}

impl ScriptElement {
    pub fn candidate(&self) -> Candidate<'_> {
        Candidate {
            src: self.src.as_deref(),
            id: self.id.as_deref(),
            content: Some(self.content.as_str()),
        }
    }

    /// Already neutralized by an earlier pass.
    pub fn is_neutralized(&self) -> bool {
        self.order.is_some()
            && self
                .script_type
                .as_deref()
                .map_or(false, |x| x.eq_ignore_ascii_case(markers::NEUTRAL_TYPE))
    }

    fn from_element(el: &Element, position: usize, above_the_fold: bool) -> Self {
        ScriptElement {
            position,
            script_type: el.get_attribute("type"),
            src: el.get_attribute("src"),
            id: el.get_attribute("id"),
            defer: el.has_attribute("defer"),
            is_async: el.has_attribute("async"),
            ignored: el.has_attribute(markers::IGNORE),
            offloaded: el.has_attribute(markers::OFFLOAD),
            order: el
                .get_attribute(markers::SCRIPT_ORDER)
                .and_then(|x| x.trim().parse().ok()),
            content: String::new(),
            above_the_fold,
        }
    }
}

/// Scripts and structural landmarks of one document.
#[derive(Clone, Debug, Default)]
pub struct Survey {
    pub scripts: Vec<ScriptElement>,
    pub has_bootstrap: bool,
    pub has_relay: bool,
    pub has_html: bool,
    pub has_head: bool,
    /// The `<body>` element is closed, by its own end tag or implicitly
    /// by `</html>`.
    pub body_end: bool,
    /// A `</html>` end tag is present.
    pub html_end: bool,
}

impl Survey {
    /// The page's own scripts, without injected runtime tags.
    pub fn page_scripts(&self) -> impl Iterator<Item = &ScriptElement> {
        self.scripts.iter().filter(|x| x.position > 0)
    }

    pub fn neutralized(&self) -> impl Iterator<Item = &ScriptElement> {
        self.page_scripts().filter(|x| x.is_neutralized())
    }
}

/// Bootstrap or relay tag added by an earlier pass.
pub fn is_runtime_tag(el: &Element) -> bool {
    el.has_attribute(markers::BOOTSTRAP) || el.has_attribute(markers::RELAY)
}

fn watch_end_tag(el: &mut Element, flag: &Rc<Cell<bool>>) {
    if let Some(handlers) = el.end_tag_handlers() {
        let flag = flag.clone();
        handlers.push(Box::new(move |_: &mut EndTag| {
            flag.set(true);
            Ok(())
        }));
    }
}

pub fn survey(html: &str) -> Result<Survey> {
    //! Reads every script element and the landmarks used to pick
    //! injection points. Nothing is modified.
    let scripts = Rc::new(RefCell::new(Vec::<ScriptElement>::new()));
    let counted = Cell::new(0usize);
    let in_body = Rc::new(Cell::new(false));
    let has_html = Rc::new(Cell::new(false));
    let has_head = Rc::new(Cell::new(false));
    let html_end = Rc::new(Cell::new(false));
    let body_end = Rc::new(Cell::new(false));
    let has_bootstrap = Rc::new(Cell::new(false));
    let has_relay = Rc::new(Cell::new(false));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("html", |el| {
                    has_html.set(true);
                    watch_end_tag(el, &html_end);
                    Ok(())
                }),
                element!("head", |_el| {
                    has_head.set(true);
                    Ok(())
                }),
                element!("body", |el| {
                    in_body.set(true);
                    watch_end_tag(el, &body_end);
                    Ok(())
                }),
                element!("script", |el| {
                    if el.has_attribute(markers::BOOTSTRAP) {
                        has_bootstrap.set(true);
                    }
                    if el.has_attribute(markers::RELAY) {
                        has_relay.set(true);
                    }
                    let position = if is_runtime_tag(el) {
                        0
                    } else {
                        counted.set(counted.get() + 1);
                        counted.get()
                    };
                    let script = ScriptElement::from_element(el, position, !in_body.get());
                    scripts.borrow_mut().push(script);
                    Ok(())
                }),
                text!("script", |chunk| {
                    if let Some(script) = scripts.borrow_mut().last_mut() {
                        script.content.push_str(chunk.as_str());
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    let scripts = scripts.take();
    Ok(Survey {
        scripts,
        has_bootstrap: has_bootstrap.get(),
        has_relay: has_relay.get(),
        has_html: has_html.get(),
        has_head: has_head.get(),
        body_end: body_end.get(),
        html_end: html_end.get(),
    })
}
