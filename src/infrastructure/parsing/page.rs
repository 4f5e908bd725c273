//! Parsed page document and selector helpers shared by every extractor

use once_cell::unsync::OnceCell;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::warn;

/// Tags whose text never renders and must not feed the text-level patterns
const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// A fetched page, parsed once and queried by every strategy.
///
/// `scraper::Html` is not `Send`; build and drop this inside synchronous code.
pub struct PageDocument {
    html: Html,
    visible_text: OnceCell<String>,
}

impl PageDocument {
    pub fn parse(body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
            visible_text: OnceCell::new(),
        }
    }

    pub const fn html(&self) -> &Html {
        &self.html
    }

    /// All rendered text of the page, whitespace-collapsed
    pub fn visible_text(&self) -> &str {
        self.visible_text.get_or_init(|| collect_visible_text(&self.html))
    }

    /// First element matched by any selector, tried in order
    pub fn first_match<'a, 's>(
        &'a self,
        selectors: &'s [CompiledSelector],
    ) -> Option<(ElementRef<'a>, &'s CompiledSelector)> {
        selectors.iter().find_map(|compiled| {
            self.html
                .select(&compiled.selector)
                .next()
                .map(|element| (element, compiled))
        })
    }

    /// Whether any selector matches at least one element
    pub fn any_match(&self, selectors: &[CompiledSelector]) -> bool {
        self.first_match(selectors).is_some()
    }
}

impl std::fmt::Debug for PageDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageDocument")
            .field("visible_text_cached", &self.visible_text.get().is_some())
            .finish_non_exhaustive()
    }
}

/// A selector together with the source text it was compiled from
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    pub raw: String,
    pub selector: Selector,
}

/// Compile selector strings, skipping (and logging) the invalid ones
pub fn compile_selectors(selector_strings: &[String]) -> Vec<CompiledSelector> {
    selector_strings
        .iter()
        .filter_map(|raw| match Selector::parse(raw) {
            Ok(selector) => Some(CompiledSelector {
                raw: raw.clone(),
                selector,
            }),
            Err(e) => {
                warn!("Failed to compile selector '{}': {}", raw, e);
                None
            }
        })
        .collect()
}

/// Collapse runs of whitespace to single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rendered text of an element, whitespace-collapsed
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collect_visible_text(html: &Html) -> String {
    let mut raw = String::new();
    for node in html.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| INVISIBLE_TAGS.contains(&el.name()))
        });
        if !hidden {
            raw.push_str(text);
            raw.push(' ');
        }
    }
    collapse_whitespace(&raw)
}
