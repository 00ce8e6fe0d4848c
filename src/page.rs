//! Narrow read-only view over a parsed HTML page.
//!
//! Catalog code only needs four operations on a node, so it is written against
//! [`PageNode`] instead of the parser's own types. [`Page`] and [`Element`]
//! implement it on top of `scraper`.
//!
//! `scraper::Html` is not `Send`: parse, query and drop a [`Page`] without
//! holding it across an `.await`.

use scraper::{ElementRef, Html};

pub trait PageNode: Sized {
    /// First descendant whose `id` attribute equals `id`.
    fn find_by_id(&self, id: &str) -> Option<Self>;

    /// Every descendant element named `tag`, in document order.
    fn find_all_by_tag(&self, tag: &str) -> Vec<Self>;

    fn attribute(&self, name: &str) -> Option<&str>;

    /// Concatenated text of the node and its descendants.
    fn text(&self) -> String;

    fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

pub struct Page {
    html: Html,
}

impl Page {
    pub fn parse(body: &str) -> Self {
        Page {
            html: Html::parse_document(body),
        }
    }

    pub fn root(&self) -> Element<'_> {
        Element(self.html.root_element())
    }

    /// Text of the first `<title>` element.
    pub fn title(&self) -> Option<String> {
        self.root()
            .find_all_by_tag("title")
            .first()
            .map(|title| title.text())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Element<'a>(ElementRef<'a>);

impl<'a> Element<'a> {
    fn descendants(self) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        // ego-tree yields the node itself first.
        self.0.descendants().skip(1).filter_map(ElementRef::wrap)
    }
}

impl<'a> PageNode for Element<'a> {
    fn find_by_id(&self, id: &str) -> Option<Self> {
        self.descendants()
            .find(|el| el.value().id() == Some(id))
            .map(Element)
    }

    fn find_all_by_tag(&self, tag: &str) -> Vec<Self> {
        self.descendants()
            .filter(|el| el.value().name().eq_ignore_ascii_case(tag))
            .map(Element)
            .collect()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.0.value().attr(name)
    }

    fn text(&self) -> String {
        self.0.text().collect()
    }
}
