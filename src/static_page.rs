//! A `PageContext` over a fixed HTML document. Nothing is rendered and no
//! page script runs; the primitives are resolved with the same rules the
//! in-page scripts use and recorded instead of executed.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use tokio::sync::Mutex;

use crate::agent::AgentError;
use crate::page::{PageContext, PageScript};
use crate::resolver::{Target, TargetKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageEvent {
    Clicked { tag: String, id: Option<String> },
    Typed { tag: String, id: Option<String>, text: String },
    Navigated(String),
}

struct Inner {
    url: String,
    html: String,
    events: Vec<PageEvent>,
    values: HashMap<String, String>,
    evaluations: usize,
}

pub struct StaticPage {
    inner: Mutex<Inner>,
    viewport: (u32, u32),
}

impl StaticPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                url: url.into(),
                html: html.into(),
                events: Vec::new(),
                values: HashMap::new(),
                evaluations: 0,
            }),
            viewport: (1280, 800),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let html = std::fs::read_to_string(path)?;
        let abs = std::fs::canonicalize(path)?;
        let url = Url::from_file_path(&abs)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", abs.display()));
        Ok(Self::new(url, html))
    }

    pub async fn events(&self) -> Vec<PageEvent> {
        self.inner.lock().await.events.clone()
    }

    /// Value typed into the element with this id, if any.
    pub async fn value_of(&self, id: &str) -> Option<String> {
        self.inner.lock().await.values.get(id).cloned()
    }

    /// Number of scripts evaluated so far.
    pub async fn evaluations(&self) -> usize {
        self.inner.lock().await.evaluations
    }

    fn blank_png(&self) -> Result<Vec<u8>, AgentError> {
        let (w, h) = self.viewport;
        let img = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| AgentError::Page(format!("encode blank viewport: {e}")))?;
        Ok(out.into_inner())
    }
}

fn selector(css: &str) -> Result<Selector, AgentError> {
    Selector::parse(css).map_err(|e| AgentError::Page(format!("selector {css}: {e:?}")))
}

fn text_content(el: &ElementRef<'_>) -> String {
    el.text().collect()
}

/// Body markup without `script` and `head` subtrees.
pub fn extract_body(html: &str) -> Result<String, AgentError> {
    let mut doc = Html::parse_document(html);
    let body_sel = selector("body")?;
    let strip_sel = selector("script, head")?;
    let doomed: Vec<_> = match doc.select(&body_sel).next() {
        Some(body) => body.select(&strip_sel).map(|el| el.id()).collect(),
        None => return Ok(String::new()),
    };
    for id in doomed {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
    Ok(doc
        .select(&body_sel)
        .next()
        .map(|b| b.inner_html())
        .unwrap_or_default())
}

/// First element in document order matching a click target.
pub fn find_clickable<'a>(
    doc: &'a Html,
    target: &Target,
    base: Option<&Url>,
) -> Result<Option<ElementRef<'a>>, TargetKind> {
    let value = target.value.as_str();
    match &target.kind {
        TargetKind::Id => Ok(find_by_id(doc, value)),
        TargetKind::Text => Ok(all_elements(doc).find(|el| text_content(el).trim() == value)),
        TargetKind::Href => {
            let anchors = Selector::parse("a").map_err(|_| target.kind.clone())?;
            Ok(doc.select(&anchors).find(|el| resolved_href(el, base) == value))
        }
        other => Err(other.clone()),
    }
}

/// First element in document order matching a type target.
pub fn find_typeable<'a>(doc: &'a Html, target: &Target) -> Result<Option<ElementRef<'a>>, TargetKind> {
    let value = target.value.as_str();
    match &target.kind {
        TargetKind::Id => Ok(find_by_id(doc, value)),
        TargetKind::Text => {
            let inputs = Selector::parse("input, textarea").map_err(|_| target.kind.clone())?;
            Ok(doc.select(&inputs).find(|el| {
                el.value().attr("placeholder") == Some(value) || el.value().attr("aria-label") == Some(value)
            }))
        }
        other => Err(other.clone()),
    }
}

fn all_elements(doc: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
}

fn find_by_id<'a>(doc: &'a Html, id: &str) -> Option<ElementRef<'a>> {
    all_elements(doc).find(|el| el.value().id() == Some(id))
}

// Mirrors `HTMLAnchorElement.href`: absolute when a base is known.
fn resolved_href(el: &ElementRef<'_>, base: Option<&Url>) -> String {
    let raw = match el.value().attr("href") {
        Some(h) => h,
        None => return String::new(),
    };
    match base.and_then(|b| b.join(raw).ok()) {
        Some(u) => u.to_string(),
        None => raw.to_string(),
    }
}

fn done(el: &ElementRef<'_>) -> Value {
    json!({ "status": "done", "tag": el.value().name() })
}

#[async_trait]
impl PageContext for StaticPage {
    async fn url(&self) -> Result<String, AgentError> {
        Ok(self.inner.lock().await.url.clone())
    }

    async fn evaluate(&self, script: &PageScript) -> Result<Value, AgentError> {
        let mut inner = self.inner.lock().await;
        inner.evaluations += 1;
        match script {
            PageScript::ExtractBody => Ok(Value::String(extract_body(&inner.html)?)),
            PageScript::Click(target) => {
                let base = Url::parse(&inner.url).ok();
                let (result, event) = {
                    let doc = Html::parse_document(&inner.html);
                    let found = find_clickable(&doc, target, base.as_ref());
                    match found {
                        Err(kind) => (json!({ "status": "unknown_kind", "kind": kind.as_str() }), None),
                        Ok(None) => (json!({ "status": "not_found" }), None),
                        Ok(Some(el)) => {
                            let event = PageEvent::Clicked {
                                tag: el.value().name().to_string(),
                                id: el.value().id().map(str::to_string),
                            };
                            (done(&el), Some(event))
                        }
                    }
                };
                inner.events.extend(event);
                Ok(result)
            }
            PageScript::Type { target, text } => {
                let (result, event) = {
                    let doc = Html::parse_document(&inner.html);
                    let found = find_typeable(&doc, target);
                    match found {
                        Err(kind) => (json!({ "status": "unknown_kind", "kind": kind.as_str() }), None),
                        Ok(None) => (json!({ "status": "not_found" }), None),
                        Ok(Some(el)) => {
                            let event = PageEvent::Typed {
                                tag: el.value().name().to_string(),
                                id: el.value().id().map(str::to_string),
                                text: text.clone(),
                            };
                            (done(&el), Some(event))
                        }
                    }
                };
                if let Some(PageEvent::Typed { id: Some(id), text, .. }) = &event {
                    inner.values.insert(id.clone(), text.clone());
                }
                inner.events.extend(event);
                Ok(result)
            }
        }
    }

    async fn capture_pixels(&self) -> Result<Vec<u8>, AgentError> {
        self.blank_png()
    }

    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().await;
        inner.url = url.to_string();
        inner.events.push(PageEvent::Navigated(url.to_string()));
        Ok(())
    }
}
