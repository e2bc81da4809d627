//! Bounded page state for a decision request: pruned HTML plus, unless the
//! full-HTML mode is on, a downscaled screenshot of the viewport.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

use crate::agent::AgentError;
use crate::page::{PageContext, PageScript};

pub const DEFAULT_HTML_BUDGET: usize = 10_000;
/// 120k tokens at roughly 4.5 characters per token.
pub const FULL_HTML_BUDGET: usize = 26_666;
pub const DEFAULT_SCREENSHOT_PIXELS: u32 = 48_000;

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub html_budget: usize,
    pub full_html_budget: usize,
    pub screenshot_pixels: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            html_budget: DEFAULT_HTML_BUDGET,
            full_html_budget: FULL_HTML_BUDGET,
            screenshot_pixels: DEFAULT_SCREENSHOT_PIXELS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PageState {
    pub url: String,
    pub html: String,
    /// `data:image/png;base64,...`
    pub screenshot: Option<String>,
}

/// First `max_chars` characters of `html`.
pub fn truncate(html: &str, max_chars: usize) -> &str {
    match html.char_indices().nth(max_chars) {
        Some((idx, _)) => &html[..idx],
        None => html,
    }
}

/// Dimensions whose product approximates `target_pixels`, keeping the aspect
/// ratio. Never returns a zero side.
pub fn resize_dimensions(width: u32, height: u32, target_pixels: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let original = width as f64 * height as f64;
    let scale = (target_pixels as f64 / original).sqrt();
    let w = (width as f64 * scale).round().max(1.0) as u32;
    let h = (height as f64 * scale).round().max(1.0) as u32;
    (w, h)
}

pub fn resize_png(bytes: &[u8], target_pixels: u32) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = resize_dimensions(img.width(), img.height(), target_pixels);
    let resized = img.resize_exact(w, h, FilterType::Triangle);
    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub async fn capture<P>(page: &P, cfg: &CaptureConfig, full_html: bool) -> Result<PageState, AgentError>
where
    P: PageContext + ?Sized,
{
    let url = page.url().await?;
    let raw = page.evaluate(&PageScript::ExtractBody).await?;
    let markup = raw.as_str().unwrap_or_default();
    let budget = if full_html { cfg.full_html_budget } else { cfg.html_budget };
    let html = truncate(markup, budget).to_string();

    let screenshot = if full_html {
        None
    } else {
        let png = page.capture_pixels().await?;
        let target = cfg.screenshot_pixels;
        let resized = tokio::task::spawn_blocking(move || resize_png(&png, target))
            .await
            .map_err(|e| AgentError::Page(format!("resize task: {e}")))?
            .map_err(|e| AgentError::Page(format!("resize screenshot: {e}")))?;
        Some(format!("data:image/png;base64,{}", STANDARD.encode(resized)))
    };
    debug!(url = %url, html_chars = html.chars().count(), screenshot = screenshot.is_some(), "page state captured");
    Ok(PageState { url, html, screenshot })
}
