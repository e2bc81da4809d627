use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::agent::AgentError;
use crate::page::{PageContext, PageScript};

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub window: (u32, u32),
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None, window: (1280, 800) }
    }
}

pub struct Browser {
    page: Page,
    _browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // A fresh profile per run avoids ProcessSingleton lock conflicts when
        // Chromium is restarted quickly.
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("glass-steer-profile-{}-{}", std::process::id(), ts));
        std::fs::create_dir_all(&profile_dir).context("create chromium profile dir")?;
        builder = builder
            .user_data_dir(profile_dir)
            .window_size(cfg.window.0, cfg.window.1)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        let this = Self { page, _browser: browser };
        this.fix_viewport(cfg.window).await;
        Ok(this)
    }

    /// Attach to a running Chromium over its DevTools websocket and drive its
    /// first open tab.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url)
            .await
            .with_context(|| format!("connect to {ws_url}"))?;
        tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        // Give the handler a moment to discover existing targets.
        sleep(Duration::from_millis(200)).await;
        let page = match browser.pages().await?.into_iter().next() {
            Some(p) => p,
            None => browser.new_page("about:blank").await?,
        };
        Ok(Self { page, _browser: browser })
    }

    // Ensure a non-zero viewport to avoid screenshot 0-width errors.
    async fn fix_viewport(&self, (w, h): (u32, u32)) {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(w as i64)
            .height(h as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build();
        match params {
            Ok(p) => {
                if let Err(e) = self.page.execute(p).await {
                    warn!("viewport override failed: {}", e);
                }
            }
            Err(e) => warn!("viewport override params: {}", e),
        }
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn evaluate(&self, js: String) -> Result<Value> {
        let eval = EvaluateParams::builder()
            .expression(js)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(|e| anyhow!(e))?;
        let result = self.page.evaluate_expression(eval).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// PNG of the visible viewport.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(false)
            .build();
        Ok(self.page.screenshot(params).await?)
    }
}

/// [`PageContext`] backed by a live Chromium tab.
pub struct ChromiumPage {
    browser: Browser,
}

impl ChromiumPage {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self, AgentError> {
        let browser = Browser::launch(cfg)
            .await
            .map_err(|e| AgentError::Page(e.to_string()))?;
        Ok(Self { browser })
    }

    pub async fn connect(ws_url: &str) -> Result<Self, AgentError> {
        let browser = Browser::connect(ws_url)
            .await
            .map_err(|e| AgentError::Page(e.to_string()))?;
        Ok(Self { browser })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }
}

#[async_trait]
impl PageContext for ChromiumPage {
    async fn url(&self) -> Result<String, AgentError> {
        self.browser.url().await.map_err(|e| AgentError::Page(e.to_string()))
    }

    async fn evaluate(&self, script: &PageScript) -> Result<Value, AgentError> {
        debug!(script = ?script, "evaluating page script");
        self.browser
            .evaluate(script.to_js())
            .await
            .map_err(|e| AgentError::Page(e.to_string()))
    }

    async fn capture_pixels(&self) -> Result<Vec<u8>, AgentError> {
        self.browser
            .screenshot_png()
            .await
            .map_err(|e| AgentError::Page(e.to_string()))
    }

    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        self.browser
            .goto(url)
            .await
            .map_err(|e| AgentError::Page(e.to_string()))
    }
}
