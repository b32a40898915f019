//! Listing surface driven through CDP

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::discovery::{ItemIdentifier, ItemSummary, ListingSnapshot};
use crate::error::{HarvestError, Result};
use crate::traits::{ControlKind, SurfaceDriver};

/// CSS selectors describing one listing surface.
///
/// Control lists are fallbacks tried in order; the first visible match wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfaceSelectors {
    /// One element per item card
    pub item: String,
    /// Anchor inside the card carrying the detail URL; the card itself when empty
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Summary field name -> selector inside the card
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub load_more: Vec<String>,
    #[serde(default)]
    pub next_page: Vec<String>,
    #[serde(default)]
    pub end_of_results: Vec<String>,
    /// Case-insensitive phrases that mean the listing is exhausted
    #[serde(default)]
    pub end_of_results_text: Vec<String>,
    /// Element whose text carries the advertised result count
    #[serde(default)]
    pub total_count: Option<String>,
}

impl SurfaceSelectors {
    pub fn new(item: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, selector: impl Into<String>) -> Self {
        self.fields.insert(name.into(), selector.into());
        self
    }

    pub fn with_load_more(mut self, selector: impl Into<String>) -> Self {
        self.load_more.push(selector.into());
        self
    }

    pub fn with_next_page(mut self, selector: impl Into<String>) -> Self {
        self.next_page.push(selector.into());
        self
    }

    pub fn with_end_marker_text(mut self, text: impl Into<String>) -> Self {
        self.end_of_results_text.push(text.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    href: String,
    title: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

/// Helper prelude shared by every control script.
const VISIBLE_FN: &str = r#"
    const firstVisible = (selectors) => {
        for (const sel of selectors) {
            let nodes;
            try { nodes = document.querySelectorAll(sel); } catch (e) { continue; }
            for (const el of nodes) {
                const style = window.getComputedStyle(el);
                if (el.offsetParent !== null && !el.disabled &&
                    style.visibility !== 'hidden' && style.display !== 'none') {
                    return el;
                }
            }
        }
        return null;
    };
"#;

pub struct ChromiumSurfaceDriver {
    page: Arc<Page>,
    selectors: SurfaceSelectors,
}

impl ChromiumSurfaceDriver {
    pub fn new(page: Arc<Page>, selectors: SurfaceSelectors) -> Self {
        Self { page, selectors }
    }

    /// Navigate to the listing.
    pub async fn open(&self, url: &str) -> Result<()> {
        info!("Opening listing {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| HarvestError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|e| HarvestError::JavaScript(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| HarvestError::JavaScript(format!("unexpected script result: {e}")))
    }

    fn control_selectors(&self, kind: ControlKind) -> &[String] {
        match kind {
            ControlKind::LoadMore => &self.selectors.load_more,
            ControlKind::NextPage => &self.selectors.next_page,
        }
    }

    async fn has_visible(&self, selectors: &[String]) -> Result<bool> {
        if selectors.is_empty() {
            return Ok(false);
        }
        let script = format!(
            "(() => {{ {VISIBLE_FN} return firstVisible({}) !== null; }})()",
            serde_json::to_string(selectors)?
        );
        self.eval(script).await
    }
}

#[async_trait]
impl SurfaceDriver for ChromiumSurfaceDriver {
    async fn current_snapshot(&mut self) -> Result<ListingSnapshot> {
        let script = format!(
            r#"
            (() => {{
                const cfg = {};
                const out = [];
                const text = (root, sel) => {{
                    if (!sel) return '';
                    const el = root.querySelector(sel);
                    return el ? el.textContent.trim() : '';
                }};
                document.querySelectorAll(cfg.item).forEach(card => {{
                    const link = cfg.link ? card.querySelector(cfg.link) : card;
                    if (!link) return;
                    const href = link.href || link.getAttribute('href');
                    if (!href) return;
                    const fields = {{}};
                    for (const [name, sel] of Object.entries(cfg.fields || {{}})) {{
                        fields[name] = text(card, sel);
                    }}
                    const title = cfg.title ? text(card, cfg.title) : (link.textContent || '').trim();
                    out.push({{ href: String(href), title, fields }});
                }});
                return out;
            }})()
            "#,
            serde_json::to_string(&self.selectors)?
        );

        let raw: Vec<RawItem> = self.eval(script).await?;
        debug!("Snapshot: {} cards visible", raw.len());

        Ok(raw
            .into_iter()
            .filter_map(|item| {
                let id = canonical_identifier(&item.href)?;
                Some((
                    id,
                    ItemSummary {
                        title: item.title,
                        fields: item.fields,
                    },
                ))
            })
            .collect())
    }

    async fn has_load_more_control(&mut self) -> Result<bool> {
        self.has_visible(&self.selectors.load_more).await
    }

    async fn has_next_control(&mut self) -> Result<bool> {
        self.has_visible(&self.selectors.next_page).await
    }

    async fn activate_control(&mut self, kind: ControlKind) -> Result<()> {
        let selectors = self.control_selectors(kind);
        let script = format!(
            r#"
            (() => {{
                {VISIBLE_FN}
                const el = firstVisible({});
                if (!el) return false;
                el.scrollIntoView({{ block: 'center' }});
                el.click();
                return true;
            }})()
            "#,
            serde_json::to_string(selectors)?
        );

        let clicked: bool = self.eval(script).await?;
        if clicked {
            debug!("Clicked {:?} control", kind);
            Ok(())
        } else {
            Err(HarvestError::ElementNotFound(format!("{kind:?} control")))
        }
    }

    async fn scroll_advance(&mut self) -> Result<()> {
        let script = format!(
            r#"
            (() => {{
                const cards = document.querySelectorAll({});
                if (cards.length > 0) {{
                    cards[cards.length - 1].scrollIntoView({{ block: 'end' }});
                }}
                window.scrollTo(0, document.body.scrollHeight);
                return true;
            }})()
            "#,
            serde_json::to_string(&self.selectors.item)?
        );
        let _: bool = self.eval(script).await?;
        Ok(())
    }

    async fn has_end_of_results_signal(&mut self) -> Result<bool> {
        if self.selectors.end_of_results.is_empty() && self.selectors.end_of_results_text.is_empty() {
            return Ok(false);
        }
        let markers: Vec<String> = self
            .selectors
            .end_of_results_text
            .iter()
            .map(|m| m.to_lowercase())
            .collect();
        let script = format!(
            r#"
            (() => {{
                {VISIBLE_FN}
                if (firstVisible({}) !== null) return true;
                const body = (document.body.innerText || '').toLowerCase();
                return {}.some(m => body.includes(m));
            }})()
            "#,
            serde_json::to_string(&self.selectors.end_of_results)?,
            serde_json::to_string(&markers)?
        );
        self.eval(script).await
    }

    async fn advertised_total(&mut self) -> Result<Option<usize>> {
        let Some(selector) = &self.selectors.total_count else {
            return Ok(None);
        };
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.textContent : ''; }})()",
            serde_json::to_string(selector)?
        );
        let text: String = self.eval(script).await?;
        Ok(parse_count(&text))
    }
}

/// Identifier for a card link: trimmed, fragment dropped.
pub(crate) fn canonical_identifier(href: &str) -> Option<ItemIdentifier> {
    let href = href.trim();
    let href = href.split('#').next().unwrap_or(href);
    if href.is_empty() || href.starts_with("javascript:") {
        return None;
    }
    Some(ItemIdentifier::new(href))
}

/// First run of digits in `text`, ignoring thousands separators.
pub(crate) fn parse_count(text: &str) -> Option<usize> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | ' ' | '\u{a0}'))
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
