//! Session-to-session copy protocol.
//!
//! Runs a source session and a target editor session side by side and
//! carries each page body across with clipboard shortcuts: select-all
//! and copy on the source surface (the rendered view, or the editor
//! which is then discarded unsaved), then select-all, delete, paste and
//! save in the target editor. Transient driver failures are retried a
//! bounded number of times; exhausting the bound abandons the pair,
//! never the whole run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ElementCatalogue, InstanceConfig, InstanceKind, UiElement};
use crate::error::{ConfigError, DriverError};
use crate::tree::{ContentTree, PageNode};

use super::{edit_url, view_url, BrowserPort, BrowsingContext, DriverSettings, KeyCombo};

/// How the source page is opened for copying.
///
/// Read mode works off the rendered view and never enters the source
/// editor; edit mode activates the editing surface for a faithful
/// storage-format copy and discards it afterwards so the source is never
/// mutated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CopyMode {
    #[default]
    Read,
    Edit,
}

/// Protocol position for the pair currently being copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPasteState {
    Idle,
    SourceLoaded,
    ContentSelected,
    Discarded,
    TargetLoaded,
    ContentReplaced,
    Saved,
}

/// Outcome counters for one copy run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Catalogue entries the protocol needs, resolved once at startup.
struct SurfaceElements {
    source_content: UiElement,
    /// Present in edit mode only; read mode never opens a source editor.
    source_discard: Option<UiElement>,
    target_content: UiElement,
    target_save: UiElement,
}

/// Drives the copy protocol over a [`BrowserPort`].
pub struct UiReplicator {
    browser: Arc<dyn BrowserPort>,
    elements: SurfaceElements,
    source_config: InstanceConfig,
    target_config: InstanceConfig,
    settings: DriverSettings,
    mode: CopyMode,
    cancel: Arc<AtomicBool>,
}

impl UiReplicator {
    /// Resolve every selector the protocol needs up front; a missing
    /// catalogue entry is fatal before any session opens.
    pub fn new(
        browser: Arc<dyn BrowserPort>,
        catalogue: &ElementCatalogue,
        source_config: InstanceConfig,
        target_config: InstanceConfig,
        settings: DriverSettings,
        mode: CopyMode,
    ) -> Result<Self, ConfigError> {
        let elements = match mode {
            CopyMode::Read => SurfaceElements {
                source_content: resolve(catalogue, source_config.kind, "view_page", "content")?,
                source_discard: None,
                target_content: resolve(catalogue, target_config.kind, "edit_page", "content")?,
                target_save: resolve(catalogue, target_config.kind, "edit_page", "save_button")?,
            },
            CopyMode::Edit => SurfaceElements {
                source_content: resolve(catalogue, source_config.kind, "edit_page", "content")?,
                source_discard: Some(resolve(
                    catalogue,
                    source_config.kind,
                    "edit_page",
                    "discard_button",
                )?),
                target_content: resolve(catalogue, target_config.kind, "edit_page", "content")?,
                target_save: resolve(catalogue, target_config.kind, "edit_page", "save_button")?,
            },
        };
        Ok(Self {
            browser,
            elements,
            source_config,
            target_config,
            settings,
            mode,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared stop flag; checked between pairs.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Copy bodies for every title-matching pair of the two trees' paired
    /// traversals. The target tree must already be aligned with the
    /// source. Both sessions are closed on every exit path.
    pub async fn copy_pages(
        &self,
        source: &ContentTree,
        target: &ContentTree,
    ) -> Result<CopyReport, DriverError> {
        let outcome = self.copy_pages_inner(source, target).await;
        for context in [BrowsingContext::Source, BrowsingContext::Target] {
            if let Err(e) = self.browser.close(context).await {
                warn!(%context, error = %e, "failed to close session");
            }
        }
        outcome
    }

    async fn copy_pages_inner(
        &self,
        source: &ContentTree,
        target: &ContentTree,
    ) -> Result<CopyReport, DriverError> {
        let mut report = CopyReport::default();
        let source_nodes = source.traverse();
        let target_nodes = target.traverse();

        for (s, t) in source_nodes.iter().zip(target_nodes.iter()) {
            if self.cancel.load(Ordering::Relaxed) {
                info!("copy run cancelled");
                break;
            }
            if s.title != t.title {
                warn!(source = %s.title, target = %t.title, "title mismatch, skipping pair");
                report.skipped += 1;
                continue;
            }
            if self.mode == CopyMode::Edit && !self.may_edit(source, s).await {
                warn!(page = %s.title, page_id = s.id, "access denied, skipping pair");
                report.skipped += 1;
                continue;
            }

            match self.copy_pair(s, t).await {
                Ok(state) => {
                    debug_assert_eq!(state, CopyPasteState::Saved);
                    info!(page = %s.title, "content copied");
                    report.copied += 1;
                }
                Err(DriverError::SessionClosed) => return Err(DriverError::SessionClosed),
                Err(e) => {
                    warn!(page = %s.title, error = %e, "copy failed, abandoning pair");
                    report.failed += 1;
                }
            }
        }

        info!(
            copied = report.copied,
            skipped = report.skipped,
            failed = report.failed,
            "copy run finished"
        );
        Ok(report)
    }

    /// Whether the configured user may open this page's editor.
    /// Indeterminate restriction lookups permit the attempt.
    async fn may_edit(&self, source: &ContentTree, node: &PageNode) -> bool {
        match source.gateway().get_restrictions(node.id).await {
            Ok(restrictions) => restrictions.permits(&self.source_config.credentials.email, &[]),
            Err(e) => {
                warn!(page = %node.title, error = %e, "restriction lookup failed, attempting anyway");
                true
            }
        }
    }

    /// One full protocol round for a source/target page pair.
    async fn copy_pair(
        &self,
        source: &PageNode,
        target: &PageNode,
    ) -> Result<CopyPasteState, DriverError> {
        let mut state = CopyPasteState::Idle;

        let source_url = match self.mode {
            CopyMode::Read => view_url(&self.source_config, source),
            CopyMode::Edit => edit_url(&self.source_config, source),
        };
        self.browser
            .navigate(BrowsingContext::Source, &source_url)
            .await?;
        self.wait_with_retry(BrowsingContext::Source, &self.elements.source_content)
            .await?;
        state = self.advance(state, CopyPasteState::SourceLoaded, source);

        self.click_with_retry(BrowsingContext::Source, &self.elements.source_content)
            .await?;
        self.settle().await;
        self.keys_with_retry(
            BrowsingContext::Source,
            &self.elements.source_content,
            KeyCombo::SelectAll,
        )
        .await?;
        self.settle().await;
        self.keys_with_retry(
            BrowsingContext::Source,
            &self.elements.source_content,
            KeyCombo::Copy,
        )
        .await?;
        state = self.advance(state, CopyPasteState::ContentSelected, source);

        // Leave the source editor without saving; the draft must not stick.
        if let Some(discard) = &self.elements.source_discard {
            self.click_with_retry(BrowsingContext::Source, discard).await?;
            state = self.advance(state, CopyPasteState::Discarded, source);
        }

        self.browser
            .navigate(
                BrowsingContext::Target,
                &edit_url(&self.target_config, target),
            )
            .await?;
        self.wait_with_retry(BrowsingContext::Target, &self.elements.target_content)
            .await?;
        state = self.advance(state, CopyPasteState::TargetLoaded, target);

        self.click_with_retry(BrowsingContext::Target, &self.elements.target_content)
            .await?;
        self.settle().await;
        self.keys_with_retry(
            BrowsingContext::Target,
            &self.elements.target_content,
            KeyCombo::SelectAll,
        )
        .await?;
        self.settle().await;
        self.keys_with_retry(
            BrowsingContext::Target,
            &self.elements.target_content,
            KeyCombo::DeleteSelection,
        )
        .await?;
        self.settle().await;
        self.keys_with_retry(
            BrowsingContext::Target,
            &self.elements.target_content,
            KeyCombo::Paste,
        )
        .await?;
        state = self.advance(state, CopyPasteState::ContentReplaced, target);

        // Let the pasted draft settle before committing it.
        self.settle().await;
        self.click_with_retry(BrowsingContext::Target, &self.elements.target_save)
            .await?;
        state = self.advance(state, CopyPasteState::Saved, target);

        Ok(state)
    }

    /// Fixed pause between consecutive UI actions; editors need time to
    /// register focus and clipboard events before the next dispatch.
    async fn settle(&self) {
        tokio::time::sleep(self.settings.settle_delay).await;
    }

    fn advance(
        &self,
        from: CopyPasteState,
        to: CopyPasteState,
        node: &PageNode,
    ) -> CopyPasteState {
        debug!(page = %node.title, ?from, ?to, "protocol step");
        to
    }

    async fn wait_with_retry(
        &self,
        context: BrowsingContext,
        element: &UiElement,
    ) -> Result<(), DriverError> {
        let mut attempt = 1;
        loop {
            match self
                .browser
                .wait_for(context, element, self.settings.element_timeout)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    warn!(%context, attempt, error = %e, "element wait failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn click_with_retry(
        &self,
        context: BrowsingContext,
        element: &UiElement,
    ) -> Result<(), DriverError> {
        let mut attempt = 1;
        loop {
            match self.browser.click(context, element).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    warn!(%context, attempt, error = %e, "click failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn keys_with_retry(
        &self,
        context: BrowsingContext,
        element: &UiElement,
        combo: KeyCombo,
    ) -> Result<(), DriverError> {
        let mut attempt = 1;
        loop {
            match self.browser.send_keys(context, element, combo).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    warn!(%context, attempt, ?combo, error = %e, "key dispatch failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn resolve(
    catalogue: &ElementCatalogue,
    kind: InstanceKind,
    surface: &str,
    element_type: &str,
) -> Result<UiElement, ConfigError> {
    catalogue
        .element(kind, surface, element_type)
        .cloned()
        .ok_or_else(|| ConfigError::MissingElement {
            kind: kind.to_string(),
            surface: surface.to_string(),
            element_type: element_type.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::Credentials;
    use crate::test_support::MemoryGateway;
    use crate::tree::TreeFilter;

    /// Scripted port: records every call and fails chosen operations a
    /// fixed number of times before letting them through.
    #[derive(Default)]
    struct FakeBrowser {
        log: Mutex<Vec<String>>,
        failures: Mutex<HashMap<String, u32>>,
    }

    impl FakeBrowser {
        fn fail_times(&self, op: &str, times: u32) {
            self.failures.lock().unwrap().insert(op.to_string(), times);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn record(&self, op: String) -> Result<(), DriverError> {
            self.log.lock().unwrap().push(op.clone());
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&op) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DriverError::ElementNotFound {
                        selector: op,
                        timeout_secs: 0,
                    });
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserPort for FakeBrowser {
        async fn navigate(&self, context: BrowsingContext, url: &str) -> Result<(), DriverError> {
            self.record(format!("navigate:{context}:{url}"))
        }

        async fn wait_for(
            &self,
            context: BrowsingContext,
            element: &UiElement,
            _timeout: Duration,
        ) -> Result<(), DriverError> {
            self.record(format!("wait:{context}:{}", element.selector_value))
        }

        async fn click(
            &self,
            context: BrowsingContext,
            element: &UiElement,
        ) -> Result<(), DriverError> {
            self.record(format!("click:{context}:{}", element.selector_value))
        }

        async fn send_keys(
            &self,
            context: BrowsingContext,
            element: &UiElement,
            combo: KeyCombo,
        ) -> Result<(), DriverError> {
            self.record(format!(
                "keys:{context}:{}:{combo:?}",
                element.selector_value
            ))
        }

        async fn close(&self, context: BrowsingContext) -> Result<(), DriverError> {
            self.record(format!("close:{context}"))
        }
    }

    fn catalogue() -> ElementCatalogue {
        serde_json::from_str(
            r##"{
                "cloud": {
                    "view_page": [
                        {"element_type": "content", "selector_kind": "css", "selector_value": "#main-content"}
                    ],
                    "edit_page": [
                        {"element_type": "content", "selector_kind": "css", "selector_value": "#editor"},
                        {"element_type": "discard_button", "selector_kind": "css", "selector_value": "#discard"},
                        {"element_type": "save_button", "selector_kind": "css", "selector_value": "#save"}
                    ]
                }
            }"##,
        )
        .unwrap()
    }

    fn instance(name: &str) -> InstanceConfig {
        InstanceConfig {
            name: name.to_string(),
            kind: InstanceKind::Cloud,
            site_url: format!("https://{name}.example.com"),
            space_key: "ENG".to_string(),
            root_page_id: 1,
            label: String::new(),
            exclude_ids: Vec::new(),
            fetch_limit: 100,
            request_timeout_secs: 30,
            credentials: Credentials {
                email: "bot@example.com".to_string(),
                ..Credentials::default()
            },
        }
    }

    fn fast_settings() -> DriverSettings {
        DriverSettings {
            element_timeout: Duration::from_millis(1),
            settle_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            max_attempts: 3,
        }
    }

    async fn tree_with_root(gateway: Arc<MemoryGateway>, root: i64) -> ContentTree {
        ContentTree::build(gateway, InstanceKind::Cloud, root, &TreeFilter::default())
            .await
            .unwrap()
    }

    fn replicator(browser: Arc<FakeBrowser>, mode: CopyMode) -> UiReplicator {
        UiReplicator::new(
            browser,
            &catalogue(),
            instance("src"),
            instance("dst"),
            fast_settings(),
            mode,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn edit_mode_runs_protocol_in_order_and_closes_sessions() {
        let source_gw = Arc::new(MemoryGateway::new());
        source_gw.add_page(1, "Home", None, &[]);
        let target_gw = Arc::new(MemoryGateway::new());
        target_gw.add_page(9, "Home", None, &[]);

        let source = tree_with_root(source_gw, 1).await;
        let target = tree_with_root(target_gw, 9).await;

        let browser = Arc::new(FakeBrowser::default());
        let rep = replicator(browser.clone(), CopyMode::Edit);
        let report = rep.copy_pages(&source, &target).await.unwrap();
        assert_eq!(report, CopyReport { copied: 1, skipped: 0, failed: 0 });

        let expected = vec![
            "navigate:source:https://src.example.com/spaces/ENG/pages/edit/1",
            "wait:source:#editor",
            "click:source:#editor",
            "keys:source:#editor:SelectAll",
            "keys:source:#editor:Copy",
            "click:source:#discard",
            "navigate:target:https://dst.example.com/spaces/ENG/pages/edit/9",
            "wait:target:#editor",
            "click:target:#editor",
            "keys:target:#editor:SelectAll",
            "keys:target:#editor:DeleteSelection",
            "keys:target:#editor:Paste",
            "click:target:#save",
            "close:source",
            "close:target",
        ];
        assert_eq!(browser.log(), expected);
    }

    #[tokio::test]
    async fn read_mode_uses_view_surface_and_never_discards() {
        let source_gw = Arc::new(MemoryGateway::new());
        source_gw.add_page(1, "Home", None, &[]);
        let target_gw = Arc::new(MemoryGateway::new());
        target_gw.add_page(9, "Home", None, &[]);

        let source = tree_with_root(source_gw, 1).await;
        let target = tree_with_root(target_gw, 9).await;

        let browser = Arc::new(FakeBrowser::default());
        let rep = replicator(browser.clone(), CopyMode::Read);
        let report = rep.copy_pages(&source, &target).await.unwrap();
        assert_eq!(report.copied, 1);

        let log = browser.log();
        assert_eq!(log[0], "navigate:source:https://src.example.com/wiki/x/1");
        assert_eq!(log[1], "wait:source:#main-content");
        assert!(log.iter().all(|op| !op.contains("#discard")));
        // Target side still goes through the editor.
        assert!(log.contains(&"click:target:#save".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_pauses_between_ui_actions() {
        let source_gw = Arc::new(MemoryGateway::new());
        source_gw.add_page(1, "Home", None, &[]);
        let target_gw = Arc::new(MemoryGateway::new());
        target_gw.add_page(9, "Home", None, &[]);

        let source = tree_with_root(source_gw, 1).await;
        let target = tree_with_root(target_gw, 9).await;

        let browser = Arc::new(FakeBrowser::default());
        let settings = DriverSettings {
            settle_delay: Duration::from_millis(100),
            ..fast_settings()
        };
        let rep = UiReplicator::new(
            browser,
            &catalogue(),
            instance("src"),
            instance("dst"),
            settings,
            CopyMode::Edit,
        )
        .unwrap();

        let started = tokio::time::Instant::now();
        let report = rep.copy_pages(&source, &target).await.unwrap();
        assert_eq!(report.copied, 1);

        // Two pauses around select/copy, three around select/delete/paste,
        // one before the save click.
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let source_gw = Arc::new(MemoryGateway::new());
        source_gw.add_page(1, "Home", None, &[]);
        let target_gw = Arc::new(MemoryGateway::new());
        target_gw.add_page(9, "Home", None, &[]);

        let source = tree_with_root(source_gw, 1).await;
        let target = tree_with_root(target_gw, 9).await;

        let browser = Arc::new(FakeBrowser::default());
        browser.fail_times("click:target:#save", 2);

        let rep = replicator(browser.clone(), CopyMode::Edit);
        let report = rep.copy_pages(&source, &target).await.unwrap();
        assert_eq!(report.copied, 1);

        let saves = browser
            .log()
            .iter()
            .filter(|op| op.as_str() == "click:target:#save")
            .count();
        assert_eq!(saves, 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_abandons_pair_not_run() {
        let source_gw = Arc::new(MemoryGateway::new());
        source_gw.add_page(1, "Home", None, &[]);
        source_gw.add_page(2, "A", Some(1), &[]);
        let target_gw = Arc::new(MemoryGateway::new());
        target_gw.add_page(9, "Home", None, &[]);
        target_gw.add_page(10, "A", Some(9), &[]);

        let source = tree_with_root(source_gw, 1).await;
        let target = tree_with_root(target_gw, 9).await;

        let browser = Arc::new(FakeBrowser::default());
        // Root pair never gets past the source editor; child pair is fine.
        browser.fail_times(
            "navigate:source:https://src.example.com/spaces/ENG/pages/edit/1",
            10,
        );

        let rep = replicator(browser.clone(), CopyMode::Edit);
        let report = rep.copy_pages(&source, &target).await.unwrap();
        assert_eq!(report, CopyReport { copied: 1, skipped: 0, failed: 1 });

        // Sessions are closed even after a failed pair.
        let log = browser.log();
        assert!(log.contains(&"close:source".to_string()));
        assert!(log.contains(&"close:target".to_string()));
    }

    #[tokio::test]
    async fn title_mismatch_skips_pair() {
        let source_gw = Arc::new(MemoryGateway::new());
        source_gw.add_page(1, "Home", None, &[]);
        source_gw.add_page(2, "A", Some(1), &[]);
        let target_gw = Arc::new(MemoryGateway::new());
        target_gw.add_page(9, "Home", None, &[]);
        target_gw.add_page(10, "Different", Some(9), &[]);

        let source = tree_with_root(source_gw, 1).await;
        let target = tree_with_root(target_gw, 9).await;

        let browser = Arc::new(FakeBrowser::default());
        let rep = replicator(browser.clone(), CopyMode::Edit);
        let report = rep.copy_pages(&source, &target).await.unwrap();
        assert_eq!(report, CopyReport { copied: 1, skipped: 1, failed: 0 });
    }

    #[tokio::test]
    async fn restricted_page_is_skipped_in_edit_mode() {
        let source_gw = Arc::new(MemoryGateway::new());
        source_gw.add_page(1, "Home", None, &[]);
        source_gw.restrict_page(1, &["owner@example.com"]);
        let target_gw = Arc::new(MemoryGateway::new());
        target_gw.add_page(9, "Home", None, &[]);

        let source = tree_with_root(source_gw, 1).await;
        let target = tree_with_root(target_gw, 9).await;

        let browser = Arc::new(FakeBrowser::default());
        let rep = replicator(browser.clone(), CopyMode::Edit);
        let report = rep.copy_pages(&source, &target).await.unwrap();
        assert_eq!(report, CopyReport { copied: 0, skipped: 1, failed: 0 });

        // No navigation happened for the restricted pair.
        assert!(browser.log().iter().all(|op| !op.starts_with("navigate")));
    }

    #[test]
    fn missing_catalogue_entry_is_fatal() {
        let browser = Arc::new(FakeBrowser::default());
        let empty: ElementCatalogue = serde_json::from_str("{}").unwrap();
        let result = UiReplicator::new(
            browser,
            &empty,
            instance("src"),
            instance("dst"),
            fast_settings(),
            CopyMode::Edit,
        );
        assert!(matches!(result, Err(ConfigError::MissingElement { .. })));
    }
}
