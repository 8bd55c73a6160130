//! Run report and on-disk artifacts. The report is an ordered list of
//! human-readable lines accumulated during the run and flushed at the end --
//! including terminal-failure exits, which still get the partial report and
//! whatever data was extracted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::driver::PageDriver;
use crate::types::ExtractionResult;

/// Screenshot sink with deterministic, filesystem-safe names.
pub struct Artifacts {
    dir: PathBuf,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating screenshot dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// One screenshot per visited page: `page_<n>_<sanitized-path>.png`.
    pub fn save_page_screenshot(
        &self,
        driver: &dyn PageDriver,
        page_number: usize,
        url_path: &str,
    ) -> Result<PathBuf> {
        let slug = sanitize(url_path);
        let slug = if slug == "element" { "index".to_string() } else { slug };
        self.save(driver, &format!("page_{page_number}_{slug}.png"))
    }

    /// Diagnostic shot for a failed or escalated step:
    /// `failure_<sanitized-description>_step_<n>.png`.
    pub fn save_failure_screenshot(
        &self,
        driver: &dyn PageDriver,
        step_index: usize,
        description: &str,
    ) -> Result<PathBuf> {
        self.save(
            driver,
            &format!("failure_{}_step_{}.png", sanitize(description), step_index + 1),
        )
    }

    /// Screenshot under a caller-chosen name (sanitized), e.g. for an
    /// explicit screenshot step or a page-load failure.
    pub fn save_named(&self, driver: &dyn PageDriver, name: &str) -> Result<PathBuf> {
        let name = name.strip_suffix(".png").unwrap_or(name);
        self.save(driver, &format!("{}.png", sanitize(name)))
    }

    fn save(&self, driver: &dyn PageDriver, name: &str) -> Result<PathBuf> {
        let png = driver.screenshot()?;
        let path = self.dir.join(name);
        std::fs::write(&path, png)
            .with_context(|| format!("writing screenshot {}", path.display()))?;
        info!(path = %path.display(), "screenshot saved");
        Ok(path)
    }
}

/// Reduce free text to a filename slug: lowercase alphanumerics joined by
/// underscores, never empty.
pub fn sanitize(text: &str) -> String {
    let mut slug = String::new();
    let mut gap = false;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('_');
            }
            gap = false;
            slug.push(ch);
        } else {
            gap = true;
        }
    }
    if slug.is_empty() {
        "element".to_string()
    } else {
        slug
    }
}

/// Ordered human-readable run log, flushed to disk at run end.
#[derive(Default)]
pub struct Report {
    lines: Vec<String>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Write the report followed by the extracted data as pretty JSON.
    /// Called on every exit path, fatal ones included.
    pub fn flush(&self, path: &Path, extracted: &ExtractionResult) -> Result<()> {
        let mut body = self.lines.join("\n");
        if !extracted.is_empty() {
            body.push_str("\n\n--- Extracted Data ---\n");
            body.push_str(&serde_json::to_string_pretty(extracted)?);
        }
        body.push('\n');
        std::fs::write(path, body)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::types::ExtractedValue;

    #[test]
    fn sanitize_produces_stable_slugs() {
        assert_eq!(sanitize("the 'Sign In' button!"), "the_sign_in_button");
        assert_eq!(sanitize("/products/list"), "products_list");
        assert_eq!(sanitize("???"), "element");
        assert_eq!(sanitize(""), "element");
    }

    #[test]
    fn failure_screenshot_name_carries_step_and_description() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path()).unwrap();
        let driver = MockDriver::default();

        let path = artifacts
            .save_failure_screenshot(&driver, 4, "the 'Sign In' button")
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "failure_the_sign_in_button_step_5.png"
        );
        assert!(path.exists());
    }

    #[test]
    fn page_screenshot_defaults_to_index_for_bare_root() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path()).unwrap();
        let driver = MockDriver::default();

        let path = artifacts.save_page_screenshot(&driver, 1, "/").unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "page_1_index.png"
        );
    }

    #[test]
    fn flush_appends_extracted_data_json() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.txt");

        let mut report = Report::new();
        report.line("--- Testing Page 1: https://example.test/ ---");
        let mut extracted = ExtractionResult::new();
        extracted.insert("title".into(), ExtractedValue::Single("Welcome".into()));

        report.flush(&report_path, &extracted).unwrap();
        let body = std::fs::read_to_string(&report_path).unwrap();
        assert!(body.contains("Testing Page 1"));
        assert!(body.contains("--- Extracted Data ---"));
        assert!(body.contains("\"title\": \"Welcome\""));
    }
}
