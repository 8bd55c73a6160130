//! Turns a natural-language element description into an ordered list of
//! candidate locator expressions.
//!
//! Candidates are site-agnostic: common HTML attributes, ARIA roles and
//! visible text, never site-specific ids or classes. Plain strings are CSS
//! selectors; strings starting with `//` are XPath (used where CSS cannot
//! express text matching). The list is a confidence ranking -- nothing in it
//! is guaranteed to match, validity is discovered by attempting each one.

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";

/// Explicit context for the handful of heuristics that depend on where the
/// crawl currently is. Passed in by the caller, never read from globals.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Host of the page currently loaded, if any.
    pub current_host: Option<String>,
}

impl ResolutionContext {
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            current_host: Some(host.into()),
        }
    }
}

/// Resolve a description into candidate locators, most specific first.
///
/// Deterministic: the same description and context always produce the same
/// ordered list, and the list is never empty for a non-empty description.
pub fn resolve(description: &str, ctx: &ResolutionContext) -> Vec<String> {
    let lower = description.to_lowercase();
    let quoted = quoted_text(description);
    let mut out = Vec::new();

    if contains_any(
        &lower,
        &[
            "button", "link", "click", "submit", "go to", "next", "continue", "sign in", "log in",
            "login", "checkout", "add to cart", "cart", "buy",
        ],
    ) {
        button_link_candidates(&lower, quoted.as_deref(), ctx, &mut out);
    }

    if contains_any(
        &lower,
        &[
            "input", "field", "search", "type", "fill", "textbox", "text box", "email", "password",
            "username", "phone", "comment",
        ],
    ) {
        text_input_candidates(&lower, quoted.as_deref(), &mut out);
    }

    if contains_any(&lower, &["dropdown", "select", "sort by", "filter by", "combo"]) {
        dropdown_candidates(quoted.as_deref(), &mut out);
    }

    if contains_any(&lower, &["checkbox", "check box", "radio", "toggle"]) {
        checkbox_radio_candidates(&lower, quoted.as_deref(), &mut out);
    }

    extraction_candidates(&lower, &mut out);

    if contains_any(
        &lower,
        &["main content", "header", "footer", "navigation", "nav bar", "menu", "sidebar"],
    ) {
        container_candidates(&lower, &mut out);
    }

    // Universal fallback so the list is never empty: the quoted label if one
    // exists, otherwise the entire description, as visible text.
    let literal = quoted.as_deref().unwrap_or(description);
    out.push(xpath_exact_text(literal));
    out.push(xpath_ci_contains(literal));

    dedup_stable(out)
}

fn button_link_candidates(
    lower: &str,
    quoted: Option<&str>,
    ctx: &ResolutionContext,
    out: &mut Vec<String>,
) {
    if let Some(text) = quoted {
        out.push(format!("//button[normalize-space(.)={}]", xpath_str(text)));
        out.push(format!("//a[normalize-space(.)={}]", xpath_str(text)));
        out.push(format!(
            "//button[{}]",
            xpath_ci_contains_predicate(text)
        ));
        out.push(format!("//a[{}]", xpath_ci_contains_predicate(text)));
        out.push(format!("input[type='submit'][value*='{}']", css_attr(text)));
        out.push(format!("input[type='button'][value*='{}']", css_attr(text)));
        for attr in ["aria-label", "name", "id"] {
            out.push(format!("[{attr}*='{}']", css_attr(text)));
        }
    } else {
        // Home/logo links benefit from knowing the current host.
        if lower.contains("home") {
            out.push("a[href='/']".to_string());
            if let Some(host) = &ctx.current_host {
                out.push(format!("a[href*='{}']", css_attr(host)));
            }
        }
        out.push("button".to_string());
        out.push("a".to_string());
        out.push("input[type='submit']".to_string());
        out.push("input[type='button']".to_string());
        out.push("[role='button']".to_string());
        out.push("[role='link']".to_string());
    }
}

fn text_input_candidates(lower: &str, quoted: Option<&str>, out: &mut Vec<String>) {
    if let Some(text) = quoted {
        for tag in ["input", "textarea"] {
            for attr in ["placeholder", "aria-label", "name", "id"] {
                out.push(format!("{tag}[{attr}*='{}']", css_attr(text)));
            }
        }
        out.push(format!(
            "//label[{}]/following::input[1]",
            xpath_ci_contains_predicate(text)
        ));
    }

    // Field kind inferred from the wording, most specific input type first.
    for (keyword, input_type) in [
        ("email", "email"),
        ("password", "password"),
        ("search", "search"),
        ("phone", "tel"),
        ("username", "text"),
    ] {
        if lower.contains(keyword) {
            out.push(format!("input[type='{input_type}']"));
        }
    }
    if lower.contains("search") {
        out.push("[role='searchbox']".to_string());
    }
    if lower.contains("comment") || lower.contains("message") {
        out.push("textarea".to_string());
    }

    out.push("input[type='text']".to_string());
    out.push("textarea".to_string());
    out.push("[role='textbox']".to_string());
}

fn dropdown_candidates(quoted: Option<&str>, out: &mut Vec<String>) {
    if let Some(text) = quoted {
        // A select owning an option with that visible text, then selects
        // labelled with it.
        out.push(format!(
            "//select[option[normalize-space(.)={}]]",
            xpath_str(text)
        ));
        out.push(format!(
            "//select[option[{}]]",
            xpath_ci_contains_predicate(text)
        ));
        for attr in ["aria-label", "name", "id"] {
            out.push(format!("select[{attr}*='{}']", css_attr(text)));
        }
    }
    out.push("select".to_string());
    out.push("[role='combobox']".to_string());
    out.push("[role='listbox']".to_string());
}

fn checkbox_radio_candidates(lower: &str, quoted: Option<&str>, out: &mut Vec<String>) {
    let kinds: &[&str] = if lower.contains("radio") {
        &["radio"]
    } else if lower.contains("checkbox") || lower.contains("check box") {
        &["checkbox"]
    } else {
        &["checkbox", "radio"]
    };

    if let Some(text) = quoted {
        for kind in kinds {
            out.push(format!(
                "input[type='{kind}'][aria-label*='{}']",
                css_attr(text)
            ));
            out.push(format!(
                "//label[{}]//input[@type='{kind}']",
                xpath_ci_contains_predicate(text)
            ));
        }
    }
    for kind in kinds {
        out.push(format!("input[type='{kind}']"));
        out.push(format!("[role='{kind}']"));
    }
}

/// Content-extraction targets: common microdata and conventional class names
/// for the handful of things people routinely scrape.
fn extraction_candidates(lower: &str, out: &mut Vec<String>) {
    let plural_items = lower.contains("all")
        && contains_any(lower, &["products", "items", "results", "titles", "prices", "reviews"]);

    if plural_items {
        out.extend(
            [
                "[data-product-id]",
                ".product-card",
                ".search-result",
                "article[role='listitem']",
                "li[role='listitem']",
                ".product-title",
                ".price",
            ]
            .map(String::from),
        );
    }
    if lower.contains("title") && !plural_items {
        out.extend(
            ["h1[itemprop='name']", ".product-title", "h1", "h2"].map(String::from),
        );
    }
    if lower.contains("price") && !plural_items {
        out.extend(
            ["span[itemprop='price']", ".product-price", ".price"].map(String::from),
        );
    }
    if lower.contains("description") && lower.contains("product") {
        out.extend(["div[itemprop='description']", ".product-description"].map(String::from));
    }
    if lower.contains("image") {
        out.extend(["img[alt]", "picture img", "img"].map(String::from));
    }
    if lower.contains("review") && !plural_items {
        out.extend([".review-text", "[itemprop='review']"].map(String::from));
    }
    if lower.contains("heading") {
        out.extend(["h1", "h2", "h3"].map(String::from));
    }
}

fn container_candidates(lower: &str, out: &mut Vec<String>) {
    if lower.contains("main") {
        out.push("[role='main']".to_string());
        out.push("main".to_string());
    }
    if lower.contains("header") {
        out.push("header".to_string());
    }
    if lower.contains("footer") {
        out.push("footer".to_string());
    }
    if lower.contains("nav") || lower.contains("menu") {
        out.push("nav".to_string());
        out.push("[role='navigation']".to_string());
    }
    if lower.contains("sidebar") {
        out.push("aside".to_string());
    }
}

/// First single- or double-quoted span in the description, e.g. the label in
/// `the 'Sign In' button`.
fn quoted_text(description: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        let mut parts = description.splitn(3, quote);
        parts.next()?;
        if let (Some(inner), Some(_rest)) = (parts.next(), parts.next()) {
            let inner = inner.trim();
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
        }
    }
    None
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Escape a value for use inside a single-quoted CSS attribute selector.
fn css_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Quote a string as an XPath literal, falling back to `concat` when it
/// contains both quote kinds.
fn xpath_str(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value
            .split('\'')
            .map(|p| format!("'{p}'"))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Predicate matching elements whose text contains `value`, ignoring case.
fn xpath_ci_contains_predicate(value: &str) -> String {
    format!(
        "contains(translate(normalize-space(.), '{UPPER}', '{LOWER}'), {})",
        xpath_str(&value.to_lowercase())
    )
}

fn xpath_exact_text(value: &str) -> String {
    format!("//*[normalize-space(text())={}]", xpath_str(value))
}

fn xpath_ci_contains(value: &str) -> String {
    format!(
        "//*[text()][{}]",
        xpath_ci_contains_predicate(value)
    )
}

/// Stable dedup, first occurrence wins; order is the ranking.
fn dedup_stable(candidates: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
