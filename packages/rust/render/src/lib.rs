//! Static site renderer.
//!
//! Turns a normalized [`ContentModel`] and a [`Theme`] into the fixed file set
//! (`index.html`, `styles.css`, `script.js`). Rendering is a pure function: no
//! clock, no randomness, no I/O. The same input always produces byte-identical
//! output, which is what makes re-rendering after edits safe to repeat.

mod theme;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sitegen_shared::{
    AssetPurpose, Channel, NarrativeContent, Palette, Result, SiteGenError, Theme,
};

/// Markup entry point.
pub const INDEX_HTML: &str = "index.html";
/// Theme stylesheet.
pub const STYLES_CSS: &str = "styles.css";
/// Behavior script.
pub const SCRIPT_JS: &str = "script.js";

/// Every rendered site contains exactly these files, whatever the theme.
pub const FILE_SET: [&str; 3] = [INDEX_HTML, STYLES_CSS, SCRIPT_JS];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// An image the page should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub purpose: AssetPurpose,
    /// Address the browser loads the image from.
    pub src: String,
    pub alt: String,
}

/// Contact block shown in the footer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
}

/// Everything the renderer needs, already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentModel {
    pub business_name: String,
    pub narrative: NarrativeContent,
    pub palette: Palette,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    pub contact: ContactInfo,
}

impl ContentModel {
    /// Reject models that cannot produce a meaningful page.
    pub fn validate(&self) -> Result<()> {
        if self.business_name.trim().is_empty() {
            return Err(SiteGenError::Render("business name is empty".into()));
        }
        if self.narrative.headline.trim().is_empty() {
            return Err(SiteGenError::Render("narrative headline is empty".into()));
        }
        if self.narrative.about.trim().is_empty() {
            return Err(SiteGenError::Render("narrative about section is empty".into()));
        }
        self.palette
            .validate()
            .map_err(|e| SiteGenError::Render(e.to_string()))
    }

    fn media_for(&self, purpose: AssetPurpose) -> impl Iterator<Item = &MediaRef> {
        self.media.iter().filter(move |m| m.purpose == purpose)
    }
}

/// A rendered file set, keyed by filename.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedSite {
    files: BTreeMap<String, String>,
}

impl RenderedSite {
    /// Contents of one file.
    pub fn get(&self, filename: &str) -> Option<&str> {
        self.files.get(filename).map(String::as_str)
    }

    /// `(filename, contents)` pairs in filename order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Build a file set from arbitrary pairs (used by stores reading back).
    pub fn from_files(files: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer contract
// ---------------------------------------------------------------------------

/// Pure renderer contract. Implementations must be deterministic.
pub trait ArtifactRenderer: Send + Sync {
    /// Render the file set for `model` in `theme`.
    fn render(&self, model: &ContentModel, theme: Theme) -> Result<RenderedSite>;

    /// Human-readable renderer name for tracing.
    fn name(&self) -> &str;
}

/// The built-in HTML/CSS/JS renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRenderer;

impl ArtifactRenderer for StaticRenderer {
    fn render(&self, model: &ContentModel, theme: Theme) -> Result<RenderedSite> {
        render(model, theme)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Render `model` in `theme`.
#[instrument(skip(model), fields(business = %model.business_name))]
pub fn render(model: &ContentModel, theme: Theme) -> Result<RenderedSite> {
    model.validate()?;

    let mut files = BTreeMap::new();
    files.insert(INDEX_HTML.to_string(), render_markup(model, theme));
    files.insert(
        STYLES_CSS.to_string(),
        theme::stylesheet(theme, &model.palette),
    );
    files.insert(SCRIPT_JS.to_string(), BEHAVIOR_SCRIPT.to_string());

    debug!(%theme, files = files.len(), "site rendered");
    Ok(RenderedSite { files })
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

fn render_markup(model: &ContentModel, theme: Theme) -> String {
    let n = &model.narrative;
    let name = escape_html(&model.business_name);
    let mut html = String::with_capacity(4096);

    html.push_str("<!DOCTYPE html>\n");
    html.push_str("<html lang=\"en\">\n<head>\n");
    html.push_str("  <meta charset=\"utf-8\">\n");
    html.push_str("  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(html, "  <title>{name}</title>");
    let _ = writeln!(
        html,
        "  <meta name=\"description\" content=\"{}\">",
        escape_html(&n.tagline)
    );
    let _ = writeln!(
        html,
        "  <meta name=\"theme-color\" content=\"{}\">",
        model.palette.primary
    );
    let _ = writeln!(html, "  <link rel=\"stylesheet\" href=\"{STYLES_CSS}\">");
    html.push_str("</head>\n");
    let _ = writeln!(html, "<body class=\"theme-{}\">", theme.as_str());

    // Header
    html.push_str("  <header class=\"site-header\">\n");
    match model.media_for(AssetPurpose::Logo).next() {
        Some(logo) => {
            let _ = writeln!(
                html,
                "    <a class=\"brand\" href=\"#top\"><img src=\"{}\" alt=\"{}\"></a>",
                escape_html(&logo.src),
                escape_html(&logo.alt)
            );
        }
        None => {
            let _ = writeln!(html, "    <a class=\"brand\" href=\"#top\">{name}</a>");
        }
    }
    html.push_str("    <button class=\"nav-toggle\" aria-label=\"Menu\" aria-expanded=\"false\">&#9776;</button>\n");
    html.push_str("    <nav class=\"site-nav\">\n");
    html.push_str("      <a href=\"#about\">About</a>\n");
    for (i, section) in n.sections.iter().enumerate() {
        let _ = writeln!(
            html,
            "      <a href=\"#section-{}\">{}</a>",
            i + 1,
            escape_html(&section.title)
        );
    }
    html.push_str("      <a href=\"#contact\">Contact</a>\n");
    html.push_str("    </nav>\n  </header>\n");

    // Hero
    html.push_str("  <main id=\"top\">\n");
    html.push_str("    <section class=\"hero\">\n");
    if let Some(hero) = model.media_for(AssetPurpose::Hero).next() {
        let _ = writeln!(
            html,
            "      <img class=\"hero-image\" src=\"{}\" alt=\"{}\">",
            escape_html(&hero.src),
            escape_html(&hero.alt)
        );
    }
    let _ = writeln!(html, "      <h1>{}</h1>", escape_html(&n.headline));
    let _ = writeln!(html, "      <p class=\"tagline\">{}</p>", escape_html(&n.tagline));
    let _ = writeln!(
        html,
        "      <a class=\"cta\" href=\"#contact\">{}</a>",
        escape_html(&n.call_to_action)
    );
    html.push_str("    </section>\n");

    // About
    html.push_str("    <section id=\"about\" class=\"about\">\n");
    html.push_str("      <h2>About</h2>\n");
    push_paragraphs(&mut html, &n.about, "      ");
    html.push_str("    </section>\n");

    // Narrative sections
    for (i, section) in n.sections.iter().enumerate() {
        let _ = writeln!(
            html,
            "    <section id=\"section-{}\" class=\"content\">",
            i + 1
        );
        let _ = writeln!(html, "      <h2>{}</h2>", escape_html(&section.title));
        push_paragraphs(&mut html, &section.body, "      ");
        html.push_str("    </section>\n");
    }

    // Gallery
    let gallery: Vec<&MediaRef> = model.media_for(AssetPurpose::Gallery).collect();
    if !gallery.is_empty() {
        html.push_str("    <section id=\"gallery\" class=\"gallery\">\n");
        html.push_str("      <h2>Gallery</h2>\n      <div class=\"gallery-grid\">\n");
        for item in gallery {
            let _ = writeln!(
                html,
                "        <img src=\"{}\" alt=\"{}\" loading=\"lazy\">",
                escape_html(&item.src),
                escape_html(&item.alt)
            );
        }
        html.push_str("      </div>\n    </section>\n");
    }
    html.push_str("  </main>\n");

    // Contact footer
    let c = &model.contact;
    html.push_str("  <footer id=\"contact\" class=\"site-footer\">\n");
    html.push_str("    <h2>Contact</h2>\n    <ul class=\"contact-list\">\n");
    let email = escape_html(&c.email);
    let _ = writeln!(
        html,
        "      <li><a href=\"mailto:{email}\">{email}</a></li>"
    );
    if let Some(phone) = &c.phone {
        let phone = escape_html(phone);
        let _ = writeln!(html, "      <li><a href=\"tel:{phone}\">{phone}</a></li>");
    }
    if let Some(address) = &c.address {
        let _ = writeln!(html, "      <li>{}</li>", escape_html(address));
    }
    for channel in &c.channels {
        let _ = writeln!(
            html,
            "      <li><a href=\"{}\" rel=\"noopener\">{}</a></li>",
            escape_html(&channel.url),
            escape_html(&channel.label)
        );
    }
    html.push_str("    </ul>\n");
    let _ = writeln!(
        html,
        "    <p class=\"copyright\">&copy; <span data-year></span> {name}</p>"
    );
    html.push_str("  </footer>\n");
    let _ = writeln!(html, "  <script src=\"{SCRIPT_JS}\" defer></script>");
    html.push_str("</body>\n</html>\n");

    html
}

/// Emit one `<p>` per blank-line-separated paragraph.
fn push_paragraphs(html: &mut String, text: &str, indent: &str) {
    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let _ = writeln!(html, "{indent}<p>{}</p>", escape_html(para));
    }
}

/// Escape text for HTML element content and double-quoted attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

const BEHAVIOR_SCRIPT: &str = r#"(function () {
  "use strict";

  var toggle = document.querySelector(".nav-toggle");
  var nav = document.querySelector(".site-nav");
  if (toggle && nav) {
    toggle.addEventListener("click", function () {
      var open = nav.classList.toggle("open");
      toggle.setAttribute("aria-expanded", open ? "true" : "false");
    });
    nav.addEventListener("click", function (event) {
      if (event.target.tagName === "A") {
        nav.classList.remove("open");
        toggle.setAttribute("aria-expanded", "false");
      }
    });
  }

  document.querySelectorAll("[data-year]").forEach(function (el) {
    el.textContent = String(new Date().getFullYear());
  });

  document.querySelectorAll(".gallery-grid img").forEach(function (img) {
    img.addEventListener("click", function () {
      var overlay = document.createElement("div");
      overlay.className = "lightbox";
      var full = document.createElement("img");
      full.src = img.src;
      full.alt = img.alt;
      overlay.appendChild(full);
      overlay.addEventListener("click", function () {
        overlay.remove();
      });
      document.body.appendChild(overlay);
    });
  });
})();
"#;
