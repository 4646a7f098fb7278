//! Per-theme stylesheet generation.
//!
//! Each theme is a small set of design tokens; the stylesheet body is shared
//! and only the `:root` variables change.

use std::fmt::Write as _;

use sitegen_shared::{Palette, Theme};

/// Design tokens for one theme variant.
struct Tokens {
    font_body: &'static str,
    font_heading: &'static str,
    radius: &'static str,
    background: &'static str,
    surface: &'static str,
    text: &'static str,
    heading_weight: u16,
    hero_padding: &'static str,
}

fn tokens(theme: Theme) -> Tokens {
    match theme {
        Theme::Modern => Tokens {
            font_body: "\"Inter\", system-ui, -apple-system, sans-serif",
            font_heading: "\"Inter\", system-ui, -apple-system, sans-serif",
            radius: "14px",
            background: "#ffffff",
            surface: "#f8fafc",
            text: "#0f172a",
            heading_weight: 700,
            hero_padding: "6rem 1.5rem",
        },
        Theme::Classic => Tokens {
            font_body: "Georgia, \"Times New Roman\", serif",
            font_heading: "\"Playfair Display\", Georgia, serif",
            radius: "4px",
            background: "#fffdf8",
            surface: "#f5f0e6",
            text: "#2b2118",
            heading_weight: 600,
            hero_padding: "5rem 1.5rem",
        },
        Theme::Bold => Tokens {
            font_body: "\"Helvetica Neue\", Arial, sans-serif",
            font_heading: "\"Archivo Black\", \"Helvetica Neue\", Arial, sans-serif",
            radius: "0",
            background: "#0b0b0f",
            surface: "#17171f",
            text: "#f4f4f5",
            heading_weight: 900,
            hero_padding: "8rem 1.5rem",
        },
        Theme::Minimal => Tokens {
            font_body: "system-ui, sans-serif",
            font_heading: "system-ui, sans-serif",
            radius: "2px",
            background: "#ffffff",
            surface: "#ffffff",
            text: "#111111",
            heading_weight: 500,
            hero_padding: "4rem 1.5rem",
        },
    }
}

/// Full stylesheet for `theme` colored with `palette`.
pub(crate) fn stylesheet(theme: Theme, palette: &Palette) -> String {
    let t = tokens(theme);
    let mut css = String::with_capacity(BASE_RULES.len() + 512);

    let _ = writeln!(css, "/* theme: {} */", theme.as_str());
    css.push_str(":root {\n");
    let _ = writeln!(css, "  --color-primary: {};", palette.primary);
    let _ = writeln!(css, "  --color-secondary: {};", palette.secondary);
    let _ = writeln!(css, "  --color-accent: {};", palette.accent);
    let _ = writeln!(css, "  --color-background: {};", t.background);
    let _ = writeln!(css, "  --color-surface: {};", t.surface);
    let _ = writeln!(css, "  --color-text: {};", t.text);
    let _ = writeln!(css, "  --font-body: {};", t.font_body);
    let _ = writeln!(css, "  --font-heading: {};", t.font_heading);
    let _ = writeln!(css, "  --radius: {};", t.radius);
    let _ = writeln!(css, "  --heading-weight: {};", t.heading_weight);
    let _ = writeln!(css, "  --hero-padding: {};", t.hero_padding);
    css.push_str("}\n\n");
    css.push_str(BASE_RULES);
    css
}

const BASE_RULES: &str = r#"*, *::before, *::after { box-sizing: border-box; }

body {
  margin: 0;
  font-family: var(--font-body);
  color: var(--color-text);
  background: var(--color-background);
  line-height: 1.6;
}

h1, h2 {
  font-family: var(--font-heading);
  font-weight: var(--heading-weight);
  line-height: 1.2;
}

a { color: var(--color-primary); }

.site-header {
  display: flex;
  align-items: center;
  justify-content: space-between;
  padding: 1rem 1.5rem;
  border-bottom: 3px solid var(--color-primary);
}

.brand { font-weight: var(--heading-weight); text-decoration: none; font-size: 1.25rem; }
.brand img { max-height: 48px; display: block; }

.site-nav { display: flex; gap: 1.25rem; }
.site-nav a { text-decoration: none; color: var(--color-text); }
.site-nav a:hover { color: var(--color-secondary); }

.nav-toggle {
  display: none;
  background: none;
  border: 0;
  font-size: 1.5rem;
  color: var(--color-text);
  cursor: pointer;
}

.hero {
  position: relative;
  padding: var(--hero-padding);
  text-align: center;
  background: linear-gradient(135deg, var(--color-primary), var(--color-secondary));
  color: #ffffff;
  overflow: hidden;
}

.hero-image {
  position: absolute;
  inset: 0;
  width: 100%;
  height: 100%;
  object-fit: cover;
  opacity: 0.25;
}

.hero h1, .hero .tagline, .hero .cta { position: relative; }
.hero h1 { font-size: clamp(2rem, 5vw, 3.5rem); margin: 0 0 1rem; }
.tagline { font-size: 1.2rem; margin: 0 0 2rem; }

.cta {
  display: inline-block;
  padding: 0.85rem 1.75rem;
  border-radius: var(--radius);
  background: var(--color-accent);
  color: #ffffff;
  text-decoration: none;
  font-weight: 600;
}

main > section:not(.hero) {
  max-width: 960px;
  margin: 0 auto;
  padding: 3rem 1.5rem;
}

.content:nth-of-type(even) { background: var(--color-surface); border-radius: var(--radius); }

.gallery-grid {
  display: grid;
  grid-template-columns: repeat(auto-fill, minmax(220px, 1fr));
  gap: 1rem;
}

.gallery-grid img {
  width: 100%;
  aspect-ratio: 4 / 3;
  object-fit: cover;
  border-radius: var(--radius);
  cursor: zoom-in;
}

.lightbox {
  position: fixed;
  inset: 0;
  display: flex;
  align-items: center;
  justify-content: center;
  background: rgba(0, 0, 0, 0.85);
  cursor: zoom-out;
}

.lightbox img { max-width: 92vw; max-height: 92vh; }

.site-footer {
  padding: 3rem 1.5rem;
  background: var(--color-surface);
  border-top: 3px solid var(--color-accent);
  text-align: center;
}

.contact-list { list-style: none; padding: 0; margin: 0 0 1.5rem; }
.contact-list li { margin: 0.35rem 0; }
.copyright { font-size: 0.875rem; opacity: 0.7; }

@media (max-width: 720px) {
  .nav-toggle { display: block; }
  .site-nav {
    display: none;
    position: absolute;
    top: 4.5rem;
    right: 1rem;
    flex-direction: column;
    padding: 1rem;
    background: var(--color-background);
    border-radius: var(--radius);
    box-shadow: 0 8px 24px rgba(0, 0, 0, 0.15);
  }
  .site-nav.open { display: flex; }
}
"#;
