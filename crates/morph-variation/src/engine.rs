use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::catalog::ThemeCatalog;

const OUTFIT_KEYWORDS: &[&str] = &["avatar", "outfit"];
const PERIOD_KEYWORDS: &[&str] = &["historical", "historic", "history"];
const MAX_SLUG_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Outfit,
    Period,
    Style,
}

impl Theme {
    /// Pick the theme by keyword match on the base prompt; style modifiers otherwise.
    pub fn for_prompt(base_prompt: &str) -> Self {
        let lowered = base_prompt.to_lowercase();
        if OUTFIT_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            Self::Outfit
        } else if PERIOD_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            Self::Period
        } else {
            Self::Style
        }
    }
}

/// The list entry selected for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variant<'a> {
    pub theme: Theme,
    pub index: usize,
    pub modifier: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct VariationEngine {
    catalog: Arc<ThemeCatalog>,
}

impl VariationEngine {
    pub fn new(catalog: ThemeCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &ThemeCatalog {
        &self.catalog
    }

    fn list(&self, theme: Theme) -> &[String] {
        match theme {
            Theme::Outfit => &self.catalog.outfits,
            Theme::Period => &self.catalog.periods,
            Theme::Style => &self.catalog.styles,
        }
    }

    /// Number of distinct variants before `vary_prompt` cycles for this prompt.
    pub fn cycle_len(&self, base_prompt: &str) -> usize {
        self.list(Theme::for_prompt(base_prompt)).len()
    }

    /// Iterations are 1-based; iteration 0 is treated as 1.
    pub fn select(&self, base_prompt: &str, iteration: u32) -> Option<Variant<'_>> {
        let theme = Theme::for_prompt(base_prompt);
        let list = self.list(theme);
        if list.is_empty() {
            return None;
        }
        let index = (iteration.saturating_sub(1) as usize) % list.len();
        Some(Variant {
            theme,
            index,
            modifier: &list[index],
        })
    }

    pub fn vary_prompt(&self, base_prompt: &str, iteration: u32) -> String {
        let base = base_prompt.trim();
        match self.select(base, iteration) {
            Some(Variant {
                theme: Theme::Outfit,
                modifier,
                ..
            }) => format!("{base}, wearing {modifier}"),
            Some(Variant {
                theme: Theme::Period,
                modifier,
                ..
            }) => format!("{base}, set in {modifier}"),
            Some(Variant {
                theme: Theme::Style,
                modifier,
                ..
            }) => format!("{base}, {modifier}"),
            None => base.to_owned(),
        }
    }

    /// Deterministic part of a batch asset label: variant slug, iteration and provider.
    pub fn asset_stem(&self, base_prompt: &str, iteration: u32, provider: &str) -> String {
        let slug = self
            .select(base_prompt, iteration)
            .map(|variant| slugify(variant.modifier))
            .unwrap_or_else(|| slugify(base_prompt));
        format!("{slug}_iter{iteration:03}_{}", slugify(provider))
    }

    /// Collision-free label for an asset produced by `provider` for `iteration`.
    pub fn descriptive_label(&self, base_prompt: &str, iteration: u32, provider: &str) -> String {
        format!(
            "{}_{}",
            self.asset_stem(base_prompt, iteration, provider),
            unique_suffix()
        )
    }
}

/// Label for a single-shot generation asset: `{provider}-{millis}-{random}`.
pub fn generation_label(provider: &str) -> String {
    format!("{}-{}", slugify(provider), unique_suffix())
}

fn unique_suffix() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &random[..8])
}

/// Lowercase ASCII slug with single hyphens; never empty.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len().min(MAX_SLUG_LEN));
    let mut pending_hyphen = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
            if slug.len() >= MAX_SLUG_LEN {
                break;
            }
        } else {
            pending_hyphen = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("variant");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> VariationEngine {
        VariationEngine::new(ThemeCatalog::builtin())
    }

    #[test]
    fn theme_follows_prompt_keywords() {
        assert_eq!(Theme::for_prompt("My AVATAR as a hero"), Theme::Outfit);
        assert_eq!(Theme::for_prompt("a historical portrait"), Theme::Period);
        assert_eq!(Theme::for_prompt("a cat on a sofa"), Theme::Style);
    }

    #[test]
    fn vary_prompt_is_deterministic() {
        let engine = engine();
        for iteration in 1..=20 {
            assert_eq!(
                engine.vary_prompt("avatar of me", iteration),
                engine.vary_prompt("avatar of me", iteration)
            );
        }
    }

    #[test]
    fn vary_prompt_cycles_with_list_length() {
        let engine = engine();
        for prompt in ["avatar of me", "historical me", "plain me"] {
            let len = engine.cycle_len(prompt) as u32;
            assert!(len > 0);
            for iteration in 1..=15 {
                assert_eq!(
                    engine.vary_prompt(prompt, iteration),
                    engine.vary_prompt(prompt, iteration + len)
                );
            }
        }
    }

    #[test]
    fn consecutive_iterations_within_cycle_are_distinct() {
        let engine = engine();
        let len = engine.cycle_len("avatar of me") as u32;
        let variants: std::collections::HashSet<String> = (1..=len)
            .map(|iteration| engine.vary_prompt("avatar of me", iteration))
            .collect();
        assert_eq!(variants.len(), len as usize);
    }

    #[test]
    fn first_iteration_uses_first_entry() {
        let engine = engine();
        let first = &engine.catalog().outfits[0];
        assert_eq!(
            engine.vary_prompt("avatar of me", 1),
            format!("avatar of me, wearing {first}")
        );
        let period = &engine.catalog().periods[0];
        assert_eq!(
            engine.vary_prompt("historical me", 1),
            format!("historical me, set in {period}")
        );
    }

    #[test]
    fn custom_catalog_drives_variants() {
        let engine = VariationEngine::new(ThemeCatalog {
            outfits: vec!["a pirate coat".into(), "a lab coat".into()],
            periods: vec![],
            styles: vec![],
        });
        assert_eq!(engine.vary_prompt("avatar", 2), "avatar, wearing a lab coat");
        assert_eq!(engine.vary_prompt("avatar", 3), "avatar, wearing a pirate coat");
        assert_eq!(engine.vary_prompt("plain", 1), "plain");
    }

    #[test]
    fn slugify_normalizes_text() {
        assert_eq!(slugify("A Medieval Knight's Armour!"), "a-medieval-knight-s-armour");
        assert_eq!(slugify("  --  "), "variant");
        assert!(slugify(&"x".repeat(200)).len() <= MAX_SLUG_LEN);
    }

    #[test]
    fn descriptive_labels_share_stem_but_never_collide() {
        let engine = engine();
        let stem = engine.asset_stem("avatar of me", 2, "gemini");
        assert_eq!(stem, "a-medieval-knight-s-armour_iter002_gemini");

        let a = engine.descriptive_label("avatar of me", 2, "gemini");
        let b = engine.descriptive_label("avatar of me", 2, "gemini");
        assert!(a.starts_with(&stem));
        assert_ne!(a, b);
    }

    #[test]
    fn generation_label_is_prefixed_by_provider() {
        let label = generation_label("OpenAI");
        assert!(label.starts_with("openai-"));
        assert_ne!(label, generation_label("OpenAI"));
    }
}
