//! URL segments and sibling-unique names.
//!
//! Segments are derived from node names with the `slug` crate; CJK names are
//! transliterated through `pinyin` first so “关于我们” routes as
//! `guan-yu-wo-men`.

use pinyin::ToPinyin;
use slug::slugify;
use thiserror::Error;

const MAX_SUFFIX_ATTEMPTS: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("segment source text is empty")]
    EmptyInput,
    #[error("failed to derive a url segment from `{input}`")]
    Unrepresentable { input: String },
    #[error("exhausted attempts to find a unique name for `{base}`")]
    Exhausted { base: String },
}

/// Derive the URL segment used to route to a node.
pub fn url_segment(name: &str) -> Result<String, SlugError> {
    if name.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let candidate = slugify(transliterate(name));
    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: name.to_string(),
        });
    }
    Ok(candidate)
}

/// Pick a name not yet used by a sibling: `About`, `About (2)`, `About (3)`, …
pub fn unique_sibling_name<F>(base: &str, mut is_taken: F) -> Result<String, SlugError>
where
    F: FnMut(&str) -> bool,
{
    let base = base.trim();
    if base.is_empty() {
        return Err(SlugError::EmptyInput);
    }
    if !is_taken(base) {
        return Ok(base.to_string());
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{base} ({attempt})");
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
    }

    Err(SlugError::Exhausted {
        base: base.to_string(),
    })
}

fn transliterate(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut previous_was_pinyin = false;

    for ch in input.chars() {
        match ch.to_pinyin() {
            Some(pinyin) => {
                if !output.is_empty() && !output.ends_with(' ') {
                    output.push(' ');
                }
                output.push_str(pinyin.plain());
                previous_was_pinyin = true;
            }
            None => {
                if previous_was_pinyin && ch.is_alphanumeric() {
                    output.push(' ');
                }
                output.push(ch);
                previous_was_pinyin = false;
            }
        }
    }

    output
}
