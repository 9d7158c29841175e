//! Compiled template cache.
//!
//! Templates are HTML files named `{alias}.html` under the configured
//! directory. Placeholders are `{{ @name }}`, `{{ @id }}`, `{{ @key }}`,
//! `{{ @level }}` and `{{ property }}`; every substitution is HTML-escaped.
//! Template files live on each node's disk, so the owning channel never
//! broadcasts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use lru::LruCache;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::config::CacheConfig;
use super::projection::ProjectedContent;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::templates";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template alias `{0}` may only contain letters, digits, `-` and `_`")]
    InvalidAlias(String),
    #[error("template `{0}` does not exist")]
    NotFound(String),
    #[error("template `{alias}` has an unterminated placeholder at byte {position}")]
    Unterminated { alias: String, position: usize },
    #[error("template `{alias}` has an empty placeholder at byte {position}")]
    EmptyPlaceholder { alias: String, position: usize },
    #[error("failed to read template `{alias}`")]
    Io {
        alias: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Name,
    Id,
    Key,
    Level,
    Property(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    alias: String,
    segments: Vec<Segment>,
}

impl CompiledTemplate {
    pub fn compile(alias: &str, source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                return Err(TemplateError::Unterminated {
                    alias: alias.to_string(),
                    position: offset + start,
                });
            };
            let expr = after_open[..end].trim();
            let segment = match expr {
                "" => {
                    return Err(TemplateError::EmptyPlaceholder {
                        alias: alias.to_string(),
                        position: offset + start,
                    });
                }
                "@name" => Segment::Name,
                "@id" => Segment::Id,
                "@key" => Segment::Key,
                "@level" => Segment::Level,
                property => Segment::Property(property.to_string()),
            };
            segments.push(segment);

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            alias: alias.to_string(),
            segments,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn render(&self, content: &ProjectedContent) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Name => push_escaped(&mut out, &content.name),
                Segment::Id => out.push_str(&content.id.to_string()),
                Segment::Key => out.push_str(&content.key.to_string()),
                Segment::Level => out.push_str(&content.level.to_string()),
                Segment::Property(alias) => match content.values.get(alias) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(text)) => push_escaped(&mut out, text),
                    Some(other) => push_escaped(&mut out, &other.to_string()),
                },
            }
        }
        out
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
}

pub fn validate_alias(alias: &str) -> Result<(), TemplateError> {
    let valid = !alias.is_empty()
        && alias
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(TemplateError::InvalidAlias(alias.to_string()))
    }
}

pub struct TemplateCache {
    directory: PathBuf,
    compiled: RwLock<LruCache<String, Arc<CompiledTemplate>>>,
    generation: AtomicU64,
}

impl TemplateCache {
    pub fn new(directory: impl Into<PathBuf>, config: &CacheConfig) -> Self {
        Self {
            directory: directory.into(),
            compiled: RwLock::new(LruCache::new(config.template_limit_non_zero())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Compiled template for `alias`, loading it from disk on a miss.
    pub async fn get(&self, alias: &str) -> Result<Arc<CompiledTemplate>, TemplateError> {
        validate_alias(alias)?;
        let cached = rw_write(&self.compiled, SOURCE, "get").get(alias).cloned();
        if let Some(template) = cached {
            return Ok(template);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let path = self.directory.join(format!("{alias}.html"));
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(alias.to_string()));
            }
            Err(source) => {
                return Err(TemplateError::Io {
                    alias: alias.to_string(),
                    source,
                });
            }
        };
        let template = Arc::new(CompiledTemplate::compile(alias, &source)?);

        let mut compiled = rw_write(&self.compiled, SOURCE, "get.store");
        if self.generation.load(Ordering::SeqCst) == generation {
            compiled.put(alias.to_string(), Arc::clone(&template));
        } else {
            debug!(alias, "Template changed while compiling; not cached");
        }
        Ok(template)
    }

    pub fn invalidate(&self, alias: &str) -> bool {
        let mut compiled = rw_write(&self.compiled, SOURCE, "invalidate");
        self.generation.fetch_add(1, Ordering::SeqCst);
        compiled.pop(alias).is_some()
    }

    pub fn clear(&self) -> usize {
        let mut compiled = rw_write(&self.compiled, SOURCE, "clear");
        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = compiled.len();
        compiled.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        rw_read(&self.compiled, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
