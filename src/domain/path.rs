//! Materialized tree paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::types::ContentId;

/// Ids from the tree root down to and including the entity itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentPath(Vec<ContentId>);

impl ContentPath {
    pub fn root(id: ContentId) -> Self {
        Self(vec![id])
    }

    pub fn from_ids(ids: Vec<ContentId>) -> Self {
        Self(ids)
    }

    pub fn from_raw(ids: &[i32]) -> Self {
        Self(ids.iter().copied().map(ContentId).collect())
    }

    pub fn to_raw(&self) -> Vec<i32> {
        self.0.iter().map(|id| id.0).collect()
    }

    pub fn child(&self, id: ContentId) -> Self {
        let mut ids = self.0.clone();
        ids.push(id);
        Self(ids)
    }

    pub fn ids(&self) -> &[ContentId] {
        &self.0
    }

    pub fn id(&self) -> Option<ContentId> {
        self.0.last().copied()
    }

    /// Ancestors, nearest to the root first, excluding the entity itself.
    pub fn ancestors(&self) -> &[ContentId] {
        match self.0.split_last() {
            Some((_, ancestors)) => ancestors,
            None => &[],
        }
    }

    pub fn level(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, id: ContentId) -> bool {
        self.0.contains(&id)
    }

    pub fn is_descendant_of(&self, id: ContentId) -> bool {
        self.ancestors().contains(&id)
    }

    /// Replace `old_prefix` with `new_prefix`, used when a subtree moves.
    pub fn rebase(&self, old_prefix: &ContentPath, new_prefix: &ContentPath) -> Option<Self> {
        let rest = self.0.strip_prefix(old_prefix.0.as_slice())?;
        let mut ids = new_prefix.0.clone();
        ids.extend_from_slice(rest);
        Some(Self(ids))
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, id) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl FromStr for ContentPath {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        value
            .split(',')
            .map(|segment| {
                segment
                    .trim()
                    .parse::<i32>()
                    .map(ContentId)
                    .map_err(|_| DomainError::validation(format!("invalid path segment `{segment}`")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(ids: &[i32]) -> ContentPath {
        ContentPath::from_raw(ids)
    }

    #[test]
    fn ancestors_exclude_self() {
        let p = path(&[1, 4, 9]);
        assert_eq!(p.ancestors(), &[ContentId(1), ContentId(4)]);
        assert_eq!(p.id(), Some(ContentId(9)));
        assert!(p.is_descendant_of(ContentId(4)));
        assert!(!p.is_descendant_of(ContentId(9)));
        assert!(p.contains(ContentId(9)));
    }

    #[test]
    fn rebase_moves_the_suffix() {
        let p = path(&[1, 4, 9, 12]);
        let moved = p.rebase(&path(&[1, 4]), &path(&[2])).expect("prefix matches");
        assert_eq!(moved, path(&[2, 9, 12]));
        assert!(p.rebase(&path(&[3]), &path(&[2])).is_none());
    }

    #[test]
    fn parses_and_formats_comma_lists() {
        let p: ContentPath = "1, 4,9".parse().expect("valid path");
        assert_eq!(p.to_string(), "1,4,9");
        assert!("1,x".parse::<ContentPath>().is_err());
        assert_eq!("".parse::<ContentPath>().expect("empty"), ContentPath::default());
    }
}
