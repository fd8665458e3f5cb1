use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidItemId;

const MAX_ITEM_ID_LEN: usize = 2048;

/// Identity of a single article for ad-hoc summaries: a story id or its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, InvalidItemId> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(InvalidItemId::Empty);
        }
        if trimmed.chars().count() > MAX_ITEM_ID_LEN {
            return Err(InvalidItemId::TooLong {
                max: MAX_ITEM_ID_LEN,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ItemId {
    type Error = InvalidItemId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ItemId> for String {
    fn from(value: ItemId) -> Self {
        value.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a refresh covers: the daily digest or one article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "item_id", rename_all = "snake_case")]
pub enum RefreshScope {
    Daily,
    Item(ItemId),
}

impl RefreshScope {
    pub fn family(&self) -> ScopeFamily {
        match self {
            RefreshScope::Daily => ScopeFamily::Daily,
            RefreshScope::Item(_) => ScopeFamily::Item,
        }
    }

    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            RefreshScope::Daily => None,
            RefreshScope::Item(id) => Some(id),
        }
    }
}

impl fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshScope::Daily => f.write_str("daily"),
            RefreshScope::Item(id) => write!(f, "item:{id}"),
        }
    }
}

/// Groups scopes that share a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeFamily {
    Daily,
    Item,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ids_are_trimmed_and_validated() {
        assert_eq!(ItemId::parse("  42117 ").unwrap().as_str(), "42117");
        assert_eq!(ItemId::parse("   "), Err(InvalidItemId::Empty));
        let long = "x".repeat(MAX_ITEM_ID_LEN + 1);
        assert!(matches!(
            ItemId::parse(long),
            Err(InvalidItemId::TooLong { .. })
        ));
    }
}
