//! Identity types for layers
//!
//! Layer ids are caller supplied strings. They are compared by value and are
//! unique within one engine's collection.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{LayerError, LayerResult};

/// Layer identity - stable across redeclarations
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        LayerId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Layer({})", self.0)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for LayerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LayerId {
    fn from(id: &str) -> Self {
        LayerId::new(id)
    }
}

impl From<String> for LayerId {
    fn from(id: String) -> Self {
        LayerId(id)
    }
}

impl PartialEq<str> for LayerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for LayerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Selects the layers an id-based operation applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerSelector {
    /// Every layer in the collection
    All,
    /// Layers whose id is listed
    Ids(Vec<LayerId>),
}

impl LayerSelector {
    /// Build a selector from any list of ids
    pub fn ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<LayerId>,
    {
        LayerSelector::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Check whether the selector matches a layer id
    pub fn matches(&self, id: &LayerId) -> bool {
        match self {
            LayerSelector::All => true,
            LayerSelector::Ids(ids) => ids.contains(id),
        }
    }

    /// True for `All` and for an empty id list
    pub fn is_everything(&self) -> bool {
        match self {
            LayerSelector::All => true,
            LayerSelector::Ids(ids) => ids.is_empty(),
        }
    }

    /// Listed ids, empty for `All`
    pub fn listed(&self) -> &[LayerId] {
        match self {
            LayerSelector::All => &[],
            LayerSelector::Ids(ids) => ids,
        }
    }

    /// Reject selectors naming an empty id
    pub fn validate(&self) -> LayerResult<()> {
        if self.listed().iter().any(LayerId::is_empty) {
            return Err(LayerError::InvalidDeclaration(
                "layer ids must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl From<LayerId> for LayerSelector {
    fn from(id: LayerId) -> Self {
        LayerSelector::Ids(vec![id])
    }
}

impl From<&LayerId> for LayerSelector {
    fn from(id: &LayerId) -> Self {
        LayerSelector::Ids(vec![id.clone()])
    }
}

impl From<&str> for LayerSelector {
    fn from(id: &str) -> Self {
        LayerSelector::Ids(vec![LayerId::from(id)])
    }
}

impl From<String> for LayerSelector {
    fn from(id: String) -> Self {
        LayerSelector::Ids(vec![LayerId::from(id)])
    }
}

impl From<Vec<LayerId>> for LayerSelector {
    fn from(ids: Vec<LayerId>) -> Self {
        LayerSelector::Ids(ids)
    }
}

impl From<Vec<&str>> for LayerSelector {
    fn from(ids: Vec<&str>) -> Self {
        LayerSelector::ids(ids)
    }
}

impl From<&[&str]> for LayerSelector {
    fn from(ids: &[&str]) -> Self {
        LayerSelector::ids(ids.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for LayerSelector {
    fn from(ids: [&str; N]) -> Self {
        LayerSelector::ids(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_id_display_and_debug() {
        let id = LayerId::new("roads");
        assert_eq!(id.to_string(), "roads");
        assert_eq!(format!("{:?}", id), "Layer(roads)");
        assert_eq!(id, "roads");
    }

    #[test]
    fn test_selector_matching() {
        let selector = LayerSelector::from(["a", "c"]);
        assert!(selector.matches(&LayerId::new("a")));
        assert!(!selector.matches(&LayerId::new("b")));
        assert!(LayerSelector::All.matches(&LayerId::new("b")));
    }

    #[test]
    fn test_empty_selector_means_everything() {
        let selector = LayerSelector::from(Vec::<LayerId>::new());
        assert!(selector.is_everything());
        assert!(!selector.matches(&LayerId::new("a")));
        assert!(!LayerSelector::from("a").is_everything());
    }

    #[test]
    fn test_selector_rejects_empty_ids() {
        assert!(LayerSelector::from(["a", ""]).validate().is_err());
        assert!(LayerSelector::All.validate().is_ok());
    }
}
