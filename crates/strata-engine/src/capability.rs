//! Adapter capabilities
//!
//! Every capability below is part of the adapter contract. An adapter reports
//! the ones it implements once, when the engine is built; calls into a missing
//! capability are refused from then on.

use std::fmt;

/// One operation of the adapter contract
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Add,
    Remove,
    SetVisibility,
    SetOpacity,
    SetEvents,
    SetZIndex,
    SetLayerConfig,
    SetParams,
    SetDecodeParams,
    LayerByProvider,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::Add,
        Capability::Remove,
        Capability::SetVisibility,
        Capability::SetOpacity,
        Capability::SetEvents,
        Capability::SetZIndex,
        Capability::SetLayerConfig,
        Capability::SetParams,
        Capability::SetDecodeParams,
        Capability::LayerByProvider,
    ];

    #[inline]
    const fn bit(self) -> u16 {
        1 << self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::Add => "add",
            Capability::Remove => "remove",
            Capability::SetVisibility => "setVisibility",
            Capability::SetOpacity => "setOpacity",
            Capability::SetEvents => "setEvents",
            Capability::SetZIndex => "setZIndex",
            Capability::SetLayerConfig => "setLayerConfig",
            Capability::SetParams => "setParams",
            Capability::SetDecodeParams => "setDecodeParams",
            Capability::LayerByProvider => "getLayerByProvider",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of capabilities an adapter implements
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const NONE: CapabilitySet = CapabilitySet(0);

    /// The full adapter contract
    pub const REQUIRED: CapabilitySet = CapabilitySet((1 << Capability::ALL.len()) - 1);

    #[inline]
    pub const fn with(self, capability: Capability) -> Self {
        CapabilitySet(self.0 | capability.bit())
    }

    #[inline]
    pub const fn without(self, capability: Capability) -> Self {
        CapabilitySet(self.0 & !capability.bit())
    }

    #[inline]
    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    #[inline]
    pub fn is_complete(self) -> bool {
        self.0 & Self::REQUIRED.0 == Self::REQUIRED.0
    }

    /// Required capabilities absent from this set
    pub fn missing(self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| !self.contains(*c))
            .collect()
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CapabilitySet::NONE, |set, capability| set.with(capability))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Capability::name)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_is_complete() {
        assert!(CapabilitySet::REQUIRED.is_complete());
        assert!(CapabilitySet::REQUIRED.missing().is_empty());
        assert_eq!(CapabilitySet::NONE.missing().len(), Capability::ALL.len());
    }

    #[test]
    fn test_missing_capabilities() {
        let set = CapabilitySet::REQUIRED
            .without(Capability::SetEvents)
            .without(Capability::SetDecodeParams);
        assert!(!set.is_complete());
        assert_eq!(
            set.missing(),
            vec![Capability::SetEvents, Capability::SetDecodeParams]
        );
        assert!(set.contains(Capability::Add));
    }

    #[test]
    fn test_from_iter() {
        let set: CapabilitySet = [Capability::Add, Capability::Remove].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Capability::Add, Capability::Remove]);
        assert_eq!(format!("{:?}", set), r#"{"add", "remove"}"#);
    }
}
