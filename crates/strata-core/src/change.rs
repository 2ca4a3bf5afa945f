//! Change sets - which attributes differ between declared and applied state

use std::fmt;

use crate::LayerAttributes;

/// A tracked layer attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Provider,
    Opacity,
    Visibility,
    ZIndex,
    Params,
    SqlParams,
    DecodeParams,
    LayerConfig,
    Events,
    Interactivity,
}

impl Attribute {
    pub const ALL: [Attribute; 10] = [
        Attribute::Provider,
        Attribute::Opacity,
        Attribute::Visibility,
        Attribute::ZIndex,
        Attribute::Params,
        Attribute::SqlParams,
        Attribute::DecodeParams,
        Attribute::LayerConfig,
        Attribute::Events,
        Attribute::Interactivity,
    ];

    #[inline]
    const fn bit(self) -> u16 {
        1 << self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Provider => "provider",
            Attribute::Opacity => "opacity",
            Attribute::Visibility => "visibility",
            Attribute::ZIndex => "zIndex",
            Attribute::Params => "params",
            Attribute::SqlParams => "sqlParams",
            Attribute::DecodeParams => "decodeParams",
            Attribute::LayerConfig => "layerConfig",
            Attribute::Events => "events",
            Attribute::Interactivity => "interactivity",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of attributes whose declared value differs from the applied one
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeSet(u16);

impl ChangeSet {
    pub const EMPTY: ChangeSet = ChangeSet(0);

    /// Every tracked attribute
    pub const FULL: ChangeSet = ChangeSet((1 << Attribute::ALL.len()) - 1);

    /// Diff declared state against applied state
    ///
    /// With nothing applied yet every attribute counts as newly present.
    pub fn diff(
        provider: &str,
        declared: &LayerAttributes,
        applied_provider: Option<&str>,
        applied: Option<&LayerAttributes>,
    ) -> Self {
        let (Some(applied_provider), Some(applied)) = (applied_provider, applied) else {
            return ChangeSet::FULL;
        };

        let mut changes = ChangeSet::EMPTY;
        changes.mark(Attribute::Provider, provider != applied_provider);
        changes.mark(Attribute::Opacity, declared.opacity != applied.opacity);
        changes.mark(Attribute::Visibility, declared.visibility != applied.visibility);
        changes.mark(Attribute::ZIndex, declared.z_index != applied.z_index);
        changes.mark(Attribute::Params, declared.params != applied.params);
        changes.mark(Attribute::SqlParams, declared.sql_params != applied.sql_params);
        changes.mark(
            Attribute::DecodeParams,
            declared.decode_params != applied.decode_params,
        );
        changes.mark(
            Attribute::LayerConfig,
            declared.layer_config != applied.layer_config,
        );
        changes.mark(Attribute::Events, declared.events != applied.events);
        changes.mark(
            Attribute::Interactivity,
            declared.interactivity != applied.interactivity,
        );
        changes
    }

    #[inline]
    fn mark(&mut self, attribute: Attribute, changed: bool) {
        if changed {
            self.0 |= attribute.bit();
        }
    }

    #[inline]
    pub fn contains(self, attribute: Attribute) -> bool {
        self.0 & attribute.bit() != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub fn insert(&mut self, attribute: Attribute) {
        self.0 |= attribute.bit();
    }

    #[inline]
    pub fn union(self, other: ChangeSet) -> ChangeSet {
        ChangeSet(self.0 | other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = Attribute> {
        Attribute::ALL.into_iter().filter(move |a| self.contains(*a))
    }
}

impl FromIterator<Attribute> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut changes = ChangeSet::EMPTY;
        for attribute in iter {
            changes.mark(attribute, true);
        }
        changes
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Attribute::name)).finish()
    }
}
