use std::collections::BTreeSet;
use std::collections::HashMap;
use std::iter::FromIterator;

use super::{PublicKey, Scope};

/// the set of block ids that took part in the derivation of a fact
///
/// a base fact declared in block `b` carries the origin `{b}`, a derived
/// fact carries the union of the deriving rule's block and the origins of
/// every matched body fact
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Origin {
    inner: BTreeSet<usize>,
}

impl Origin {
    pub fn insert(&mut self, i: usize) {
        self.inner.insert(i);
    }

    pub fn union(&self, other: &Self) -> Self {
        Origin {
            inner: self.inner.union(&other.inner).cloned().collect(),
        }
    }

    pub fn is_superset(&self, other: &Self) -> bool {
        self.inner.is_superset(&other.inner)
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.inner.iter()
    }
}

impl<'a> Extend<&'a usize> for Origin {
    fn extend<T: IntoIterator<Item = &'a usize>>(&mut self, iter: T) {
        self.inner.extend(iter)
    }
}

impl Extend<usize> for Origin {
    fn extend<T: IntoIterator<Item = usize>>(&mut self, iter: T) {
        self.inner.extend(iter)
    }
}

impl<'a> FromIterator<&'a usize> for Origin {
    fn from_iter<T: IntoIterator<Item = &'a usize>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().cloned().collect(),
        }
    }
}

impl FromIterator<usize> for Origin {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// the set of block ids whose facts a rule, check or policy may consume
///
/// a fact is only visible if its whole origin is contained in this set:
/// every block that took part in its derivation must be trusted
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrustedOrigins(Origin);

impl TrustedOrigins {
    /// the default trust for a token block: the authority block, the
    /// block itself and the authorizer
    pub fn for_block(block_id: usize, authorizer_block: usize) -> TrustedOrigins {
        let mut origins = Origin::default();
        origins.insert(0);
        origins.insert(block_id);
        origins.insert(authorizer_block);
        TrustedOrigins(origins)
    }

    /// the default trust for the authorizer: every block
    pub fn all(authorizer_block: usize) -> TrustedOrigins {
        let mut origins = Origin::default();
        origins.extend(0..=authorizer_block);
        TrustedOrigins(origins)
    }

    pub fn from_scopes(
        rule_scopes: &[Scope],
        default_origins: &TrustedOrigins,
        current_block: usize,
        authorizer_block: usize,
        public_key_to_block_id: &HashMap<PublicKey, Vec<usize>>,
    ) -> TrustedOrigins {
        if rule_scopes.is_empty() {
            return default_origins.clone();
        }

        // the current block and the authorizer are always trusted
        let mut origins = Origin::default();
        origins.insert(current_block);
        origins.insert(authorizer_block);

        for scope in rule_scopes {
            match scope {
                Scope::Authority => {
                    origins.insert(0);
                }
                Scope::Previous => {
                    origins.extend(0..current_block);
                }
                Scope::PublicKey(key) => {
                    if let Some(block_ids) = public_key_to_block_id.get(key) {
                        origins.extend(block_ids.iter())
                    }
                }
            }
        }

        TrustedOrigins(origins)
    }

    pub fn contains(&self, fact_origin: &Origin) -> bool {
        self.0.is_superset(fact_origin)
    }
}

impl FromIterator<usize> for TrustedOrigins {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a usize> for TrustedOrigins {
    fn from_iter<T: IntoIterator<Item = &'a usize>>(iter: T) -> Self {
        Self(iter.into_iter().cloned().collect())
    }
}
