use strum::{Display, EnumIter, EnumString};

pub const NUM_DIHEDRALS: usize = 3;
pub const NUM_DIMENSIONS: usize = 3;

/// Backbone bond lengths in picometres, in placement order: N-CA, CA-C, C-N.
pub const BOND_LENGTHS: [f32; NUM_DIHEDRALS] = [145.801, 152.326, 132.868];

/// Backbone bond angles in radians, in placement order: C-N-CA, N-CA-C, CA-C-N.
pub const BOND_ANGLES: [f32; NUM_DIHEDRALS] = [2.124, 1.941, 2.028];

pub const DEFAULT_NUM_FRAGMENTS: usize = 6;
pub const DEFAULT_ALPHABET_SIZE: usize = 50;
pub const DEFAULT_EPSILON: f64 = 1e-12;

#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Dihedral {
    Phi = 0, Psi = 1, Omega = 2,
}

impl Dihedral {
    pub fn to_index(&self) -> usize {
        *self as usize
    }
}

/// Backbone atoms in the order they are placed along the chain.
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
pub enum BackboneAtom {
    N = 0, CA = 1, C = 2,
}

impl BackboneAtom {
    pub fn to_index(&self) -> usize {
        *self as usize
    }
}
