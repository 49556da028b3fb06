//! Construction type arithmetic.
//!
//! A construction type is a bare integer whose hundreds digit selects its
//! family. Family membership, the produced item of a factory and the research
//! that gates a type are all derived from the number itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length in tiles of a structure footprint.
pub const STRUCTURE_TILES: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstructionType(pub u32);

/// Numeric family of a construction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    CommandCenter,
    Base,
    Factory,
    Medical,
    Housing,
    Research,
    Unknown,
}

impl ConstructionType {
    pub const COMMAND_CENTER: ConstructionType = ConstructionType(0);
    pub const HOSPITAL: ConstructionType = ConstructionType(200);
    pub const HOUSE: ConstructionType = ConstructionType(300);
    pub const MEDICAL_ANNEX: ConstructionType = ConstructionType(301);
    /// Research that unlocks the hospital and the medical annex.
    pub const MEDKIT_RESEARCH: ConstructionType = ConstructionType(402);

    pub fn family(self) -> Family {
        match self.0 {
            0 => Family::CommandCenter,
            1..=99 => Family::Base,
            100..=199 => Family::Factory,
            200..=299 => Family::Medical,
            300..=399 => Family::Housing,
            400..=499 => Family::Research,
            _ => Family::Unknown,
        }
    }

    pub fn is_command_center(self) -> bool {
        self == Self::COMMAND_CENTER
    }

    pub fn is_factory(self) -> bool {
        self.family() == Family::Factory
    }

    pub fn is_research(self) -> bool {
        self.family() == Family::Research
    }

    pub fn is_hospital(self) -> bool {
        self == Self::HOSPITAL
    }

    /// Houses hold attachment slots and are always buildable.
    pub fn is_house(self) -> bool {
        self == Self::HOUSE
    }

    /// Item produced by a factory (`type % 100`), `None` for anything else.
    pub fn item_type(self) -> Option<u32> {
        if self.is_factory() {
            Some(self.0 % 100)
        } else {
            None
        }
    }

    /// Research that must be complete before this type may be placed.
    ///
    /// Factories need the research building three families up
    /// (`type + 300`); the hospital and the medical annex need medkit
    /// research. Everything else is ungated.
    pub fn required_research(self) -> Option<ConstructionType> {
        match self.family() {
            Family::Factory => Some(ConstructionType(self.0 + 300)),
            _ if self == Self::HOSPITAL || self == Self::MEDICAL_ANNEX => {
                Some(Self::MEDKIT_RESEARCH)
            }
            _ => None,
        }
    }

    /// Footprint in tiles as `(width, height)`.
    pub fn footprint(self) -> (i32, i32) {
        (STRUCTURE_TILES, STRUCTURE_TILES)
    }
}

impl fmt::Display for ConstructionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_ranges() {
        assert_eq!(ConstructionType(0).family(), Family::CommandCenter);
        assert_eq!(ConstructionType(1).family(), Family::Base);
        assert_eq!(ConstructionType(112).family(), Family::Factory);
        assert_eq!(ConstructionType(200).family(), Family::Medical);
        assert_eq!(ConstructionType(300).family(), Family::Housing);
        assert_eq!(ConstructionType(413).family(), Family::Research);
        assert_eq!(ConstructionType(900).family(), Family::Unknown);
    }

    #[test]
    fn test_factory_item_type() {
        assert_eq!(ConstructionType(112).item_type(), Some(12));
        assert_eq!(ConstructionType(100).item_type(), Some(0));
        assert_eq!(ConstructionType(412).item_type(), None);
    }

    #[test]
    fn test_required_research_mapping() {
        assert_eq!(
            ConstructionType(101).required_research(),
            Some(ConstructionType(401))
        );
        assert_eq!(
            ConstructionType::HOSPITAL.required_research(),
            Some(ConstructionType(402))
        );
        assert_eq!(
            ConstructionType::MEDICAL_ANNEX.required_research(),
            Some(ConstructionType(402))
        );
        assert_eq!(ConstructionType(401).required_research(), None);
        assert_eq!(ConstructionType::HOUSE.required_research(), None);
        assert_eq!(ConstructionType::COMMAND_CENTER.required_research(), None);
    }

    #[test]
    fn test_only_plain_house_is_house() {
        assert!(ConstructionType::HOUSE.is_house());
        assert!(!ConstructionType::MEDICAL_ANNEX.is_house());
    }
}
