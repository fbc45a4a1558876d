use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::PgrError;

/// Well-known holder key recorded for all-registrants reservations.
pub static ALL_REGISTRANTS_KEY: &str = "0x0";

/// Persistent reservation (PROUT) service action types.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationType {
    NoType,
    WriteExclusive,
    ExclusiveAccess,
    WriteExclusiveRegistrantsOnly,
    ExclusiveAccessRegistrantsOnly,
    WriteExclusiveAllRegistrants,
    ExclusiveAccessAllRegistrants,
}

impl ReservationType {
    /// Numeric PROUT type code, as passed to `--prout-type=`.
    pub fn code(&self) -> u8 {
        match self {
            ReservationType::NoType => 0,
            ReservationType::WriteExclusive => 1,
            ReservationType::ExclusiveAccess => 3,
            ReservationType::WriteExclusiveRegistrantsOnly => 5,
            ReservationType::ExclusiveAccessRegistrantsOnly => 6,
            ReservationType::WriteExclusiveAllRegistrants => 7,
            ReservationType::ExclusiveAccessAllRegistrants => 8,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        let rtype = match code {
            0 => ReservationType::NoType,
            1 => ReservationType::WriteExclusive,
            3 => ReservationType::ExclusiveAccess,
            5 => ReservationType::WriteExclusiveRegistrantsOnly,
            6 => ReservationType::ExclusiveAccessRegistrantsOnly,
            7 => ReservationType::WriteExclusiveAllRegistrants,
            8 => ReservationType::ExclusiveAccessAllRegistrants,
            _ => anyhow::bail!(PgrError::UnknownTypeName(code.to_string())),
        };
        Ok(rtype)
    }

    /// Display string the report command prints for this type. `NoType`
    /// never appears in a reservation report.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ReservationType::NoType => "Obsolete",
            ReservationType::WriteExclusive => "Write Exclusive",
            ReservationType::ExclusiveAccess => "Exclusive Access",
            ReservationType::WriteExclusiveRegistrantsOnly => "Write Exclusive, registrants only",
            ReservationType::ExclusiveAccessRegistrantsOnly => {
                "Exclusive Access, registrants only"
            }
            ReservationType::WriteExclusiveAllRegistrants => "Write Exclusive, all registrants",
            ReservationType::ExclusiveAccessAllRegistrants => "Exclusive Access, all registrants",
        }
    }

    /// Decode a reservation report type string. Exact match only: an
    /// unrecognized string is a hard decoding failure, never `NoType`, so
    /// that tool output drift cannot silently pass as "no reservation".
    pub fn from_wire_name<S: AsRef<str>>(name: S) -> Result<Self> {
        let rtype = match name.as_ref() {
            "Write Exclusive" => ReservationType::WriteExclusive,
            "Exclusive Access" => ReservationType::ExclusiveAccess,
            "Write Exclusive, registrants only" => ReservationType::WriteExclusiveRegistrantsOnly,
            "Exclusive Access, registrants only" => {
                ReservationType::ExclusiveAccessRegistrantsOnly
            }
            "Write Exclusive, all registrants" => ReservationType::WriteExclusiveAllRegistrants,
            "Exclusive Access, all registrants" => ReservationType::ExclusiveAccessAllRegistrants,
            other => anyhow::bail!(PgrError::UnknownTypeName(other.to_string())),
        };
        Ok(rtype)
    }

    pub fn is_all_registrants(&self) -> bool {
        matches!(
            self,
            ReservationType::WriteExclusiveAllRegistrants
                | ReservationType::ExclusiveAccessAllRegistrants
        )
    }

    /// Short tag used in fixture names.
    pub fn tag(&self) -> &'static str {
        match self {
            ReservationType::NoType => "none",
            ReservationType::WriteExclusive => "we",
            ReservationType::ExclusiveAccess => "ea",
            ReservationType::WriteExclusiveRegistrantsOnly => "wero",
            ReservationType::ExclusiveAccessRegistrantsOnly => "earo",
            ReservationType::WriteExclusiveAllRegistrants => "wear",
            ReservationType::ExclusiveAccessAllRegistrants => "eaar",
        }
    }

    /// May an initiator read from the logical unit while a reservation of
    /// this type is in effect?
    pub fn may_read(&self, holder: bool, registrant: bool) -> bool {
        match self {
            ReservationType::NoType => true,
            ReservationType::WriteExclusive => true,
            ReservationType::ExclusiveAccess => holder,
            ReservationType::WriteExclusiveRegistrantsOnly => true,
            ReservationType::ExclusiveAccessRegistrantsOnly => registrant,
            ReservationType::WriteExclusiveAllRegistrants => true,
            ReservationType::ExclusiveAccessAllRegistrants => registrant,
        }
    }

    /// May an initiator write to the logical unit while a reservation of
    /// this type is in effect?
    pub fn may_write(&self, holder: bool, registrant: bool) -> bool {
        match self {
            ReservationType::NoType => true,
            ReservationType::WriteExclusive => holder,
            ReservationType::ExclusiveAccess => holder,
            ReservationType::WriteExclusiveRegistrantsOnly => registrant,
            ReservationType::ExclusiveAccessRegistrantsOnly => registrant,
            ReservationType::WriteExclusiveAllRegistrants => registrant,
            ReservationType::ExclusiveAccessAllRegistrants => registrant,
        }
    }
}

/// A reservation as reported by the target: the holder's key (the
/// all-registrants sentinel for AR types) and the reservation type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    key: String,
    rtype: ReservationType,
}

impl Reservation {
    pub fn new<S: AsRef<str>>(key: S, rtype: ReservationType) -> Self {
        Reservation {
            key: key.as_ref().to_string(),
            rtype,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rtype(&self) -> ReservationType {
        self.rtype
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() -> Result<()> {
        for code in [0u8, 1, 3, 5, 6, 7, 8] {
            assert_eq!(ReservationType::from_code(code)?.code(), code);
        }
        assert!(ReservationType::from_code(2).is_err());
        Ok(())
    }

    #[test]
    fn test_wire_names_decode_exactly() -> Result<()> {
        assert_eq!(
            ReservationType::from_wire_name("Exclusive Access")?,
            ReservationType::ExclusiveAccess
        );
        assert_eq!(
            ReservationType::from_wire_name("Write Exclusive, registrants only")?,
            ReservationType::WriteExclusiveRegistrantsOnly
        );
        Ok(())
    }

    #[test]
    fn test_unknown_wire_name_is_loud() {
        let res = ReservationType::from_wire_name("Exclusive Access, misspelled");
        assert!(res.is_err());
    }

    #[test]
    fn test_access_policy_table() {
        use ReservationType::*;

        // (type, holder r/w, registrant r/w, outsider r/w)
        let table = [
            (WriteExclusive, (true, true), (true, false), (true, false)),
            (ExclusiveAccess, (true, true), (false, false), (false, false)),
            (
                WriteExclusiveRegistrantsOnly,
                (true, true),
                (true, true),
                (true, false),
            ),
            (
                ExclusiveAccessRegistrantsOnly,
                (true, true),
                (true, true),
                (false, false),
            ),
            (
                WriteExclusiveAllRegistrants,
                (true, true),
                (true, true),
                (true, false),
            ),
            (
                ExclusiveAccessAllRegistrants,
                (true, true),
                (true, true),
                (false, false),
            ),
        ];

        for (rtype, holder, registrant, outsider) in table {
            assert_eq!(
                (rtype.may_read(true, true), rtype.may_write(true, true)),
                holder,
                "{:?} holder",
                rtype
            );
            assert_eq!(
                (rtype.may_read(false, true), rtype.may_write(false, true)),
                registrant,
                "{:?} registrant",
                rtype
            );
            assert_eq!(
                (rtype.may_read(false, false), rtype.may_write(false, false)),
                outsider,
                "{:?} outsider",
                rtype
            );
        }
    }
}
