use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{PgrError, Reservation, ReservationType, ALL_REGISTRANTS_KEY};

/// One registered I_T nexus: the registration key plus the nexus it was
/// registered through.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Registrant {
    key: String,
    nexus: String,
}

impl Registrant {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn nexus(&self) -> &str {
        &self.nexus
    }
}

/// Authoritative model of a PGR target: the ordered registrant set and the
/// reservation, if any. The harness drives a real target and checks its
/// observable state against this machine after every transition.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TargetModel {
    registrants: Vec<Registrant>,
    reservation: Option<Reservation>,
    generation: u32,
}

impl TargetModel {
    pub fn new() -> Self {
        TargetModel::default()
    }

    /// Ordered registered keys, oldest registration first.
    pub fn registrant_keys(&self) -> Vec<String> {
        self.registrants.iter().map(|r| r.key.clone()).collect()
    }

    pub fn registrants(&self) -> &[Registrant] {
        &self.registrants
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        self.reservation.as_ref()
    }

    /// PR generation counter; bumps on every registration change.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_registered<S: AsRef<str>>(&self, key: S) -> bool {
        self.registrants.iter().any(|r| r.key == key.as_ref())
    }

    pub fn key_of_nexus<S: AsRef<str>>(&self, nexus: S) -> Option<&str> {
        self.registrants
            .iter()
            .find(|r| r.nexus == nexus.as_ref())
            .map(|r| r.key.as_str())
    }

    /// Register `key` through `nexus`. Fails on a duplicate key and also
    /// when the nexus is already registered under another key, which is how
    /// a re-registration attempt with a substitute key is rejected.
    pub fn register<S: AsRef<str>>(&mut self, nexus: S, key: S) -> Result<()> {
        let nexus_ref = nexus.as_ref();
        let key_ref = key.as_ref();

        if self.is_registered(key_ref) {
            anyhow::bail!(PgrError::DuplicateKey(key_ref.to_string()))
        }
        if self.key_of_nexus(nexus_ref).is_some() {
            anyhow::bail!(PgrError::NexusRegistered(nexus_ref.to_string()))
        }

        self.registrants.push(Registrant {
            key: key_ref.to_string(),
            nexus: nexus_ref.to_string(),
        });
        self.generation += 1;

        Ok(())
    }

    /// Replace `old` with `new` at the same ordinal position. A reservation
    /// held under `old` moves to `new` in the same transition.
    pub fn register_and_ignore<S: AsRef<str>>(&mut self, old: S, new: S) -> Result<()> {
        let old_ref = old.as_ref();
        let new_ref = new.as_ref();

        let pos = self
            .registrants
            .iter()
            .position(|r| r.key == old_ref)
            .ok_or_else(|| PgrError::NoSuchRegistrant(old_ref.to_string()))?;
        if old_ref != new_ref && self.is_registered(new_ref) {
            anyhow::bail!(PgrError::DuplicateKey(new_ref.to_string()))
        }

        self.registrants[pos].key = new_ref.to_string();
        let rekey = match &self.reservation {
            Some(resv) if resv.key() == old_ref => Some(resv.rtype()),
            _ => None,
        };
        if let Some(rtype) = rekey {
            self.reservation = Some(Reservation::new(new_ref, rtype));
        }
        self.generation += 1;

        Ok(())
    }

    /// Remove `key` from the registrant set. Removing an absent key is a
    /// no-op. Dropping the sole holder releases the reservation unless it
    /// is an all-registrants reservation, which stands until the registrant
    /// set empties.
    pub fn unregister<S: AsRef<str>>(&mut self, key: S) -> Result<()> {
        let key_ref = key.as_ref();
        let pos = match self.registrants.iter().position(|r| r.key == key_ref) {
            Some(pos) => pos,
            None => return Ok(()),
        };

        self.registrants.remove(pos);
        self.generation += 1;

        let released = match &self.reservation {
            Some(resv) if resv.rtype().is_all_registrants() => self.registrants.is_empty(),
            Some(resv) => resv.key() == key_ref,
            None => false,
        };
        if released {
            self.reservation = None;
        }

        Ok(())
    }

    /// Take a reservation of `rtype` for the registrant holding `key`.
    /// Re-reserving an identical reservation is an idempotent success;
    /// anything else while reserved is a conflict.
    pub fn reserve<S: AsRef<str>>(&mut self, key: S, rtype: ReservationType) -> Result<()> {
        let key_ref = key.as_ref();
        if !self.is_registered(key_ref) {
            anyhow::bail!(PgrError::NotRegistered(key_ref.to_string()))
        }

        let holder_key = if rtype.is_all_registrants() {
            ALL_REGISTRANTS_KEY
        } else {
            key_ref
        };

        match &self.reservation {
            None => {
                self.reservation = Some(Reservation::new(holder_key, rtype));
                Ok(())
            }
            Some(resv) if resv.key() == holder_key && resv.rtype() == rtype => Ok(()),
            Some(_) => anyhow::bail!(PgrError::ReservationConflict),
        }
    }

    /// Release the reservation. A release by anyone other than a holder,
    /// or with a non-matching type, is a success without effect.
    pub fn release<S: AsRef<str>>(&mut self, key: S, rtype: ReservationType) -> Result<()> {
        let key_ref = key.as_ref();
        if !self.is_registered(key_ref) {
            anyhow::bail!(PgrError::NotRegistered(key_ref.to_string()))
        }

        let released = match &self.reservation {
            // the caller is a registrant, so it holds any all-registrants
            // reservation
            Some(resv) if resv.rtype().is_all_registrants() => resv.rtype() == rtype,
            Some(resv) => resv.key() == key_ref && resv.rtype() == rtype,
            None => false,
        };
        if released {
            self.reservation = None;
        }

        Ok(())
    }

    /// Drop every registrant and any reservation. Only a registrant may
    /// clear.
    pub fn clear<S: AsRef<str>>(&mut self, key: S) -> Result<()> {
        let key_ref = key.as_ref();
        if !self.is_registered(key_ref) {
            anyhow::bail!(PgrError::NotRegistered(key_ref.to_string()))
        }

        self.registrants.clear();
        self.reservation = None;
        self.generation += 1;

        Ok(())
    }

    fn holds(&self, key: Option<&str>) -> bool {
        let resv = match &self.reservation {
            Some(resv) => resv,
            None => return false,
        };
        match key {
            Some(k) if resv.rtype().is_all_registrants() => self.is_registered(k),
            Some(k) => resv.key() == k,
            None => false,
        }
    }

    /// Whether an initiator identified by `key` (`None` for one that never
    /// registered) may read from the logical unit right now.
    pub fn may_read(&self, key: Option<&str>) -> bool {
        match &self.reservation {
            None => true,
            Some(resv) => {
                let registrant = key.map(|k| self.is_registered(k)).unwrap_or(false);
                resv.rtype().may_read(self.holds(key), registrant)
            }
        }
    }

    /// Whether an initiator identified by `key` may write to the logical
    /// unit right now.
    pub fn may_write(&self, key: Option<&str>) -> bool {
        match &self.reservation {
            None => true,
            Some(resv) => {
                let registrant = key.map(|k| self.is_registered(k)).unwrap_or(false);
                resv.rtype().may_write(self.holds(key), registrant)
            }
        }
    }
}
