//! Record kinds known to the store.

use serde::de::DeserializeOwned;
use serde::Serialize;

use rfshare_types::{
    AnyMux, DelsysType, Dish, DvbcMux, DvbsMux, DvbtMux, Frontend, Lnb, LnbKey, FeKey, MuxKey,
    Satellite,
};

use super::{Result, Txn};

/// A record that can be stored in a [`Txn`].
pub trait Record: Serialize + DeserializeOwned {
    /// Table holding this kind of record.
    const TABLE: &'static str;
    type Key: Serialize + Ord;

    fn key(&self) -> Self::Key;
}

impl Record for Frontend {
    const TABLE: &'static str = "frontends";
    type Key = FeKey;

    fn key(&self) -> FeKey {
        self.k
    }
}

impl Record for Lnb {
    const TABLE: &'static str = "lnbs";
    type Key = LnbKey;

    fn key(&self) -> LnbKey {
        self.k
    }
}

impl Record for Dish {
    const TABLE: &'static str = "dishes";
    type Key = i32;

    fn key(&self) -> i32 {
        self.dish_id
    }
}

impl Record for Satellite {
    const TABLE: &'static str = "satellites";
    type Key = i16;

    fn key(&self) -> i16 {
        self.sat_pos
    }
}

impl Record for DvbsMux {
    const TABLE: &'static str = "dvbs_muxes";
    type Key = MuxKey;

    fn key(&self) -> MuxKey {
        self.k
    }
}

impl Record for DvbcMux {
    const TABLE: &'static str = "dvbc_muxes";
    type Key = MuxKey;

    fn key(&self) -> MuxKey {
        self.k
    }
}

impl Record for DvbtMux {
    const TABLE: &'static str = "dvbt_muxes";
    type Key = MuxKey;

    fn key(&self) -> MuxKey {
        self.k
    }
}

/// Mux access independent of the variant.
impl Txn<'_> {
    pub fn find_mux(&self, delsys_type: DelsysType, key: &MuxKey) -> Result<Option<AnyMux>> {
        Ok(match delsys_type {
            DelsysType::Sat => self.find_by_key::<DvbsMux>(key)?.map(AnyMux::Sat),
            DelsysType::Cable => self.find_by_key::<DvbcMux>(key)?.map(AnyMux::Cable),
            DelsysType::Terrestrial => self.find_by_key::<DvbtMux>(key)?.map(AnyMux::Terrestrial),
        })
    }

    pub fn put_mux(&self, mux: &AnyMux) -> Result<()> {
        match mux {
            AnyMux::Sat(m) => self.put_record(m),
            AnyMux::Cable(m) => self.put_record(m),
            AnyMux::Terrestrial(m) => self.put_record(m),
        }
    }

    pub fn list_muxes(&self, delsys_type: DelsysType) -> Result<Vec<AnyMux>> {
        Ok(match delsys_type {
            DelsysType::Sat => self
                .list::<DvbsMux>()?
                .into_iter()
                .map(AnyMux::Sat)
                .collect(),
            DelsysType::Cable => self
                .list::<DvbcMux>()?
                .into_iter()
                .map(AnyMux::Cable)
                .collect(),
            DelsysType::Terrestrial => self
                .list::<DvbtMux>()?
                .into_iter()
                .map(AnyMux::Terrestrial)
                .collect(),
        })
    }
}
