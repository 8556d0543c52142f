//! Fixtures shared by the unit tests.

use rfshare_types::{
    DeliverySystem, Dish, DvbcMux, DvbsMux, DvbtMux, FeCaps, FeKey, Frontend, Lnb, LnbConnection,
    LnbKey, LnbNetwork, LnbPolType, MuxKey, Polarisation, RotorControl, Satellite, SatBand,
    ScanHeader, SpectrumMethod, SubscriptionEntry, SubscriptionId,
};

use crate::database::Database;
use crate::scheduler::{DeviceCommand, DeviceControl, TuneRequest};
use crate::tuner::{AllocContext, StaticProbe};

pub const OWN_PID: u32 = 1000;
pub const OTHER_PID: u32 = 2000;
pub const DEAD_PID: u32 = 3000;

pub const CARD_A: i64 = 0xa0;
pub const CARD_B: i64 = 0xb0;
pub const ADAPTER_A0: i64 = 0xa000;
pub const ADAPTER_A1: i64 = 0xa001;
pub const ADAPTER_C: i64 = 0xc000;
pub const ADAPTER_A0_FE: FeKey = FeKey {
    adapter_mac_address: ADAPTER_A0,
    frontend_no: 0,
};
pub const ADAPTER_A1_FE: FeKey = FeKey {
    adapter_mac_address: ADAPTER_A1,
    frontend_no: 0,
};

pub const LNB_1: LnbKey = LnbKey {
    dish_id: 0,
    lnb_id: 1,
};
pub const LNB_2: LnbKey = LnbKey {
    dish_id: 1,
    lnb_id: 2,
};

/// Context of process [`OWN_PID`]; [`OTHER_PID`] is alive, [`DEAD_PID`] is not.
pub fn test_ctx() -> AllocContext {
    AllocContext::new(OWN_PID, Box::new(StaticProbe::new([OWN_PID, OTHER_PID])))
}

pub fn entry(sid: SubscriptionId) -> SubscriptionEntry {
    SubscriptionEntry {
        subscription_id: sid,
        has_mux: false,
        service: None,
    }
}

pub fn sat_frontend(adapter: i64, card: i64, rf_inputs: &[i8]) -> Frontend {
    Frontend {
        k: FeKey::new(adapter, 0),
        adapter_name: format!("adapter {:x}", adapter),
        adapter_no: (adapter & 0xff) as u16,
        card_mac_address: card,
        rf_inputs: rf_inputs.to_vec(),
        delsys: vec![DeliverySystem::DvbS, DeliverySystem::DvbS2],
        caps: FeCaps {
            supports_blindscan: true,
            spectrum_method: SpectrumMethod::Sweep,
            supports_multistream: true,
            ..Default::default()
        },
        priority: 0,
        enable_dvbs: true,
        enable_dvbc: false,
        enable_dvbt: false,
        present: true,
        can_be_used: true,
        sub: Default::default(),
    }
}

pub fn cable_frontend(adapter: i64, frontend_no: u8, priority: i32) -> Frontend {
    Frontend {
        k: FeKey::new(adapter, frontend_no),
        adapter_name: format!("cable {:x}", adapter),
        adapter_no: (adapter & 0xff) as u16,
        card_mac_address: adapter,
        rf_inputs: vec![0],
        delsys: vec![DeliverySystem::DvbC],
        caps: FeCaps::default(),
        priority,
        enable_dvbs: false,
        enable_dvbc: true,
        enable_dvbt: false,
        present: true,
        can_be_used: true,
        sub: Default::default(),
    }
}

/// Universal Ku band LNB receiving `sat_pos`.
pub fn universal_lnb(k: LnbKey, conns: &[(i64, i8)], sat_pos: i16) -> Lnb {
    Lnb {
        k,
        name: format!("lnb {}", k),
        pol_type: LnbPolType::Hv,
        enabled: true,
        can_be_used: true,
        priority: 0,
        lof_low: 9_750_000,
        lof_high: 10_600_000,
        freq_low: 10_700_000,
        freq_mid: 11_700_000,
        freq_high: 12_750_000,
        connections: conns
            .iter()
            .map(|&(card, rf_input)| LnbConnection {
                card_mac_address: card,
                rf_input,
                rf_coupler_id: None,
                priority: 0,
                rotor_control: RotorControl::FixedDish,
                enabled: true,
            })
            .collect(),
        networks: vec![LnbNetwork {
            sat_pos,
            priority: -1,
            usals_pos: sat_pos,
            enabled: true,
        }],
    }
}

pub fn fixed_dish(dish_id: i32) -> Dish {
    Dish {
        dish_id,
        name: format!("dish {}", dish_id),
        enabled: true,
        movable: false,
        cur_usals_pos: 0,
        target_usals_pos: 0,
        speed: 0,
    }
}

pub fn motor_dish(dish_id: i32, cur_usals_pos: i16) -> Dish {
    Dish {
        dish_id,
        name: format!("motor {}", dish_id),
        enabled: true,
        movable: true,
        cur_usals_pos,
        target_usals_pos: cur_usals_pos,
        speed: 100,
    }
}

pub fn satellite(sat_pos: i16) -> Satellite {
    Satellite {
        sat_pos,
        name: format!("sat {}", sat_pos),
        sat_band: SatBand::Ku,
        band_scans: Vec::new(),
    }
}

pub fn dvbs_mux(sat_pos: i16, ts_id: u16, frequency: u32, pol: Polarisation) -> DvbsMux {
    DvbsMux {
        k: MuxKey::new(sat_pos, 1, ts_id, 0),
        frequency,
        pol,
        symbol_rate: 27_500_000,
        delsys: DeliverySystem::DvbS2,
        stream_id: -1,
        c: ScanHeader::default(),
    }
}

pub fn dvbc_mux(ts_id: u16, frequency: u32) -> DvbcMux {
    DvbcMux {
        k: MuxKey::new(MuxKey::SAT_POS_DVBC, 1, ts_id, 0),
        frequency,
        symbol_rate: 6_900_000,
        c: ScanHeader::default(),
    }
}

pub fn dvbt_mux(ts_id: u16, frequency: u32) -> DvbtMux {
    DvbtMux {
        k: MuxKey::new(MuxKey::SAT_POS_DVBT, 1, ts_id, 0),
        frequency,
        bandwidth_hz: 8_000_000,
        stream_id: -1,
        c: ScanHeader::default(),
    }
}

/// One frontend on card A behind one universal LNB on a fixed dish.
pub fn seed_single_lnb(db: &mut Database) {
    let txn = db.write_txn().unwrap();
    txn.put_record(&sat_frontend(ADAPTER_A0, CARD_A, &[0])).unwrap();
    txn.put_record(&fixed_dish(0)).unwrap();
    txn.put_record(&universal_lnb(LNB_1, &[(CARD_A, 0)], 1920))
        .unwrap();
    txn.put_record(&satellite(1920)).unwrap();
    txn.commit().unwrap();
}

/// Two frontends sharing the single RF input of card A.
pub fn seed_shared_tuner(db: &mut Database) {
    seed_single_lnb(db);
    let txn = db.write_txn().unwrap();
    txn.put_record(&sat_frontend(ADAPTER_A1, CARD_A, &[0])).unwrap();
    txn.commit().unwrap();
}

/// Two independent cards wired to the same LNB.
pub fn seed_two_cards(db: &mut Database) {
    let txn = db.write_txn().unwrap();
    txn.put_record(&sat_frontend(ADAPTER_A0, CARD_A, &[0])).unwrap();
    txn.put_record(&sat_frontend(ADAPTER_A1, CARD_B, &[0])).unwrap();
    txn.put_record(&fixed_dish(0)).unwrap();
    txn.put_record(&universal_lnb(LNB_1, &[(CARD_A, 0), (CARD_B, 0)], 1920))
        .unwrap();
    txn.put_record(&satellite(1920)).unwrap();
    txn.commit().unwrap();
}

/// Device layer stand-in keeping every command it is given.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    pub commands: Vec<DeviceCommand>,
}

impl RecordingDevice {
    pub fn tunes(&self) -> Vec<TuneRequest> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Tune(req) => Some(req.clone()),
                DeviceCommand::Release(_) => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<SubscriptionId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Release(sid) => Some(*sid),
                DeviceCommand::Tune(_) => None,
            })
            .collect()
    }
}

impl DeviceControl for RecordingDevice {
    fn execute(&mut self, command: DeviceCommand) {
        self.commands.push(command);
    }
}
