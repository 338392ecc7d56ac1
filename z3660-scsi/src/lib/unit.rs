use log::{debug, info};

use crate::bus::RegisterBus;
use crate::regs::{Register, RegisterWindow};

/// Number of unit slots on the controller.
pub const NUM_UNITS: usize = 7;

/// One drive slot. A unit that probed absent stays disabled for the life
/// of the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unit {
    pub enabled: bool,
    pub present: bool,
    pub valid: bool,
    pub read_only: bool,
    /// Index used with `SelectDriveX` and command registers.
    pub unit_num: u8,
    /// Index used with `SelectDrive`.
    pub scsi_num: u16,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
    pub motor_state: bool,
    pub change_count: u32,
}

impl Unit {
    pub fn is_usable(&self) -> bool {
        self.enabled && self.present
    }
}

/// The fixed table of unit slots, filled in by probing the controller.
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: Vec<Unit>,
}

impl UnitRegistry {
    /// Ask the controller about every slot. Geometry is only read for units
    /// that report a drive type.
    pub fn probe_all_units<B: RegisterBus>(regs: &mut RegisterWindow<B>) -> Self {
        let units = (0..NUM_UNITS)
            .map(|index| probe_unit(regs, index))
            .collect::<Vec<_>>();
        info!("Found {} unit(s).", units.iter().filter(|u| u.present).count());
        UnitRegistry { units }
    }

    pub fn get(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Unit> {
        self.units.get_mut(index)
    }

    /// Look up a unit that can take requests.
    pub fn usable(&self, index: usize) -> Option<&Unit> {
        self.get(index).filter(|unit| unit.is_usable())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub fn present(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|unit| unit.present)
    }
}

fn probe_unit<B: RegisterBus>(regs: &mut RegisterWindow<B>, index: usize) -> Unit {
    let mut unit = Unit {
        unit_num: index as u8,
        scsi_num: index as u16,
        ..Unit::default()
    };
    regs.write_register(Register::SelectDrive, index as u32);
    if regs.read_register(Register::DriveType) == 0 {
        debug!("Unit {}: no drive.", index);
        return unit;
    }

    unit.enabled = true;
    unit.present = true;
    unit.valid = true;
    unit.change_count = 1;
    unit.cylinders = regs.read_register(Register::Cylinders);
    unit.heads = regs.read_register(Register::Heads);
    unit.sectors_per_track = regs.read_register(Register::Sectors);
    debug!("Unit {}: {} cylinders, {} heads, {} sectors per track.",
        index, unit.cylinders, unit.heads, unit.sectors_per_track);
    unit
}
