//! Hardware map builder (§4.D): turns loaded plate/metadata rows into the
//! `controller_id -> JFHardControl` dictionary the metadata manager and JF
//! plate links operate on.

use std::collections::HashMap;

use tracing::info;

use crate::store::models::{MdInfo, Plate};

const SLOTS: usize = 16;

/// One type-2 or type-5 controller's identity plus its four 16-slot channel
/// tables, keyed by `hard_addr`.
#[derive(Debug, Clone)]
pub struct JFHardControl {
    pub pk_id: i64,
    pub station_name: String,
    pub ip_addr: String,
    pub ip_port: i32,
    pub login_name: String,
    pub login_password: String,
    pub all_do_id_map: HashMap<i32, [i64; SLOTS]>,
    pub all_do_value: HashMap<i32, [i32; SLOTS]>,
    pub all_di_id_map: HashMap<i32, [i64; SLOTS]>,
    pub all_di_value: HashMap<i32, [i32; SLOTS]>,
    pub all_mnd_map: HashMap<i32, [i32; SLOTS]>,
}

impl JFHardControl {
    fn new(plate: &Plate) -> Self {
        Self {
            pk_id: plate.pk_id,
            station_name: plate.station_name.clone(),
            ip_addr: plate.ip_addr.clone(),
            ip_port: plate.ip_port,
            login_name: plate.login_name.clone(),
            login_password: plate.login_password.clone(),
            all_do_id_map: HashMap::new(),
            all_do_value: HashMap::new(),
            all_di_id_map: HashMap::new(),
            all_di_value: HashMap::new(),
            all_mnd_map: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub controllers: usize,
    pub do_children: usize,
    pub di_children: usize,
    pub orphan_children: usize,
    pub do_bindings: usize,
    pub di_bindings: usize,
    pub metadata_misses: usize,
}

/// Implements the 3-phase algorithm (§4.D) in a single pass over the inputs.
pub fn build_hardware_map(
    plates: &[Plate],
    metadata: &[MdInfo],
) -> (HashMap<i64, JFHardControl>, BuildStats) {
    let mut controllers: HashMap<i64, JFHardControl> = HashMap::new();
    let mut stats = BuildStats::default();

    // Phase 1 — controllers.
    for plate in plates.iter().filter(|p| matches!(p.plate_type_id, 2 | 5)) {
        let mut controller = JFHardControl::new(plate);
        if plate.plate_type_id == 5 && plate.hard_addr > 0 {
            controller.all_mnd_map.insert(plate.hard_addr, [0; SLOTS]);
        }
        stats.controllers += 1;
        controllers.insert(plate.pk_id, controller);
    }

    // Phase 2 — children.
    for plate in plates.iter().filter(|p| matches!(p.plate_type_id, 3 | 4)) {
        let Some(controller) = controllers.get_mut(&plate.plate_parent_id) else {
            stats.orphan_children += 1;
            continue;
        };
        if plate.hard_addr <= 0 {
            continue;
        }
        match plate.plate_type_id {
            3 => {
                controller.all_do_id_map.insert(plate.hard_addr, [0; SLOTS]);
                controller.all_do_value.insert(plate.hard_addr, [0; SLOTS]);
                stats.do_children += 1;
            }
            4 => {
                controller.all_di_id_map.insert(plate.hard_addr, [0; SLOTS]);
                controller.all_di_value.insert(plate.hard_addr, [0; SLOTS]);
                stats.di_children += 1;
            }
            _ => unreachable!(),
        }
    }

    // Phase 3 — metadata binding.
    for md in metadata
        .iter()
        .filter(|m| matches!(m.plate_type_id, 3 | 4 | 5))
    {
        let owner_id = if md.plate_type_id == 5 {
            md.plate_id
        } else {
            md.plate_control_id
        };
        let Some(controller) = controllers.get_mut(&owner_id) else {
            stats.metadata_misses += 1;
            continue;
        };
        if md.tport < 0 || md.tport as usize >= SLOTS {
            stats.metadata_misses += 1;
            continue;
        }
        let tport = md.tport as usize;
        match md.plate_type_id {
            3 => {
                let Some(id_slot) = controller.all_do_id_map.get_mut(&md.plate_hard_addr) else {
                    stats.metadata_misses += 1;
                    continue;
                };
                id_slot[tport] = md.pk_id;
                controller.all_do_value.get_mut(&md.plate_hard_addr).unwrap()[tport] =
                    md.init_value;
                stats.do_bindings += 1;
            }
            4 => {
                let Some(id_slot) = controller.all_di_id_map.get_mut(&md.plate_hard_addr) else {
                    stats.metadata_misses += 1;
                    continue;
                };
                id_slot[tport] = md.pk_id;
                controller.all_di_value.get_mut(&md.plate_hard_addr).unwrap()[tport] =
                    md.init_value;
                stats.di_bindings += 1;
            }
            5 => {
                let Some(slot) = controller.all_mnd_map.get_mut(&md.plate_hard_addr) else {
                    stats.metadata_misses += 1;
                    continue;
                };
                slot[tport] = md.pk_id as i32;
                stats.do_bindings += 1;
            }
            _ => unreachable!(),
        }
    }

    info!(
        controllers = stats.controllers,
        do_children = stats.do_children,
        di_children = stats.di_children,
        orphan_children = stats.orphan_children,
        do_bindings = stats.do_bindings,
        di_bindings = stats.di_bindings,
        metadata_misses = stats.metadata_misses,
        "hardware map built"
    );

    (controllers, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::fixtures::{md, plate};

    #[test]
    fn binds_do_child_metadata_into_controller_tables() {
        let mut controller = plate(7, 2);
        controller.ip_addr = "10.0.0.1".into();

        let mut child = plate(8, 3);
        child.plate_parent_id = 7;
        child.hard_addr = 2;

        let mut meta = md(42, 3);
        meta.plate_control_id = 7;
        meta.plate_hard_addr = 2;
        meta.tport = 5;
        meta.init_value = 0;

        let (controllers, stats) =
            build_hardware_map(&[controller, child], std::slice::from_ref(&meta));

        assert_eq!(stats.controllers, 1);
        assert_eq!(stats.do_children, 1);
        assert_eq!(stats.do_bindings, 1);
        assert_eq!(stats.orphan_children, 0);
        let c = &controllers[&7];
        assert_eq!(c.all_do_id_map[&2][5], 42);
    }

    #[test]
    fn orphan_child_is_counted_not_fatal() {
        let mut child = plate(8, 3);
        child.plate_parent_id = 999;
        child.hard_addr = 2;

        let (controllers, stats) = build_hardware_map(&[child], &[]);
        assert_eq!(stats.orphan_children, 1);
        assert!(controllers.is_empty());
    }

    #[test]
    fn out_of_range_tport_is_a_miss_not_a_panic() {
        let mut controller = plate(7, 2);
        controller.pk_id = 7;

        let mut child = plate(8, 3);
        child.plate_parent_id = 7;
        child.hard_addr = 2;

        let mut meta = md(42, 3);
        meta.plate_control_id = 7;
        meta.plate_hard_addr = 2;
        meta.tport = 16;

        let (_, stats) = build_hardware_map(&[controller, child], &[meta]);
        assert_eq!(stats.metadata_misses, 1);
    }

    #[test]
    fn every_channel_vector_has_sixteen_slots() {
        let mut controller = plate(7, 2);
        controller.pk_id = 7;
        let mut child = plate(8, 3);
        child.plate_parent_id = 7;
        child.hard_addr = 2;

        let (controllers, _) = build_hardware_map(&[controller, child], &[]);
        assert_eq!(controllers[&7].all_do_id_map[&2].len(), SLOTS);
    }
}
