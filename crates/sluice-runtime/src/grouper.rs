//! Multi-work-unit grouping
//!
//! Work units are bundled into at most `max_groups` slots using
//! longest-processing-time-first on the remaining record count: units are
//! taken largest first and each goes to the currently lightest group. Inside
//! a group the units keep plan order.

use crate::job::{MultiWorkUnit, WorkUnit};

/// Group work units into execution slots
///
/// With grouping disabled every unit gets its own slot, which is the same
/// result as grouping with `max_groups` equal to the unit count.
pub fn group_work_units(
    units: Vec<WorkUnit>,
    max_groups: usize,
    enabled: bool,
) -> Vec<MultiWorkUnit> {
    if units.is_empty() {
        return Vec::new();
    }

    let group_count = if enabled {
        max_groups.clamp(1, units.len())
    } else {
        units.len()
    };

    let mut order: Vec<usize> = (0..units.len()).collect();
    order.sort_by(|&a, &b| {
        units[b]
            .remaining()
            .cmp(&units[a].remaining())
            .then(units[a].index.cmp(&units[b].index))
    });

    let mut loads = vec![0u64; group_count];
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); group_count];

    for position in order {
        // Lightest group; ties go to the group with fewer members, then the lowest index
        let target = (0..group_count)
            .min_by_key(|&g| (loads[g], members[g].len(), g))
            .unwrap_or(0);
        loads[target] += units[position].remaining();
        members[target].push(position);
    }

    let mut slots: Vec<Option<WorkUnit>> = units.into_iter().map(Some).collect();

    members
        .into_iter()
        .filter_map(|mut positions| {
            positions.sort_unstable();
            let group: Vec<WorkUnit> = positions
                .into_iter()
                .filter_map(|p| slots[p].take())
                .collect();
            Some(group).filter(|g| !g.is_empty())
        })
        .enumerate()
        .filter_map(|(index, group)| MultiWorkUnit::new(index, group))
        .collect()
}
