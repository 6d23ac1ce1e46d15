// areas.rs - polygon area ids and ability flags shared by the builder and the tools

use crate::detour::QueryFilter;

pub const POLYAREA_GROUND: u8 = 0;
pub const POLYAREA_WATER: u8 = 1;
pub const POLYAREA_ROAD: u8 = 2;
pub const POLYAREA_DOOR: u8 = 3;
pub const POLYAREA_GRASS: u8 = 4;
pub const POLYAREA_JUMP: u8 = 5;

/// Ability to walk (ground, grass, road)
pub const POLYFLAGS_WALK: u16 = 0x01;
/// Ability to swim (water)
pub const POLYFLAGS_SWIM: u16 = 0x02;
/// Ability to move through doors
pub const POLYFLAGS_DOOR: u16 = 0x04;
/// Ability to jump
pub const POLYFLAGS_JUMP: u16 = 0x08;
/// Disabled polygon
pub const POLYFLAGS_DISABLED: u16 = 0x10;
pub const POLYFLAGS_ALL: u16 = 0xffff;

/// Traversal flags for a polygon tagged with `area`
pub fn flags_for_area(area: u8) -> u16 {
    match area {
        POLYAREA_GROUND | POLYAREA_GRASS | POLYAREA_ROAD => POLYFLAGS_WALK,
        POLYAREA_WATER => POLYFLAGS_SWIM,
        POLYAREA_DOOR => POLYFLAGS_WALK | POLYFLAGS_DOOR,
        POLYAREA_JUMP => POLYFLAGS_JUMP,
        _ => 0,
    }
}

pub fn area_name(area: u8) -> &'static str {
    match area {
        POLYAREA_GROUND => "ground",
        POLYAREA_WATER => "water",
        POLYAREA_ROAD => "road",
        POLYAREA_DOOR => "door",
        POLYAREA_GRASS => "grass",
        POLYAREA_JUMP => "jump",
        _ => "custom",
    }
}

/// Filter used by the interactive tools: everything but disabled polygons,
/// water and grass made more expensive.
pub fn default_filter() -> QueryFilter {
    let mut filter = QueryFilter::default();
    filter.set_include_flags(POLYFLAGS_ALL ^ POLYFLAGS_DISABLED);
    filter.set_exclude_flags(POLYFLAGS_DISABLED);
    filter.set_area_cost(POLYAREA_GROUND, 1.0);
    filter.set_area_cost(POLYAREA_WATER, 10.0);
    filter.set_area_cost(POLYAREA_ROAD, 1.0);
    filter.set_area_cost(POLYAREA_DOOR, 1.0);
    filter.set_area_cost(POLYAREA_GRASS, 2.0);
    filter.set_area_cost(POLYAREA_JUMP, 1.5);
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_for_area() {
        assert_eq!(flags_for_area(POLYAREA_GROUND), POLYFLAGS_WALK);
        assert_eq!(flags_for_area(POLYAREA_WATER), POLYFLAGS_SWIM);
        assert_eq!(flags_for_area(POLYAREA_DOOR), POLYFLAGS_WALK | POLYFLAGS_DOOR);
        assert_eq!(flags_for_area(POLYAREA_JUMP), POLYFLAGS_JUMP);
        assert_eq!(flags_for_area(42), 0);
    }

    #[test]
    fn test_default_filter_skips_disabled() {
        let filter = default_filter();
        assert!(filter.pass_flags(POLYFLAGS_WALK));
        assert!(!filter.pass_flags(POLYFLAGS_WALK | POLYFLAGS_DISABLED));
        assert_eq!(filter.area_cost(POLYAREA_WATER), 10.0);
    }
}
