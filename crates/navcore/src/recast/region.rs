// region.rs - partition the walkable spans into regions
//
// Three strategies:
// - watershed: flood the distance field from the highest level down; regions
//   grow level by level and new basins seed new regions
// - monotone: per-row sweeps merged with the single region they touch below
// - layers: sweeps merged greedily as long as the merged region does not
//   cover the same column twice
//
// Afterwards small islands are removed and small regions merged into their
// smallest neighbour.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::settings::PartitionType;

use super::compact::CompactHeightfield;
use super::heightfield::{DIR_OFFSET_X, DIR_OFFSET_Z};
use super::{EngineError, RC_NULL_AREA};

const NULL_NEI: u16 = 0xffff;

/// Assign `reg` to every span of the compact heightfield
pub fn build_regions(
    chf: &mut CompactHeightfield,
    partition: PartitionType,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<(), EngineError> {
    let mut src_reg = match partition {
        PartitionType::Watershed => {
            chf.build_distance_field();
            watershed(chf)?
        }
        PartitionType::Monotone => monotone(chf)?,
        PartitionType::Layers => {
            let reg = monotone(chf)?;
            merge_layers(chf, reg)
        }
    };

    let max_regions = merge_and_filter_regions(chf, &mut src_reg, min_region_area, merge_region_area);
    for (span, reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = *reg;
    }
    chf.max_regions = max_regions;
    debug!("Partitioned into {} regions ({:?})", max_regions, partition);
    Ok(())
}

fn next_region_id(id: &mut u16) -> Result<u16, EngineError> {
    if *id == u16::MAX - 1 {
        return Err(EngineError::Engine("region id overflow".to_string()));
    }
    let r = *id;
    *id += 1;
    Ok(r)
}

fn watershed(chf: &CompactHeightfield) -> Result<Vec<u16>, EngineError> {
    let n = chf.span_count();
    let mut src_reg = vec![0u16; n];
    let mut region_id = 1u16;
    let mut level = (chf.max_distance + 1) & !1;

    let mut queue: VecDeque<(i32, i32, usize)> = VecDeque::new();

    while level > 0 {
        level = level.saturating_sub(2);

        // Grow the existing regions into spans of this level
        chf.for_each_span(|x, z, i| {
            if src_reg[i] != 0 {
                queue.push_back((x, z, i));
            }
        });
        flood(chf, &mut src_reg, &mut queue, level);

        // Seed new regions in basins that were not reached
        let mut seeds = Vec::new();
        chf.for_each_span(|x, z, i| {
            if chf.areas[i] != RC_NULL_AREA && chf.dist[i] >= level && src_reg[i] == 0 {
                seeds.push((x, z, i));
            }
        });
        for (x, z, i) in seeds {
            if src_reg[i] != 0 {
                continue;
            }
            src_reg[i] = next_region_id(&mut region_id)?;
            queue.push_back((x, z, i));
            flood(chf, &mut src_reg, &mut queue, level);
        }
    }
    Ok(src_reg)
}

/// Breadth-first growth of the queued spans' regions over unassigned spans
/// of the same area with distance >= level
fn flood(chf: &CompactHeightfield, src_reg: &mut [u16], queue: &mut VecDeque<(i32, i32, usize)>, level: u16) {
    while let Some((x, z, i)) = queue.pop_front() {
        let r = src_reg[i];
        let area = chf.areas[i];
        for dir in 0..4 {
            let Some(ni) = chf.neighbour(x, z, i, dir) else { continue };
            if src_reg[ni] != 0 || chf.areas[ni] != area || chf.dist[ni] < level {
                continue;
            }
            src_reg[ni] = r;
            queue.push_back((x + DIR_OFFSET_X[dir], z + DIR_OFFSET_Z[dir], ni));
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Sweep {
    id: u16,
    ns: u16,
    nei: u16,
}

fn monotone(chf: &CompactHeightfield) -> Result<Vec<u16>, EngineError> {
    let mut src_reg = vec![0u16; chf.span_count()];
    let mut id = 1u16;
    let mut sweeps: Vec<Sweep> = Vec::new();
    let mut prev: Vec<u16> = Vec::new();

    for z in 0..chf.height {
        sweeps.clear();
        sweeps.push(Sweep::default());
        prev.clear();
        prev.resize(id as usize + 1, 0);
        let mut rid = 1u16;

        for x in 0..chf.width {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] == RC_NULL_AREA {
                    continue;
                }

                // -x neighbour belongs to the current row sweep
                let mut previd = 0u16;
                if let Some(ai) = chf.neighbour(x, z, i, 0)
                    && chf.areas[ai] == chf.areas[i]
                {
                    previd = src_reg[ai];
                }
                if previd == 0 {
                    previd = rid;
                    rid = rid.checked_add(1).ok_or_else(|| EngineError::Engine("too many sweeps".into()))?;
                    sweeps.push(Sweep::default());
                }

                // -z neighbour is a region id from the previous row
                if let Some(ai) = chf.neighbour(x, z, i, 3)
                    && chf.areas[ai] == chf.areas[i]
                {
                    let nr = src_reg[ai];
                    if nr != 0 {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // A sweep continues the region below when it is the only sweep touching it
        for sweep in sweeps.iter_mut().skip(1) {
            if sweep.nei != NULL_NEI && sweep.nei != 0 && prev[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                sweep.id = next_region_id(&mut id)?;
            }
        }

        for x in 0..chf.width {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                let r = src_reg[i];
                if r > 0 && r < rid {
                    src_reg[i] = sweeps[r as usize].id;
                }
            }
        }
    }
    Ok(src_reg)
}

fn find_root(parent: &mut [u16], mut r: u16) -> u16 {
    while parent[r as usize] != r {
        parent[r as usize] = parent[parent[r as usize] as usize];
        r = parent[r as usize];
    }
    r
}

/// Merge adjacent regions whose column footprints are disjoint
fn merge_layers(chf: &CompactHeightfield, mut src_reg: Vec<u16>) -> Vec<u16> {
    let max_id = src_reg.iter().copied().max().unwrap_or(0) as usize;
    let mut parent: Vec<u16> = (0..=max_id as u16).collect();
    let mut columns: Vec<HashSet<usize>> = vec![HashSet::new(); max_id + 1];

    chf.for_each_span(|x, z, i| {
        if src_reg[i] != 0 {
            columns[src_reg[i] as usize].insert((x + z * chf.width) as usize);
        }
    });

    let mut pairs: Vec<(u16, u16)> = Vec::new();
    chf.for_each_span(|x, z, i| {
        let r = src_reg[i];
        if r == 0 {
            return;
        }
        for dir in 0..4 {
            if let Some(ni) = chf.neighbour(x, z, i, dir) {
                let nr = src_reg[ni];
                if nr != 0 && nr != r && chf.areas[ni] == chf.areas[i] {
                    pairs.push((r.min(nr), r.max(nr)));
                }
            }
        }
    });
    pairs.sort_unstable();
    pairs.dedup();

    for (a, b) in pairs {
        let ra = find_root(&mut parent, a);
        let rb = find_root(&mut parent, b);
        if ra == rb || !columns[ra as usize].is_disjoint(&columns[rb as usize]) {
            continue;
        }
        let (keep, gone) = (ra.min(rb), ra.max(rb));
        let moved = std::mem::take(&mut columns[gone as usize]);
        columns[keep as usize].extend(moved);
        parent[gone as usize] = keep;
    }

    for r in src_reg.iter_mut() {
        if *r != 0 {
            *r = find_root(&mut parent, *r);
        }
    }
    src_reg
}

/// Remove islands smaller than `min_area`, merge regions smaller than
/// `merge_area` into their smallest neighbour, then compact the ids.
/// Returns the number of regions left.
fn merge_and_filter_regions(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    min_area: i32,
    merge_area: i32,
) -> u16 {
    let nreg = src_reg.iter().copied().max().unwrap_or(0) as usize + 1;
    let mut area = vec![0i32; nreg];
    let mut neighbours: Vec<HashSet<u16>> = vec![HashSet::new(); nreg];

    chf.for_each_span(|x, z, i| {
        let r = src_reg[i];
        if r == 0 {
            return;
        }
        area[r as usize] += 1;
        for dir in 0..4 {
            if let Some(ni) = chf.neighbour(x, z, i, dir) {
                let nr = src_reg[ni];
                if nr != 0 && nr != r {
                    neighbours[r as usize].insert(nr);
                }
            }
        }
    });

    // Remove connected groups of regions that are too small in total
    let mut visited = vec![false; nreg];
    let mut removed = vec![false; nreg];
    for start in 1..nreg {
        if visited[start] || area[start] == 0 {
            continue;
        }
        let mut group = vec![start as u16];
        let mut stack = vec![start as u16];
        visited[start] = true;
        let mut total = 0;
        while let Some(r) = stack.pop() {
            total += area[r as usize];
            for &nr in &neighbours[r as usize] {
                if !visited[nr as usize] {
                    visited[nr as usize] = true;
                    group.push(nr);
                    stack.push(nr);
                }
            }
        }
        if total < min_area {
            for r in group {
                removed[r as usize] = true;
            }
        }
    }

    // Merge small regions, smallest neighbour first
    let mut remap: Vec<u16> = (0..nreg as u16).collect();
    for r in 1..nreg {
        if removed[r] {
            area[r] = 0;
            remap[r] = 0;
        }
    }
    loop {
        let mut merged = false;
        for r in 1..nreg {
            if area[r] == 0 || area[r] >= merge_area {
                continue;
            }
            let target = neighbours[r]
                .iter()
                .map(|&nr| nr as usize)
                .filter(|&nr| nr != r && area[nr] > 0)
                .min_by_key(|&nr| (area[nr], nr));
            let Some(target) = target else { continue };

            area[target] += area[r];
            area[r] = 0;
            let moved = std::mem::take(&mut neighbours[r]);
            for nr in moved {
                let nr = nr as usize;
                if nr != target {
                    neighbours[target].insert(nr as u16);
                    neighbours[nr].remove(&(r as u16));
                    neighbours[nr].insert(target as u16);
                }
            }
            neighbours[target].remove(&(r as u16));
            for m in remap.iter_mut() {
                if *m == r as u16 {
                    *m = target as u16;
                }
            }
            merged = true;
        }
        if !merged {
            break;
        }
    }

    // Compact ids
    let mut compact = vec![0u16; nreg];
    let mut next = 1u16;
    for r in 1..nreg {
        if area[r] > 0 {
            compact[r] = next;
            next += 1;
        }
    }
    for reg in src_reg.iter_mut() {
        *reg = compact[remap[*reg as usize] as usize];
    }
    next - 1
}
