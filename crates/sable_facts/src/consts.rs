//! Registry of memory ranges with known properties.

use std::collections::BTreeMap;

use crate::error::FactError;

/// Region flag bits.
pub const IS_CONST: u8 = 1 << 0;
pub const NOT_ZERO: u8 = 1 << 1;

/// Interval map `[start, end) -> flags`.
///
/// Overlapping registrations must carry the same flags and are merged.
#[derive(Debug, Clone, Default)]
pub struct ConstRegions {
    regions: BTreeMap<u64, (u64, u8)>,
}

impl ConstRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn add(&mut self, start: u64, size: u64, flags: u8) -> Result<(), FactError> {
        if size == 0 {
            return Ok(());
        }
        let mut new_start = start;
        let mut new_end = start.saturating_add(size);

        let overlapping: Vec<(u64, u64, u8)> = self
            .regions
            .range(..new_end)
            .rev()
            .take_while(|(_, (end, _))| *end > start)
            .map(|(s, (e, f))| (*s, *e, *f))
            .collect();
        for (s, e, f) in &overlapping {
            if *f != flags {
                return Err(FactError::RegionConflict {
                    start,
                    size,
                    existing: *s,
                });
            }
            new_start = new_start.min(*s);
            new_end = new_end.max(*e);
        }
        for (s, _, _) in overlapping {
            self.regions.remove(&s);
        }
        self.regions.insert(new_start, (new_end, flags));
        Ok(())
    }

    /// The flags of `[address, address + size)` if the whole range is covered
    /// by regions that all carry the same flags.
    pub fn flags(&self, address: u64, size: u64) -> Option<u8> {
        let end = address.checked_add(size)?;
        let mut cursor = address;
        let mut flags = None;
        while cursor < end {
            let (_, (region_end, region_flags)) = self
                .regions
                .range(..=cursor)
                .next_back()
                .filter(|(_, (region_end, _))| *region_end > cursor)?;
            match flags {
                None => flags = Some(*region_flags),
                Some(f) if f != *region_flags => return None,
                Some(_) => {}
            }
            cursor = *region_end;
        }
        flags
    }

    pub fn is_const(&self, address: u64, size: u64) -> bool {
        self.flags(address, size)
            .is_some_and(|flags| flags & IS_CONST != 0)
    }

    pub fn is_not_zero(&self, address: u64, size: u64) -> bool {
        self.flags(address, size)
            .is_some_and(|flags| flags & NOT_ZERO != 0)
    }
}
