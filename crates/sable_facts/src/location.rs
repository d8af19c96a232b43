//! Locations name a dereferenced sub-part of a value.

use std::fmt;

use smallvec::SmallVec;

/// One dereference: read `width` bytes at `offset` from the current pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Indirection {
    pub offset: i64,
    pub width: u32,
}

/// A chain of indirections starting at a value. The empty chain is the value
/// itself.
///
/// `[(8, 8), (0, 4)]` is the 4 bytes pointed to by the pointer stored at
/// `value + 8`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location(SmallVec<[Indirection; 2]>);

impl Location {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn at(offset: i64, width: u32) -> Self {
        let mut chain = SmallVec::new();
        chain.push(Indirection { offset, width });
        Self(chain)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn indirections(&self) -> &[Indirection] {
        &self.0
    }

    pub fn first(&self) -> Option<Indirection> {
        self.0.first().copied()
    }

    /// `(offset, width) ++ self`
    pub fn prepend(&self, offset: i64, width: u32) -> Self {
        let mut chain = SmallVec::with_capacity(self.0.len() + 1);
        chain.push(Indirection { offset, width });
        chain.extend(self.0.iter().copied());
        Self(chain)
    }

    /// The rest of the chain if it starts with exactly `(offset, width)`.
    pub fn strip_first(&self, offset: i64, width: u32) -> Option<Self> {
        match self.first() {
            Some(first) if first == (Indirection { offset, width }) => {
                Some(Self(self.0[1..].iter().copied().collect()))
            }
            _ => None,
        }
    }

    /// Moves the first indirection by `delta` bytes. The root is unchanged.
    pub fn translate(&self, delta: i64) -> Self {
        let mut chain = self.0.clone();
        if let Some(first) = chain.first_mut() {
            first.offset = first.offset.wrapping_add(delta);
        }
        Self(chain)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("[]");
        }
        for ind in &self.0 {
            write!(f, "[{:+}:{}]", ind.offset, ind.width)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_and_strip() {
        let loc = Location::at(8, 8).prepend(0, 8);
        assert_eq!(loc.indirections().len(), 2);
        assert_eq!(loc.strip_first(0, 8), Some(Location::at(8, 8)));
        assert_eq!(loc.strip_first(0, 4), None);
        assert_eq!(loc.translate(16).first().map(|i| i.offset), Some(16));
        assert_eq!(Location::root().translate(16), Location::root());
        assert_eq!(loc.to_string(), "[+0:8][+8:8]");
    }
}
