//! What is known about one location of one value.

use std::fmt;

use sable_ir::{Inst, Value};

/// A value a location is known to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownValue {
    /// Raw bits of a process-lifetime constant.
    Const(u64),
    /// Another SSA value of the same routine.
    Value(Value),
}

impl KnownValue {
    pub fn as_const(self) -> Option<u64> {
        match self {
            KnownValue::Const(bits) => Some(bits),
            KnownValue::Value(_) => None,
        }
    }
}

impl fmt::Display for KnownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnownValue::Const(bits) => write!(f, "{bits:#x}"),
            KnownValue::Value(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Knowledge {
    pub nonzero: bool,
    /// The value is a fresh allocation that aliases nothing else.
    pub heap_alloc: bool,
    pub known_value: Option<KnownValue>,
    /// Instruction the known value is conditioned on. `None` means the value
    /// holds wherever the fact is visible.
    pub known_at: Option<Inst>,
}

impl Knowledge {
    pub fn with_value(value: KnownValue) -> Self {
        Self {
            known_value: Some(value),
            ..Self::default()
        }
    }

    pub fn nonzero() -> Self {
        Self {
            nonzero: true,
            ..Self::default()
        }
    }

    pub fn heap_alloc() -> Self {
        Self {
            heap_alloc: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The known value when it holds unconditionally.
    pub fn unconditional_value(&self) -> Option<KnownValue> {
        match self.known_at {
            None => self.known_value,
            Some(_) => None,
        }
    }

    pub fn has_unconditional_value(&self) -> bool {
        self.unconditional_value().is_some()
    }

    /// Adds everything `other` knows. Returns whether anything changed.
    pub fn union(&mut self, other: &Knowledge) -> bool {
        let before = *self;
        self.nonzero |= other.nonzero;
        self.heap_alloc |= other.heap_alloc;
        if other.known_value.is_some() && !self.has_unconditional_value() {
            self.known_value = other.known_value;
            self.known_at = other.known_at;
        }
        *self != before
    }

    /// Keeps only what both sides know.
    pub fn intersect(&mut self, other: &Knowledge) {
        self.nonzero &= other.nonzero;
        self.heap_alloc &= other.heap_alloc;
        if self.known_value != other.known_value || self.known_at != other.known_at {
            self.known_value = None;
            self.known_at = None;
        }
    }
}

impl fmt::Display for Knowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.nonzero {
            parts.push("nonzero".to_string());
        }
        if self.heap_alloc {
            parts.push("heap_alloc".to_string());
        }
        if let Some(value) = self.known_value {
            match self.known_at {
                Some(at) => parts.push(format!("= {value} @{at}")),
                None => parts.push(format!("= {value}")),
            }
        }
        if parts.is_empty() {
            f.write_str("{}")
        } else {
            write!(f, "{{{}}}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn knowledge() -> impl Strategy<Value = Knowledge> {
        let known_value = prop_oneof![
            Just(None),
            (0u64..3).prop_map(|bits| Some(KnownValue::Const(bits))),
            (0u32..3).prop_map(|n| Some(KnownValue::Value(Value::from_u32(n)))),
        ];
        let known_at = prop_oneof![Just(None), (0u32..2).prop_map(|n| Some(Inst::from_u32(n)))];
        (any::<bool>(), any::<bool>(), known_value, known_at).prop_map(
            |(nonzero, heap_alloc, known_value, known_at)| Knowledge {
                nonzero,
                heap_alloc,
                known_at: known_value.and(known_at),
                known_value,
            },
        )
    }

    proptest! {
        #[test]
        fn test_union_settles_after_one_step(a in knowledge(), b in knowledge()) {
            let mut merged = a;
            merged.union(&b);
            let mut again = merged;
            prop_assert!(!again.union(&b));
            prop_assert!(!again.union(&merged));
            prop_assert!(merged.nonzero == (a.nonzero || b.nonzero));
        }

        #[test]
        fn test_intersect_is_commutative_and_narrowing(a in knowledge(), b in knowledge()) {
            let mut ab = a;
            ab.intersect(&b);
            let mut ba = b;
            ba.intersect(&a);
            prop_assert_eq!(ab, ba);
            prop_assert!(!ab.nonzero || (a.nonzero && b.nonzero));
            if let Some(value) = ab.known_value {
                prop_assert_eq!(a.known_value, Some(value));
                prop_assert_eq!(b.known_value, Some(value));
            }
        }
    }

    #[test]
    fn test_union_keeps_unconditional_value() {
        let mut into = Knowledge::with_value(KnownValue::Const(5));
        let mut other = Knowledge::with_value(KnownValue::Const(7));
        other.nonzero = true;
        assert!(into.union(&other));
        assert_eq!(into.known_value, Some(KnownValue::Const(5)));
        assert!(into.nonzero);
    }

    #[test]
    fn test_intersect_clears_disagreeing_values() {
        let mut five = Knowledge::with_value(KnownValue::Const(5));
        five.heap_alloc = true;
        let mut seven = Knowledge::with_value(KnownValue::Const(7));
        seven.heap_alloc = true;
        five.intersect(&seven);
        assert_eq!(five.known_value, None);
        assert!(five.heap_alloc);
    }
}
