//! Deterministic value generation from provider patterns.
//!
//! A provider pattern such as `95{value}` combined with
//! `Digits { width: 2, start: 1 }` yields `9501`, `9502`, ... The first
//! candidate not present in the caller supplied `used` set wins, so the same
//! set of existing allocations always produces the same value.

use std::collections::BTreeSet;

use crate::core::resource::{Capability, CapabilityKind, Resource, ValueSequence, VALUE_TOKEN};
use crate::core::ValueError;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Parsed value provider capability of one resource.
#[derive(Debug, Clone)]
pub struct ValueAllocator<'a> {
    provider: &'a str,
    pattern: &'a str,
    sequence: ValueSequence,
}

impl<'a> ValueAllocator<'a> {
    /// Allocator for the first value-provider capability of `resource`.
    #[must_use]
    pub fn for_resource(resource: &'a Resource) -> Option<Self> {
        match resource.capability(CapabilityKind::ValueProvider)? {
            Capability::ValueProvider { pattern, sequence } => Some(Self {
                provider: &resource.id,
                pattern,
                sequence: *sequence,
            }),
            _ => None,
        }
    }

    /// Next free value, or the requested one if it is valid and free.
    ///
    /// # Errors
    ///
    /// `NoValueAvailable` when the sequence is exhausted, `InvalidValue` or
    /// `ValueInUse` for a rejected requested value.
    pub fn allocate(
        &self,
        used: &BTreeSet<String>,
        requested: Option<&str>,
    ) -> Result<String, ValueError> {
        if let Some(value) = requested {
            if !self.matches(value) {
                return Err(ValueError::InvalidValue {
                    provider: self.provider.to_string(),
                    value: value.to_string(),
                });
            }
            if used.contains(value) {
                return Err(ValueError::ValueInUse {
                    provider: self.provider.to_string(),
                    value: value.to_string(),
                });
            }
            return Ok(value.to_string());
        }

        self.candidates()
            .map(|candidate| self.render(&candidate))
            .find(|value| !used.contains(value))
            .ok_or_else(|| ValueError::NoValueAvailable {
                provider: self.provider.to_string(),
            })
    }

    /// Whether `value` can be produced by this provider.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        let Some(prefix_len) = self.pattern.find(VALUE_TOKEN) else {
            return false;
        };
        let width = self.width();
        let Some(candidate) = value.get(prefix_len..prefix_len + width) else {
            return false;
        };
        self.is_candidate(candidate) && self.render(candidate) == value
    }

    fn render(&self, candidate: &str) -> String {
        self.pattern.replace(VALUE_TOKEN, candidate)
    }

    const fn width(&self) -> usize {
        match self.sequence {
            ValueSequence::Digits { width, .. } | ValueSequence::Alphanumeric { width } => {
                width as usize
            }
        }
    }

    fn is_candidate(&self, candidate: &str) -> bool {
        match self.sequence {
            ValueSequence::Digits { start, .. } => {
                candidate.bytes().all(|b| b.is_ascii_digit())
                    && candidate.parse::<u64>().is_ok_and(|n| n >= start)
            }
            ValueSequence::Alphanumeric { .. } => {
                candidate.bytes().all(|b| ALPHABET.contains(&b))
            }
        }
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = String> + '_> {
        let width = self.width();
        match self.sequence {
            ValueSequence::Digits { width: w, start } => {
                let end = 10_u64.saturating_pow(w);
                Box::new((start..end).map(move |n| format!("{n:0width$}")))
            }
            ValueSequence::Alphanumeric { width: w } => {
                let end = 36_u64.saturating_pow(w);
                Box::new((0..end).map(move |n| to_base36(n, width)))
            }
        }
    }
}

fn to_base36(mut n: u64, width: usize) -> String {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[usize::try_from(n % 36).unwrap_or_default()];
        n /= 36;
    }
    String::from_utf8(digits).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::Capacity;

    fn provider(pattern: &str, sequence: ValueSequence) -> Resource {
        Resource::new("numbers", Capacity::Unlimited).with_capability(Capability::ValueProvider {
            pattern: pattern.into(),
            sequence,
        })
    }

    #[test]
    fn test_next_value_skips_used() {
        let resource = provider("95{value}", ValueSequence::Digits { width: 2, start: 1 });
        let allocator = ValueAllocator::for_resource(&resource).unwrap();
        let used: BTreeSet<String> = ["9501".to_string()].into();
        assert_eq!(allocator.allocate(&used, None).unwrap(), "9502");
        assert_eq!(allocator.allocate(&BTreeSet::new(), None).unwrap(), "9501");
    }

    #[test]
    fn test_exhausted_sequence() {
        let resource = provider("x{value}", ValueSequence::Digits { width: 1, start: 8 });
        let allocator = ValueAllocator::for_resource(&resource).unwrap();
        let used: BTreeSet<String> = ["x8".to_string(), "x9".to_string()].into();
        assert!(matches!(
            allocator.allocate(&used, None),
            Err(ValueError::NoValueAvailable { .. })
        ));
    }

    #[test]
    fn test_requested_value_validation() {
        let resource = provider("95{value}", ValueSequence::Digits { width: 2, start: 1 });
        let allocator = ValueAllocator::for_resource(&resource).unwrap();
        let used: BTreeSet<String> = ["9507".to_string()].into();
        assert_eq!(allocator.allocate(&used, Some("9542")).unwrap(), "9542");
        assert!(matches!(
            allocator.allocate(&used, Some("9507")),
            Err(ValueError::ValueInUse { .. })
        ));
        assert!(matches!(
            allocator.allocate(&used, Some("9400")),
            Err(ValueError::InvalidValue { .. })
        ));
        assert!(matches!(
            allocator.allocate(&used, Some("9500")),
            Err(ValueError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_alphanumeric_sequence() {
        let resource = provider("room-{value}", ValueSequence::Alphanumeric { width: 3 });
        let allocator = ValueAllocator::for_resource(&resource).unwrap();
        let used: BTreeSet<String> = ["room-000".to_string(), "room-001".to_string()].into();
        assert_eq!(allocator.allocate(&used, None).unwrap(), "room-002");
        assert_eq!(to_base36(36, 3), "010");
        assert!(allocator.matches("room-z9a"));
    }
}
