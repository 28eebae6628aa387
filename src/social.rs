//! Social status codec.
//!
//! Students carry a bitmask of independent social-risk factors. Everything
//! that needs to know about individual bits goes through [`SocialFlags`] and
//! the ordered [`FACTORS`] table; nothing else does bit arithmetic.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SocialFlags: u8 {
        const LOST_BREADWINNER = 0x01;
        const STATE_SUPPORT = 0x02;
        const ORPHAN = 0x04;
        const DISABLED = 0x08;
    }
}

/// One social factor: its bit, display label and risk weight.
#[derive(Debug, Clone, Copy)]
pub struct SocialFactor {
    pub flag: SocialFlags,
    pub label: &'static str,
    pub weight: f64,
}

/// Fixed display order for decoding.
pub const FACTORS: [SocialFactor; 4] = [
    SocialFactor {
        flag: SocialFlags::LOST_BREADWINNER,
        label: "Lost breadwinner",
        weight: 0.3,
    },
    SocialFactor {
        flag: SocialFlags::STATE_SUPPORT,
        label: "State support",
        weight: 0.5,
    },
    SocialFactor {
        flag: SocialFlags::ORPHAN,
        label: "Orphan",
        weight: 0.7,
    },
    SocialFactor {
        flag: SocialFlags::DISABLED,
        label: "Disabled",
        weight: 1.0,
    },
];

pub const NO_FLAGS_LABEL: &str = "None";

impl SocialFlags {
    /// Reads a stored status value. Negative values and unknown bits carry no flags.
    pub fn from_stored(value: i32) -> Self {
        u8::try_from(value)
            .map(SocialFlags::from_bits_truncate)
            .unwrap_or_default()
    }

    pub fn to_stored(self) -> i32 {
        i32::from(self.bits())
    }

    pub fn labels(self) -> Vec<&'static str> {
        FACTORS
            .iter()
            .filter(|factor| self.contains(factor.flag))
            .map(|factor| factor.label)
            .collect()
    }
}

/// Human-readable status: matched labels joined by ", ", or "None".
pub fn decode(flags: SocialFlags) -> String {
    let labels = flags.labels();
    if labels.is_empty() {
        NO_FLAGS_LABEL.to_string()
    } else {
        labels.join(", ")
    }
}

/// The worst single factor dominates; factors do not add up.
pub fn risk_weight(flags: SocialFlags) -> f64 {
    FACTORS
        .iter()
        .filter(|factor| flags.contains(factor.flag))
        .map(|factor| factor.weight)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_lists_set_bits_in_fixed_order() {
        for bits in 0u8..16 {
            let flags = SocialFlags::from_bits_truncate(bits);
            let decoded = decode(flags);
            if bits == 0 {
                assert_eq!(decoded, "None");
                continue;
            }
            let expected: Vec<&str> = FACTORS
                .iter()
                .filter(|factor| bits & factor.flag.bits() != 0)
                .map(|factor| factor.label)
                .collect();
            assert_eq!(decoded, expected.join(", "));
        }
    }

    #[test]
    fn decode_combined_flags() {
        let flags = SocialFlags::DISABLED | SocialFlags::LOST_BREADWINNER;
        assert_eq!(decode(flags), "Lost breadwinner, Disabled");
    }

    #[test]
    fn risk_weight_takes_maximum() {
        assert_eq!(risk_weight(SocialFlags::empty()), 0.0);
        assert_eq!(risk_weight(SocialFlags::STATE_SUPPORT), 0.5);
        assert_eq!(
            risk_weight(SocialFlags::LOST_BREADWINNER | SocialFlags::DISABLED),
            1.0
        );
        assert_eq!(
            risk_weight(SocialFlags::LOST_BREADWINNER | SocialFlags::ORPHAN),
            0.7
        );
    }

    #[test]
    fn stored_values_outside_range_carry_no_flags() {
        assert_eq!(SocialFlags::from_stored(-3), SocialFlags::empty());
        assert_eq!(SocialFlags::from_stored(0x14), SocialFlags::ORPHAN);
        assert_eq!(SocialFlags::from_stored(0x0f).to_stored(), 0x0f);
    }
}
