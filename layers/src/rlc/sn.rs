//! Sequence number arithmetic
//! 
//! All comparisons are modulo the SN space and only meaningful for numbers
//! less than one window apart. The window never exceeds half the modulus, so
//! "ahead" and "behind" cannot be confused.

use super::RlcError;

/// Sequence number
pub type Sn = u16;

/// Distance from `a` forward to `b`, modulo `modulus`
pub fn distance(a: Sn, b: Sn, modulus: u16) -> u16 {
    debug_assert!(a < modulus && b < modulus, "SN outside [0, {})", modulus);
    ((b as u32 + modulus as u32 - a as u32) % modulus as u32) as u16
}

/// True when `sn` lies in `[start, start + window)`
pub fn in_window(sn: Sn, start: Sn, window: u16, modulus: u16) -> bool {
    distance(start, sn, modulus) < window
}

/// SN space of one direction of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnSpace {
    modulus: u16,
    window: u16,
}

impl SnSpace {
    /// Create an SN space, enforcing `0 < 2 * window <= modulus`
    pub fn new(modulus: u16, window: u16) -> Result<Self, RlcError> {
        if modulus < 2 || !modulus.is_power_of_two() {
            return Err(RlcError::InvalidConfiguration(format!(
                "SN modulus {} is not a power of two",
                modulus
            )));
        }
        if window == 0 || 2 * window as u32 > modulus as u32 {
            return Err(RlcError::InvalidConfiguration(format!(
                "window size {} must be in [1, {}]",
                window,
                modulus / 2
            )));
        }
        Ok(Self { modulus, window })
    }

    pub fn modulus(&self) -> u16 {
        self.modulus
    }

    pub fn window(&self) -> u16 {
        self.window
    }

    /// Forward distance from `a` to `b`
    pub fn distance(&self, a: Sn, b: Sn) -> u16 {
        distance(a, b, self.modulus)
    }

    /// True when `sn` lies in `[start, start + window)`
    pub fn in_window(&self, sn: Sn, start: Sn) -> bool {
        in_window(sn, start, self.window, self.modulus)
    }

    /// True when `a` comes strictly before `b`, both measured from `base`
    pub fn precedes(&self, base: Sn, a: Sn, b: Sn) -> bool {
        self.distance(base, a) < self.distance(base, b)
    }

    pub fn add(&self, sn: Sn, n: u16) -> Sn {
        ((sn as u32 + n as u32) % self.modulus as u32) as Sn
    }

    pub fn sub(&self, sn: Sn, n: u16) -> Sn {
        self.add(sn, self.modulus - (n % self.modulus))
    }

    pub fn next(&self, sn: Sn) -> Sn {
        self.add(sn, 1)
    }

    /// SNs from `start` up to but excluding `end`
    pub fn range(&self, start: Sn, end: Sn) -> impl Iterator<Item = Sn> {
        let space = *self;
        (0..self.distance(start, end)).map(move |i| space.add(start, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_wraps() {
        assert_eq!(distance(1020, 3, 1024), 7);
        assert_eq!(distance(3, 1020, 1024), 1017);
        assert_eq!(distance(5, 5, 32), 0);
    }

    #[test]
    fn test_window_membership_at_edges() {
        let space = SnSpace::new(32, 16).unwrap();
        assert!(space.in_window(30, 30));
        assert!(space.in_window(13, 30));
        assert!(!space.in_window(14, 30));
        assert!(!space.in_window(29, 30));
    }

    #[test]
    fn test_window_bound_enforced() {
        assert!(SnSpace::new(1024, 512).is_ok());
        assert!(SnSpace::new(1024, 513).is_err());
        assert!(SnSpace::new(1000, 16).is_err());
        assert!(SnSpace::new(32, 0).is_err());
    }

    #[test]
    fn test_add_sub_range() {
        let space = SnSpace::new(32, 16).unwrap();
        assert_eq!(space.add(31, 2), 1);
        assert_eq!(space.sub(1, 2), 31);
        assert_eq!(space.range(30, 2).collect::<Vec<_>>(), vec![30, 31, 0, 1]);
        assert!(space.precedes(30, 31, 0));
        assert!(!space.precedes(30, 0, 31));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn proptest_in_window_matches_distance(
                bits in 2u32..=10,
                a in any::<u16>(),
                b in any::<u16>(),
            ) {
                let modulus = 1u16 << bits;
                let space = SnSpace::new(modulus, modulus / 2).unwrap();
                let (a, b) = (a % modulus, b % modulus);
                let d = space.distance(a, b);
                prop_assert_eq!(space.add(a, d), b);
                prop_assert_eq!(space.in_window(b, a), d < modulus / 2);
                // Never ahead of each other in both directions
                if a != b {
                    prop_assert!(!(space.in_window(b, a) && space.in_window(a, b)));
                }
            }

            #[test]
            fn proptest_sub_inverts_add(
                bits in 1u32..=10,
                sn in any::<u16>(),
                n in any::<u16>(),
            ) {
                let modulus = 1u16 << bits;
                let space = SnSpace::new(modulus, modulus / 2).unwrap();
                let sn = sn % modulus;
                prop_assert_eq!(space.sub(space.add(sn, n), n), sn);
            }
        }
    }
}
