//! Readiness bit set and the opaque tokens handed out by the substrate.

use std::fmt;

// ─── Interest ───────────────────────────────────────────────────────────────

/// A set of readiness conditions on one descriptor registration.
///
/// `INPUT` and `OUTPUT` are the bits a consumer arms and disarms; `ERROR`,
/// `HANGUP` and `INVALID` are delivered by the substrate whether or not they
/// were asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    /// Descriptor has bytes to read.
    pub const INPUT: Interest = Interest(0b0000_0001);
    /// Descriptor can accept bytes.
    pub const OUTPUT: Interest = Interest(0b0000_0010);
    /// Error condition on the descriptor.
    pub const ERROR: Interest = Interest(0b0000_0100);
    /// Peer hung up.
    pub const HANGUP: Interest = Interest(0b0000_1000);
    /// The registration no longer refers to an open descriptor.
    pub const INVALID: Interest = Interest(0b0001_0000);

    /// The bits delivered regardless of what the registration armed.
    pub const ALWAYS: Interest = Interest(0b0001_1100);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is present in `self`.
    pub fn contains(self, other: Interest) -> bool {
        (self.0 & other.0) == other.0
    }

    /// True if any bit of `other` is present in `self`.
    pub fn intersects(self, other: Interest) -> bool {
        (self.0 & other.0) != 0
    }

    /// The union of both sets.
    pub fn with(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    /// `self` with every bit of `other` removed.
    pub fn without(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }

    pub fn is_input(self) -> bool {
        self.intersects(Self::INPUT)
    }

    pub fn is_output(self) -> bool {
        self.intersects(Self::OUTPUT)
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        Interest(self.0 | other.0)
    }
}

impl std::ops::BitAnd for Interest {
    type Output = Self;

    fn bitand(self, other: Self) -> Self {
        Interest(self.0 & other.0)
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        let names = [
            (Self::INPUT, "in"),
            (Self::OUTPUT, "out"),
            (Self::ERROR, "err"),
            (Self::HANGUP, "hup"),
            (Self::INVALID, "inval"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

// ─── Tokens ─────────────────────────────────────────────────────────────────

/// Handle to one descriptor registration with the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Handle to one scheduled (one-shot) timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub usize);

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tm{}", self.0)
    }
}
