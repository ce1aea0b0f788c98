bitflags::bitflags! {
    /// `Mode` selects which privilege levels a probe counts events in.
    ///
    /// At least one of [`USER`] or [`KERNEL`] must be set for a probe to be
    /// created.
    ///
    /// [`USER`]: #associatedconstant.USER
    /// [`KERNEL`]: #associatedconstant.KERNEL
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Mode: u8 {
        /// Count events while executing in user mode.
        const USER = 1 << 0;
        /// Count events while executing in kernel mode.
        const KERNEL = 1 << 1;
        /// Count events in every mode.
        const ALL = Self::USER.bits() | Self::KERNEL.bits();
    }
}

impl Mode {
    /// The spelling used in probe names: `user`, `kernel` or `all`.
    ///
    /// An empty mode has no probe-name spelling and returns `None`.
    pub fn name(&self) -> Option<&'static str> {
        if *self == Mode::ALL {
            Some("all")
        } else if *self == Mode::USER {
            Some("user")
        } else if *self == Mode::KERNEL {
            Some("kernel")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(Mode::ALL.name(), Some("all"));
        assert_eq!((Mode::USER | Mode::KERNEL).name(), Some("all"));
        assert_eq!(Mode::USER.name(), Some("user"));
        assert_eq!(Mode::KERNEL.name(), Some("kernel"));
        assert_eq!(Mode::empty().name(), None);
    }
}
