use bitflags::bitflags;

bitflags! {
    /// Per-sample quality bits. Stages only ever add bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QualityFlags: u8 {
        /// Sample excluded by upstream acquisition or a later stage.
        const BAD_SAMPLE = 1 << 0;
        /// The whole detector is excluded.
        const BAD_DETECTOR = 1 << 1;
        /// Sigma-clipped outlier.
        const SPIKE = 1 << 2;
        /// A level shift was repaired starting at this sample.
        const STEP = 1 << 3;
    }
}

impl QualityFlags {
    /// Bits that remove a sample from statistics and fits.
    pub const EXCLUDED: Self = Self::BAD_SAMPLE
        .union(Self::BAD_DETECTOR)
        .union(Self::SPIKE);

    pub fn is_valid(self) -> bool {
        !self.intersects(Self::EXCLUDED)
    }
}
