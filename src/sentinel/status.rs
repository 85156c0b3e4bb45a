//! Availability status codec.

use crate::i18n::Localizer;

/// Discrete availability label for a monitor's short window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NoData,
    Good,
    LowAvailability,
    Down,
}

impl Status {
    /// Map an availability percentage in `[0, 100]` to a status.
    ///
    /// The comparisons are strict: exactly 95 maps to `LowAvailability`,
    /// exactly 80 to `Down`.
    pub fn from_percent(percent: u64) -> Self {
        if percent == 0 {
            return Status::NoData;
        }
        if percent > 95 {
            return Status::Good;
        }
        if percent > 80 {
            return Status::LowAvailability;
        }
        Status::Down
    }

    fn message_id(self) -> &'static str {
        match self {
            Status::NoData => "StatusNoData",
            Status::Good => "StatusGood",
            Status::LowAvailability => "StatusLowAvailability",
            Status::Down => "StatusDown",
        }
    }

    /// Render the status name through the localisation table.
    pub fn localized(self, localizer: &dyn Localizer) -> String {
        localizer.must_localize(self.message_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::StaticLocalizer;

    #[test]
    fn test_percent_boundaries() {
        assert_eq!(Status::from_percent(0), Status::NoData);
        assert_eq!(Status::from_percent(80), Status::Down);
        assert_eq!(Status::from_percent(81), Status::LowAvailability);
        assert_eq!(Status::from_percent(95), Status::LowAvailability);
        assert_eq!(Status::from_percent(96), Status::Good);
        assert_eq!(Status::from_percent(100), Status::Good);
        assert_eq!(Status::from_percent(33), Status::Down);
    }

    #[test]
    fn test_localized_names() {
        let l = StaticLocalizer::new();
        assert_eq!(Status::Good.localized(&l), "Good");
        assert_eq!(Status::NoData.localized(&l), "No Data");
        assert_eq!(Status::Down.localized(&l), "Down");
    }
}
