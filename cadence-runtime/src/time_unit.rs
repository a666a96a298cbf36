use std::time::Duration;

/// Time unit accepted in duration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl std::str::FromStr for TimeUnit {
    type Err = String;

    /// Only full lowercase names are accepted here; shorthand suffixes
    /// go through [`TimeUnit::parse_duration`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "milliseconds" => Ok(TimeUnit::Milliseconds),
            "seconds" => Ok(TimeUnit::Seconds),
            "minutes" => Ok(TimeUnit::Minutes),
            "hours" => Ok(TimeUnit::Hours),
            _ => Err(format!("Invalid time unit: {}", s)),
        }
    }
}

impl TimeUnit {
    /// `None` when the amount does not fit in a `Duration`.
    pub fn to_duration(&self, value: u64) -> Option<Duration> {
        match self {
            TimeUnit::Milliseconds => Some(Duration::from_millis(value)),
            TimeUnit::Seconds => Some(Duration::from_secs(value)),
            TimeUnit::Minutes => value.checked_mul(60).map(Duration::from_secs),
            TimeUnit::Hours => value.checked_mul(3_600).map(Duration::from_secs),
        }
    }

    /// Parse shorthand like "250ms", "5s", "10m" or "2h".
    ///
    /// Suffixes are lowercase only and must follow the number directly.
    pub fn parse_duration(s: &str) -> Option<(u64, TimeUnit)> {
        let s = s.trim();
        let split_pos = s.find(|c: char| !c.is_ascii_digit())?;
        if split_pos == 0 {
            return None;
        }

        let (num_str, unit_str) = s.split_at(split_pos);
        let value = num_str.parse::<u64>().ok()?;
        let time_unit = match unit_str {
            "ms" => TimeUnit::Milliseconds,
            "s" => TimeUnit::Seconds,
            "m" => TimeUnit::Minutes,
            "h" => TimeUnit::Hours,
            _ => return None,
        };

        Some((value, time_unit))
    }
}

/// Read a duration setting: shorthand with a suffix, or a plain number in
/// milliseconds.
pub fn parse_duration_setting(value: &str) -> Option<Duration> {
    if let Some((amount, unit)) = TimeUnit::parse_duration(value) {
        return unit.to_duration(amount);
    }
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_suffixes() {
        assert_eq!(TimeUnit::parse_duration("500ms"), Some((500, TimeUnit::Milliseconds)));
        assert_eq!(TimeUnit::parse_duration("5s"), Some((5, TimeUnit::Seconds)));
        assert_eq!(TimeUnit::parse_duration("10m"), Some((10, TimeUnit::Minutes)));
        assert_eq!(TimeUnit::parse_duration("2h"), Some((2, TimeUnit::Hours)));
        assert_eq!(TimeUnit::parse_duration("5S"), None);
        assert_eq!(TimeUnit::parse_duration("s"), None);
        assert_eq!(TimeUnit::parse_duration("15"), None);
    }

    #[test]
    fn plain_numbers_are_milliseconds() {
        assert_eq!(parse_duration_setting("16"), Some(Duration::from_millis(16)));
        assert_eq!(parse_duration_setting("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration_setting("soon"), None);
    }

    #[test]
    fn oversized_amounts_are_rejected() {
        assert_eq!(parse_duration_setting("400000000000000000m"), None);
        assert_eq!(parse_duration_setting("6000000000000000h"), None);
        assert_eq!(
            TimeUnit::Minutes.to_duration(u64::MAX / 60),
            Some(Duration::from_secs(u64::MAX / 60 * 60))
        );
        assert_eq!(
            parse_duration_setting("18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn full_names_parse() {
        assert_eq!("Seconds".parse::<TimeUnit>(), Ok(TimeUnit::Seconds));
        assert!("fortnights".parse::<TimeUnit>().is_err());
    }
}
