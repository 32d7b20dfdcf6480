//! Wind class, burn condition and the slope multiplier table they select.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SsdError};

/// Number of slope bins each multiplier row covers.
pub const SLOPE_BIN_COUNT: usize = 4;

/// One multiplier per slope bin, lowest bin first.
pub type MultiplierRow = [f32; SLOPE_BIN_COUNT];

/// Expected mid-flame wind speed class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindClass {
    Light,
    Moderate,
    High,
}

impl WindClass {
    pub const ALL: [WindClass; 3] = [WindClass::Light, WindClass::Moderate, WindClass::High];

    /// Label used by the tool interface.
    pub fn label(&self) -> &'static str {
        match self {
            WindClass::Light => "Light (0-10 mph)",
            WindClass::Moderate => "Moderate (11-20 mph)",
            WindClass::High => "High (>20 mph)",
        }
    }

    fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for WindClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WindClass {
    type Err = SsdError;

    fn from_str(s: &str) -> Result<Self> {
        let t = s.trim();
        WindClass::ALL
            .into_iter()
            .find(|w| {
                t == w.label() || t.eq_ignore_ascii_case(&format!("{w:?}"))
            })
            .ok_or_else(|| SsdError::UnknownCondition(format!("wind class '{s}'")))
    }
}

/// Burning condition of the surrounding fuels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BurnCondition {
    Low,
    Moderate,
    Extreme,
}

impl BurnCondition {
    pub const ALL: [BurnCondition; 3] =
        [BurnCondition::Low, BurnCondition::Moderate, BurnCondition::Extreme];

    pub fn label(&self) -> &'static str {
        match self {
            BurnCondition::Low => "Low",
            BurnCondition::Moderate => "Moderate",
            BurnCondition::Extreme => "Extreme",
        }
    }

    fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BurnCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BurnCondition {
    type Err = SsdError;

    fn from_str(s: &str) -> Result<Self> {
        let t = s.trim();
        BurnCondition::ALL
            .into_iter()
            .find(|b| t.eq_ignore_ascii_case(b.label()))
            .ok_or_else(|| SsdError::UnknownCondition(format!("burn condition '{s}'")))
    }
}

/// One row of a user-supplied table (config file form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplierEntry {
    pub wind: WindClass,
    pub burn: BurnCondition,
    pub multipliers: MultiplierRow,
}

/// Slope multipliers for every (wind, burn) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplierTable {
    rows: [[MultiplierRow; 3]; 3],
}

impl MultiplierTable {
    /// The standard safety-zone table.
    pub fn standard() -> Self {
        let row = |w: WindClass, b: BurnCondition| -> MultiplierRow {
            match (w, b) {
                (WindClass::Light, BurnCondition::Low) => [0.8, 1.0, 1.0, 2.0],
                (WindClass::Light, BurnCondition::Moderate) => [1.0, 1.0, 1.5, 2.0],
                (WindClass::Light, BurnCondition::Extreme) => [1.0, 1.5, 1.5, 3.0],
                (WindClass::Moderate, BurnCondition::Low) => [1.5, 2.0, 3.0, 4.0],
                (WindClass::Moderate, BurnCondition::Moderate) => [2.0, 2.0, 4.0, 6.0],
                (WindClass::Moderate, BurnCondition::Extreme) => [2.0, 2.5, 5.0, 6.0],
                (WindClass::High, BurnCondition::Low) => [2.5, 3.0, 4.0, 6.0],
                (WindClass::High, BurnCondition::Moderate) => [3.0, 3.0, 5.0, 7.0],
                (WindClass::High, BurnCondition::Extreme) => [3.0, 4.0, 5.0, 10.0],
            }
        };
        Self {
            rows: WindClass::ALL.map(|w| BurnCondition::ALL.map(|b| row(w, b))),
        }
    }

    /// Build a table from explicit entries. All 9 combinations must appear
    /// exactly once and every multiplier must be finite and positive.
    pub fn from_entries(entries: &[MultiplierEntry]) -> Result<Self> {
        let mut rows: [[Option<MultiplierRow>; 3]; 3] = [[None; 3]; 3];
        for e in entries {
            if e.multipliers.iter().any(|m| !m.is_finite() || *m <= 0.0) {
                return Err(SsdError::InvalidInput(format!(
                    "multipliers for {} / {} must be positive",
                    e.wind, e.burn
                )));
            }
            let slot = &mut rows[e.wind.ordinal()][e.burn.ordinal()];
            if slot.replace(e.multipliers).is_some() {
                return Err(SsdError::InvalidInput(format!(
                    "duplicate multiplier row for {} / {}",
                    e.wind, e.burn
                )));
            }
        }

        let mut table = [[[0.0; SLOPE_BIN_COUNT]; 3]; 3];
        for w in WindClass::ALL {
            for b in BurnCondition::ALL {
                table[w.ordinal()][b.ordinal()] = rows[w.ordinal()][b.ordinal()]
                    .ok_or_else(|| SsdError::UnknownCondition(format!("no multiplier row for {w} / {b}")))?;
            }
        }
        Ok(Self { rows: table })
    }

    pub fn row(&self, wind: WindClass, burn: BurnCondition) -> MultiplierRow {
        self.rows[wind.ordinal()][burn.ordinal()]
    }

    /// Look up a row from interface labels.
    pub fn row_for_labels(&self, wind: &str, burn: &str) -> Result<MultiplierRow> {
        Ok(self.row(wind.parse()?, burn.parse()?))
    }
}

impl Default for MultiplierTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_rows_match_the_published_table() {
        let t = MultiplierTable::standard();
        let expected = [
            ("Light (0-10 mph)", "Low", [0.8, 1.0, 1.0, 2.0]),
            ("Light (0-10 mph)", "Moderate", [1.0, 1.0, 1.5, 2.0]),
            ("Light (0-10 mph)", "Extreme", [1.0, 1.5, 1.5, 3.0]),
            ("Moderate (11-20 mph)", "Low", [1.5, 2.0, 3.0, 4.0]),
            ("Moderate (11-20 mph)", "Moderate", [2.0, 2.0, 4.0, 6.0]),
            ("Moderate (11-20 mph)", "Extreme", [2.0, 2.5, 5.0, 6.0]),
            ("High (>20 mph)", "Low", [2.5, 3.0, 4.0, 6.0]),
            ("High (>20 mph)", "Moderate", [3.0, 3.0, 5.0, 7.0]),
            ("High (>20 mph)", "Extreme", [3.0, 4.0, 5.0, 10.0]),
        ];
        for (wind, burn, row) in expected {
            assert_eq!(t.row_for_labels(wind, burn).unwrap(), row, "{wind} / {burn}");
        }
    }

    #[test]
    fn unlisted_combination_is_unknown_condition() {
        let t = MultiplierTable::standard();
        assert!(matches!(
            t.row_for_labels("Gale (>40 mph)", "Low"),
            Err(SsdError::UnknownCondition(_))
        ));
        assert!(matches!(
            t.row_for_labels("High (>20 mph)", "Catastrophic"),
            Err(SsdError::UnknownCondition(_))
        ));
    }

    #[test]
    fn short_names_parse_case_insensitively() {
        assert_eq!("light".parse::<WindClass>().unwrap(), WindClass::Light);
        assert_eq!("HIGH".parse::<WindClass>().unwrap(), WindClass::High);
        assert_eq!("extreme".parse::<BurnCondition>().unwrap(), BurnCondition::Extreme);
    }

    fn full_entries() -> Vec<MultiplierEntry> {
        let standard = MultiplierTable::standard();
        WindClass::ALL
            .into_iter()
            .flat_map(|w| BurnCondition::ALL.into_iter().map(move |b| (w, b)))
            .map(|(wind, burn)| MultiplierEntry { wind, burn, multipliers: standard.row(wind, burn) })
            .collect()
    }

    #[test]
    fn custom_table_requires_all_nine_rows() {
        let mut entries = full_entries();
        assert_eq!(MultiplierTable::from_entries(&entries).unwrap(), MultiplierTable::standard());

        entries.pop();
        assert!(matches!(
            MultiplierTable::from_entries(&entries),
            Err(SsdError::UnknownCondition(_))
        ));
    }

    #[test]
    fn custom_table_rejects_duplicates() {
        let mut entries = full_entries();
        entries.push(entries[0].clone());
        assert!(matches!(MultiplierTable::from_entries(&entries), Err(SsdError::InvalidInput(_))));
    }
}
