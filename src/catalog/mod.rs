//! Primary sensors, sampling density and processing units.
//!
//! The catalog crosses every registered sensor with the months of the campaign
//! period it is valid for. Emission order is part of the contract: sensors in
//! registration order, months chronologically within a sensor. The dispatcher
//! relies on it for deterministic scheduling.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PeriodError;
use crate::period::{MonthRange, Period, DATE_FORMAT};

/// A primary sensor and the window over which its data is usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimarySensor {
    pub name: String,
    validity: Period,
}

impl PrimarySensor {
    /// Creates a sensor valid over `[valid_from, valid_to)`.
    pub fn new(
        name: impl Into<String>,
        valid_from: NaiveDate,
        valid_to: NaiveDate,
    ) -> Result<Self, PeriodError> {
        Ok(Self {
            name: name.into(),
            validity: Period::new(valid_from, valid_to)?,
        })
    }

    /// Parses a sensor from ISO date strings.
    pub fn parse(name: impl Into<String>, valid_from: &str, valid_to: &str) -> Result<Self, PeriodError> {
        Ok(Self {
            name: name.into(),
            validity: Period::parse(valid_from, valid_to)?,
        })
    }

    pub fn valid_from(&self) -> NaiveDate {
        self.validity.start()
    }

    pub fn valid_to(&self) -> NaiveDate {
        self.validity.end()
    }

    /// The validity window as a period.
    pub fn validity(&self) -> &Period {
        &self.validity
    }
}

/// Sub-sampling density. Zero means exhaustive processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub samples_per_month: u64,
}

impl SamplingConfig {
    pub fn new(samples_per_month: u64) -> Self {
        Self { samples_per_month }
    }

    /// Returns true when no cap is applied.
    pub fn is_exhaustive(&self) -> bool {
        self.samples_per_month == 0
    }
}

/// History key of a unit: sensor name plus `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub sensor: String,
    pub month: String,
}

impl UnitKey {
    pub fn new(sensor: impl Into<String>, month: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            month: month.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sensor, self.month)
    }
}

/// The atomic (sensor, month) work item scheduled through every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingUnit {
    pub sensor: PrimarySensor,
    pub month: MonthRange,
}

impl ProcessingUnit {
    pub fn key(&self) -> UnitKey {
        UnitKey::new(&self.sensor.name, self.month.key())
    }

    /// First day covered by this unit, formatted for stage arguments.
    pub fn start_date(&self) -> String {
        self.month.start.format(DATE_FORMAT).to_string()
    }

    /// Exclusive end day of this unit, formatted for stage arguments.
    pub fn end_date(&self) -> String {
        self.month.end.format(DATE_FORMAT).to_string()
    }
}

impl fmt::Display for ProcessingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sensor.name, self.month.key())
    }
}

/// Ordered registry of primary sensors.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Vec<PrimarySensor>,
}

impl SensorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sensor. Registration order is preserved.
    pub fn add(&mut self, sensor: PrimarySensor) {
        self.sensors.push(sensor);
    }

    pub fn sensors(&self) -> &[PrimarySensor] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Lazily enumerates processing units for `period`.
    ///
    /// Sensors whose validity window misses the period contribute nothing.
    /// The sampling density is carried to the stage programs and never
    /// changes which units exist.
    pub fn units_for<'a>(
        &'a self,
        period: &'a Period,
        _sampling: &SamplingConfig,
    ) -> impl Iterator<Item = ProcessingUnit> + 'a {
        self.sensors.iter().flat_map(move |sensor| {
            sensor
                .validity
                .overlap(period)
                .into_iter()
                .flat_map(|active| active.months())
                .map(move |month| ProcessingUnit {
                    sensor: sensor.clone(),
                    month,
                })
        })
    }
}

impl FromIterator<PrimarySensor> for SensorCatalog {
    fn from_iter<I: IntoIterator<Item = PrimarySensor>>(iter: I) -> Self {
        Self {
            sensors: iter.into_iter().collect(),
        }
    }
}
