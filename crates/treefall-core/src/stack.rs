//! Ordered stacks of observation rasters.

use std::collections::HashMap;
use std::ops::Range;

use crate::date::ObsDate;
use crate::error::{EngineError, Result};
use crate::raster::Raster;

/// A time-ordered stack of aligned observation rasters.
///
/// Observations are read from band 0 of each raster. The constructor
/// enforces the ordering invariant the per-pixel state machines depend
/// on: dates ascend by `ce`, never the other way around.
#[derive(Debug)]
pub struct ObservationStack {
    rasters: Vec<Raster>,
    dates: Vec<ObsDate>,
}

impl ObservationStack {
    pub fn new(rasters: Vec<Raster>, dates: Vec<ObsDate>) -> Result<Self> {
        if rasters.is_empty() || rasters.len() != dates.len() {
            return Err(EngineError::InvalidConfig(format!(
                "stack needs one date per raster ({} rasters, {} dates)",
                rasters.len(),
                dates.len()
            )));
        }
        for i in 1..dates.len() {
            if dates[i].ce < dates[i - 1].ce {
                return Err(EngineError::UnorderedStack(i));
            }
        }
        Ok(ObservationStack { rasters, dates })
    }

    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    pub fn dates(&self) -> &[ObsDate] {
        &self.dates
    }

    pub fn date(&self, index: usize) -> ObsDate {
        self.dates[index]
    }

    pub fn raster(&self, index: usize) -> &Raster {
        &self.rasters[index]
    }

    /// First raster in the stack; geometry template for outputs.
    pub fn first(&self) -> &Raster {
        &self.rasters[0]
    }

    /// The observation at `(index, pixel)`, nodata filtered out.
    pub fn value(&self, index: usize, pixel: usize) -> Option<i16> {
        self.rasters[index].valid_value(0, pixel)
    }

    /// Number of valid observations at `pixel` across the whole stack.
    pub fn count_valid(&self, pixel: usize) -> usize {
        (0..self.len())
            .filter(|&i| self.value(i, pixel).is_some())
            .count()
    }

    /// Index of the first image acquired in `year`.
    pub fn first_index_of_year(&self, year: i32) -> Option<usize> {
        self.dates.iter().position(|d| d.year == year)
    }

    /// Map every calendar year in the stack to its index range.
    pub fn year_ranges(&self) -> HashMap<i32, Range<usize>> {
        let mut ranges: HashMap<i32, Range<usize>> = HashMap::new();
        for (i, date) in self.dates.iter().enumerate() {
            ranges
                .entry(date.year)
                .and_modify(|r| r.end = i + 1)
                .or_insert(i..i + 1);
        }
        ranges
    }

    /// Error if any image was acquired after `target` year.
    pub fn require_not_after(&self, target: i32) -> Result<()> {
        for (i, date) in self.dates.iter().enumerate() {
            if date.year > target {
                return Err(EngineError::ImageAfterTargetYear {
                    index: i,
                    year: date.year,
                    target,
                });
            }
        }
        Ok(())
    }

    /// Error unless all images share one calendar year; returns it.
    pub fn require_single_year(&self) -> Result<i32> {
        let year = self.dates[0].year;
        for (i, date) in self.dates.iter().enumerate() {
            if date.year != year {
                return Err(EngineError::MixedYears(i));
            }
        }
        Ok(year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::NODATA;
    use chrono::NaiveDate;

    fn date(year: i32, month: u32, day: u32) -> ObsDate {
        ObsDate::from_calendar(NaiveDate::from_ymd_opt(year, month, day).unwrap())
    }

    fn one_pixel_raster(value: i16) -> Raster {
        Raster::from_bands(
            1,
            1,
            NODATA,
            String::new(),
            [0.0; 6],
            vec![vec![value]],
        )
        .unwrap()
    }

    fn stack(dates: Vec<ObsDate>, values: Vec<i16>) -> Result<ObservationStack> {
        let rasters = values.into_iter().map(one_pixel_raster).collect();
        ObservationStack::new(rasters, dates)
    }

    #[test]
    fn rejects_out_of_order_dates() {
        let result = stack(
            vec![date(2018, 6, 1), date(2018, 3, 1)],
            vec![500, 500],
        );
        assert!(matches!(result, Err(EngineError::UnorderedStack(1))));
    }

    #[test]
    fn counts_valid_observations() {
        let s = stack(
            vec![date(2018, 3, 1), date(2018, 6, 1), date(2018, 9, 1)],
            vec![500, NODATA, 520],
        )
        .unwrap();
        assert_eq!(s.count_valid(0), 2);
        assert_eq!(s.value(1, 0), None);
    }

    #[test]
    fn year_ranges_cover_the_stack() {
        let s = stack(
            vec![
                date(2016, 4, 1),
                date(2016, 8, 1),
                date(2017, 5, 1),
                date(2018, 5, 1),
                date(2018, 7, 1),
            ],
            vec![1, 2, 3, 4, 5],
        )
        .unwrap();
        let ranges = s.year_ranges();
        assert_eq!(ranges[&2016], 0..2);
        assert_eq!(ranges[&2017], 2..3);
        assert_eq!(ranges[&2018], 3..5);
        assert!(!ranges.contains_key(&2019));
    }

    #[test]
    fn year_guards() {
        let s = stack(
            vec![date(2017, 5, 1), date(2018, 5, 1)],
            vec![1, 2],
        )
        .unwrap();
        assert!(s.require_not_after(2018).is_ok());
        assert!(matches!(
            s.require_not_after(2017),
            Err(EngineError::ImageAfterTargetYear { index: 1, .. })
        ));
        assert!(matches!(
            s.require_single_year(),
            Err(EngineError::MixedYears(1))
        ));
        assert_eq!(s.first_index_of_year(2018), Some(1));
        assert_eq!(s.first_index_of_year(2019), None);
    }
}
