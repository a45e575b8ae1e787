use crate::math::T;
use chrono::{Datelike, NaiveDateTime, Timelike};
use nalgebra::RealField;
use std::f64::consts::{FRAC_PI_2, PI};

/// Returns the geographic co-latitude and longitude (in radians) of the sub-solar point.
///
/// Uses the approximate solar declination `23.45° * sin(2π (284 + doy) / 365)` and places the
/// sub-solar meridian at 12:00 local solar time.
pub fn subsolar_point<T>(time: &NaiveDateTime) -> (T, T)
where
    T: Copy + RealField,
{
    let day_of_year = time.ordinal() as f64;

    let hours = time.num_seconds_from_midnight() as f64 / 3600.0;

    let declination = (23.45 * (2.0 * PI * (284.0 + day_of_year) / 365.0).sin()).to_radians();
    let longitude = ((12.0 - hours) * 15.0).to_radians();

    (T!(FRAC_PI_2 - declination), T!(longitude))
}
