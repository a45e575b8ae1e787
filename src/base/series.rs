use crate::base::MosgimError;
use itertools::izip;
use log::debug;
use nalgebra::RealField;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// A single differenced TEC observation between a current and a reference ray of the same arc.
///
/// All angles are in radians, all times in seconds since the start of the analysis window.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TecObs<T> {
    /// Time of the current ray.
    pub time: T,
    /// Magnetic local time angle of the current ray.
    pub mlt: T,
    /// Magnetic co-latitude of the current ray.
    pub mcolat: T,
    /// Elevation angle of the current ray.
    pub el: T,
    /// Time of the reference ray.
    pub time_ref: T,
    /// Magnetic local time angle of the reference ray.
    pub mlt_ref: T,
    /// Magnetic co-latitude of the reference ray.
    pub mcolat_ref: T,
    /// Elevation angle of the reference ray.
    pub el_ref: T,
    /// Differenced TEC value (current - reference).
    pub rhs: T,
}

/// A series of differenced TEC observations, stored as index-aligned arrays.
///
/// The serialized form is a mapping with the keys `time, mlt, mcolat, el, time_ref, mlt_ref,
/// mcolat_ref, el_ref, rhs`. Deserialization checks the index alignment.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(bound(deserialize = "T: Copy + RealField + Deserialize<'de>"))]
#[serde(try_from = "TecObsArrays<T>")]
pub struct TecObsSeries<T> {
    time: Vec<T>,
    mlt: Vec<T>,
    mcolat: Vec<T>,
    el: Vec<T>,
    time_ref: Vec<T>,
    mlt_ref: Vec<T>,
    mcolat_ref: Vec<T>,
    el_ref: Vec<T>,
    rhs: Vec<T>,
}

/// Unchecked serialized form of a [`TecObsSeries`].
#[derive(Deserialize)]
struct TecObsArrays<T> {
    time: Vec<T>,
    mlt: Vec<T>,
    mcolat: Vec<T>,
    el: Vec<T>,
    time_ref: Vec<T>,
    mlt_ref: Vec<T>,
    mcolat_ref: Vec<T>,
    el_ref: Vec<T>,
    rhs: Vec<T>,
}

impl<T> TryFrom<TecObsArrays<T>> for TecObsSeries<T>
where
    T: Copy + RealField,
{
    type Error = MosgimError<T>;

    fn try_from(value: TecObsArrays<T>) -> Result<Self, Self::Error> {
        Self::new(
            value.time,
            value.mlt,
            value.mcolat,
            value.el,
            value.time_ref,
            value.mlt_ref,
            value.mcolat_ref,
            value.el_ref,
            value.rhs,
        )
    }
}

impl<T> TecObsSeries<T>
where
    T: Copy + RealField,
{
    /// Returns the observation arrays together with their names.
    pub fn arrays(&self) -> [(&'static str, &[T]); 9] {
        [
            ("time", self.time.as_slice()),
            ("mlt", self.mlt.as_slice()),
            ("mcolat", self.mcolat.as_slice()),
            ("el", self.el.as_slice()),
            ("time_ref", self.time_ref.as_slice()),
            ("mlt_ref", self.mlt_ref.as_slice()),
            ("mcolat_ref", self.mcolat_ref.as_slice()),
            ("el_ref", self.el_ref.as_slice()),
            ("rhs", self.rhs.as_slice()),
        ]
    }

    /// Elevation angles of the current rays.
    pub fn el(&self) -> &[T] {
        &self.el
    }

    /// Elevation angles of the reference rays.
    pub fn el_ref(&self) -> &[T] {
        &self.el_ref
    }

    /// Returns the observation at `index`.
    pub fn get(&self, index: usize) -> Option<TecObs<T>> {
        (index < self.len()).then(|| TecObs {
            time: self.time[index],
            mlt: self.mlt[index],
            mcolat: self.mcolat[index],
            el: self.el[index],
            time_ref: self.time_ref[index],
            mlt_ref: self.mlt_ref[index],
            mcolat_ref: self.mcolat_ref[index],
            el_ref: self.el_ref[index],
            rhs: self.rhs[index],
        })
    }

    /// Returns `true` if the series contains no observations.
    pub fn is_empty(&self) -> bool {
        self.rhs.is_empty()
    }

    /// Iterate over all observations.
    pub fn iter(&self) -> impl Iterator<Item = TecObs<T>> + '_ {
        izip!(
            &self.time,
            &self.mlt,
            &self.mcolat,
            &self.el,
            &self.time_ref,
            &self.mlt_ref,
            &self.mcolat_ref,
            &self.el_ref,
            &self.rhs
        )
        .map(
            |(&time, &mlt, &mcolat, &el, &time_ref, &mlt_ref, &mcolat_ref, &el_ref, &rhs)| TecObs {
                time,
                mlt,
                mcolat,
                el,
                time_ref,
                mlt_ref,
                mcolat_ref,
                el_ref,
                rhs,
            },
        )
    }

    /// Returns the number of observations.
    pub fn len(&self) -> usize {
        self.rhs.len()
    }

    /// Magnetic co-latitudes of the current rays.
    pub fn mcolat(&self) -> &[T] {
        &self.mcolat
    }

    /// Magnetic co-latitudes of the reference rays.
    pub fn mcolat_ref(&self) -> &[T] {
        &self.mcolat_ref
    }

    /// Magnetic local time angles of the current rays.
    pub fn mlt(&self) -> &[T] {
        &self.mlt
    }

    /// Magnetic local time angles of the reference rays.
    pub fn mlt_ref(&self) -> &[T] {
        &self.mlt_ref
    }

    /// Create a new [`TecObsSeries`] from the individual arrays.
    ///
    /// Returns an error if the array lengths do not match.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time: Vec<T>,
        mlt: Vec<T>,
        mcolat: Vec<T>,
        el: Vec<T>,
        time_ref: Vec<T>,
        mlt_ref: Vec<T>,
        mcolat_ref: Vec<T>,
        el_ref: Vec<T>,
        rhs: Vec<T>,
    ) -> Result<Self, MosgimError<T>> {
        let series = Self {
            time,
            mlt,
            mcolat,
            el,
            time_ref,
            mlt_ref,
            mcolat_ref,
            el_ref,
            rhs,
        };

        series.check_alignment()?;

        Ok(series)
    }

    /// Differenced TEC values.
    pub fn rhs(&self) -> &[T] {
        &self.rhs
    }

    /// Split the series into `nchunks` contiguous, index-aligned partitions.
    ///
    /// The first `len % nchunks` partitions hold one additional observation. Observations are
    /// never reordered.
    pub fn split(&self, nchunks: usize) -> Vec<Self> {
        let nchunks = nchunks.max(1);

        let base = self.len() / nchunks;
        let extra = self.len() % nchunks;

        let mut start = 0;

        (0..nchunks)
            .map(|cdx| {
                let end = start + base + usize::from(cdx < extra);
                let range = start..end;

                start = end;

                Self {
                    time: self.time[range.clone()].to_vec(),
                    mlt: self.mlt[range.clone()].to_vec(),
                    mcolat: self.mcolat[range.clone()].to_vec(),
                    el: self.el[range.clone()].to_vec(),
                    time_ref: self.time_ref[range.clone()].to_vec(),
                    mlt_ref: self.mlt_ref[range.clone()].to_vec(),
                    mcolat_ref: self.mcolat_ref[range.clone()].to_vec(),
                    el_ref: self.el_ref[range.clone()].to_vec(),
                    rhs: self.rhs[range].to_vec(),
                }
            })
            .collect()
    }

    /// Times of the current rays.
    pub fn time(&self) -> &[T] {
        &self.time
    }

    /// Times of the reference rays.
    pub fn time_ref(&self) -> &[T] {
        &self.time_ref
    }

    /// Check the series for misaligned arrays, non-finite values, non-positive elevations and
    /// times that are outside of the analysis window `[0, window)`.
    pub fn validate(&self, window: T) -> Result<(), MosgimError<T>> {
        self.check_alignment()?;

        for (field, array) in self.arrays() {
            if let Some(index) = array.iter().position(|value| !value.is_finite()) {
                return Err(MosgimError::NonFinite { field, index });
            }
        }

        for (field, array) in [("el", &self.el), ("el_ref", &self.el_ref)] {
            if let Some(index) = array.iter().position(|el| *el <= T::zero()) {
                return Err(MosgimError::ElevationOutOfRange {
                    field,
                    index,
                    el: array[index],
                });
            }
        }

        for (field, array) in [("time", &self.time), ("time_ref", &self.time_ref)] {
            if let Some(index) = array
                .iter()
                .position(|time| (*time < T::zero()) || (*time >= window))
            {
                return Err(MosgimError::TimeOutOfRange {
                    field,
                    index,
                    time: array[index],
                    window,
                });
            }
        }

        Ok(())
    }

    /// Returns a copy of the series with a replaced right-hand side.
    pub fn with_rhs(&self, rhs: Vec<T>) -> Result<Self, MosgimError<T>> {
        let mut series = self.clone();
        series.rhs = rhs;

        series.check_alignment()?;

        Ok(series)
    }

    fn check_alignment(&self) -> Result<(), MosgimError<T>> {
        let expected = self.len();

        for (field, array) in self.arrays() {
            if array.len() != expected {
                return Err(MosgimError::InputShape {
                    field,
                    expected,
                    found: array.len(),
                });
            }
        }

        Ok(())
    }
}

impl<T> Add for TecObsSeries<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        let mut series = self;

        series += rhs;

        series
    }
}

impl<T> AddAssign for TecObsSeries<T> {
    fn add_assign(&mut self, rhs: Self) {
        debug!(
            "merging two TecObsSeries objects ({} + {})",
            self.rhs.len(),
            rhs.rhs.len()
        );

        self.time.extend(rhs.time);
        self.mlt.extend(rhs.mlt);
        self.mcolat.extend(rhs.mcolat);
        self.el.extend(rhs.el);
        self.time_ref.extend(rhs.time_ref);
        self.mlt_ref.extend(rhs.mlt_ref);
        self.mcolat_ref.extend(rhs.mcolat_ref);
        self.el_ref.extend(rhs.el_ref);
        self.rhs.extend(rhs.rhs);
    }
}

impl<T> FromIterator<TecObs<T>> for TecObsSeries<T> {
    fn from_iter<I: IntoIterator<Item = TecObs<T>>>(iter: I) -> Self {
        let mut series = Self {
            time: Vec::new(),
            mlt: Vec::new(),
            mcolat: Vec::new(),
            el: Vec::new(),
            time_ref: Vec::new(),
            mlt_ref: Vec::new(),
            mcolat_ref: Vec::new(),
            el_ref: Vec::new(),
            rhs: Vec::new(),
        };

        for obs in iter {
            series.time.push(obs.time);
            series.mlt.push(obs.mlt);
            series.mcolat.push(obs.mcolat);
            series.el.push(obs.el);
            series.time_ref.push(obs.time_ref);
            series.mlt_ref.push(obs.mlt_ref);
            series.mcolat_ref.push(obs.mcolat_ref);
            series.el_ref.push(obs.el_ref);
            series.rhs.push(obs.rhs);
        }

        series
    }
}
