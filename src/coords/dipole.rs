use crate::{
    coords::{MagneticTransform, subsolar_point, wrap_angle},
    math::T,
};
use chrono::NaiveDateTime;
use nalgebra::{RealField, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Geographic latitude of the northern dipole pole (in degrees).
pub const DIPOLE_POLE_LAT: f64 = 80.65;

/// Geographic longitude of the northern dipole pole (in degrees).
pub const DIPOLE_POLE_LON: f64 = -72.68;

/// Geomagnetic coordinates of a centred dipole.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct CentredDipole<T> {
    /// Geographic co-latitude of the dipole pole (in radians).
    pub pole_colat: T,

    /// Geographic longitude of the dipole pole (in radians).
    pub pole_lon: T,
}

impl<T> Default for CentredDipole<T>
where
    T: Copy + RealField,
{
    fn default() -> Self {
        Self::new(
            T!((90.0 - DIPOLE_POLE_LAT).to_radians()),
            T!(DIPOLE_POLE_LON.to_radians()),
        )
    }
}

impl<T> CentredDipole<T>
where
    T: Copy + RealField,
{
    /// Returns the magnetic co-latitude and magnetic longitude of a geographic position.
    pub fn geo2mag(&self, colat: T, lon: T) -> (T, T) {
        let position = Vector3::new(
            colat.sin() * lon.cos(),
            colat.sin() * lon.sin(),
            colat.cos(),
        );

        let rotated = self.rotation().transform_vector(&position);

        (
            rotated[2].clamp(-T::one(), T::one()).acos(),
            rotated[1].atan2(rotated[0]),
        )
    }

    /// Returns the MLT angle in `[0, 2π)` of the magnetic longitude `mlon` at `time`.
    ///
    /// The angle is `π` on the magnetic meridian of the sub-solar point.
    pub fn mlt_angle(&self, mlon: T, time: &NaiveDateTime) -> T {
        let (ss_colat, ss_lon) = subsolar_point(time);
        let (_, ss_mlon) = self.geo2mag(ss_colat, ss_lon);

        wrap_angle(mlon - ss_mlon + T::pi())
    }

    /// Create a new [`CentredDipole`] from the geographic pole position (in radians).
    pub fn new(pole_colat: T, pole_lon: T) -> Self {
        Self {
            pole_colat,
            pole_lon,
        }
    }

    /// Rotation from geographic into geomagnetic cartesian coordinates.
    ///
    /// The pole is first moved onto the zero meridian and then tilted onto the z-axis.
    pub fn rotation(&self) -> UnitQuaternion<T> {
        let rot_z = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -self.pole_lon);
        let rot_y = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -self.pole_colat);

        rot_y * rot_z
    }
}

impl<T> MagneticTransform<T> for CentredDipole<T>
where
    T: Copy + RealField,
{
    fn transform(&self, colat: T, lon: T, time: &NaiveDateTime) -> (T, T) {
        let (mcolat, mlon) = self.geo2mag(colat, lon);

        (mcolat, self.mlt_angle(mlon, time))
    }
}

/// Modified dip (modip) coordinates of a centred dipole.
///
/// The modip latitude follows from `tan μ = I / sqrt(cos φ)`, where `I` is the dipole
/// inclination `tan I = 2 tan(mlat)` and `φ` the geographic latitude.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ModipDipole<T> {
    /// Underlying dipole.
    pub dipole: CentredDipole<T>,
}

impl<T> Default for ModipDipole<T>
where
    T: Copy + RealField,
{
    fn default() -> Self {
        Self::new(CentredDipole::default())
    }
}

impl<T> ModipDipole<T>
where
    T: Copy + RealField,
{
    /// Returns the modip co-latitude of a geographic position.
    pub fn modip_colat(&self, colat: T, mcolat: T) -> T {
        let mlat = T::frac_pi_2() - mcolat;
        let inclination = (T!(2.0) * mlat.sin()).atan2(mlat.cos());

        // cos φ == sin(colat)
        let modip = inclination.atan2(colat.sin().max(T::zero()).sqrt());

        T::frac_pi_2() - modip
    }

    /// Create a new [`ModipDipole`].
    pub fn new(dipole: CentredDipole<T>) -> Self {
        Self { dipole }
    }
}

impl<T> MagneticTransform<T> for ModipDipole<T>
where
    T: Copy + RealField,
{
    fn transform(&self, colat: T, lon: T, time: &NaiveDateTime) -> (T, T) {
        let (mcolat, mlon) = self.dipole.geo2mag(colat, lon);

        (
            self.modip_colat(colat, mcolat),
            self.dipole.mlt_angle(mlon, time),
        )
    }
}

/// Transform geographic co-latitudes and longitudes into centred dipole coordinates,
/// returning the magnetic co-latitudes and MLT angles.
pub fn geo2mag<T>(colat: &[T], lon: &[T], time: &NaiveDateTime) -> (Vec<T>, Vec<T>)
where
    T: Copy + RealField,
{
    CentredDipole::default().transform_all(colat, lon, time)
}

/// Transform geographic co-latitudes and longitudes into modip coordinates,
/// returning the modip co-latitudes and MLT angles.
pub fn geo2modip<T>(colat: &[T], lon: &[T], time: &NaiveDateTime) -> (Vec<T>, Vec<T>)
where
    T: Copy + RealField,
{
    ModipDipole::default().transform_all(colat, lon, time)
}
