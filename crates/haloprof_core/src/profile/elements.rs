//! Derived per-bin quantities: the direct kinematic accumulators and the
//! postprocessed dispersions and mass profiles.

use nalgebra::Vector3;
use std::f64::consts::PI;

use crate::cloud::Value;
use crate::geometry;
use crate::profile::table::{Statistic, BIN_RADIUS};

/// Per-point evaluation of a direct element: `(velocity, radial offset)`.
pub type DirectFn = fn(&Vector3<f64>, &Vector3<f64>) -> Value;
/// Per-bin evaluation of a postprocessed element from two finished columns.
pub type PostprocessFn = fn(&Value, &Value) -> Value;

/// A named derived per-bin quantity.
///
/// Direct elements accumulate per point during the binning pass.
/// Postprocessed elements are evaluated once per bin after averaging, in
/// declaration order, so they may read averages and earlier postprocessed
/// columns but never later ones.
#[derive(Debug, Clone)]
pub enum ProfileElement {
    Direct {
        base: String,
        components: usize,
        statistic: Statistic,
        func: DirectFn,
    },
    Postprocessed {
        base: String,
        components: usize,
        func: PostprocessFn,
        arg_one: (String, Statistic),
        arg_two: (String, Statistic),
    },
}

impl ProfileElement {
    pub fn direct(base: &str, components: usize, statistic: Statistic, func: DirectFn) -> Self {
        ProfileElement::Direct {
            base: base.to_string(),
            components,
            statistic,
            func,
        }
    }

    pub fn postprocessed(
        base: &str,
        components: usize,
        func: PostprocessFn,
        arg_one: (&str, Statistic),
        arg_two: (&str, Statistic),
    ) -> Self {
        ProfileElement::Postprocessed {
            base: base.to_string(),
            components,
            func,
            arg_one: (arg_one.0.to_string(), arg_one.1),
            arg_two: (arg_two.0.to_string(), arg_two.1),
        }
    }

    pub fn base(&self) -> &str {
        match self {
            ProfileElement::Direct { base, .. } => base,
            ProfileElement::Postprocessed { base, .. } => base,
        }
    }
}

/// The standard astrophysical catalogue: kinematic averages, their
/// dispersions, and the enclosed-mass circular velocity and density.
///
/// `mass_attribute` names the cloud's mass array so the mass-derived
/// elements read the right cumulative column.
pub fn standard_elements(mass_attribute: &str) -> Vec<ProfileElement> {
    vec![
        ProfileElement::direct("angular momentum", 3, Statistic::Average, angular_momentum),
        ProfileElement::direct("radial velocity", 3, Statistic::Average, radial_velocity),
        ProfileElement::direct(
            "tangential velocity",
            3,
            Statistic::Average,
            tangential_velocity,
        ),
        ProfileElement::direct("velocity squared", 1, Statistic::Average, velocity_squared),
        ProfileElement::direct(
            "radial velocity squared",
            1,
            Statistic::Average,
            radial_velocity_squared,
        ),
        ProfileElement::direct(
            "tangential velocity squared",
            1,
            Statistic::Average,
            tangential_velocity_squared,
        ),
        ProfileElement::postprocessed(
            "velocity dispersion",
            3,
            velocity_dispersion,
            ("velocity squared", Statistic::Average),
            ("velocity", Statistic::Average),
        ),
        ProfileElement::postprocessed(
            "radial velocity dispersion",
            3,
            velocity_dispersion,
            ("radial velocity squared", Statistic::Average),
            ("radial velocity", Statistic::Average),
        ),
        ProfileElement::postprocessed(
            "tangential velocity dispersion",
            3,
            velocity_dispersion,
            ("tangential velocity squared", Statistic::Average),
            ("tangential velocity", Statistic::Average),
        ),
        ProfileElement::postprocessed(
            "circular velocity",
            1,
            circular_velocity,
            (mass_attribute, Statistic::Cumulative),
            (BIN_RADIUS, Statistic::Total),
        ),
        ProfileElement::postprocessed(
            "density",
            1,
            density,
            (mass_attribute, Statistic::Cumulative),
            (BIN_RADIUS, Statistic::Total),
        ),
    ]
}

fn angular_momentum(v: &Vector3<f64>, r: &Vector3<f64>) -> Value {
    Value::Vector(geometry::angular_momentum(v, r))
}

fn radial_velocity(v: &Vector3<f64>, r: &Vector3<f64>) -> Value {
    Value::Vector(geometry::project_onto(v, r))
}

fn tangential_velocity(v: &Vector3<f64>, r: &Vector3<f64>) -> Value {
    Value::Vector(v - geometry::project_onto(v, r))
}

fn velocity_squared(v: &Vector3<f64>, _r: &Vector3<f64>) -> Value {
    Value::Scalar(v.norm_squared())
}

fn radial_velocity_squared(v: &Vector3<f64>, r: &Vector3<f64>) -> Value {
    Value::Scalar(geometry::project_onto(v, r).norm_squared())
}

fn tangential_velocity_squared(v: &Vector3<f64>, r: &Vector3<f64>) -> Value {
    Value::Scalar((v - geometry::project_onto(v, r)).norm_squared())
}

/// `sqrt(<q^2> - <q_i>^2)` per component. The squared average is a scalar
/// column and broadcasts across the three components; cancellation can
/// leave a slightly negative variance, which clamps to zero.
fn velocity_dispersion(square_average: &Value, average: &Value) -> Value {
    Value::Vector(Vector3::from_fn(|component, _| {
        let square = square_average.component(component);
        let mean = average.component(component);
        (square - mean * mean).max(0.0).sqrt()
    }))
}

/// `sqrt(M(<=r) / r_outer)` in units with G = 1. Negative enclosed mass
/// clamps to zero rather than producing NaN.
fn circular_velocity(enclosed_mass: &Value, outer_radius: &Value) -> Value {
    let mass = enclosed_mass.component(0).max(0.0);
    let radius = outer_radius.component(0);
    if radius <= 0.0 {
        return Value::Scalar(0.0);
    }
    Value::Scalar((mass / radius).sqrt())
}

/// Mean density of the enclosed mass, `M(<=r) / ((4/3) pi r_outer^3)`.
fn density(enclosed_mass: &Value, outer_radius: &Value) -> Value {
    let mass = enclosed_mass.component(0);
    let radius = outer_radius.component(0);
    if radius <= 0.0 {
        return Value::Scalar(0.0);
    }
    Value::Scalar(mass / (4.0 / 3.0 * PI * radius.powi(3)))
}
