//! Parametric periodic foot-trajectory generators.
//!
//! Every gait is the same record: a neutral posture, one precomputed step
//! table per leg, and an iterator index. The builders differ only in how
//! they compose the primitive curves and phase-shift the legs; diagonal
//! (trot), sequential (turn, walk) and synchronous (jump) coordination all
//! come out of the same representation.

pub mod curves;

use crate::quadruped::{LegPositions, QuadrupedTypes};
use nalgebra::Vector3;
use serde::Deserialize;

/// Parameter bundle for one gait, loaded from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GaitParams {
    /// Peak forward foot excursion in mm.
    pub stride: f32,
    /// Peak lift above ground during swing in mm.
    pub clearance: f32,
    /// Angular resolution in degrees; smaller is smoother but more work per
    /// cycle.
    pub step_size: f32,
    #[serde(default)]
    pub turn_bias: Option<f32>,
    /// Optional lateral sway amplitude in mm layered onto the trot.
    #[serde(default)]
    pub sway: Option<f32>,
}

impl GaitParams {
    pub fn new(stride: f32, clearance: f32, step_size: f32) -> Self {
        Self {
            stride,
            clearance,
            step_size,
            turn_bias: None,
            sway: None,
        }
    }

    pub fn with_turn_bias(mut self, turn_bias: f32) -> Self {
        self.turn_bias = Some(turn_bias);
        self
    }

    pub fn with_sway(mut self, sway: f32) -> Self {
        self.sway = Some(sway);
        self
    }

    /// Samples per quarter cycle.
    fn num_steps(&self) -> usize {
        ((90.0 / self.step_size).floor() as usize).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Left,
    Right,
}

/// An infinite, restartable iterator over foot-position matrices.
#[derive(Debug, Clone)]
pub struct Gait {
    p0: LegPositions,
    steps: QuadrupedTypes<Vec<Vector3<f32>>>,
    turn_bias: Option<f32>,
    cycle_len: usize,
    index: usize,
}

impl Gait {
    fn from_tables(
        p0: LegPositions,
        steps: QuadrupedTypes<Vec<Vector3<f32>>>,
        turn_bias: Option<f32>,
    ) -> Self {
        let cycle_len = steps.front_right().len();
        debug_assert!(steps.all_legs().iter().all(|table| table.len() == cycle_len));
        Self {
            p0,
            steps,
            turn_bias,
            cycle_len,
            index: 0,
        }
    }

    /// Diagonal-pair gait. Pair (FR, BL) leads, pair (FL, BR) runs half a
    /// cycle out of phase.
    pub fn trot(
        p0: LegPositions,
        params: &GaitParams,
        reversed: bool,
        turn_bias: Option<f32>,
    ) -> Self {
        let n = params.num_steps();
        let stride = signed_stride(params.stride, reversed);
        let x = scaled(
            &concat(&[
                curves::stride_forward(n),
                curves::stride_home(n),
                curves::stride_back(2 * n),
            ]),
            stride,
        );
        let z = scaled(
            &concat(&[curves::updown(n), curves::zeros(3 * n)]),
            -params.clearance,
        );
        let y = curves::zeros(4 * n);
        let lead = build_table(&x, &y, &z);
        let steps = match params.sway {
            Some(amplitude) => {
                let sway = sway_wave(4 * n, amplitude);
                let lead_swayed = add_y(&lead, &sway);
                let trail_swayed = add_y(&phase_shifted(&lead, 2 * n), &negated(&sway));
                diagonal_pairs(lead_swayed, trail_swayed)
            }
            None => {
                let trail = phase_shifted(&lead, 2 * n);
                diagonal_pairs(lead, trail)
            }
        };
        Gait::from_tables(p0, steps, turn_bias)
    }

    /// Trot shape with the swing carried by y instead of x.
    pub fn sidestep(p0: LegPositions, params: &GaitParams, reversed: bool) -> Self {
        let n = params.num_steps();
        let stride = signed_stride(params.stride, reversed);
        let y = scaled(
            &concat(&[
                curves::stride_forward(n),
                curves::stride_home(n),
                curves::stride_back(2 * n),
            ]),
            stride,
        );
        let z = scaled(
            &concat(&[curves::updown(n), curves::zeros(3 * n)]),
            -params.clearance,
        );
        let x = curves::zeros(4 * n);
        let lead = build_table(&x, &y, &z);
        let trail = phase_shifted(&lead, 2 * n);
        Gait::from_tables(p0, diagonal_pairs(lead, trail), None)
    }

    /// Turn in place. Each leg swings alone in its own fifth of the cycle,
    /// left and right legs sweep opposite ways in y, and the last fifth
    /// returns every foot home together.
    pub fn turn(p0: LegPositions, params: &GaitParams, direction: TurnDirection) -> Self {
        let n = params.num_steps();
        let direction_sign = match direction {
            TurnDirection::Right => 1.0,
            TurnDirection::Left => -1.0,
        };
        let steps = QuadrupedTypes::from_fn(|leg| {
            let side_sign = if leg.is_left() { 1.0 } else { -1.0 };
            let sweep = params.stride * direction_sign * side_sign;
            let slot = leg.index();
            let y = scaled(
                &concat(&[
                    curves::zeros(slot * n),
                    curves::stride_forward(n),
                    vec![1.0; (3 - slot) * n],
                    curves::stride_home(n),
                ]),
                sweep,
            );
            let z = scaled(
                &concat(&[
                    curves::zeros(slot * n),
                    curves::updown(n),
                    curves::zeros((4 - slot) * n),
                ]),
                -params.clearance,
            );
            let x = curves::zeros(5 * n);
            build_table(&x, &y, &z)
        });
        Gait::from_tables(p0, steps, None)
    }

    /// All four legs push down and lift together.
    pub fn jump(p0: LegPositions, params: &GaitParams) -> Self {
        let n = params.num_steps();
        let half: Vec<f32> = curves::deg_linspace(0.0, 180.0, n)
            .into_iter()
            .map(|deg| deg.to_radians().sin())
            .collect();
        let z = concat(&[
            scaled(&half, params.clearance),
            scaled(&half, -params.clearance),
        ]);
        let x = curves::zeros(2 * n);
        let y = curves::zeros(2 * n);
        let table = build_table(&x, &y, &z);
        Gait::from_tables(p0, QuadrupedTypes::same(table), None)
    }

    /// Sequential single-leg swing. Swing takes a quarter of the cycle per
    /// leg, stance is a linear backward sweep over the remaining three
    /// quarters. Swing order is FL, BR, FR, BL.
    pub fn walk(p0: LegPositions, params: &GaitParams) -> Self {
        let n = params.num_steps();
        let stride = params.stride;
        let x = concat(&[
            scaled(&negated(&curves::stride_front_to_back(n)), stride),
            scaled(&curves::stride_front_to_back(3 * n), stride),
        ]);
        let z = scaled(
            &concat(&[curves::updown(n), curves::zeros(3 * n)]),
            -params.clearance,
        );
        let y = curves::zeros(4 * n);
        let base = build_table(&x, &y, &z);
        // shift of s plays the swing (4n − s) steps into the cycle
        let phases = [2 * n, 0, n, 3 * n];
        let steps = QuadrupedTypes::from_fn(|leg| phase_shifted(&base, phases[leg.index()]));
        Gait::from_tables(p0, steps, None)
    }

    /// Trot with zero stride; the diagonal pairs alternate lifting.
    pub fn trot_in_place(p0: LegPositions, params: &GaitParams) -> Self {
        let n = params.num_steps();
        let z = scaled(
            &concat(&[curves::updown(n), curves::zeros(n)]),
            -params.clearance,
        );
        let x = curves::zeros(2 * n);
        let y = curves::zeros(2 * n);
        let lead = build_table(&x, &y, &z);
        let trail = phase_shifted(&lead, n);
        Gait::from_tables(p0, diagonal_pairs(lead, trail), None)
    }

    pub fn cycle_len(&self) -> usize {
        self.cycle_len
    }

    pub fn restart(&mut self) {
        self.index = 0;
    }

    fn positions_at(&self, index: usize) -> LegPositions {
        self.p0.map(|leg, position| {
            let mut offset = self.steps.leg(leg)[index];
            if let Some(bias) = self.turn_bias {
                let inner_side = if bias > 0.0 {
                    leg.is_left()
                } else {
                    leg.is_right()
                };
                if bias != 0.0 && inner_side {
                    offset.x *= 1.0 - bias.abs();
                }
            }
            position + offset
        })
    }
}

impl Iterator for Gait {
    type Item = LegPositions;

    fn next(&mut self) -> Option<Self::Item> {
        let positions = self.positions_at(self.index);
        self.index = (self.index + 1) % self.cycle_len;
        Some(positions)
    }
}

fn signed_stride(stride: f32, reversed: bool) -> f32 {
    if reversed {
        -stride
    } else {
        stride
    }
}

fn concat(segments: &[Vec<f32>]) -> Vec<f32> {
    segments.iter().flatten().copied().collect()
}

fn scaled(samples: &[f32], factor: f32) -> Vec<f32> {
    samples.iter().map(|sample| sample * factor).collect()
}

fn negated(samples: &[f32]) -> Vec<f32> {
    scaled(samples, -1.0)
}

fn build_table(x: &[f32], y: &[f32], z: &[f32]) -> Vec<Vector3<f32>> {
    debug_assert!(x.len() == y.len() && y.len() == z.len());
    x.iter()
        .zip(y.iter())
        .zip(z.iter())
        .map(|((&x, &y), &z)| Vector3::new(x, y, z))
        .collect()
}

/// The table read `shift` samples ahead, wrapping at the cycle end.
fn phase_shifted(table: &[Vector3<f32>], shift: usize) -> Vec<Vector3<f32>> {
    let len = table.len();
    (0..len).map(|i| table[(i + shift) % len]).collect()
}

fn add_y(table: &[Vector3<f32>], y: &[f32]) -> Vec<Vector3<f32>> {
    table
        .iter()
        .zip(y.iter())
        .map(|(offset, &sway)| Vector3::new(offset.x, offset.y + sway, offset.z))
        .collect()
}

fn sway_wave(cycle_len: usize, amplitude: f32) -> Vec<f32> {
    (0..cycle_len)
        .map(|i| {
            (i as f32 / cycle_len as f32 * std::f32::consts::TAU).sin() * amplitude
        })
        .collect()
}

/// Pair (FR, BL) shares the lead table, pair (FL, BR) the trailing one.
fn diagonal_pairs(
    lead: Vec<Vector3<f32>>,
    trail: Vec<Vector3<f32>>,
) -> QuadrupedTypes<Vec<Vector3<f32>>> {
    QuadrupedTypes::new(lead.clone(), trail.clone(), lead, trail)
}
