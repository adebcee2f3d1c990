use bitflags::bitflags;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container holding one value per leg.
///
/// Leg order follows the body layout with the origin at the geometric
/// center, +x forward and +y left:
///
/// ```text
///     FL - FR
///      |    |
///     BL - BR
/// ```
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct QuadrupedTypes<T: Clone> {
    front_right: T,
    front_left: T,
    back_left: T,
    back_right: T,
}

impl<T: Clone> QuadrupedTypes<T> {
    pub fn new(front_right: T, front_left: T, back_left: T, back_right: T) -> Self {
        Self {
            front_right,
            front_left,
            back_left,
            back_right,
        }
    }

    pub fn same(value: T) -> Self {
        Self {
            front_right: value.clone(),
            front_left: value.clone(),
            back_left: value.clone(),
            back_right: value,
        }
    }

    pub fn from_fn(mut producer: impl FnMut(LegId) -> T) -> Self {
        Self {
            front_right: producer(LegId::FrontRight),
            front_left: producer(LegId::FrontLeft),
            back_left: producer(LegId::BackLeft),
            back_right: producer(LegId::BackRight),
        }
    }

    pub fn front_right(&self) -> &T {
        &self.front_right
    }

    pub fn front_left(&self) -> &T {
        &self.front_left
    }

    pub fn back_left(&self) -> &T {
        &self.back_left
    }

    pub fn back_right(&self) -> &T {
        &self.back_right
    }

    pub fn leg(&self, leg: LegId) -> &T {
        match leg {
            LegId::FrontRight => &self.front_right,
            LegId::FrontLeft => &self.front_left,
            LegId::BackLeft => &self.back_left,
            LegId::BackRight => &self.back_right,
        }
    }

    pub fn leg_mut(&mut self, leg: LegId) -> &mut T {
        match leg {
            LegId::FrontRight => &mut self.front_right,
            LegId::FrontLeft => &mut self.front_left,
            LegId::BackLeft => &mut self.back_left,
            LegId::BackRight => &mut self.back_right,
        }
    }

    /// All legs in canonical index order (FR, FL, BL, BR).
    pub fn all_legs(&self) -> [&T; 4] {
        [
            &self.front_right,
            &self.front_left,
            &self.back_left,
            &self.back_right,
        ]
    }

    pub fn map<U: Clone>(&self, mut mapper: impl FnMut(LegId, &T) -> U) -> QuadrupedTypes<U> {
        QuadrupedTypes {
            front_right: mapper(LegId::FrontRight, &self.front_right),
            front_left: mapper(LegId::FrontLeft, &self.front_left),
            back_left: mapper(LegId::BackLeft, &self.back_left),
            back_right: mapper(LegId::BackRight, &self.back_right),
        }
    }

    pub fn selected_legs(&self, legs: LegFlags) -> Vec<&T> {
        let mut selected = Vec::with_capacity(4);
        if legs.contains(LegFlags::FRONT_RIGHT) {
            selected.push(&self.front_right);
        }
        if legs.contains(LegFlags::FRONT_LEFT) {
            selected.push(&self.front_left);
        }
        if legs.contains(LegFlags::BACK_LEFT) {
            selected.push(&self.back_left);
        }
        if legs.contains(LegFlags::BACK_RIGHT) {
            selected.push(&self.back_right);
        }
        selected
    }
}

impl<T: Clone + Copy> Copy for QuadrupedTypes<T> {}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LegFlags: u32 {
        const FRONT_RIGHT = 0b0001;
        const FRONT_LEFT = 0b0010;
        const BACK_LEFT = 0b0100;
        const BACK_RIGHT = 0b1000;
        const FRONT = Self::FRONT_RIGHT.bits() | Self::FRONT_LEFT.bits();
        const BACK = Self::BACK_LEFT.bits() | Self::BACK_RIGHT.bits();
        const LEFT = Self::FRONT_LEFT.bits() | Self::BACK_LEFT.bits();
        const RIGHT = Self::FRONT_RIGHT.bits() | Self::BACK_RIGHT.bits();
        const FR_BL_PAIR = Self::FRONT_RIGHT.bits() | Self::BACK_LEFT.bits();
        const FL_BR_PAIR = Self::FRONT_LEFT.bits() | Self::BACK_RIGHT.bits();
        const ALL = Self::FRONT.bits() | Self::BACK.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegId {
    FrontRight,
    FrontLeft,
    BackLeft,
    BackRight,
}

impl LegId {
    pub const ALL: [LegId; 4] = [
        LegId::FrontRight,
        LegId::FrontLeft,
        LegId::BackLeft,
        LegId::BackRight,
    ];

    pub fn as_flag(&self) -> LegFlags {
        match self {
            LegId::FrontRight => LegFlags::FRONT_RIGHT,
            LegId::FrontLeft => LegFlags::FRONT_LEFT,
            LegId::BackLeft => LegFlags::BACK_LEFT,
            LegId::BackRight => LegFlags::BACK_RIGHT,
        }
    }

    pub fn is_left(&self) -> bool {
        matches!(self, LegId::FrontLeft | LegId::BackLeft)
    }

    pub fn is_right(&self) -> bool {
        !self.is_left()
    }

    pub fn index(&self) -> usize {
        match self {
            LegId::FrontRight => 0,
            LegId::FrontLeft => 1,
            LegId::BackLeft => 2,
            LegId::BackRight => 3,
        }
    }
}

impl fmt::Display for LegId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LegId::FrontRight => "front right",
            LegId::FrontLeft => "front left",
            LegId::BackLeft => "back left",
            LegId::BackRight => "back right",
        };
        write!(formatter, "{}", name)
    }
}

/// One value per joint of a single leg, ordered from body to foot.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct JointTriple<T: Clone> {
    coxa: T,
    femur: T,
    tibia: T,
}

impl<T: Clone> JointTriple<T> {
    pub fn new(coxa: T, femur: T, tibia: T) -> Self {
        Self { coxa, femur, tibia }
    }

    pub fn from_array(values: [T; 3]) -> Self {
        let [coxa, femur, tibia] = values;
        Self { coxa, femur, tibia }
    }
}

impl<T: Clone + Copy> JointTriple<T> {
    pub fn coxa(&self) -> T {
        self.coxa
    }

    pub fn femur(&self) -> T {
        self.femur
    }

    pub fn tibia(&self) -> T {
        self.tibia
    }

    pub fn to_array(&self) -> [T; 3] {
        [self.coxa, self.femur, self.tibia]
    }
}

impl<T: Clone + Copy> Copy for JointTriple<T> {}

/// Foot positions in the body frame (mm, +z up means hip above foot).
pub type LegPositions = QuadrupedTypes<Point3<f32>>;

/// Joint angles in radians, [coxa, femur, tibia] per leg.
pub type JointAngles = QuadrupedTypes<JointTriple<f32>>;

/// Signed millimetre offsets added to every commanded foot position.
pub type PositionOffsets = QuadrupedTypes<Vector3<f32>>;

impl LegPositions {
    pub fn translated(&self, offsets: &PositionOffsets) -> LegPositions {
        self.map(|leg, position| position + offsets.leg(leg))
    }

    pub fn translated_all(&self, offset: Vector3<f32>) -> LegPositions {
        self.map(|_, position| position + offset)
    }

    /// Mean hip height over the feet, used as the body height estimate.
    pub fn mean_height(&self) -> f32 {
        self.all_legs().iter().map(|position| position.z).sum::<f32>() / 4.0
    }

    pub fn to_array(&self) -> [[f32; 3]; 4] {
        let legs = self.all_legs();
        [
            [legs[0].x, legs[0].y, legs[0].z],
            [legs[1].x, legs[1].y, legs[1].z],
            [legs[2].x, legs[2].y, legs[2].z],
            [legs[3].x, legs[3].y, legs[3].z],
        ]
    }
}

impl PositionOffsets {
    pub fn zeros() -> PositionOffsets {
        PositionOffsets::same(Vector3::zeros())
    }

    pub fn to_array(&self) -> [[f32; 3]; 4] {
        let legs = self.all_legs();
        [
            [legs[0].x, legs[0].y, legs[0].z],
            [legs[1].x, legs[1].y, legs[1].z],
            [legs[2].x, legs[2].y, legs[2].z],
            [legs[3].x, legs[3].y, legs[3].z],
        ]
    }
}

impl JointAngles {
    pub fn zeros() -> JointAngles {
        JointAngles::same(JointTriple::new(0.0, 0.0, 0.0))
    }

    pub fn from_array(values: [[f32; 3]; 4]) -> JointAngles {
        JointAngles::from_fn(|leg| JointTriple::from_array(values[leg.index()]))
    }

    pub fn to_array(&self) -> [[f32; 3]; 4] {
        let legs = self.all_legs();
        [
            legs[0].to_array(),
            legs[1].to_array(),
            legs[2].to_array(),
            legs[3].to_array(),
        ]
    }

    pub fn to_degrees(&self) -> [[f32; 3]; 4] {
        let mut degrees = self.to_array();
        for leg in degrees.iter_mut() {
            for angle in leg.iter_mut() {
                *angle = angle.to_degrees();
            }
        }
        degrees
    }
}
