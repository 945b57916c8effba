//! Small shared enums: rotation direction, limit-switch stop direction and
//! rotation lock-out.

use serde::{Deserialize, Serialize};

/// Rotation direction. `Cw` counts positions up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Direction {
    #[default]
    Cw = 0,
    Ccw = 1,
}

impl Direction {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Cw),
            1 => Some(Self::Ccw),
            _ => None,
        }
    }

    /// Direction of travel for a signed delta. Zero maps to `Cw`.
    #[inline]
    pub const fn of(delta: i64) -> Self {
        if delta < 0 { Self::Ccw } else { Self::Cw }
    }

    /// +1 for `Cw`, -1 for `Ccw`.
    #[inline]
    pub const fn sign(&self) -> i64 {
        match self {
            Self::Cw => 1,
            Self::Ccw => -1,
        }
    }

    #[inline]
    pub const fn reversed(&self) -> Self {
        match self {
            Self::Cw => Self::Ccw,
            Self::Ccw => Self::Cw,
        }
    }
}

/// Movement direction that halts when a position code is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StopDirection {
    #[default]
    None = 0,
    Cw = 1,
    Ccw = 2,
    Both = 3,
}

impl StopDirection {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Cw),
            2 => Some(Self::Ccw),
            3 => Some(Self::Both),
            _ => None,
        }
    }

    /// Whether movement in `dir` stops here.
    #[inline]
    pub const fn stops(&self, dir: Direction) -> bool {
        matches!(
            (self, dir),
            (Self::Both, _) | (Self::Cw, Direction::Cw) | (Self::Ccw, Direction::Ccw)
        )
    }

    /// The single direction this code stops, if exactly one.
    #[inline]
    pub const fn single(&self) -> Option<Direction> {
        match self {
            Self::Cw => Some(Direction::Cw),
            Self::Ccw => Some(Direction::Ccw),
            _ => None,
        }
    }
}

/// Rotation directions a movement may start in at a position code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RotationLock {
    #[default]
    Both = 0,
    CwOnly = 1,
    CcwOnly = 2,
    Locked = 3,
}

impl RotationLock {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Both),
            1 => Some(Self::CwOnly),
            2 => Some(Self::CcwOnly),
            3 => Some(Self::Locked),
            _ => None,
        }
    }

    #[inline]
    pub const fn allows(&self, dir: Direction) -> bool {
        matches!(
            (self, dir),
            (Self::Both, _) | (Self::CwOnly, Direction::Cw) | (Self::CcwOnly, Direction::Ccw)
        )
    }
}
