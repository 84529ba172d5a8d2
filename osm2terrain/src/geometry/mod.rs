mod spline;
mod vec2;

pub use self::spline::{InterpolationMode, RoadSpline, SplineSample};
pub use self::vec2::Vec2;
