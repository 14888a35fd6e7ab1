pub mod numeric;

pub use numeric::{decode_angle, decode_u32_be, decode_x, decode_y, AngleReading};
