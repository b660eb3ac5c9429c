use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Latitude out of range: {0}")]
    LatitudeOutOfRange(f64),

    #[error("Longitude out of range: {0}")]
    LongitudeOutOfRange(f64),

    #[error("Coordinate is not a finite number")]
    NonFiniteCoordinate,
}

pub type Result<T> = std::result::Result<T, CoreError>;
