pub mod inspect;
pub mod patch;
