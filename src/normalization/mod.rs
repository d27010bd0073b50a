//! Text normalization shared by the canonicalizer and the matcher.
pub mod showtime;
pub mod title;
