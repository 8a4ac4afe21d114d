pub mod fare;
pub mod geo;
pub mod id_generator;
