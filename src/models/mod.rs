pub mod customization;
pub mod intake;
pub mod job;
pub mod order;
pub mod payload;
pub mod quality;
pub mod render_config;
